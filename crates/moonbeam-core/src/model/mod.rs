//! Model trait and backends

#[cfg(feature = "onnx")]
pub mod onnx;

use crate::{tokenizer::TokenId, Result};
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Core trait for next-token models
///
/// Implementations are read-only after construction; `forward` takes `&self`
/// and must be safe to call from a blocking worker thread.
pub trait Model: Send + Sync {
    /// Get the model name
    fn name(&self) -> &str;

    /// Get the model type (e.g., "onnx")
    fn model_type(&self) -> &str;

    /// Get vocabulary size
    fn vocab_size(&self) -> usize;

    /// Get maximum context length, `None` when the backend is unbounded
    fn context_length(&self) -> Option<usize>;

    /// Forward pass through the model
    ///
    /// Returns logits for the last input position. `past` is the state a
    /// previous call returned for a prefix of `input_ids`; backends without a
    /// cache ignore it and recompute from the full input.
    fn forward(&self, input_ids: &[TokenId], past: Option<&ModelState>) -> Result<ModelOutput>;
}

/// Output from a model forward pass
pub struct ModelOutput {
    /// Next-token logits, one per vocabulary entry
    pub logits: Vec<f32>,
    /// Backend state to pass to the next call
    pub state: Option<ModelState>,
}

impl ModelOutput {
    /// Output without backend state
    pub fn logits(logits: Vec<f32>) -> Self {
        Self { logits, state: None }
    }
}

/// Opaque backend state (e.g. an attention cache) carried between calls
#[derive(Clone)]
pub struct ModelState {
    /// Number of tokens the state covers
    pub seq_len: usize,
    inner: Arc<dyn Any + Send + Sync>,
}

impl ModelState {
    /// Wrap backend-specific state
    pub fn new<T: Any + Send + Sync>(seq_len: usize, inner: T) -> Self {
        Self { seq_len, inner: Arc::new(inner) }
    }

    /// Borrow the backend-specific state, if it has type `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl fmt::Debug for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelState").field("seq_len", &self.seq_len).finish_non_exhaustive()
    }
}

/// Static description of a loaded model
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub model_type: String,
    pub vocab_size: usize,
    pub context_length: Option<usize>,
}

impl ModelInfo {
    /// Describe a model
    pub fn from_model(model: &dyn Model) -> Self {
        Self {
            name: model.name().to_string(),
            model_type: model.model_type().to_string(),
            vocab_size: model.vocab_size(),
            context_length: model.context_length(),
        }
    }
}
