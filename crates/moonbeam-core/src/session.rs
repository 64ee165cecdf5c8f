//! Model session: the loaded inference artifact and its usage counters

use crate::{
    model::{Model, ModelInfo, ModelState},
    tokenizer::{TokenId, VOCAB_SIZE},
    validation::Validator,
    CoreError, Result,
};
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};
use uuid::Uuid;

/// Configuration for a model session
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Intra-op thread count for the inference runtime
    pub intra_threads: usize,
    /// Name of the token id input tensor (first graph input when unset)
    pub input_name: Option<String>,
    /// Name of the logits output tensor (first graph output when unset)
    pub output_name: Option<String>,
    /// Context window of the artifact; inputs are tail-windowed to it
    pub context_length: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            intra_threads: 1,
            input_name: None,
            output_name: None,
            context_length: None,
        }
    }
}

/// Logits for the next position plus backend state for the following call
#[derive(Debug)]
pub struct InferenceOutput {
    pub logits: Vec<f32>,
    pub state: Option<ModelState>,
}

/// Owns a loaded model and lends it to one generation at a time
pub struct ModelSession {
    /// Unique session ID
    id: String,
    model: Arc<dyn Model>,
    config: SessionConfig,
    artifact_path: Option<PathBuf>,
    tokens_processed: AtomicUsize,
    inference_calls: AtomicU64,
    created_at: Instant,
}

impl ModelSession {
    /// Load an inference artifact from disk
    pub fn load<P: AsRef<Path>>(path: P, config: &SessionConfig) -> Result<Self> {
        let path = Validator::validate_model_path(path)?;

        let model = Self::load_backend(&path, config)?;
        let mut session = Self::from_model(model, config.clone())?;
        session.artifact_path = Some(path);
        Ok(session)
    }

    #[cfg(feature = "onnx")]
    fn load_backend(path: &Path, config: &SessionConfig) -> Result<Arc<dyn Model>> {
        let model = crate::model::onnx::OnnxModel::load(path, config, VOCAB_SIZE)?;
        Ok(Arc::new(model))
    }

    #[cfg(not(feature = "onnx"))]
    fn load_backend(path: &Path, _config: &SessionConfig) -> Result<Arc<dyn Model>> {
        Err(CoreError::model_load(
            "BACKEND_UNAVAILABLE",
            "This build has no ONNX Runtime backend",
            "Loading model session",
            "Rebuild with `--features onnx`",
            path,
        ))
    }

    /// Wrap an already constructed model
    ///
    /// The model must score exactly the tokenizer's vocabulary.
    pub fn from_model(model: Arc<dyn Model>, config: SessionConfig) -> Result<Self> {
        if model.vocab_size() != VOCAB_SIZE {
            return Err(CoreError::configuration(
                "VOCAB_SIZE_MISMATCH",
                format!(
                    "Model '{}' has a vocabulary of {} tokens, the tokenizer has {}",
                    model.name(),
                    model.vocab_size(),
                    VOCAB_SIZE
                ),
                "Creating model session",
                "Use a model trained on the Moonbeam music vocabulary",
            ));
        }

        let id = Uuid::new_v4().to_string();
        info!(
            "Created model session '{}' for {} ({} vocab)",
            id,
            model.name(),
            model.vocab_size()
        );
        Ok(Self {
            id,
            model,
            config,
            artifact_path: None,
            tokens_processed: AtomicUsize::new(0),
            inference_calls: AtomicU64::new(0),
            created_at: Instant::now(),
        })
    }

    /// Get session ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Path the model was loaded from, if any
    pub fn artifact_path(&self) -> Option<&Path> {
        self.artifact_path.as_deref()
    }

    /// Describe the loaded model
    pub fn model_info(&self) -> ModelInfo {
        let mut info = ModelInfo::from_model(self.model.as_ref());
        info.context_length = self.context_length();
        info
    }

    /// Vocabulary size of the model
    pub fn vocab_size(&self) -> usize {
        self.model.vocab_size()
    }

    /// Effective context window: the tighter of the model's and the config's
    pub fn context_length(&self) -> Option<usize> {
        match (self.model.context_length(), self.config.context_length) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Next-token logits for `tokens`
    ///
    /// Only the last `context_length` tokens reach the model. When the input
    /// is windowed, `prior_state` no longer describes a prefix and is not
    /// forwarded.
    pub fn infer(&self, tokens: &[TokenId], prior_state: Option<&ModelState>) -> Result<InferenceOutput> {
        if tokens.is_empty() {
            return Err(CoreError::inference(
                "EMPTY_INPUT",
                "Empty input tokens",
                "Model session inference",
                "Provide a non-empty token sequence",
            ));
        }

        let (window, past) = match self.context_length() {
            Some(ctx) if ctx > 0 && tokens.len() > ctx => {
                trace!("Windowing {} tokens to the last {}", tokens.len(), ctx);
                (&tokens[tokens.len() - ctx..], None)
            }
            _ => (tokens, prior_state),
        };

        let output = self.model.forward(window, past)?;

        if output.logits.len() != VOCAB_SIZE {
            return Err(CoreError::inference(
                "LOGITS_SHAPE_MISMATCH",
                format!(
                    "Model returned {} logits, expected {}",
                    output.logits.len(),
                    VOCAB_SIZE
                ),
                "Model session inference",
                "Check that the model matches the tokenizer vocabulary",
            ));
        }

        self.tokens_processed.fetch_add(window.len(), Ordering::Relaxed);
        self.inference_calls.fetch_add(1, Ordering::Relaxed);
        debug!("Session '{}' inferred over {} tokens", self.id, window.len());

        Ok(InferenceOutput {
            logits: output.logits,
            state: output.state,
        })
    }

    /// Usage counters
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            id: self.id.clone(),
            tokens_processed: self.tokens_processed.load(Ordering::Relaxed),
            inference_calls: self.inference_calls.load(Ordering::Relaxed),
            age: self.created_at.elapsed(),
        }
    }
}

impl std::fmt::Debug for ModelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSession")
            .field("id", &self.id)
            .field("model", &self.model.name())
            .field("artifact_path", &self.artifact_path)
            .finish()
    }
}

/// Statistics for a session
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub id: String,
    pub tokens_processed: usize,
    pub inference_calls: u64,
    pub age: Duration,
}
