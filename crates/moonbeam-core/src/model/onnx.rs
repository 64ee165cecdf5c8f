//! ONNX Runtime backend
//!
//! Runs a causal next-token model exported to ONNX. The graph takes one
//! `int64` input of shape `[1, seq]` and returns logits shaped
//! `[1, seq, vocab]` or `[1, vocab]`; only the last position is used.

use super::{Model, ModelOutput, ModelState};
use crate::{session::SessionConfig, tokenizer::TokenId, CoreError, Result};
use ndarray::{Array2, Axis};
use ort::{session::Session, value::TensorRef};
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, info};

/// A model backed by an `ort` session
pub struct OnnxModel {
    name: String,
    input_name: String,
    output_name: String,
    vocab_size: usize,
    context_length: Option<usize>,
    // `Session::run` takes `&mut self`
    session: Mutex<Session>,
}

impl OnnxModel {
    /// Load an ONNX artifact
    pub fn load(path: &Path, config: &SessionConfig, vocab_size: usize) -> Result<Self> {
        let load_err = |e: ort::Error| {
            CoreError::model_load(
                "ONNX_LOAD_FAILED",
                format!("Failed to load ONNX model: {}", e),
                "Building ONNX Runtime session",
                "Check that the file is a valid ONNX model and the runtime library is installed",
                path,
            )
        };

        let session = Session::builder()
            .map_err(load_err)?
            .with_intra_threads(config.intra_threads)
            .map_err(load_err)?
            .commit_from_file(path)
            .map_err(load_err)?;

        let input_name = match &config.input_name {
            Some(name) => name.clone(),
            None => session.inputs.first().map(|i| i.name.clone()).ok_or_else(|| {
                CoreError::model_load(
                    "ONNX_NO_INPUTS",
                    "ONNX graph declares no inputs",
                    "Resolving model input tensor",
                    "Export the model with a token id input",
                    path,
                )
            })?,
        };
        let output_name = match &config.output_name {
            Some(name) => name.clone(),
            None => session.outputs.first().map(|o| o.name.clone()).ok_or_else(|| {
                CoreError::model_load(
                    "ONNX_NO_OUTPUTS",
                    "ONNX graph declares no outputs",
                    "Resolving model output tensor",
                    "Export the model with a logits output",
                    path,
                )
            })?,
        };

        info!(
            "Loaded ONNX model {} (input '{}', output '{}', {} intra-op threads)",
            path.display(),
            input_name,
            output_name,
            config.intra_threads
        );

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "onnx".to_string());

        Ok(Self {
            name,
            input_name,
            output_name,
            vocab_size,
            context_length: config.context_length,
            session: Mutex::new(session),
        })
    }

    fn run_error(e: impl std::fmt::Display) -> CoreError {
        CoreError::inference(
            "ONNX_RUN_FAILED",
            format!("ONNX Runtime inference failed: {}", e),
            "Running model forward pass",
            "Check the model's input and output tensor names and shapes",
        )
    }
}

impl Model for OnnxModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn model_type(&self) -> &str {
        "onnx"
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn context_length(&self) -> Option<usize> {
        self.context_length
    }

    fn forward(&self, input_ids: &[TokenId], _past: Option<&ModelState>) -> Result<ModelOutput> {
        let ids: Vec<i64> = input_ids.iter().map(|&id| i64::from(id)).collect();
        let input = Array2::<i64>::from_shape_vec((1, ids.len()), ids).map_err(Self::run_error)?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![
                self.input_name.as_str() => TensorRef::from_array_view(&input).map_err(Self::run_error)?,
            ])
            .map_err(Self::run_error)?;

        let value = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            Self::run_error(format!("output '{}' missing", self.output_name))
        })?;
        let logits = value.try_extract_array::<f32>().map_err(Self::run_error)?;

        // [1, seq, vocab] or [1, vocab]: take the last row
        let row = match logits.ndim() {
            3 => {
                let seq = logits.len_of(Axis(1));
                if seq == 0 {
                    return Err(Self::run_error("empty sequence axis in logits"));
                }
                logits
                    .index_axis(Axis(0), 0)
                    .index_axis(Axis(0), seq - 1)
                    .iter()
                    .copied()
                    .collect::<Vec<f32>>()
            }
            2 => logits.index_axis(Axis(0), 0).iter().copied().collect::<Vec<f32>>(),
            n => return Err(Self::run_error(format!("unexpected logits rank {}", n))),
        };

        if row.len() != self.vocab_size {
            return Err(CoreError::inference(
                "LOGITS_SHAPE_MISMATCH",
                format!("Model returned {} logits, expected {}", row.len(), self.vocab_size),
                "Reading model output",
                "Use a model exported for this tokenizer's vocabulary",
            ));
        }

        debug!("ONNX forward over {} tokens", input_ids.len());
        Ok(ModelOutput::logits(row))
    }
}
