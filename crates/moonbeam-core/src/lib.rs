//! Moonbeam Core - MIDI continuation engine
//!
//! This crate turns a MIDI seed phrase into a continuation using a pretrained
//! autoregressive model. It provides the MIDI tokenizer, the sampling
//! controller, the model session, the generation loop and the single-flight
//! executor that runs generations off the caller's thread.

// Module declarations
pub mod config;
pub mod engine;
pub mod generation;
pub mod model;
pub mod progress;
pub mod sampling;
pub mod session;
pub mod tokenizer;
pub mod validation;

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Out-of-range or inconsistent parameters, rejected before any work starts
    #[error("Configuration error [{code}]: {message}\nContext: {context}\nSuggestion: {suggestion}")]
    Configuration {
        code: &'static str,
        message: String,
        context: String,
        suggestion: String,
        parameter_name: Option<String>,
        value: Option<String>,
        valid_range: Option<String>,
    },

    /// No inference artifact is loaded
    #[error("Model unavailable [{code}]: {message}\nSuggestion: {suggestion}")]
    ModelUnavailable {
        code: &'static str,
        message: String,
        suggestion: String,
        model_path: Option<PathBuf>,
    },

    /// The inference artifact could not be found or loaded
    #[error("Model load error [{code}]: {message}\nContext: {context}\nSuggestion: {suggestion}")]
    ModelLoad {
        code: &'static str,
        message: String,
        context: String,
        suggestion: String,
        file_path: Option<PathBuf>,
    },

    /// The source MIDI file does not exist
    #[error("File not found [{code}]: {path:?}\nSuggestion: {suggestion}")]
    FileNotFound {
        code: &'static str,
        path: PathBuf,
        suggestion: String,
    },

    /// Unparsable MIDI, or MIDI without any note events
    #[error("Malformed input [{code}]: {message}\nContext: {context}\nSuggestion: {suggestion}")]
    MalformedInput {
        code: &'static str,
        message: String,
        context: String,
        suggestion: String,
        file_path: Option<PathBuf>,
    },

    /// Runtime failure during a decode step
    #[error("Inference error [{code}]: {message}\nContext: {context}\nSuggestion: {suggestion}")]
    Inference {
        code: &'static str,
        message: String,
        context: String,
        suggestion: String,
        step: Option<usize>,
    },

    /// A generation is already in flight
    #[error("Engine busy [{code}]: {message}")]
    Busy {
        code: &'static str,
        message: String,
        active_job: Option<Uuid>,
    },

    /// Cooperative cancellation was honored
    #[error("Generation cancelled [{code}]: {message}")]
    Cancelled {
        code: &'static str,
        message: String,
        step: Option<usize>,
    },

    /// File system and I/O errors
    #[error("IO error [{code}]: {message}\nPath: {path:?}\nSuggestion: {suggestion}")]
    Io {
        code: &'static str,
        message: String,
        path: Option<PathBuf>,
        suggestion: String,
        #[source]
        source: std::io::Error,
    },

    /// Other unexpected errors
    #[error("Internal error [{code}]: {message}\nContext: {context}")]
    Internal {
        code: &'static str,
        message: String,
        context: String,
        #[source]
        source: Option<anyhow::Error>,
    },
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Coarse error classification for programmatic matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    ModelUnavailable,
    ModelLoad,
    FileNotFound,
    MalformedInput,
    Inference,
    Busy,
    Cancelled,
    Io,
    Internal,
}

impl CoreError {
    /// Create a configuration error
    pub fn configuration<S1, S2, S3>(
        code: &'static str,
        message: S1,
        context: S2,
        suggestion: S3,
    ) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self::Configuration {
            code,
            message: message.into(),
            context: context.into(),
            suggestion: suggestion.into(),
            parameter_name: None,
            value: None,
            valid_range: None,
        }
    }

    /// Create a configuration error with parameter validation details
    pub fn invalid_parameter<S1, S2, S3, S4, S5, S6>(
        code: &'static str,
        message: S1,
        context: S2,
        suggestion: S3,
        param_name: S4,
        value: S5,
        valid_range: S6,
    ) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
        S4: Into<String>,
        S5: Into<String>,
        S6: Into<String>,
    {
        Self::Configuration {
            code,
            message: message.into(),
            context: context.into(),
            suggestion: suggestion.into(),
            parameter_name: Some(param_name.into()),
            value: Some(value.into()),
            valid_range: Some(valid_range.into()),
        }
    }

    /// Create a model-unavailable error
    pub fn model_unavailable<S1, S2>(
        code: &'static str,
        message: S1,
        suggestion: S2,
        model_path: Option<PathBuf>,
    ) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self::ModelUnavailable {
            code,
            message: message.into(),
            suggestion: suggestion.into(),
            model_path,
        }
    }

    /// Create a model load error with file path
    pub fn model_load<S1, S2, S3, P>(
        code: &'static str,
        message: S1,
        context: S2,
        suggestion: S3,
        path: P,
    ) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
        P: Into<PathBuf>,
    {
        Self::ModelLoad {
            code,
            message: message.into(),
            context: context.into(),
            suggestion: suggestion.into(),
            file_path: Some(path.into()),
        }
    }

    /// Create a file-not-found error for a source file
    pub fn file_not_found<P: Into<PathBuf>>(path: P) -> Self {
        Self::FileNotFound {
            code: "MIDI_FILE_NOT_FOUND",
            path: path.into(),
            suggestion: "Check the file path and ensure the MIDI file exists".to_string(),
        }
    }

    /// Create a malformed input error
    pub fn malformed_input<S1, S2, S3>(
        code: &'static str,
        message: S1,
        context: S2,
        suggestion: S3,
    ) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self::MalformedInput {
            code,
            message: message.into(),
            context: context.into(),
            suggestion: suggestion.into(),
            file_path: None,
        }
    }

    /// Create an inference error
    pub fn inference<S1, S2, S3>(
        code: &'static str,
        message: S1,
        context: S2,
        suggestion: S3,
    ) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self::Inference {
            code,
            message: message.into(),
            context: context.into(),
            suggestion: suggestion.into(),
            step: None,
        }
    }

    /// Create a busy error naming the job that holds the engine
    pub fn busy(active_job: Option<Uuid>) -> Self {
        let message = match active_job {
            Some(id) => format!("Generation {} is still in flight", id),
            None => "A generation is still in flight".to_string(),
        };
        Self::Busy {
            code: "ENGINE_BUSY",
            message,
            active_job,
        }
    }

    /// Create a cancellation error
    pub fn cancelled(step: Option<usize>) -> Self {
        let message = match step {
            Some(step) => format!("Generation cancelled before decode step {}", step),
            None => "Generation cancelled".to_string(),
        };
        Self::Cancelled {
            code: "GENERATION_CANCELLED",
            message,
            step,
        }
    }

    /// Create an internal error
    pub fn internal<S1, S2>(code: &'static str, message: S1, context: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self::Internal {
            code,
            message: message.into(),
            context: context.into(),
            source: None,
        }
    }

    /// Attach the source file to a malformed input or model load error
    pub fn with_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        match &mut self {
            Self::MalformedInput { file_path, .. } | Self::ModelLoad { file_path, .. } => {
                *file_path = Some(path.into());
            }
            Self::Io { path: io_path, .. } => *io_path = Some(path.into()),
            _ => {}
        }
        self
    }

    /// Attach the decode step to an inference or cancellation error
    pub fn at_step(mut self, at: usize) -> Self {
        match &mut self {
            Self::Inference { step, .. } | Self::Cancelled { step, .. } => *step = Some(at),
            _ => {}
        }
        self
    }

    /// Get the error code for programmatic handling
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration { code, .. } => code,
            Self::ModelUnavailable { code, .. } => code,
            Self::ModelLoad { code, .. } => code,
            Self::FileNotFound { code, .. } => code,
            Self::MalformedInput { code, .. } => code,
            Self::Inference { code, .. } => code,
            Self::Busy { code, .. } => code,
            Self::Cancelled { code, .. } => code,
            Self::Io { code, .. } => code,
            Self::Internal { code, .. } => code,
        }
    }

    /// Get the error classification
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::ModelUnavailable { .. } => ErrorKind::ModelUnavailable,
            Self::ModelLoad { .. } => ErrorKind::ModelLoad,
            Self::FileNotFound { .. } => ErrorKind::FileNotFound,
            Self::MalformedInput { .. } => ErrorKind::MalformedInput,
            Self::Inference { .. } => ErrorKind::Inference,
            Self::Busy { .. } => ErrorKind::Busy,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Io { .. } => ErrorKind::Io,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        let (code, suggestion) = match err.kind() {
            std::io::ErrorKind::NotFound => (
                "IO_FILE_NOT_FOUND",
                "Check that the file path is correct and the file exists"
            ),
            std::io::ErrorKind::PermissionDenied => (
                "IO_PERMISSION_DENIED",
                "Check file permissions or run with appropriate privileges"
            ),
            std::io::ErrorKind::InvalidData => (
                "IO_INVALID_DATA",
                "The file may be corrupted or in an unexpected format"
            ),
            _ => (
                "IO_UNKNOWN",
                "Check the file system and try the operation again"
            ),
        };

        Self::Io {
            code,
            message: err.to_string(),
            path: None,
            suggestion: suggestion.to_string(),
            source: err,
        }
    }
}

impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal {
            code: "INTERNAL_UNKNOWN",
            message: err.to_string(),
            context: "An unexpected error occurred".to_string(),
            source: Some(err),
        }
    }
}

/// Prelude module for common imports
pub mod prelude {
    pub use crate::{
        config::EngineConfig,
        engine::{InferenceEngine, JobHandle},
        generation::{
            FinishReason, GenerationConfig, GenerationRequest, GenerationResult, GenerationStats,
        },
        model::{Model, ModelInfo, ModelOutput, ModelState},
        progress::{ProgressEvent, ProgressKind, ProgressSink},
        sampling::{sample, SamplingParams},
        session::{InferenceOutput, ModelSession, SessionConfig, SessionStats},
        tokenizer::{MidiTokenizer, Note, TokenId, TokenSequence, TokenizerConfig},
        validation::Validator,
        CoreError, ErrorKind, Result,
    };
}

// Re-export key types at the crate root
pub use config::EngineConfig;
pub use engine::InferenceEngine;
pub use generation::GenerationRequest;
pub use session::ModelSession;

pub mod error {
    pub use super::{CoreError, ErrorKind, Result};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_parameter_carries_details() {
        let error = CoreError::invalid_parameter(
            "MAX_GEN_LEN_OUT_OF_RANGE",
            "max_gen_len must be at least 1",
            "Generation request validation",
            "Request at least one generated token",
            "max_gen_len",
            "0",
            "1 to 1024",
        );

        assert_eq!(error.code(), "MAX_GEN_LEN_OUT_OF_RANGE");
        assert_eq!(error.kind(), ErrorKind::Configuration);
        assert!(error.to_string().contains("at least 1"));
        match error {
            CoreError::Configuration { parameter_name, valid_range, .. } => {
                assert_eq!(parameter_name.as_deref(), Some("max_gen_len"));
                assert_eq!(valid_range.as_deref(), Some("1 to 1024"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_step_and_path_attachment() {
        let error = CoreError::inference("SHAPE_MISMATCH", "bad shape", "forward", "retry").at_step(7);
        assert!(matches!(error, CoreError::Inference { step: Some(7), .. }));

        let error = CoreError::malformed_input("MIDI_NO_NOTES", "empty", "encode", "use another file")
            .with_path("seed.mid");
        match error {
            CoreError::MalformedInput { file_path, .. } => {
                assert_eq!(file_path, Some(PathBuf::from("seed.mid")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let error: CoreError = io.into();
        assert_eq!(error.code(), "IO_FILE_NOT_FOUND");
        assert_eq!(error.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_busy_names_active_job() {
        let id = Uuid::new_v4();
        let error = CoreError::busy(Some(id));
        assert_eq!(error.kind(), ErrorKind::Busy);
        assert!(error.to_string().contains(&id.to_string()));
    }
}
