//! Configuration for the generation engine

use crate::{
    generation::GenerationConfig, session::SessionConfig, tokenizer::TokenizerConfig, CoreError,
    Result,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default inference artifact, looked up in the working directory
pub const DEFAULT_MODEL_FILE: &str = "moonbeam_309M_pop.onnx";

/// Main configuration for the inference engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory the model artifact is resolved against (process cwd when unset)
    pub working_dir: Option<PathBuf>,

    /// Model artifact path, absolute or relative to `working_dir`
    pub model_file: PathBuf,

    /// Upper bound on prompt + generated tokens held by one generation
    pub max_sequence_length: usize,

    /// Emit a progress line every this many decode steps
    pub progress_interval: usize,

    /// Model session settings
    pub session: SessionConfig,

    /// MIDI tokenizer settings
    pub tokenizer: TokenizerConfig,

    /// Default sampling parameters for new requests
    pub generation: GenerationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            working_dir: None,
            model_file: PathBuf::from(DEFAULT_MODEL_FILE),
            max_sequence_length: 2048,
            progress_interval: 16,
            session: SessionConfig::default(),
            tokenizer: TokenizerConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::from(e).with_path(path))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| {
            CoreError::configuration(
                "CONFIG_PARSE_ERROR",
                format!("Failed to parse engine configuration: {}", e),
                "Engine configuration loading",
                "Check the TOML syntax and field names",
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML text
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| {
            CoreError::internal(
                "CONFIG_SERIALIZE_ERROR",
                format!("Failed to serialize engine configuration: {}", e),
                "Engine configuration saving",
            )
        })
    }

    /// Resolve the model artifact path against the working directory
    pub fn model_path(&self) -> PathBuf {
        if self.model_file.is_absolute() {
            return self.model_file.clone();
        }
        let base = match &self.working_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().unwrap_or_default(),
        };
        base.join(&self.model_file)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_sequence_length == 0 {
            return Err(CoreError::invalid_parameter(
                "MAX_SEQUENCE_LENGTH_ZERO",
                "max_sequence_length must be greater than 0",
                "Engine configuration validation",
                "Use a sequence limit that covers prompt_len + max_gen_len",
                "max_sequence_length",
                "0",
                "1 or more",
            ));
        }

        if self.progress_interval == 0 {
            return Err(CoreError::invalid_parameter(
                "PROGRESS_INTERVAL_ZERO",
                "progress_interval must be greater than 0",
                "Engine configuration validation",
                "Use 1 to report every decode step",
                "progress_interval",
                "0",
                "1 or more",
            ));
        }

        if self.session.intra_threads == 0 {
            return Err(CoreError::invalid_parameter(
                "INTRA_THREADS_ZERO",
                "session.intra_threads must be greater than 0",
                "Engine configuration validation",
                "Use 1 to match a single-threaded host",
                "session.intra_threads",
                "0",
                "1 or more",
            ));
        }

        self.tokenizer.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.model_file, PathBuf::from(DEFAULT_MODEL_FILE));
        assert_eq!(config.session.intra_threads, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        config.max_sequence_length = 0;
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "MAX_SEQUENCE_LENGTH_ZERO");
    }

    #[test]
    fn test_model_path_resolution() {
        let mut config = EngineConfig::default();
        config.working_dir = Some(PathBuf::from("/opt/moonbeam"));
        assert_eq!(
            config.model_path(),
            PathBuf::from("/opt/moonbeam").join(DEFAULT_MODEL_FILE)
        );

        config.model_file = PathBuf::from("/models/other.onnx");
        assert_eq!(config.model_path(), PathBuf::from("/models/other.onnx"));
    }

    #[test]
    fn test_toml_round_trip_keeps_overrides() {
        let text = r#"
            max_sequence_length = 512

            [generation]
            temperature = 0.5
        "#;
        let config = EngineConfig::from_toml_str(text).unwrap();
        assert_eq!(config.max_sequence_length, 512);
        assert!((config.generation.temperature - 0.5).abs() < f32::EPSILON);
        assert!((config.generation.top_p - 0.95).abs() < f32::EPSILON);

        let serialized = config.to_toml_string().unwrap();
        let reparsed = EngineConfig::from_toml_str(&serialized).unwrap();
        assert_eq!(reparsed.max_sequence_length, 512);
    }

    #[test]
    fn test_bad_toml_is_configuration_error() {
        let err = EngineConfig::from_toml_str("max_sequence_length = \"many\"").unwrap_err();
        assert_eq!(err.code(), "CONFIG_PARSE_ERROR");
    }
}
