//! Integration tests for error codes, messages and suggestions
//!
//! Checks that the errors surfaced at each boundary carry a stable code,
//! the right classification, and a usable message.

use moonbeam_core::{
    config::EngineConfig,
    tokenizer::{MidiTokenizer, TokenizerConfig},
    validation::Validator,
    CoreError, ErrorKind, GenerationRequest, ModelSession,
};
use tempfile::tempdir;

#[cfg(test)]
mod core_error_tests {
    use super::*;

    #[test]
    fn test_model_load_error_with_file_path() {
        let temp_dir = tempdir().unwrap();
        let model_path = temp_dir.path().join("nonexistent.onnx");

        let error = ModelSession::load(&model_path, &Default::default()).unwrap_err();

        assert_eq!(error.code(), "MODEL_FILE_NOT_FOUND");
        assert_eq!(error.kind(), ErrorKind::ModelLoad);
        assert!(error.to_string().contains("nonexistent.onnx"));
        match error {
            CoreError::ModelLoad { file_path, .. } => assert_eq!(file_path, Some(model_path)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_parameter_error() {
        let request = GenerationRequest::new("seed.mid").with_temperature(3.0);
        let error = Validator::validate_generation_request(&request).unwrap_err();

        assert_eq!(error.code(), "INVALID_TEMPERATURE");
        assert!(error.to_string().contains("out of range"));
        assert!(error.to_string().contains("Suggestion"));
        match error {
            CoreError::Configuration { parameter_name, value, valid_range, .. } => {
                assert_eq!(parameter_name.as_deref(), Some("temperature"));
                assert_eq!(value.as_deref(), Some("3"));
                assert_eq!(valid_range.as_deref(), Some("0.0 to 2.0"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_file_not_found_error() {
        let temp_dir = tempdir().unwrap();
        let missing = temp_dir.path().join("missing.mid");

        let error = Validator::validate_midi_path(&missing).unwrap_err();
        assert_eq!(error.code(), "MIDI_FILE_NOT_FOUND");
        assert!(error.to_string().contains("missing.mid"));
    }
}

#[cfg(test)]
mod input_error_tests {
    use super::*;

    #[test]
    fn test_malformed_midi_carries_path() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("broken.mid");
        std::fs::write(&path, b"MThd\x00\x00").unwrap();

        let error = MidiTokenizer::default().encode_file(&path, 64).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::MalformedInput);
        match error {
            CoreError::MalformedInput { file_path, .. } => assert_eq!(file_path, Some(path)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_bad_tokenizer_config() {
        let config = TokenizerConfig { steps_per_quarter: 0, ..Default::default() };
        let error = config.validate().unwrap_err();
        assert_eq!(error.code(), "STEPS_PER_QUARTER_OUT_OF_RANGE");
    }

    #[test]
    fn test_config_file_errors() {
        let temp_dir = tempdir().unwrap();

        let error = EngineConfig::from_toml_file(temp_dir.path().join("absent.toml")).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Io);
        assert_eq!(error.code(), "IO_FILE_NOT_FOUND");

        let path = temp_dir.path().join("engine.toml");
        std::fs::write(&path, "progress_interval = 0\n").unwrap();
        let error = EngineConfig::from_toml_file(&path).unwrap_err();
        assert_eq!(error.code(), "PROGRESS_INTERVAL_ZERO");
    }
}
