//! Input validation at the engine boundary
//!
//! Everything here runs synchronously inside `submit`, before any background
//! work starts, so callers get parameter problems back immediately.

use crate::{generation::GenerationRequest, CoreError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Largest accepted temperature
pub const MAX_TEMPERATURE: f32 = 2.0;
/// Largest accepted prompt length, in tokens
pub const MAX_PROMPT_LEN: usize = 1024;
/// Largest accepted generation length, in tokens
pub const MAX_GEN_LEN: usize = 1024;

/// Validation utilities for common operations
pub struct Validator;

impl Validator {
    /// Validate the parameters of a generation request
    pub fn validate_generation_request(request: &GenerationRequest) -> Result<()> {
        Self::validate_temperature(request.temperature)?;
        Self::validate_top_p(request.top_p)?;
        Self::validate_length("prompt_len", request.prompt_len, MAX_PROMPT_LEN)?;
        Self::validate_length("max_gen_len", request.max_gen_len, MAX_GEN_LEN)?;
        Ok(())
    }

    /// Validate a sampling temperature
    pub fn validate_temperature(temperature: f32) -> Result<()> {
        if !temperature.is_finite() || !(0.0..=MAX_TEMPERATURE).contains(&temperature) {
            return Err(CoreError::invalid_parameter(
                "INVALID_TEMPERATURE",
                format!("Temperature {} is out of range", temperature),
                "Generation request validation",
                "Use 0 for greedy decoding or up to 2.0 for more variety",
                "temperature",
                temperature.to_string(),
                "0.0 to 2.0",
            ));
        }
        Ok(())
    }

    /// Validate a nucleus threshold
    pub fn validate_top_p(top_p: f32) -> Result<()> {
        if !top_p.is_finite() || !(0.0..=1.0).contains(&top_p) {
            return Err(CoreError::invalid_parameter(
                "INVALID_TOP_P",
                format!("top_p {} is out of range", top_p),
                "Generation request validation",
                "Use 1.0 to disable nucleus filtering",
                "top_p",
                top_p.to_string(),
                "0.0 to 1.0",
            ));
        }
        Ok(())
    }

    /// Check that a prompt leaves room to generate within the sequence limit
    pub fn validate_context_budget(prompt_len: usize, max_sequence_length: usize) -> Result<()> {
        if prompt_len >= max_sequence_length {
            return Err(CoreError::invalid_parameter(
                "PROMPT_EXCEEDS_CONTEXT",
                format!(
                    "prompt_len {} leaves no room below max_sequence_length {}",
                    prompt_len, max_sequence_length
                ),
                "Generation request validation",
                "Lower prompt_len or raise max_sequence_length in the engine configuration",
                "prompt_len",
                prompt_len.to_string(),
                format!("1 to {}", max_sequence_length.saturating_sub(1)),
            ));
        }
        Ok(())
    }

    fn validate_length(name: &'static str, value: usize, max: usize) -> Result<()> {
        if value == 0 || value > max {
            let code = match name {
                "prompt_len" => "INVALID_PROMPT_LEN",
                _ => "INVALID_MAX_GEN_LEN",
            };
            return Err(CoreError::invalid_parameter(
                code,
                format!("{} must be between 1 and {}, got {}", name, max, value),
                "Generation request validation",
                "Lengths are counted in tokens; a note takes 3 to 4 tokens",
                name,
                value.to_string(),
                format!("1 to {}", max),
            ));
        }
        Ok(())
    }

    /// Validate a source MIDI file path
    pub fn validate_midi_path<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CoreError::file_not_found(path));
        }
        if !path.is_file() {
            return Err(CoreError::invalid_parameter(
                "MIDI_PATH_NOT_FILE",
                format!("MIDI path is not a file: {}", path.display()),
                "Generation request validation",
                "Provide a path to a .mid file, not a directory",
                "midi_path",
                path.display().to_string(),
                "an existing file",
            ));
        }
        fs::File::open(path).map_err(|e| CoreError::from(e).with_path(path))?;
        Ok(path.to_path_buf())
    }

    /// Validate a model artifact path
    pub fn validate_model_path<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
        let path = path.as_ref();
        let path_buf = path.to_path_buf();

        if !path.is_file() {
            return Err(CoreError::model_load(
                "MODEL_FILE_NOT_FOUND",
                format!("Model file does not exist: {}", path.display()),
                format!("Attempted to load model from: {}", path.display()),
                "Check the file path is correct and the model file exists",
                path_buf,
            ));
        }

        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if ext != "onnx" && ext != "ort" {
            return Err(CoreError::model_load(
                "MODEL_UNSUPPORTED_FORMAT",
                format!("Unsupported model file format: '{}'", ext),
                format!("File: {}", path.display()),
                "Supported formats: .onnx, .ort",
                path_buf,
            ));
        }

        match fs::metadata(path) {
            Ok(metadata) if metadata.len() == 0 => Err(CoreError::model_load(
                "MODEL_FILE_EMPTY",
                "Model file is empty",
                format!("File: {} (0 bytes)", path.display()),
                "Ensure the model file is properly downloaded and not corrupted",
                path_buf,
            )),
            Ok(_) => Ok(path_buf),
            Err(e) => Err(CoreError::model_load(
                "MODEL_FILE_ACCESS_ERROR",
                format!("Cannot access model file: {}", e),
                format!("File: {}", path.display()),
                "Check file permissions and ensure the file is not locked",
                path_buf,
            )),
        }
    }
}
