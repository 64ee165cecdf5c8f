//! Generation requests, configuration and results

pub mod pipeline;

use crate::{sampling::SamplingParams, tokenizer::TokenSequence};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Suffix appended to the input stem to name the output file
pub const OUTPUT_SUFFIX: &str = "_generated";

/// Default sampling parameters for new requests
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Temperature for sampling (0.0 = greedy, 1.0 = standard)
    pub temperature: f32,

    /// Top-p (nucleus) sampling threshold
    pub top_p: f32,

    /// Number of prompt tokens taken from the source file
    pub prompt_len: usize,

    /// Maximum number of tokens to generate
    pub max_gen_len: usize,

    /// Random seed for reproducible generation
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.99,
            top_p: 0.95,
            prompt_len: 512,
            max_gen_len: 512,
            seed: None,
        }
    }
}

/// One generation job. Immutable once submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Source MIDI file
    pub midi_path: PathBuf,
    pub temperature: f32,
    pub top_p: f32,
    pub prompt_len: usize,
    pub max_gen_len: usize,
    /// Seeds the sampler; entropy-seeded when unset
    pub seed: Option<u64>,
}

impl GenerationRequest {
    /// Request with default parameters
    pub fn new<P: Into<PathBuf>>(midi_path: P) -> Self {
        Self::from_config(midi_path, &GenerationConfig::default())
    }

    /// Request taking its parameters from a configuration
    pub fn from_config<P: Into<PathBuf>>(midi_path: P, config: &GenerationConfig) -> Self {
        Self {
            midi_path: midi_path.into(),
            temperature: config.temperature,
            top_p: config.top_p,
            prompt_len: config.prompt_len,
            max_gen_len: config.max_gen_len,
            seed: config.seed,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = top_p;
        self
    }

    pub fn with_prompt_len(mut self, prompt_len: usize) -> Self {
        self.prompt_len = prompt_len;
        self
    }

    pub fn with_max_gen_len(mut self, max_gen_len: usize) -> Self {
        self.max_gen_len = max_gen_len;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sampler parameters of this request
    pub fn sampling_params(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            top_p: self.top_p,
        }
    }

    /// Where the continuation of this request is written
    pub fn output_path(&self) -> PathBuf {
        output_path_for(&self.midi_path)
    }
}

/// `<dir>/<stem>_generated.<ext>` for an input path
pub fn output_path_for(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut name = format!("{}{}", stem, OUTPUT_SUFFIX);
    if let Some(ext) = input.extension() {
        name.push('.');
        name.push_str(&ext.to_string_lossy());
    }
    input.with_file_name(name)
}

/// Result of a generation operation
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    /// Written MIDI file
    pub output_path: PathBuf,

    /// Prompt length in tokens, padding included
    pub prompt_tokens: usize,

    /// Number of tokens generated (end-of-sequence excluded)
    pub generated_tokens: usize,

    /// Prompt followed by generated tokens
    pub tokens: TokenSequence,

    /// Reason generation stopped
    pub finish_reason: FinishReason,

    /// Generation statistics
    pub stats: GenerationStats,
}

/// Reason why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Reached max_gen_len
    MaxTokens,

    /// End of sequence token sampled
    EndOfSequence,

    /// Sequence reached max_sequence_length
    ContextLimit,
}

/// Statistics about the generation process
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationStats {
    /// Time to first token (ms)
    pub time_to_first_token_ms: f64,

    /// Total generation time (ms)
    pub total_time_ms: f64,

    /// Tokens per second
    pub tokens_per_second: f64,

    /// Notes in the written file
    pub notes_written: usize,
}
