//! Info command implementation
//!
//! Reports whether the engine can load its model, plus the tokenizer and
//! generation settings it would run with.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Args;
use serde_json::json;
use std::path::PathBuf;
use tracing::debug;

use crate::commands::Command;
use crate::config::Config;
use crate::utils::{create_spinner, format_bytes, print_output, print_success, print_warning};

use moonbeam_core::prelude::*;

#[derive(Args, Debug)]
pub struct InfoCommand {
    /// Model artifact (path or name in a model directory)
    #[arg(short, long)]
    pub model: Option<PathBuf>,
}

#[async_trait]
impl Command for InfoCommand {
    async fn execute(&self, config: &Config, json_output: bool) -> Result<()> {
        debug!("Executing info command: {:?}", self);

        let engine_config = config
            .engine_config(self.model.as_deref())
            .context("Model path resolution failed")?;
        let model_path = engine_config.model_path();

        let spinner = (!json_output).then(|| create_spinner("Loading model..."));
        let engine = InferenceEngine::new(engine_config).context("Failed to start inference engine")?;
        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
        }

        let model_size = std::fs::metadata(&model_path).ok().map(|m| m.len());
        let info = json!({
            "engine": {
                "available": engine.is_available(),
                "model_path": model_path.display().to_string(),
                "model_size": model_size.map(format_bytes),
                "unavailable_reason": engine.unavailable_reason(),
                "max_sequence_length": engine.config().max_sequence_length,
            },
            "model": engine.model_info(),
            "tokenizer": {
                "vocab_size": engine.tokenizer().vocab_size(),
                "steps_per_quarter": engine.config().tokenizer.steps_per_quarter,
                "output_ticks_per_quarter": engine.config().tokenizer.output_ticks_per_quarter,
            },
            "generation": engine.config().generation,
            "model_dirs": config.model_dirs.iter().map(|d| d.display().to_string()).collect::<Vec<_>>(),
        });

        if !json_output {
            if engine.is_available() {
                print_success(&format!("Model ready: {}", model_path.display()));
            } else {
                print_warning(&format!(
                    "Model unavailable: {}",
                    engine.unavailable_reason().unwrap_or("unknown reason")
                ));
            }
        }
        print_output(&info, json_output)
    }
}
