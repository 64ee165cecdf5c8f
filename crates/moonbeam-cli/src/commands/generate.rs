//! Generate command implementation
//!
//! Submits one continuation job to the engine, streams its progress to the
//! terminal and optionally copies the result to a chosen location.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Args;
use console::style;
use indicatif::ProgressBar;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::commands::Command;
use crate::config::Config;
use crate::utils::{create_spinner, format_duration, print_output, print_success, print_warning, save_copy};

use moonbeam_core::prelude::*;

#[derive(Args, Debug)]
pub struct GenerateCommand {
    /// MIDI file to continue
    #[arg(long)]
    pub midi: PathBuf,

    /// Model artifact (path or name in a model directory)
    #[arg(short, long)]
    pub model: Option<PathBuf>,

    /// Sampling temperature (0.0 = greedy, up to 2.0)
    #[arg(short, long)]
    pub temperature: Option<f32>,

    /// Nucleus sampling threshold (0.0 to 1.0)
    #[arg(long)]
    pub top_p: Option<f32>,

    /// Prompt length in tokens (input is truncated or left-padded to it)
    #[arg(long)]
    pub prompt_len: Option<usize>,

    /// Maximum number of tokens to generate
    #[arg(long)]
    pub max_gen_len: Option<usize>,

    /// Random seed for reproducible output
    #[arg(long)]
    pub seed: Option<u64>,

    /// Also copy the generated file here (saved with a .mid extension)
    #[arg(long)]
    pub save_to: Option<PathBuf>,
}

#[async_trait]
impl Command for GenerateCommand {
    async fn execute(&self, config: &Config, json_output: bool) -> Result<()> {
        debug!("Executing generate command: {:?}", self);

        let engine_config = config
            .engine_config(self.model.as_deref())
            .context("Model path resolution failed")?;
        let engine = InferenceEngine::new(engine_config).context("Failed to start inference engine")?;
        if !engine.is_available() {
            anyhow::bail!(
                "Model is not loaded: {}",
                engine.unavailable_reason().unwrap_or("unknown reason")
            );
        }

        let request = self.build_request(config);
        info!(
            "Generating from {} (temperature {}, top_p {})",
            request.midi_path.display(),
            request.temperature,
            request.top_p
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let handle = engine.submit(request, tx)?;
        let spinner = (!json_output).then(|| create_spinner("Generating..."));

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut cancel_requested = false;

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => {
                        let terminal = event.is_terminal();
                        report_event(&event, spinner.as_ref(), json_output);
                        if terminal {
                            break;
                        }
                    }
                    None => break,
                },
                _ = &mut ctrl_c, if !cancel_requested => {
                    cancel_requested = true;
                    warn!("Interrupt received, cancelling generation");
                    engine.try_cancel();
                }
            }
        }

        let result = handle.join().await?;

        let saved_to = match &self.save_to {
            Some(dest) => Some(save_copy(&result.output_path, dest)?),
            None => None,
        };

        let summary = json!({
            "output_path": result.output_path.display().to_string(),
            "saved_to": saved_to.as_ref().map(|p| p.display().to_string()),
            "prompt_tokens": result.prompt_tokens,
            "generated_tokens": result.generated_tokens,
            "finish_reason": result.finish_reason,
            "notes_written": result.stats.notes_written,
            "total_time_ms": result.stats.total_time_ms,
            "tokens_per_second": result.stats.tokens_per_second,
        });

        if json_output {
            println!("{}", serde_json::to_string(&json!({ "result": summary }))?);
        } else {
            if let Some(path) = &saved_to {
                print_success(&format!("Saved copy to {}", path.display()));
            }
            println!(
                "{} {} tokens in {} ({:.1} tokens/s)",
                style("Generated").bold(),
                result.generated_tokens,
                format_duration(Duration::from_secs_f64(result.stats.total_time_ms / 1000.0)),
                result.stats.tokens_per_second
            );
            print_output(&summary, false)?;
        }

        Ok(())
    }
}

impl GenerateCommand {
    /// Request from configured defaults, overridden by command-line flags
    fn build_request(&self, config: &Config) -> GenerationRequest {
        let mut request = GenerationRequest::from_config(&self.midi, &config.engine.generation);
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(top_p) = self.top_p {
            request = request.with_top_p(top_p);
        }
        if let Some(prompt_len) = self.prompt_len {
            request = request.with_prompt_len(prompt_len);
        }
        if let Some(max_gen_len) = self.max_gen_len {
            request = request.with_max_gen_len(max_gen_len);
        }
        if let Some(seed) = self.seed {
            request = request.with_seed(seed);
        }
        request
    }
}

fn report_event(event: &ProgressEvent, spinner: Option<&ProgressBar>, json_output: bool) {
    if json_output {
        println!("{}", event.to_json_line());
        return;
    }
    let Some(spinner) = spinner else {
        return;
    };
    match event.kind {
        ProgressKind::Info => {
            spinner.println(format!("{} {}", style("•").dim(), event.message));
            spinner.set_message(event.message.clone());
        }
        ProgressKind::Done => {
            spinner.finish_and_clear();
            print_success(&event.message);
        }
        ProgressKind::Cancelled => {
            spinner.finish_and_clear();
            print_warning(&event.message);
        }
        // Reported by main from the joined result
        ProgressKind::Error => spinner.finish_and_clear(),
    }
}
