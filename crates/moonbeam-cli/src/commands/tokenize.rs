//! Tokenize command implementation
//!
//! Shows the prompt token stream the engine would feed the model for a MIDI
//! file, without loading a model.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Args;
use serde_json::json;
use std::path::PathBuf;
use tabled::{settings::Style, Table, Tabled};
use tracing::debug;

use crate::commands::Command;
use crate::config::Config;
use crate::utils::print_output;

use moonbeam_core::prelude::*;
use moonbeam_core::tokenizer::vocab::{self, PAD_TOKEN};

#[derive(Args, Debug)]
pub struct TokenizeCommand {
    /// MIDI file to tokenize
    #[arg(long)]
    pub midi: PathBuf,

    /// Prompt length in tokens (defaults to the configured prompt length)
    #[arg(long)]
    pub prompt_len: Option<usize>,

    /// Show at most this many tokens
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Include left padding
    #[arg(long)]
    pub padding: bool,

    /// Print bare token ids, space separated
    #[arg(long)]
    pub raw: bool,
}

#[derive(Tabled)]
struct TokenRow {
    index: usize,
    id: TokenId,
    token: String,
}

#[async_trait]
impl Command for TokenizeCommand {
    async fn execute(&self, config: &Config, json_output: bool) -> Result<()> {
        debug!("Executing tokenize command: {:?}", self);

        let prompt_len = self.prompt_len.unwrap_or(config.engine.generation.prompt_len);
        Validator::validate_generation_request(
            &GenerationRequest::from_config(&self.midi, &config.engine.generation).with_prompt_len(prompt_len),
        )?;
        Validator::validate_midi_path(&self.midi)?;

        let tokenizer = MidiTokenizer::new(config.engine.tokenizer.clone());
        let encoded = tokenizer
            .encode_file(&self.midi, prompt_len)
            .with_context(|| format!("Failed to tokenize {}", self.midi.display()))?;

        let rows = self.visible_rows(encoded.tokens.as_slice());

        if self.raw {
            let ids: Vec<String> = rows.iter().map(|(_, id)| id.to_string()).collect();
            println!("{}", ids.join(" "));
            return Ok(());
        }

        if json_output {
            let output = json!({
                "midi_path": self.midi.display().to_string(),
                "source_notes": encoded.source_notes,
                "prompt_notes": encoded.notes.len(),
                "tempo": encoded.tempo,
                "prompt_tokens": encoded.tokens.len(),
                "vocab_size": tokenizer.vocab_size(),
                "tokens": rows.iter().map(|(_, id)| *id).collect::<Vec<_>>(),
            });
            return print_output(&output, true);
        }

        let table_rows: Vec<TokenRow> = rows
            .iter()
            .map(|&(index, id)| TokenRow {
                index,
                id,
                token: vocab::describe(id),
            })
            .collect();
        println!("{}", Table::new(table_rows).with(Style::rounded()));

        print_output(
            &json!({
                "source_notes": encoded.source_notes,
                "prompt_notes": encoded.notes.len(),
                "prompt_tokens": encoded.tokens.len(),
                "tempo_us_per_quarter": encoded.tempo,
            }),
            false,
        )
    }
}

impl TokenizeCommand {
    /// Tokens to show, with their position in the full prompt
    fn visible_rows(&self, tokens: &[TokenId]) -> Vec<(usize, TokenId)> {
        tokens
            .iter()
            .copied()
            .enumerate()
            .filter(|&(_, id)| self.padding || id != PAD_TOKEN)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }
}
