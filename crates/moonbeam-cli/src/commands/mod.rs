//! Command implementations for Moonbeam CLI

pub mod generate;
pub mod info;
pub mod tokenize;

use anyhow::Result;
use async_trait::async_trait;

/// Trait for CLI command execution
#[async_trait]
pub trait Command {
    /// Execute the command
    async fn execute(&self, config: &crate::config::Config, json_output: bool) -> Result<()>;
}
