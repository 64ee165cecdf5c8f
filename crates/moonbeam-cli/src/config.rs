//! Configuration management for Moonbeam CLI

use anyhow::{Context, Result};
use moonbeam_core::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directories searched for model artifacts given by name
    pub model_dirs: Vec<PathBuf>,

    /// Engine, tokenizer and default generation settings
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dirs: vec![
                dirs::home_dir().unwrap_or_default().join(".moonbeam/models"),
                PathBuf::from("./models"),
            ],
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config_path = match config_path {
            Some(path) => path.to_path_buf(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
            config
                .engine
                .validate()
                .with_context(|| format!("Invalid engine settings in {}", config_path.display()))?;

            Ok(config)
        } else {
            // Create default config
            let config = Config::default();
            config.save(&config_path)?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".config"))
            .join("moonbeam")
            .join("config.toml")
    }

    /// Find model file in configured directories
    pub fn find_model(&self, model_name: &str) -> Result<PathBuf> {
        // If it's already a full path and exists, use it
        let model_path = Path::new(model_name);
        if model_path.exists() {
            return Ok(model_path.to_path_buf());
        }

        // Expand shell variables like ~
        let expanded_path = crate::utils::expand_path(model_name)?;
        if expanded_path.exists() {
            return Ok(expanded_path);
        }

        // Search in configured model directories
        for dir in &self.model_dirs {
            let candidate = dir.join(model_name);
            if candidate.exists() {
                return Ok(candidate);
            }

            // Also try with .onnx extension
            let with_ext = dir.join(format!("{}.onnx", model_name));
            if with_ext.exists() {
                return Ok(with_ext);
            }
        }

        anyhow::bail!("Model '{}' not found in any configured directory", model_name);
    }

    /// Engine configuration, with the model overridden when one is given
    pub fn engine_config(&self, model: Option<&Path>) -> Result<EngineConfig> {
        let mut engine = self.engine.clone();
        if let Some(model) = model {
            engine.model_file = self.find_model(&model.to_string_lossy())?;
        }
        Ok(engine)
    }
}
