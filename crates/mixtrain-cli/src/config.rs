//! TOML config loading for the mixtrain CLI.
//!
//! Deserializes a training config with `[epoch]` and `[tokenizer]` sections.
//! Relative paths are resolved against the config file's directory.

use std::path::{Path, PathBuf};

use anyhow::Context;
use mixtrain::EpochConfig;
use serde::Deserialize;

/// Top-level structure of a training config file.
#[derive(Debug, Deserialize)]
pub struct TrainToml {
    /// Per-epoch training parameters. Every field has a default.
    #[serde(default)]
    pub epoch: EpochConfig,
    /// Tokenizer used to resolve the media and pad tokens.
    pub tokenizer: TokenizerSection,
}

/// `[tokenizer]` section.
#[derive(Debug, Deserialize)]
pub struct TokenizerSection {
    /// Path to a HuggingFace `tokenizer.json`.
    pub path: PathBuf,
    /// Explicit pad token; otherwise taken from the tokenizer.
    #[serde(default)]
    pub pad_token: Option<String>,
}

impl TrainToml {
    /// Make relative paths relative to `base` instead of the working directory.
    pub fn resolve_paths(&mut self, base: &Path) {
        if self.tokenizer.path.is_relative() {
            self.tokenizer.path = base.join(&self.tokenizer.path);
        }
        if let Some(p) = self.epoch.mapping_matrix_path.as_mut() {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        }
    }
}

/// Load and deserialize a `TrainToml` from a TOML file.
pub fn load_train_toml(path: &Path) -> anyhow::Result<TrainToml> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let mut config: TrainToml = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;
    if let Some(base) = path.parent() {
        config.resolve_paths(base);
    }
    tracing::info!(path = %path.display(), "Loaded training config");
    Ok(config)
}
