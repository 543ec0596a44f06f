//! TOML configuration. Every field has a default, so an empty file is valid.
//!
//! ```toml
//! provider = "anthropic"
//! model = "claude-sonnet-4-20250514"
//! system_prompt = "You are terse."
//! temperature = 0.2
//! max_tokens = 2048
//! attachments_dir = "/var/tmp/branch-chat/files"
//! database = "drafts.db"
//! draft_key = "default"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::providers::{ChatOptions, Provider};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub provider: Provider,
    /// Falls back to the provider's default model when unset.
    pub model: Option<String>,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Where inline attachments are written when converted to external files.
    pub attachments_dir: PathBuf,
    /// SQLite database holding saved drafts.
    pub database: PathBuf,
    pub draft_key: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            provider: Provider::Openai,
            model: None,
            system_prompt: String::new(),
            temperature: 0.7,
            max_tokens: 4096,
            attachments_dir: std::env::temp_dir().join("branch-chat-attachments"),
            database: PathBuf::from("branch-chat.db"),
            draft_key: "default".to_string(),
        }
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn model(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }

    pub fn chat_options(&self) -> ChatOptions {
        ChatOptions {
            model: self.model(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}
