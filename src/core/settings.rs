use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Environment variable that overrides `discord_token`.
pub const TOKEN_ENV_VAR: &str = "DISCORD_TOKEN";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Json,
    Sqlite,
}

/// Json struct for bot settings
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Settings {
    pub discord_token: Option<String>,
    pub database_file: Option<PathBuf>,
    pub storage: Option<StorageKind>,
    /// Register commands in this guild only instead of globally
    pub guild_id: Option<u64>,
}

impl Settings {
    /// Read settings from a JSON file, or use defaults if no file is given.
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        let mut settings = match file {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read settings file {}", path.display()))?;
                serde_json::from_str::<Settings>(&text)
                    .with_context(|| format!("Invalid settings file {}", path.display()))?
            }
            None => Settings::default(),
        };

        if let Ok(token) = std::env::var(TOKEN_ENV_VAR) {
            if !token.trim().is_empty() {
                settings.discord_token = Some(token);
            }
        }

        Ok(settings)
    }

    pub fn database_file(&self) -> PathBuf {
        self.database_file
            .clone()
            .unwrap_or_else(|| PathBuf::from("database.json"))
    }

    pub fn storage(&self) -> StorageKind {
        self.storage.unwrap_or_default()
    }

    pub fn token(&self) -> anyhow::Result<&str> {
        self.discord_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "No Discord token configured, set 'discord_token' or {}",
                    TOKEN_ENV_VAR
                )
            })
    }
}
