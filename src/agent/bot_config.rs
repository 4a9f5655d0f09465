use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::JudgeError;

pub const CONFIG_FILE_NAME: &str = "config.json";

/// How to launch one bot, read from `<bot dir>/config.json`.
///
/// ```json
/// {
///   "command": ["python3", "bot.py"],
///   "name": "my bot",
///   "docker_image": "snake-python:latest",
///   "docker_cpus": 0.5,
///   "docker_memory": "256m"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BotConfig {
    /// Executable followed by its arguments. Must not be empty.
    pub command: Vec<String>,
    #[serde(default)]
    pub name: String,
    /// When set the bot runs inside this image through `docker run`.
    #[serde(default)]
    pub docker_image: String,
    /// CPU quota for the container, ignored when not positive.
    #[serde(default)]
    pub docker_cpus: f64,
    /// Memory limit for the container, e.g. `"256m"`.
    #[serde(default)]
    pub docker_memory: String,
}

impl BotConfig {
    pub fn from_command(command: &[&str]) -> Self {
        Self {
            command: command.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    #[instrument]
    pub fn load(directory: &Path) -> anyhow::Result<BotConfig> {
        let path = directory.join(CONFIG_FILE_NAME);
        let text = std::fs::read_to_string(&path).map_err(|e| {
            JudgeError::Config(format!("failed to open {}: {e}", path.display()))
        })?;
        let config: BotConfig = serde_json::from_str(&text).map_err(|e| {
            JudgeError::Config(format!("failed to decode {}: {e}", path.display()))
        })?;
        if config.command.is_empty() {
            return Err(JudgeError::Config(format!(
                "command array is empty in {}",
                path.display()
            ))
            .into());
        }
        Ok(config)
    }

    pub fn uses_container(&self) -> bool {
        !self.docker_image.is_empty()
    }
}

/// A bot ready to be launched: its directory and its config.
#[derive(Debug, Clone, PartialEq)]
pub struct BotSpec {
    pub directory: PathBuf,
    pub config: BotConfig,
}

impl BotSpec {
    pub fn load(directory: impl Into<PathBuf>) -> anyhow::Result<BotSpec> {
        let directory = directory.into();
        let config = BotConfig::load(&directory)?;
        Ok(BotSpec { directory, config })
    }

    pub fn display_name(&self) -> &str {
        if self.config.name.is_empty() {
            self.directory
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("unnamed")
        } else {
            &self.config.name
        }
    }
}
