//! Match replay: per-turn snapshots plus the verdict, saved as pretty JSON.
//!
//! Durations are stored as integer nanoseconds and an absent move as `""`, so replay files
//! stay readable by existing viewers.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{info, instrument};

use crate::{
    configuration::MatchConfig,
    error::JudgeError,
    game::{Direction, GameState},
};

/// Match settings as recorded in the replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayConfig {
    pub grid_width: i32,
    pub grid_height: i32,
    pub max_turns: u32,
    #[serde(with = "nanos")]
    pub turn_timeout: Duration,
    pub turn_timeout_scale: f64,
    pub bot1_directory: String,
    pub bot2_directory: String,
    pub replay_output: String,
    pub verbose: bool,
    pub map_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl ReplayConfig {
    /// Records the settings as configured: the deadline before scaling and the explicit
    /// scale override, `0` when the scale comes from calibration.
    pub fn new(config: &MatchConfig, grid_width: i32, grid_height: i32) -> Self {
        let path_string = |p: &Path| p.to_string_lossy().into_owned();
        Self {
            grid_width,
            grid_height,
            max_turns: config.max_turns,
            turn_timeout: config.turn_timeout,
            turn_timeout_scale: config.timeout_scale.unwrap_or(0.0),
            bot1_directory: path_string(&config.bot1_directory),
            bot2_directory: path_string(&config.bot2_directory),
            replay_output: path_string(&config.replay_output),
            verbose: config.verbose,
            map_path: config
                .map_path
                .as_deref()
                .map(path_string)
                .unwrap_or_default(),
            seed: config.seed,
        }
    }
}

/// What happened in one turn, with the board as it was before the moves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn: u32,
    pub game_state: GameState,
    #[serde(with = "move_token")]
    pub move1: Option<Direction>,
    #[serde(with = "move_token")]
    pub move2: Option<Direction>,
    pub timeout1: bool,
    pub timeout2: bool,
    #[serde(with = "nanos")]
    pub time_taken1: Duration,
    #[serde(with = "nanos")]
    pub time_taken2: Duration,
}

impl TurnRecord {
    /// The closing record: final board, no moves.
    pub fn terminal(state: &GameState) -> Self {
        Self {
            turn: state.turn,
            game_state: state.clone(),
            move1: None,
            move2: None,
            timeout1: false,
            timeout2: false,
            time_taken1: Duration::ZERO,
            time_taken2: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BotStats {
    pub error_count: u32,
    pub id: u8,
    pub name: String,
    pub timeout_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replay {
    pub config: ReplayConfig,
    pub turns: Vec<TurnRecord>,
    pub winner: u8,
    pub win_reason: String,
    pub total_turns: u32,
    pub bot1_stats: BotStats,
    pub bot2_stats: BotStats,
    /// RFC 3339.
    pub completed_at: String,
}

impl Replay {
    pub fn new(config: ReplayConfig) -> Self {
        Self {
            config,
            turns: Vec::new(),
            winner: 0,
            win_reason: String::new(),
            total_turns: 0,
            bot1_stats: BotStats::default(),
            bot2_stats: BotStats::default(),
            completed_at: String::new(),
        }
    }

    pub fn record(&mut self, record: TurnRecord) {
        self.turns.push(record);
    }

    /// Stamps the completion time.
    pub fn finish(&mut self) {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        self.completed_at = now.format(&Rfc3339).unwrap_or_default();
    }

    /// Writes the replay as pretty JSON, creating parent directories as needed.
    #[instrument(skip(self), fields(turns = self.turns.len()))]
    pub fn save(&self, path: &Path) -> Result<(), JudgeError> {
        let replay_error = |reason: String| JudgeError::Replay {
            path: path.display().to_string(),
            reason,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| replay_error(e.to_string()))?;
        }
        let data = serde_json::to_string_pretty(self).map_err(|e| replay_error(e.to_string()))?;
        std::fs::write(path, data).map_err(|e| replay_error(e.to_string()))?;
        info!("replay saved to {}", path.display());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Replay> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read replay {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("failed to parse replay {}", path.display()))
    }

    pub fn output_path(&self) -> PathBuf {
        PathBuf::from(&self.config.replay_output)
    }
}

mod nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_nanos()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_nanos)
    }
}

mod move_token {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use crate::game::Direction;

    pub fn serialize<S: Serializer>(
        value: &Option<Direction>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(value.map_or("", Direction::as_str))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Direction>, D::Error> {
        let token = String::deserialize(deserializer)?;
        if token.is_empty() {
            return Ok(None);
        }
        Direction::from_token(&token)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("invalid move {token:?}")))
    }
}
