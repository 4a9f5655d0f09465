//! Settings of a single match.
//!
//! Configuration can be created programmatically using [`MatchConfig::new()`] or by reading
//! environment variables using [`MatchConfig::from_env()`].
//!
//! # Environment Variables
//!
//! All values are optional. Unset or unparsable values keep the default.
//!
//! - `JUDGE_GRID_WIDTH`, `JUDGE_GRID_HEIGHT`: board size (default: `20` x `20`)
//! - `JUDGE_MAX_TURNS`: turn limit (default: `500`)
//! - `JUDGE_TURN_TIMEOUT_MS`: per-turn deadline before scaling (default: `500`)
//! - `JUDGE_VERBOSE`: set to `"true"` to print the board every turn (default: `false`)
//! - `JUDGE_SEED`: seed for apple spawning (default: random)
//! - `TURN_TIMEOUT_SCALE`: explicit deadline multiplier, skips calibration when positive

use std::{path::PathBuf, time::Duration};

use crate::calibration::CalibrationConfig;

pub const DEFAULT_REPLAY_OUTPUT: &str = "replays/match_replay.json";

/// Configuration of one match.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchConfig {
    pub(crate) grid_width: i32,
    pub(crate) grid_height: i32,
    pub(crate) max_turns: u32,
    pub(crate) turn_timeout: Duration,
    pub(crate) timeout_scale: Option<f64>,
    pub(crate) calibration: CalibrationConfig,
    pub(crate) bot1_directory: PathBuf,
    pub(crate) bot2_directory: PathBuf,
    pub(crate) replay_output: PathBuf,
    pub(crate) map_path: Option<PathBuf>,
    pub(crate) verbose: bool,
    pub(crate) seed: Option<u64>,
}

impl MatchConfig {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - The board is 20 x 20 with no obstacles.
    /// - A match lasts at most 500 turns.
    /// - Each agent has 500ms per turn, scaled by calibration.
    /// - The replay is written to `replays/match_replay.json`.
    /// - Nothing is printed to stdout.
    pub fn new() -> Self {
        Self {
            grid_width: 20,
            grid_height: 20,
            max_turns: 500,
            turn_timeout: Duration::from_millis(500),
            timeout_scale: None,
            calibration: CalibrationConfig::default(),
            bot1_directory: PathBuf::new(),
            bot2_directory: PathBuf::new(),
            replay_output: PathBuf::from(DEFAULT_REPLAY_OUTPUT),
            map_path: None,
            verbose: false,
            seed: None,
        }
    }

    /// Start from [`MatchConfig::new()`] and apply the `JUDGE_*` and `TURN_TIMEOUT_SCALE`
    /// environment variables on top.
    pub fn from_env() -> Self {
        fn get_env<T: std::str::FromStr>(var: &str) -> Option<T> {
            std::env::var(var).ok()?.trim().parse().ok()
        }

        let mut config = Self::new();
        if let Some(width) = get_env("JUDGE_GRID_WIDTH") {
            config.grid_width = width;
        }
        if let Some(height) = get_env("JUDGE_GRID_HEIGHT") {
            config.grid_height = height;
        }
        if let Some(max_turns) = get_env("JUDGE_MAX_TURNS") {
            config.max_turns = max_turns;
        }
        if let Some(ms) = get_env("JUDGE_TURN_TIMEOUT_MS") {
            config.turn_timeout = Duration::from_millis(ms);
        }
        if let Ok(val) = std::env::var("JUDGE_VERBOSE") {
            config.verbose = val.eq_ignore_ascii_case("true");
        }
        config.seed = get_env("JUDGE_SEED");
        config.timeout_scale = get_env::<f64>("TURN_TIMEOUT_SCALE").filter(|s| *s > 0.0);
        config
    }

    pub fn with_grid_size(mut self, width: i32, height: i32) -> Self {
        self.grid_width = width;
        self.grid_height = height;
        self
    }

    pub fn with_max_turns(mut self, value: u32) -> Self {
        self.max_turns = value;
        self
    }

    /// Per-turn deadline before scaling.
    pub fn with_turn_timeout(mut self, value: Duration) -> Self {
        self.turn_timeout = value;
        self
    }

    /// Fixed deadline multiplier. Non-positive values are ignored and calibration is used.
    pub fn with_timeout_scale(mut self, value: f64) -> Self {
        self.timeout_scale = (value > 0.0).then_some(value);
        self
    }

    pub fn with_calibration(mut self, value: CalibrationConfig) -> Self {
        self.calibration = value;
        self
    }

    /// Directories of the two bots, each holding a `config.json`.
    pub fn with_bots(mut self, bot1: impl Into<PathBuf>, bot2: impl Into<PathBuf>) -> Self {
        self.bot1_directory = bot1.into();
        self.bot2_directory = bot2.into();
        self
    }

    pub fn with_replay_output(mut self, value: impl Into<PathBuf>) -> Self {
        self.replay_output = value.into();
        self
    }

    /// Map file. Its dimensions, when positive, replace the configured grid size.
    pub fn with_map(mut self, value: Option<PathBuf>) -> Self {
        self.map_path = value;
        self
    }

    /// Print the board and a summary to stdout.
    pub fn with_verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    pub fn with_seed(mut self, value: Option<u64>) -> Self {
        self.seed = value;
        self
    }

    pub fn grid_size(&self) -> (i32, i32) {
        (self.grid_width, self.grid_height)
    }

    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    pub fn turn_timeout(&self) -> Duration {
        self.turn_timeout
    }

    pub fn timeout_scale(&self) -> Option<f64> {
        self.timeout_scale
    }

    pub fn replay_output(&self) -> &std::path::Path {
        &self.replay_output
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = MatchConfig::new();
        assert_eq!(config.grid_size(), (20, 20));
        assert_eq!(config.max_turns(), 500);
        assert_eq!(config.turn_timeout(), Duration::from_millis(500));
        assert_eq!(config.timeout_scale(), None);
        assert_eq!(
            config.replay_output(),
            std::path::Path::new("replays/match_replay.json")
        );
    }

    #[test]
    fn builders() {
        let config = MatchConfig::new()
            .with_grid_size(10, 12)
            .with_max_turns(50)
            .with_turn_timeout(Duration::from_millis(50))
            .with_timeout_scale(1.5)
            .with_seed(Some(3));
        assert_eq!(config.grid_size(), (10, 12));
        assert_eq!(config.max_turns(), 50);
        assert_eq!(config.timeout_scale(), Some(1.5));
        assert_eq!(config.seed, Some(3));

        assert_eq!(config.with_timeout_scale(0.0).timeout_scale(), None);
    }
}
