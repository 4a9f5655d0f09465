//! # Snake Judge
//!
//! A deterministic judge for two-player snake matches between external bot processes.
//!
//! It provides:
//! - Agent process management with a per-turn deadline (`AgentHandle`)
//! - The game engine: movement, collisions, apple effects and zone-balanced apple spawning
//!   (`Simulation`)
//! - The turn loop querying both bots in parallel and deciding the winner (`Match`)
//! - A JSON replay of every turn (`Replay`)
//!
//! Each bot is a separate OS process, optionally wrapped in `docker run`, that reads one JSON
//! line describing the board per turn and answers with one line holding its move.
//!
//! # Documentation Overview
//!
//! - For the engine and the wire format of the board, see the [`game`] module.
//! - For the bot side of the protocol and how bots are launched, see the [`agent`] module.
//! - For match settings, see [`MatchConfig`](crate::configuration::MatchConfig) and
//!   [`calibration`].
//!
//! # Usage Example
//!
//! ```no_run
//! use std::time::Duration;
//! use snake_judge::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = MatchConfig::new()
//!         .with_bots("bots/example_python", "bots/random_bot")
//!         .with_turn_timeout(Duration::from_millis(200))
//!         .with_max_turns(300)
//!         .with_replay_output("replays/demo.json");
//!
//!     let outcome = Match::new(config)?.run()?;
//!     println!("{outcome}");
//!     Ok(())
//! }
//! ```
//!
//! # Bot Protocol
//!
//! - Judge -> Bot: one JSON line per turn, with `turn`, `grid_width`, `grid_height`,
//!   `snakes` (the bot's own snake first), `apples`, `map`, `winner` and `game_over`
//! - Bot -> Judge: one line, either `{"move": "UP"}` or a bare token. Accepted tokens are
//!   `UP`/`U`/`W`, `DOWN`/`D`/`S`, `LEFT`/`L`/`A` and `RIGHT`/`R`, in any case
//! - A bot that does not answer in time keeps its current direction; an unknown token means
//!   `UP`

pub use anyhow;

pub mod agent;
pub mod calibration;
pub mod configuration;
pub mod error;
pub mod game;
pub mod logger;
pub mod match_runner;
pub mod replay;

/// Commonly used types for quick access.
///
/// ```rust
/// use snake_judge::prelude::*;
/// ```
pub mod prelude {
    pub use crate::agent::{AgentHandle, BotConfig, BotSpec, MoveResponse};
    pub use crate::calibration::CalibrationConfig;
    pub use crate::configuration::MatchConfig;
    pub use crate::error::JudgeError;
    pub use crate::game::{rules::Simulation, Direction, GameState, PlayerId};
    pub use crate::match_runner::{Match, MatchOutcome, MatchStopper};
    pub use crate::replay::Replay;
}
