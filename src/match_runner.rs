//! The turn loop of a match between two bots.
//!
//! Each turn both agents are queried in parallel on the same borrowed state, their answers
//! (or fallbacks) are fed to the engine and a [`TurnRecord`] is appended to the replay.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use anyhow::Context;
use tracing::{debug, info, instrument, warn};

use crate::{
    agent::{AgentHandle, BotSpec, MoveResponse},
    calibration::resolve_timeout_scale,
    configuration::MatchConfig,
    error::JudgeError,
    game::{load_board, rules::Simulation, GameState, PlayerId},
    replay::{BotStats, Replay, ReplayConfig, TurnRecord},
};

/// Time given to freshly started bots before the first request.
const AGENT_WARMUP: Duration = Duration::from_millis(100);
/// Pause between turns when the board is printed.
const VERBOSE_TURN_DELAY: Duration = Duration::from_millis(50);

/// Cancels a running match from another thread.
///
/// The loop checks it between turns; a request already in flight runs to its deadline.
#[derive(Debug, Clone, Default)]
pub struct MatchStopper(Arc<AtomicBool>);

impl MatchStopper {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Result of a finished match.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub winner: Option<PlayerId>,
    pub reason: String,
    pub total_turns: u32,
    pub stats: [BotStats; 2],
    pub final_lengths: [u32; 2],
    pub replay: Replay,
}

impl MatchOutcome {
    /// Writes the replay to the configured output path.
    pub fn save_replay(&self) -> Result<(), JudgeError> {
        self.replay.save(&self.replay.output_path())
    }
}

impl fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Match Complete ===")?;
        writeln!(f, "Winner: {}", self.reason)?;
        writeln!(f, "Total Turns: {}", self.total_turns)?;
        for (stats, length) in self.stats.iter().zip(self.final_lengths) {
            writeln!(
                f,
                "Bot {} - Timeouts: {}, Errors: {}, Final Length: {}",
                stats.id, stats.timeout_count, stats.error_count, length
            )?;
        }
        Ok(())
    }
}

/// Winner and human readable reason for a board where the loop has ended.
///
/// An engine-decided winner comes first, then a double death, then the turn limit where the
/// longer snake wins. Anything else means the match was interrupted.
pub fn verdict(state: &GameState, max_turns: u32) -> (Option<PlayerId>, String) {
    let one = state.snake(PlayerId::One);
    let two = state.snake(PlayerId::Two);

    if let Some(winner) = state.winner {
        let loser = winner.other();
        let loser_snake = state.snake(loser);
        let reason = if loser_snake.alive {
            format!("Bot {winner} wins")
        } else {
            format!(
                "Bot {winner} wins - Bot {loser} died due to {}",
                loser_snake.death_reason.description()
            )
        };
        return (Some(winner), reason);
    }

    if state.game_over {
        let reason = format!(
            "Draw - Both snakes died (Bot 1: {}, Bot 2: {})",
            one.death_reason.description(),
            two.death_reason.description()
        );
        return (None, reason);
    }

    if state.turn >= max_turns {
        let longer = match one.length.cmp(&two.length) {
            std::cmp::Ordering::Greater => Some(PlayerId::One),
            std::cmp::Ordering::Less => Some(PlayerId::Two),
            std::cmp::Ordering::Equal => None,
        };
        return match longer {
            Some(winner) => (
                Some(winner),
                format!("Bot {winner} wins - Max turns reached, longer snake"),
            ),
            None => (None, "Draw - Max turns reached".to_string()),
        };
    }

    (None, format!("Draw - Match stopped at turn {}", state.turn))
}

/// One match: two agents, the engine and the replay being recorded.
#[derive(Debug)]
pub struct Match {
    max_turns: u32,
    verbose: bool,
    turn_timeout: Duration,
    simulation: Simulation,
    agents: [AgentHandle; 2],
    replay: Replay,
    stopper: MatchStopper,
}

impl Match {
    /// Loads both bot configs and the map, and resolves the effective deadline.
    ///
    /// Calibration runs here, once, unless the configuration carries a scale override.
    #[instrument(skip_all)]
    pub fn new(config: MatchConfig) -> anyhow::Result<Match> {
        let bot1 = BotSpec::load(&config.bot1_directory).context("failed to create bot 1")?;
        let bot2 = BotSpec::load(&config.bot2_directory).context("failed to create bot 2")?;
        let scale = resolve_timeout_scale(config.timeout_scale, || {
            config.calibration.measure_scale()
        });
        Self::with_bots(config, bot1, bot2, scale)
    }

    /// Same as [`Match::new`] with already loaded bots and a known deadline scale.
    pub fn with_bots(
        config: MatchConfig,
        bot1: BotSpec,
        bot2: BotSpec,
        timeout_scale: f64,
    ) -> anyhow::Result<Match> {
        let (map, width, height) =
            load_board(config.map_path.as_deref(), config.grid_width, config.grid_height)?;
        let turn_timeout = config.turn_timeout.mul_f64(timeout_scale);
        info!(
            width,
            height,
            max_turns = config.max_turns,
            ?turn_timeout,
            timeout_scale,
            "match created"
        );

        let scale_env = format!("{timeout_scale:.6}");
        let agents = [(PlayerId::One, bot1), (PlayerId::Two, bot2)].map(|(slot, spec)| {
            AgentHandle::new(slot, spec).with_env("TURN_TIMEOUT_SCALE", scale_env.clone())
        });

        let replay = Replay::new(ReplayConfig::new(&config, width, height));
        Ok(Match {
            max_turns: config.max_turns,
            verbose: config.verbose,
            turn_timeout,
            simulation: Simulation::new(width, height, map, config.seed),
            agents,
            replay,
            stopper: MatchStopper::default(),
        })
    }

    /// Handle to cancel [`Match::play`] from another thread.
    pub fn stopper(&self) -> MatchStopper {
        self.stopper.clone()
    }

    pub fn state(&self) -> &GameState {
        self.simulation.state()
    }

    /// Plays the match to the end and saves the replay.
    ///
    /// A replay that cannot be written surfaces as [`JudgeError::Replay`], after the match
    /// has fully concluded.
    pub fn run(self) -> anyhow::Result<MatchOutcome> {
        let outcome = self.play()?;
        outcome.save_replay()?;
        Ok(outcome)
    }

    /// Plays the match to the end without writing anything to disk.
    ///
    /// Fails only when an agent cannot be started.
    #[instrument(skip(self), fields(bot1 = self.agents[0].name(), bot2 = self.agents[1].name()))]
    pub fn play(mut self) -> anyhow::Result<MatchOutcome> {
        for agent in &mut self.agents {
            agent
                .start()
                .with_context(|| format!("failed to start bot {}", agent.slot()))?;
        }
        thread::sleep(AGENT_WARMUP);

        if self.verbose {
            println!("Match started!");
            println!("{}", self.simulation.state());
        }

        while self.simulation.state().turn < self.max_turns && !self.simulation.state().game_over {
            if self.stopper.is_stopped() {
                info!(turn = self.simulation.state().turn, "match stopped");
                break;
            }
            self.play_turn();

            if self.verbose {
                println!("{}", self.simulation.state());
                thread::sleep(VERBOSE_TURN_DELAY);
            }
        }

        let state = self.simulation.state();
        self.replay.record(TurnRecord::terminal(state));

        for agent in &mut self.agents {
            if let Err(e) = agent.stop() {
                warn!("could not stop bot {}: {e:#}", agent.slot());
            }
        }

        let (winner, reason) = verdict(state, self.max_turns);
        let stats = [self.agents[0].stats(), self.agents[1].stats()];
        self.replay.winner = winner.map_or(0, PlayerId::number);
        self.replay.win_reason = reason.clone();
        self.replay.total_turns = state.turn;
        self.replay.bot1_stats = stats[0].clone();
        self.replay.bot2_stats = stats[1].clone();
        self.replay.finish();
        info!(?winner, %reason, turns = state.turn, "match complete");

        let outcome = MatchOutcome {
            winner,
            reason,
            total_turns: state.turn,
            stats,
            final_lengths: PlayerId::BOTH.map(|p| state.snake(p).length),
            replay: self.replay,
        };
        if self.verbose {
            println!();
            print!("{outcome}");
        }
        Ok(outcome)
    }

    fn play_turn(&mut self) {
        let before = self.simulation.state().clone();
        let (response_one, response_two) = self.request_moves();

        for agent in &self.agents {
            let slot = agent.slot();
            if !agent.is_alive() && self.simulation.state().snake(slot).alive {
                warn!(%slot, "bot process died");
                if self.verbose {
                    println!("Bot {slot} process died!");
                }
                self.simulation.mark_dead(slot);
            }
        }

        self.simulation
            .process_turn(response_one.direction, response_two.direction);
        let state = self.simulation.state();
        debug!(
            turn = state.turn,
            move1 = %response_one.direction,
            move2 = %response_two.direction,
            "turn played"
        );

        if self.verbose {
            for (agent, response) in self.agents.iter().zip([&response_one, &response_two]) {
                if response.timeout {
                    println!(
                        "Bot {} timeout! (Total: {})",
                        agent.slot(),
                        agent.timeout_count()
                    );
                }
            }
        }

        self.replay.record(TurnRecord {
            turn: state.turn,
            game_state: before,
            move1: Some(response_one.direction),
            move2: Some(response_two.direction),
            timeout1: response_one.timeout,
            timeout2: response_two.timeout,
            time_taken1: response_one.time_taken,
            time_taken2: response_two.time_taken,
        });
    }

    /// Queries both agents at once and waits for both answers.
    fn request_moves(&mut self) -> (MoveResponse, MoveResponse) {
        let state = self.simulation.state();
        let deadline = self.turn_timeout;
        let [one, two] = &mut self.agents;
        let (first, second) = thread::scope(|s| {
            let first = s.spawn(move || one.request_move(state, deadline));
            let second = s.spawn(move || two.request_move(state, deadline));
            (first.join(), second.join())
        });
        let rethrow = |result: thread::Result<MoveResponse>| {
            result.unwrap_or_else(|panic| std::panic::resume_unwind(panic))
        };
        (rethrow(first), rethrow(second))
    }
}
