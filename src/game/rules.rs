//! Turn resolution.
//!
//! [`Simulation`] owns the live [`GameState`] together with the random source used for
//! apple spawning, so that a seeded match is fully reproducible.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use tracing::{debug, instrument};

use super::{
    AppleKind, DeathReason, Direction, GameState, Map, PlayerId, EFFECT_TURNS, MAX_ENERGY,
};

/// The simulation engine: authoritative state plus its random source.
#[derive(Debug, Clone)]
pub struct Simulation<R = Pcg64> {
    state: GameState,
    rng: R,
}

impl Simulation<Pcg64> {
    /// New match on a `width` x `height` board. A `None` seed draws one from the OS.
    pub fn new(width: i32, height: i32, map: Option<Map>, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => Pcg64::seed_from_u64(seed),
            None => Pcg64::from_entropy(),
        };
        let state = GameState::new(width, height, map, &mut rng);
        Self { state, rng }
    }
}

impl<R: Rng> Simulation<R> {
    /// Resume from an arbitrary state.
    pub fn from_state(state: GameState, rng: R) -> Self {
        Self { state, rng }
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// Forced death, used when an agent process is gone. The death reason is left as is.
    pub fn mark_dead(&mut self, player: PlayerId) {
        self.state.snake_mut(player).alive = false;
    }

    pub fn process_turn(&mut self, move_one: Direction, move_two: Direction) {
        self.state.process_turn(move_one, move_two, &mut self.rng);
    }
}

impl GameState {
    /// Applies one turn with both requested moves.
    #[instrument(level = "debug", skip(self, rng), fields(turn = self.turn + 1))]
    pub fn process_turn<R: Rng + ?Sized>(
        &mut self,
        move_one: Direction,
        move_two: Direction,
        rng: &mut R,
    ) {
        self.turn += 1;

        let steps = |p: PlayerId| -> u32 {
            let snake = self.snake(p);
            match (snake.is_frozen(), snake.speed_turns > 0) {
                (true, _) => 0,
                (false, true) => 2,
                (false, false) => 1,
            }
        };
        let steps_one = steps(PlayerId::One);
        let steps_two = steps(PlayerId::Two);

        for sub_step in 0..steps_one.max(steps_two) {
            if sub_step < steps_one {
                self.snake_mut(PlayerId::One).advance(move_one);
            }
            if sub_step < steps_two {
                self.snake_mut(PlayerId::Two).advance(move_two);
            }

            let died_one = self.check_collision(PlayerId::One);
            let died_two = self.check_collision(PlayerId::Two);
            let head_to_head = self.check_head_to_head();
            if died_one || died_two || head_to_head {
                break;
            }
        }

        let mut ate = [false; 2];
        for (player, ate) in PlayerId::BOTH.into_iter().zip(ate.iter_mut()) {
            if !self.snake(player).alive {
                continue;
            }
            if let Some(kind) = self.eat_apple(player) {
                self.apply_apple_effect(player, kind);
                self.spawn_apple(rng);
                *ate = true;
            }
        }

        for player in PlayerId::BOTH {
            let snake = self.snake_mut(player);
            snake.speed_turns = snake.speed_turns.saturating_sub(1);
            snake.sleep_turns = snake.sleep_turns.saturating_sub(1);
        }

        for (player, ate) in PlayerId::BOTH.into_iter().zip(ate) {
            let snake = self.snake_mut(player);
            if snake.alive && !ate {
                snake.energy -= 1;
                if snake.energy <= 0 {
                    debug!(%player, "starved");
                    snake.kill(DeathReason::Hunger);
                }
            }
        }

        self.check_game_over();
    }

    /// Wall, self, opponent body (head excluded) and obstacle checks, in that order.
    /// Returns true when `player` died here.
    fn check_collision(&mut self, player: PlayerId) -> bool {
        let snake = self.snake(player);
        if !snake.alive {
            return false;
        }
        let head = snake.head();

        let reason = if !self.is_inside(head) {
            Some(DeathReason::Wall)
        } else if snake.body.iter().skip(1).any(|&segment| segment == head) {
            Some(DeathReason::SelfCollision)
        } else if self
            .snake(player.other())
            .body
            .iter()
            .skip(1)
            .any(|&segment| segment == head)
        {
            Some(DeathReason::Body)
        } else if self.is_obstacle(head) {
            Some(DeathReason::Obstacle)
        } else {
            None
        };

        match reason {
            Some(reason) => {
                debug!(%player, ?reason, ?head, "collision");
                self.snake_mut(player).kill(reason);
                true
            }
            None => false,
        }
    }

    /// Both heads on one cell: the shorter snake dies, equal lengths kill both.
    fn check_head_to_head(&mut self) -> bool {
        let one = self.snake(PlayerId::One);
        let two = self.snake(PlayerId::Two);
        if !(one.alive && two.alive) || one.head() != two.head() {
            return false;
        }
        let (len_one, len_two) = (one.length, two.length);
        debug!(len_one, len_two, "head-to-head");
        if len_one <= len_two {
            self.snake_mut(PlayerId::One).kill(DeathReason::HeadToHead);
        }
        if len_two <= len_one {
            self.snake_mut(PlayerId::Two).kill(DeathReason::HeadToHead);
        }
        true
    }

    /// Removes and returns the apple under `player`'s head, if any.
    fn eat_apple(&mut self, player: PlayerId) -> Option<AppleKind> {
        let head = self.snake(player).head();
        let index = self.apples.iter().position(|a| a.position() == head)?;
        Some(self.apples.remove(index).kind)
    }

    fn apply_apple_effect(&mut self, player: PlayerId, kind: AppleKind) {
        debug!(%player, ?kind, "apple eaten");
        let snake = self.snake_mut(player);
        snake.energy = MAX_ENERGY;

        match kind {
            AppleKind::Normal => {
                snake.grow(1);
                snake.score += 1;
            }
            AppleKind::God => {
                snake.grow(3);
                snake.score += 3;
            }
            AppleKind::Speed => {
                snake.grow(1);
                snake.score += 1;
                snake.speed_turns = EFFECT_TURNS;
            }
            AppleKind::Sleep => {
                snake.grow(1);
                snake.score += 1;
                self.snake_mut(player.other()).sleep_turns = EFFECT_TURNS;
            }
            AppleKind::Poison => {
                snake.shrink();
                snake.score = snake.score.saturating_sub(1);
            }
        }
    }

    fn check_game_over(&mut self) {
        let one = self.snake(PlayerId::One);
        let two = self.snake(PlayerId::Two);
        let winner = match (one.alive, two.alive) {
            (true, true) => return,
            (false, false) => match one.length.cmp(&two.length) {
                std::cmp::Ordering::Greater => Some(PlayerId::One),
                std::cmp::Ordering::Less => Some(PlayerId::Two),
                std::cmp::Ordering::Equal => None,
            },
            (false, true) => Some(PlayerId::Two),
            (true, false) => Some(PlayerId::One),
        };
        self.game_over = true;
        self.winner = winner;
    }
}
