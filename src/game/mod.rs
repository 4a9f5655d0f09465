//! Game model: board entities, the authoritative [`GameState`] and its wire form.
//!
//! The state is owned by the [`Simulation`](rules::Simulation) engine. Everything an agent
//! or the replay sees is produced by [`GameState::view`], which reorders the two snakes
//! so the recipient always comes first.

use std::{fmt, path::Path};

use anyhow::Context;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::JudgeError;

mod render;
pub mod rules;
mod spawn;

pub use spawn::{select_zone, Zone, ZoneCounts};

/// Energy of a fresh snake, and the value any apple restores.
pub const MAX_ENERGY: i32 = 60;
/// Number of turns a SPEED or SLEEP apple lasts.
pub const EFFECT_TURNS: u32 = 5;
const INITIAL_APPLES: usize = 3;

/// A grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The neighbouring cell in `direction`. `y` grows downwards.
    pub fn step(self, direction: Direction) -> Position {
        match direction {
            Direction::Up => Position::new(self.x, self.y - 1),
            Direction::Down => Position::new(self.x, self.y + 1),
            Direction::Left => Position::new(self.x - 1, self.y),
            Direction::Right => Position::new(self.x + 1, self.y),
        }
    }

    pub fn manhattan(self, other: Position) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }

    /// Case-insensitive move token as accepted from agents.
    ///
    /// RIGHT only has the `R` alias, there is no keyboard-style `D` for it since `D` is DOWN.
    pub fn from_token(token: &str) -> Option<Direction> {
        match token.trim().to_ascii_uppercase().as_str() {
            "UP" | "U" | "W" => Some(Direction::Up),
            "DOWN" | "D" | "S" => Some(Direction::Down),
            "LEFT" | "L" | "A" => Some(Direction::Left),
            "RIGHT" | "R" => Some(Direction::Right),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "UP",
            Direction::Down => "DOWN",
            Direction::Left => "LEFT",
            Direction::Right => "RIGHT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AppleKind {
    /// +1 length, +1 score
    Normal,
    /// +3 length, +3 score
    God,
    /// +1, and two cells per turn for the next turns
    Speed,
    /// +1, and the opponent is frozen for the next turns
    Sleep,
    /// -1 length (never below 1), -1 score (never below 0)
    Poison,
}

impl AppleKind {
    /// Weighted draw on a roll in `0..100`: 60% NORMAL, 15% GOD, 15% SPEED, 5% SLEEP, 5% POISON.
    pub fn from_roll(roll: u32) -> AppleKind {
        match roll {
            0..=59 => AppleKind::Normal,
            60..=74 => AppleKind::God,
            75..=89 => AppleKind::Speed,
            90..=94 => AppleKind::Sleep,
            _ => AppleKind::Poison,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Apple {
    pub x: i32,
    pub y: i32,
    #[serde(rename = "type")]
    pub kind: AppleKind,
}

impl Apple {
    pub fn new(position: Position, kind: AppleKind) -> Self {
        Self {
            x: position.x,
            y: position.y,
            kind,
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeathReason {
    #[default]
    #[serde(rename = "")]
    None,
    #[serde(rename = "wall")]
    Wall,
    #[serde(rename = "self")]
    SelfCollision,
    #[serde(rename = "body")]
    Body,
    #[serde(rename = "head-to-head")]
    HeadToHead,
    #[serde(rename = "hunger")]
    Hunger,
    #[serde(rename = "obstacle")]
    Obstacle,
}

impl DeathReason {
    /// Wording used in verdicts.
    pub fn description(self) -> &'static str {
        match self {
            DeathReason::Wall => "collision with wall",
            DeathReason::SelfCollision => "self-collision",
            DeathReason::Body => "collision with larger snake",
            DeathReason::HeadToHead => "head-to-head collision with larger snake",
            DeathReason::Hunger => "hunger",
            DeathReason::Obstacle => "collision with obstacle",
            DeathReason::None => "unknown cause",
        }
    }
}

/// One of the two fixed player slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PlayerId {
    One,
    Two,
}

impl PlayerId {
    pub const BOTH: [PlayerId; 2] = [PlayerId::One, PlayerId::Two];

    pub fn other(self) -> PlayerId {
        match self {
            PlayerId::One => PlayerId::Two,
            PlayerId::Two => PlayerId::One,
        }
    }

    /// 1 or 2, as used on the wire and in verdicts.
    pub fn number(self) -> u8 {
        match self {
            PlayerId::One => 1,
            PlayerId::Two => 2,
        }
    }

    pub fn from_number(number: u8) -> Option<PlayerId> {
        match number {
            1 => Some(PlayerId::One),
            2 => Some(PlayerId::Two),
            _ => None,
        }
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snake {
    pub id: u8,
    /// Head first.
    pub body: Vec<Position>,
    pub direction: Direction,
    pub alive: bool,
    pub length: u32,
    pub score: u32,
    pub speed_turns: u32,
    pub sleep_turns: u32,
    pub energy: i32,
    pub death_reason: DeathReason,
}

impl Snake {
    pub fn new(player: PlayerId, body: Vec<Position>, direction: Direction) -> Self {
        Self {
            id: player.number(),
            length: body.len() as u32,
            body,
            direction,
            alive: true,
            score: 0,
            speed_turns: 0,
            sleep_turns: 0,
            energy: MAX_ENERGY,
            death_reason: DeathReason::None,
        }
    }

    pub fn head(&self) -> Position {
        self.body.first().copied().unwrap_or(Position::new(-1, -1))
    }

    pub fn tail(&self) -> Option<Position> {
        self.body.last().copied()
    }

    pub fn is_frozen(&self) -> bool {
        self.sleep_turns > 0
    }

    /// Moves one cell, turning to `requested` unless that would be a 180° reversal.
    pub fn advance(&mut self, requested: Direction) {
        if !self.alive {
            return;
        }
        if self.body.len() < 2 || requested != self.direction.opposite() {
            self.direction = requested;
        }
        let new_head = self.head().step(self.direction);
        self.body.insert(0, new_head);
        self.body.pop();
    }

    /// Appends `n` copies of the tail cell.
    pub fn grow(&mut self, n: u32) {
        self.length += n;
        if let Some(tail) = self.tail() {
            for _ in 0..n {
                self.body.push(tail);
            }
        }
    }

    /// Removes one tail cell, never going below length 1.
    pub fn shrink(&mut self) {
        if self.length > 1 {
            self.length -= 1;
            self.body.pop();
        }
    }

    pub fn kill(&mut self, reason: DeathReason) {
        self.alive = false;
        self.death_reason = reason;
    }
}

/// Static board layout for a match.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Map {
    #[serde(default)]
    pub width: i32,
    #[serde(default)]
    pub height: i32,
    #[serde(default)]
    pub obstacles: Vec<Position>,
}

impl Map {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Map> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            JudgeError::Config(format!("failed to read map file {}: {e}", path.display()))
        })?;
        let map = serde_json::from_str(&data).map_err(|e| {
            JudgeError::Config(format!("failed to parse map file {}: {e}", path.display()))
        })?;
        Ok(map)
    }

    /// Grid size declared by the map, when both dimensions are positive.
    pub fn dimensions(&self) -> Option<(i32, i32)> {
        (self.width > 0 && self.height > 0).then_some((self.width, self.height))
    }

    pub fn is_obstacle(&self, position: Position) -> bool {
        self.obstacles.contains(&position)
    }
}

/// The aggregate root of a match.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "StateWire")]
pub struct GameState {
    pub turn: u32,
    pub grid_width: i32,
    pub grid_height: i32,
    snake_one: Snake,
    snake_two: Snake,
    pub apples: Vec<Apple>,
    pub map: Option<Map>,
    pub winner: Option<PlayerId>,
    pub game_over: bool,
}

impl GameState {
    /// Fresh board: snake 1 in the top-left corner heading down, snake 2 in the bottom-right
    /// corner heading up, and three apples.
    pub fn new<R: Rng + ?Sized>(width: i32, height: i32, map: Option<Map>, rng: &mut R) -> Self {
        let mut state = Self::without_apples(width, height, map);
        for _ in 0..INITIAL_APPLES {
            state.spawn_apple(rng);
        }
        state
    }

    /// Same starting snakes as [`GameState::new`], but no apples.
    pub fn without_apples(width: i32, height: i32, map: Option<Map>) -> Self {
        let snake_one = Snake::new(
            PlayerId::One,
            vec![Position::new(1, 2), Position::new(1, 1), Position::new(1, 0)],
            Direction::Down,
        );
        let snake_two = Snake::new(
            PlayerId::Two,
            vec![
                Position::new(width - 2, height - 3),
                Position::new(width - 2, height - 2),
                Position::new(width - 2, height - 1),
            ],
            Direction::Up,
        );
        Self {
            turn: 0,
            grid_width: width,
            grid_height: height,
            snake_one,
            snake_two,
            apples: vec![],
            map,
            winner: None,
            game_over: false,
        }
    }

    pub fn snake(&self, player: PlayerId) -> &Snake {
        match player {
            PlayerId::One => &self.snake_one,
            PlayerId::Two => &self.snake_two,
        }
    }

    pub fn snake_mut(&mut self, player: PlayerId) -> &mut Snake {
        match player {
            PlayerId::One => &mut self.snake_one,
            PlayerId::Two => &mut self.snake_two,
        }
    }

    pub fn is_inside(&self, position: Position) -> bool {
        (0..self.grid_width).contains(&position.x) && (0..self.grid_height).contains(&position.y)
    }

    pub fn is_obstacle(&self, position: Position) -> bool {
        self.map.as_ref().is_some_and(|map| map.is_obstacle(position))
    }

    /// Serializable view with `recipient`'s snake at index 0 and the opponent at index 1.
    pub fn view(&self, recipient: PlayerId) -> StateView<'_> {
        StateView {
            turn: self.turn,
            grid_width: self.grid_width,
            grid_height: self.grid_height,
            snakes: [self.snake(recipient), self.snake(recipient.other())],
            apples: &self.apples,
            map: self.map.as_ref(),
            winner: self.winner.map_or(0, PlayerId::number),
            game_over: self.game_over,
        }
    }

    /// One line of JSON for `recipient`, without the trailing newline.
    pub fn to_agent_json(&self, recipient: PlayerId) -> serde_json::Result<String> {
        serde_json::to_string(&self.view(recipient))
    }
}

impl Serialize for GameState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.view(PlayerId::One).serialize(serializer)
    }
}

/// Borrowed wire form of a [`GameState`].
#[derive(Debug, Serialize)]
pub struct StateView<'a> {
    pub turn: u32,
    pub grid_width: i32,
    pub grid_height: i32,
    pub snakes: [&'a Snake; 2],
    pub apples: &'a [Apple],
    pub map: Option<&'a Map>,
    pub winner: u8,
    pub game_over: bool,
}

#[derive(Deserialize)]
struct StateWire {
    turn: u32,
    grid_width: i32,
    grid_height: i32,
    snakes: Vec<Snake>,
    #[serde(default)]
    apples: Vec<Apple>,
    map: Option<Map>,
    winner: u8,
    game_over: bool,
}

impl TryFrom<StateWire> for GameState {
    type Error = String;

    fn try_from(wire: StateWire) -> Result<Self, Self::Error> {
        let [a, b]: [Snake; 2] = wire
            .snakes
            .try_into()
            .map_err(|v: Vec<Snake>| format!("expected 2 snakes, got {}", v.len()))?;
        let (snake_one, snake_two) = match (a.id, b.id) {
            (1, 2) => (a, b),
            (2, 1) => (b, a),
            (x, y) => return Err(format!("snake ids must be 1 and 2, got {x} and {y}")),
        };
        let winner = match wire.winner {
            0 => None,
            n => Some(PlayerId::from_number(n).ok_or_else(|| format!("invalid winner {n}"))?),
        };
        Ok(GameState {
            turn: wire.turn,
            grid_width: wire.grid_width,
            grid_height: wire.grid_height,
            snake_one,
            snake_two,
            apples: wire.apples,
            map: wire.map,
            winner,
            game_over: wire.game_over,
        })
    }
}

/// Reads a map file and resolves the grid size it implies.
pub fn load_board(
    map_path: Option<&Path>,
    width: i32,
    height: i32,
) -> anyhow::Result<(Option<Map>, i32, i32)> {
    let Some(path) = map_path else {
        return Ok((None, width, height));
    };
    let map = Map::load(path).with_context(|| format!("loading map {}", path.display()))?;
    let (width, height) = map.dimensions().unwrap_or((width, height));
    Ok((Some(map), width, height))
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    use super::*;

    #[test]
    fn fresh_board() {
        let mut rng = Pcg64::seed_from_u64(7);
        let state = GameState::new(20, 20, None, &mut rng);

        assert_eq!(state.turn, 0);
        assert!(!state.game_over);
        assert_eq!(state.winner, None);
        assert_eq!(state.apples.len(), 3);

        let one = state.snake(PlayerId::One);
        assert_eq!(one.length, 3);
        assert_eq!(one.head(), Position::new(1, 2));
        assert_eq!(one.direction, Direction::Down);

        let two = state.snake(PlayerId::Two);
        assert_eq!(two.length, 3);
        assert_eq!(two.head(), Position::new(18, 17));
        assert_eq!(two.tail(), Some(Position::new(18, 19)));
        assert_eq!(two.direction, Direction::Up);
    }

    #[test]
    fn reversal_is_ignored() {
        for dir in Direction::ALL {
            let mut snake = Snake::new(
                PlayerId::One,
                vec![Position::new(5, 5), Position::new(5, 5)],
                dir,
            );
            snake.advance(dir);
            snake.advance(dir.opposite());
            assert_eq!(snake.direction, dir);
            assert_eq!(snake.head(), Position::new(5, 5).step(dir).step(dir));
        }
    }

    #[test]
    fn single_cell_snake_may_reverse() {
        let mut snake = Snake::new(PlayerId::One, vec![Position::new(3, 3)], Direction::Up);
        snake.advance(Direction::Down);
        assert_eq!(snake.direction, Direction::Down);
        assert_eq!(snake.head(), Position::new(3, 4));
    }

    #[test]
    fn move_tokens() {
        assert_eq!(Direction::from_token("right"), Some(Direction::Right));
        assert_eq!(Direction::from_token("R"), Some(Direction::Right));
        assert_eq!(Direction::from_token("w"), Some(Direction::Up));
        assert_eq!(Direction::from_token("a"), Some(Direction::Left));
        assert_eq!(Direction::from_token("s"), Some(Direction::Down));
        assert_eq!(Direction::from_token("D"), Some(Direction::Down));
        assert_eq!(Direction::from_token("bogus"), None);
        assert_eq!(Direction::from_token(""), None);
    }

    #[test]
    fn apple_roll_boundaries() {
        assert_eq!(AppleKind::from_roll(0), AppleKind::Normal);
        assert_eq!(AppleKind::from_roll(59), AppleKind::Normal);
        assert_eq!(AppleKind::from_roll(60), AppleKind::God);
        assert_eq!(AppleKind::from_roll(75), AppleKind::Speed);
        assert_eq!(AppleKind::from_roll(90), AppleKind::Sleep);
        assert_eq!(AppleKind::from_roll(95), AppleKind::Poison);
        assert_eq!(AppleKind::from_roll(99), AppleKind::Poison);
    }

    #[test]
    fn view_puts_recipient_first() {
        let state = GameState::without_apples(10, 10, None);
        let json = state.to_agent_json(PlayerId::Two).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["snakes"][0]["id"], 2);
        assert_eq!(value["snakes"][1]["id"], 1);
        assert_eq!(value["map"], serde_json::Value::Null);
        assert_eq!(value["winner"], 0);
        assert_eq!(value["snakes"][0]["death_reason"], "");

        // canonical slots survive the round trip whatever the order on the wire
        let back: GameState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn wire_rejects_bad_snakes() {
        let state = GameState::without_apples(10, 10, None);
        let mut value = serde_json::to_value(&state).unwrap();
        value["snakes"][1]["id"] = 1.into();
        assert!(serde_json::from_value::<GameState>(value).is_err());
    }

    #[test]
    fn map_dimensions_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.json");
        std::fs::write(
            &path,
            r#"{"width": 12, "height": 9, "obstacles": [{"x": 4, "y": 4}]}"#,
        )
        .unwrap();

        let (map, w, h) = load_board(Some(&path), 20, 20).unwrap();
        assert_eq!((w, h), (12, 9));
        assert!(map.unwrap().is_obstacle(Position::new(4, 4)));

        let missing = load_board(Some(&dir.path().join("nope.json")), 20, 20).unwrap_err();
        assert!(matches!(
            missing.downcast_ref::<JudgeError>(),
            Some(JudgeError::Config(_))
        ));
    }
}
