//! Agent → judge response decoding. No I/O here.

use serde::Deserialize;

use crate::game::Direction;

#[derive(Deserialize)]
struct MoveMessage {
    #[serde(rename = "move")]
    token: String,
}

/// Decodes one response line.
///
/// Unrecognized tokens resolve to [`Direction::Up`], not to the snake's current direction.
/// The second value is false in that case so the caller can tally it.
pub fn parse_move_response(line: &str) -> (Direction, bool) {
    let line = line.trim();
    let token = match serde_json::from_str::<MoveMessage>(line) {
        Ok(message) => message.token,
        Err(_) => line.to_string(),
    };
    match Direction::from_token(&token) {
        Some(direction) => (direction, true),
        None => (Direction::Up, false),
    }
}
