use std::fmt;

use super::{AppleKind, GameState, PlayerId, Position};

impl AppleKind {
    fn symbol(self) -> char {
        match self {
            AppleKind::Normal => 'A',
            AppleKind::God => 'D',
            AppleKind::Speed => 'S',
            AppleKind::Sleep => 'Z',
            AppleKind::Poison => 'P',
        }
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.grid_width.max(0) as usize;
        let height = self.grid_height.max(0) as usize;
        let mut grid = vec![vec!['.'; width]; height];
        let mut put = |pos: Position, c: char| {
            if self.is_inside(pos) {
                grid[pos.y as usize][pos.x as usize] = c;
            }
        };

        for apple in &self.apples {
            put(apple.position(), apple.kind.symbol());
        }
        if let Some(map) = &self.map {
            for &obstacle in &map.obstacles {
                put(obstacle, '#');
            }
        }
        for (player, head, segment) in [(PlayerId::One, '1', 'o'), (PlayerId::Two, '2', 'x')] {
            let snake = self.snake(player);
            if !snake.alive {
                continue;
            }
            for (i, &pos) in snake.body.iter().enumerate() {
                put(pos, if i == 0 { head } else { segment });
            }
        }

        writeln!(f, "Turn {}", self.turn)?;
        for row in grid {
            writeln!(f, "{}", row.into_iter().collect::<String>())?;
        }
        for player in PlayerId::BOTH {
            let s = self.snake(player);
            writeln!(
                f,
                "Snake {player}: Alive={}, Length={}, Score={}, Speed={}, Sleep={}, Energy={}",
                s.alive, s.length, s.score, s.speed_turns, s.sleep_turns, s.energy
            )?;
        }
        Ok(())
    }
}
