//! Zone-balanced apple spawning.
//!
//! Free cells are split into three zones by Manhattan distance to both heads: cells whose
//! two distances differ by at most [`NEUTRAL_MARGIN`] are neutral, the others belong to the
//! closer snake. A new apple goes to the zone currently holding the fewest apples.

use std::collections::HashSet;

use rand::Rng;
use tracing::trace;

use super::{Apple, AppleKind, GameState, PlayerId, Position};

pub const NEUTRAL_MARGIN: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Neutral,
    Snake(PlayerId),
}

impl Zone {
    /// Tie-break and fallback order.
    const ORDER: [Zone; 3] = [
        Zone::Neutral,
        Zone::Snake(PlayerId::One),
        Zone::Snake(PlayerId::Two),
    ];

    pub fn of(position: Position, head_one: Position, head_two: Position) -> Zone {
        let d1 = position.manhattan(head_one);
        let d2 = position.manhattan(head_two);
        if (d1 - d2).abs() <= NEUTRAL_MARGIN {
            Zone::Neutral
        } else if d1 < d2 {
            Zone::Snake(PlayerId::One)
        } else {
            Zone::Snake(PlayerId::Two)
        }
    }
}

/// Per-zone tallies, used both for apples and for candidate cells.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZoneCounts {
    pub neutral: usize,
    pub one: usize,
    pub two: usize,
}

impl ZoneCounts {
    pub fn get(&self, zone: Zone) -> usize {
        match zone {
            Zone::Neutral => self.neutral,
            Zone::Snake(PlayerId::One) => self.one,
            Zone::Snake(PlayerId::Two) => self.two,
        }
    }

    fn bump(&mut self, zone: Zone) {
        match zone {
            Zone::Neutral => self.neutral += 1,
            Zone::Snake(PlayerId::One) => self.one += 1,
            Zone::Snake(PlayerId::Two) => self.two += 1,
        }
    }
}

/// Picks the zone for the next apple.
///
/// The zone with the fewest apples wins; ties go to neutral, then snake 1, then snake 2.
/// If the winner has no free cell the first non-empty zone in that same order is used.
/// `None` when no zone has a free cell.
pub fn select_zone(apples: ZoneCounts, free_cells: ZoneCounts) -> Option<Zone> {
    let preferred = Zone::ORDER
        .into_iter()
        .min_by_key(|zone| apples.get(*zone))
        .unwrap_or(Zone::Neutral);
    if free_cells.get(preferred) > 0 {
        return Some(preferred);
    }
    Zone::ORDER
        .into_iter()
        .find(|zone| free_cells.get(*zone) > 0)
}

impl GameState {
    fn occupied_cells(&self) -> HashSet<Position> {
        let mut occupied: HashSet<Position> = PlayerId::BOTH
            .iter()
            .flat_map(|p| self.snake(*p).body.iter().copied())
            .collect();
        occupied.extend(self.apples.iter().map(Apple::position));
        if let Some(map) = &self.map {
            occupied.extend(map.obstacles.iter().copied());
        }
        occupied
    }

    /// Adds one apple on a free cell, or does nothing when the board is full.
    pub fn spawn_apple<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let occupied = self.occupied_cells();
        let head_one = self.snake(PlayerId::One).head();
        let head_two = self.snake(PlayerId::Two).head();

        let mut cells: [Vec<Position>; 3] = Default::default();
        let mut free = ZoneCounts::default();
        for y in 0..self.grid_height {
            for x in 0..self.grid_width {
                let pos = Position::new(x, y);
                if occupied.contains(&pos) {
                    continue;
                }
                let zone = Zone::of(pos, head_one, head_two);
                free.bump(zone);
                cells[zone_slot(zone)].push(pos);
            }
        }

        let mut apples = ZoneCounts::default();
        for apple in &self.apples {
            apples.bump(Zone::of(apple.position(), head_one, head_two));
        }

        let Some(zone) = select_zone(apples, free) else {
            trace!("board full, no apple spawned");
            return;
        };
        let candidates = &cells[zone_slot(zone)];
        let pos = candidates[rng.gen_range(0..candidates.len())];
        let kind = AppleKind::from_roll(rng.gen_range(0..100));
        trace!(?zone, ?pos, ?kind, "apple spawned");
        self.apples.push(Apple::new(pos, kind));
    }
}

fn zone_slot(zone: Zone) -> usize {
    match zone {
        Zone::Neutral => 0,
        Zone::Snake(PlayerId::One) => 1,
        Zone::Snake(PlayerId::Two) => 2,
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    use super::*;
    use crate::game::Map;

    fn counts(neutral: usize, one: usize, two: usize) -> ZoneCounts {
        ZoneCounts { neutral, one, two }
    }

    const PLENTY: ZoneCounts = ZoneCounts {
        neutral: 10,
        one: 10,
        two: 10,
    };

    #[test]
    fn fewest_apples_wins() {
        assert_eq!(
            select_zone(counts(2, 0, 1), PLENTY),
            Some(Zone::Snake(PlayerId::One))
        );
        assert_eq!(
            select_zone(counts(2, 1, 0), PLENTY),
            Some(Zone::Snake(PlayerId::Two))
        );
        assert_eq!(select_zone(counts(0, 1, 1), PLENTY), Some(Zone::Neutral));
    }

    #[test]
    fn neutral_wins_ties() {
        assert_eq!(select_zone(counts(1, 1, 2), PLENTY), Some(Zone::Neutral));
        assert_eq!(select_zone(counts(1, 2, 1), PLENTY), Some(Zone::Neutral));
        assert_eq!(select_zone(counts(0, 0, 0), PLENTY), Some(Zone::Neutral));
        assert_eq!(
            select_zone(counts(3, 1, 1), PLENTY),
            Some(Zone::Snake(PlayerId::One))
        );
    }

    #[test]
    fn empty_zone_falls_back() {
        assert_eq!(
            select_zone(counts(1, 0, 1), counts(4, 0, 4)),
            Some(Zone::Neutral)
        );
        assert_eq!(
            select_zone(counts(0, 1, 1), counts(0, 0, 4)),
            Some(Zone::Snake(PlayerId::Two))
        );
        assert_eq!(select_zone(counts(0, 0, 0), counts(0, 0, 0)), None);
    }

    #[test]
    fn zone_of_cell() {
        let h1 = Position::new(0, 0);
        let h2 = Position::new(10, 0);
        assert_eq!(Zone::of(Position::new(5, 0), h1, h2), Zone::Neutral);
        assert_eq!(Zone::of(Position::new(3, 0), h1, h2), Zone::Neutral);
        assert_eq!(
            Zone::of(Position::new(1, 0), h1, h2),
            Zone::Snake(PlayerId::One)
        );
        assert_eq!(
            Zone::of(Position::new(9, 3), h1, h2),
            Zone::Snake(PlayerId::Two)
        );
    }

    #[test]
    fn never_spawns_on_occupied_cells() {
        let map = Map {
            width: 8,
            height: 8,
            obstacles: (0..8).map(|y| Position::new(4, y)).collect(),
        };
        for seed in 0..20 {
            let mut rng = Pcg64::seed_from_u64(seed);
            let mut state = GameState::without_apples(8, 8, Some(map.clone()));
            for _ in 0..64 {
                state.spawn_apple(&mut rng);
            }
            let mut seen = HashSet::new();
            for apple in &state.apples {
                let pos = apple.position();
                assert!(state.is_inside(pos));
                assert!(!state.is_obstacle(pos));
                assert!(!state.snake(PlayerId::One).body.contains(&pos));
                assert!(!state.snake(PlayerId::Two).body.contains(&pos));
                assert!(seen.insert(pos), "two apples on {pos:?}");
            }
            // 64 cells - 8 obstacles - 6 snake cells
            assert_eq!(state.apples.len(), 50);
        }
    }

    #[test]
    fn full_board_is_a_no_op() {
        let mut rng = Pcg64::seed_from_u64(1);
        let mut state = GameState::without_apples(3, 3, None);
        for _ in 0..20 {
            state.spawn_apple(&mut rng);
        }
        let before = state.apples.clone();
        state.spawn_apple(&mut rng);
        assert_eq!(state.apples, before);
    }
}
