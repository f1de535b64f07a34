//! Seat rotation: which player's recording a seat receives in a given round.
//!
//! In round `k` the player seated at `start` is handed the round `k - 1` recording of
//! the player seated at `(start + k - 1) mod N`. Row `i` of the game summary uses the
//! same walk, listing for every round the seat at `(i + k - 1) mod N`.

/// Seat reached from `start` in `round` (1-based) of an `player_count`-seat room.
///
/// `None` when the room is empty or the round is 0.
pub fn rotation_index(start: usize, round: u32, player_count: usize) -> Option<usize> {
    if player_count == 0 || round == 0 {
        return None;
    }
    let offset = (round as usize - 1) % player_count;
    Some((start % player_count + offset) % player_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_one_is_own_seat() {
        assert_eq!(rotation_index(0, 1, 3), Some(0));
        assert_eq!(rotation_index(2, 1, 3), Some(2));
    }

    #[test]
    fn test_wraps_around_the_table() {
        assert_eq!(rotation_index(2, 2, 3), Some(0));
        assert_eq!(rotation_index(1, 3, 3), Some(0));
        assert_eq!(rotation_index(0, 4, 3), Some(0));
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(rotation_index(0, 1, 0), None);
        assert_eq!(rotation_index(0, 0, 4), None);
    }

    #[test]
    fn test_every_seat_is_visited_once_per_start() {
        for player_count in 1..=8 {
            for start in 0..player_count {
                let mut seen = vec![false; player_count];
                for round in 1..=player_count as u32 {
                    let seat = rotation_index(start, round, player_count).unwrap();
                    assert!(!seen[seat], "seat {} repeated for start {} of {}", seat, start, player_count);
                    seen[seat] = true;
                }
                assert!(seen.iter().all(|visited| *visited));
            }
        }
    }

    #[test]
    fn test_each_round_is_a_permutation_of_seats() {
        let player_count = 5;
        for round in 1..=player_count as u32 {
            let mut authors: Vec<usize> = (0..player_count)
                .map(|start| rotation_index(start, round, player_count).unwrap())
                .collect();
            authors.sort_unstable();
            assert_eq!(authors, (0..player_count).collect::<Vec<_>>());
        }
    }
}
