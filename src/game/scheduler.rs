//! # Round Scheduler
//!
//! Drives one game purely from elapsed time:
//!
//! ```text
//! start ──D──▶ round 2 ──D──▶ round 3 ── … ──▶ round N ──D──▶ game ended
//! ```
//!
//! Each round stays live for `D`; once the round number reaches the current player
//! count the scheduler waits one more `D` and ends the game. The player count is
//! re-read on every tick so joins and leaves during a game are taken into account.
//!
//! The scheduler runs as its own Tokio task. The [`RoundScheduler`] handle is owned by
//! the session that started the game; dropping the handle aborts the task.

use super::clock::GameClock;
use super::models::{Game, RoomCode};
use super::registry::RoomRegistry;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub struct RoundScheduler {
    room_code: RoomCode,
    epoch: String,
    task: JoinHandle<()>,
}

impl RoundScheduler {
    /// Spawn the timer for `game`. Must be called from within a Tokio runtime.
    pub fn start(
        clock: Arc<GameClock>,
        rooms: Arc<RoomRegistry>,
        game: &Game,
        round_duration: Duration,
    ) -> Self {
        let room_code = game.room_code.clone();
        let epoch = game.epoch.clone();

        let task = {
            let room_code = room_code.clone();
            let epoch = epoch.clone();
            tokio::spawn(async move {
                if let Err(e) = drive(&clock, &rooms, &room_code, &epoch, round_duration).await {
                    error!(room = %room_code, "round scheduler failed: {:#}", e);
                }
            })
        };

        debug!(room = %room_code, epoch = %epoch, ?round_duration, "round scheduler started");
        Self { room_code, epoch, task }
    }

    pub fn room_code(&self) -> &RoomCode {
        &self.room_code
    }

    pub fn epoch(&self) -> &str {
        &self.epoch
    }

    /// Whether the timer has run to completion (or stopped on its own).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for RoundScheduler {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn drive(
    clock: &GameClock,
    rooms: &RoomRegistry,
    code: &RoomCode,
    epoch: &str,
    round_duration: Duration,
) -> Result<()> {
    loop {
        tokio::time::sleep(round_duration).await;

        let Some(game) = clock.advance_round(code, Some(epoch))? else {
            debug!(room = %code, "game replaced or gone, scheduler stopping");
            return Ok(());
        };

        let player_count = rooms.players(code)?.len();
        if (game.round as usize) >= player_count {
            break;
        }
    }

    tokio::time::sleep(round_duration).await;
    if clock.end_game(code, Some(epoch))? {
        info!(room = %code, "final round over");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::clock::StartOutcome;
    use crate::store::StateStore;

    fn setup(players: usize) -> (Arc<GameClock>, Arc<RoomRegistry>, RoomCode) {
        let store = Arc::new(StateStore::new());
        let rooms = Arc::new(RoomRegistry::new(store.clone(), 1000));
        let code = rooms.create_room("p0", "P0").unwrap().code;
        for i in 1..players {
            rooms.add_player(&code, &format!("p{}", i), "P").unwrap();
        }
        (Arc::new(GameClock::new(store)), rooms, code)
    }

    fn start(clock: &GameClock, code: &RoomCode) -> Game {
        match clock.start_game(code).unwrap() {
            StartOutcome::Started(game) => game,
            other => panic!("expected a started game, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_player_game_runs_three_rounds_then_ends() {
        let (clock, rooms, code) = setup(3);
        let game = start(&clock, &code);
        let round = Duration::from_secs(30);
        let scheduler = RoundScheduler::start(clock.clone(), rooms, &game, round);

        tokio::time::sleep(round / 2).await;
        assert_eq!(clock.get_game(&code).unwrap().unwrap().round, 1);

        tokio::time::sleep(round).await;
        assert_eq!(clock.get_game(&code).unwrap().unwrap().round, 2);

        tokio::time::sleep(round).await;
        assert_eq!(clock.get_game(&code).unwrap().unwrap().round, 3);

        // Round 3 of 3 is the last one, it still gets a full duration.
        tokio::time::sleep(round).await;
        assert_eq!(clock.get_game(&code).unwrap(), None);
        assert!(scheduler.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_the_handle_stops_the_timer() {
        let (clock, rooms, code) = setup(2);
        let game = start(&clock, &code);
        let round = Duration::from_secs(30);

        let scheduler = RoundScheduler::start(clock.clone(), rooms, &game, round);
        assert_eq!(scheduler.epoch(), game.epoch);
        assert_eq!(scheduler.room_code(), &code);
        drop(scheduler);

        tokio::time::sleep(round * 3).await;
        assert_eq!(clock.get_game(&code).unwrap().unwrap().round, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_scheduler_leaves_new_game_alone() {
        let (clock, rooms, code) = setup(2);
        let round = Duration::from_secs(30);

        let first = start(&clock, &code);
        let stale = RoundScheduler::start(clock.clone(), rooms.clone(), &first, round);
        clock.end_game(&code, None).unwrap();
        let second = start(&clock, &code);

        tokio::time::sleep(round + round / 2).await;
        assert!(stale.is_finished());
        assert_eq!(clock.get_game(&code).unwrap(), Some(second));
    }
}
