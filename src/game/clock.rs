//! # Game Clock
//!
//! Owns the lifecycle of a room's [`Game`] record: creation on start, one round
//! forward per scheduler tick, deletion when the last round is over.
//!
//! Operations taking an `epoch` only act on the game created with that epoch.
//! `None` means "whatever game is currently running".

use super::models::{Game, Room, RoomCode};
use crate::store::{Mutation, StateStore};
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};

/// What happened when a game was requested to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started(Game),
    RoomMissing,
    AlreadyRunning,
}

pub struct GameClock {
    store: Arc<StateStore>,
}

impl GameClock {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Create the game of `code` at round 1, unless the room is gone or a game is
    /// already running in it.
    pub fn start_game(&self, code: &RoomCode) -> Result<StartOutcome> {
        if !self.store.exists(&Room::key(code)) {
            return Ok(StartOutcome::RoomMissing);
        }

        let game = Game::new(code.clone());
        if !self.store.put_json_if_absent(&Game::key(code), &game)? {
            debug!(room = %code, "start ignored, game already running");
            return Ok(StartOutcome::AlreadyRunning);
        }

        info!(room = %code, epoch = %game.epoch, "game started");
        Ok(StartOutcome::Started(game))
    }

    #[cfg(test)]
    pub fn get_game(&self, code: &RoomCode) -> Result<Option<Game>> {
        self.store.get_json(&Game::key(code))
    }

    /// Move the game forward by one round. Returns the updated game, or `None` when
    /// there is no matching game.
    pub fn advance_round(&self, code: &RoomCode, epoch: Option<&str>) -> Result<Option<Game>> {
        let game = self.store.mutate_json(&Game::key(code), |current: Option<Game>| match current {
            Some(mut game) if epoch.map_or(true, |epoch| game.epoch == epoch) => {
                game.round += 1;
                (Mutation::Put(game.clone()), Some(game))
            }
            _ => (Mutation::Keep, None),
        })?;

        if let Some(game) = &game {
            debug!(room = %code, round = game.round, "round advanced");
        }
        Ok(game)
    }

    /// Delete the game record. Returns whether a matching game was removed.
    pub fn end_game(&self, code: &RoomCode, epoch: Option<&str>) -> Result<bool> {
        let ended = self.store.mutate_json(&Game::key(code), |current: Option<Game>| match current {
            Some(game) if epoch.map_or(true, |epoch| game.epoch == epoch) => (Mutation::Delete, true),
            _ => (Mutation::Keep, false),
        })?;

        if ended {
            info!(room = %code, "game ended");
        }
        Ok(ended)
    }
}
