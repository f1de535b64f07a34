//! # Audio Vault
//!
//! Keeps every recording of a game: the original upload and its reversed copy.
//!
//! Bytes go to the [`BlobStore`]; where they went is recorded in the state store
//! under a hash per round:
//!
//! ```text
//! game:{CODE}:round:{N}  →  { player_id → {"original": path, "reversed": path} }
//! ```
//!
//! Codec work and disk IO run on Tokio's blocking pool so a large upload never stalls
//! the session tasks sharing the runtime.

use super::blobs::BlobStore;
use super::codec::AudioCodec;
use crate::error::{GameError, GameResult};
use crate::game::{rotation_index, PlayerId, Room, RoomCode};
use crate::store::StateStore;
use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where the two copies of one recording live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct FileLocation {
    original: String,
    reversed: String,
}

/// One cell of the end-of-game summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryFile {
    pub player_id: PlayerId,
    pub original_b64: Option<String>,
    pub reversed_b64: Option<String>,
}

pub struct AudioVault {
    store: Arc<StateStore>,
    blobs: BlobStore,
    codec: Arc<dyn AudioCodec>,
}

impl AudioVault {
    pub fn new(store: Arc<StateStore>, blobs: BlobStore, codec: Arc<dyn AudioCodec>) -> Self {
        Self { store, blobs, codec }
    }

    fn index_key(code: &RoomCode, round: u32) -> String {
        format!("game:{}:round:{}", code, round)
    }

    pub fn files_dir(&self) -> &Path {
        self.blobs.root()
    }

    /// Reverse `original` and store both copies for (`code`, `round`, `player_id`).
    ///
    /// Malformed WAV data is a validation error; a second upload for the same
    /// triple replaces the first.
    pub async fn save_round_file(
        &self,
        code: &RoomCode,
        round: u32,
        player_id: &str,
        original: Vec<u8>,
    ) -> GameResult<()> {
        let codec = self.codec.clone();
        let blobs = self.blobs.clone();
        let stem = format!("{}_round{}_{}", code, round, player_id);

        let location = tokio::task::spawn_blocking(move || -> GameResult<FileLocation> {
            let reversed = codec.reverse(&original).map_err(|e| {
                debug!("rejecting upload: {}", e);
                GameError::Validation("Invalid audio data".to_string())
            })?;
            let ext = codec.extension(&original);

            let original_path = blobs
                .put(&format!("{}.{}", stem, ext), &original)
                .context("failed to write original recording")?;
            let reversed_path = blobs
                .put(&format!("{}_reversed.{}", stem, ext), &reversed)
                .context("failed to write reversed recording")?;

            Ok(FileLocation {
                original: original_path.to_string_lossy().into_owned(),
                reversed: reversed_path.to_string_lossy().into_owned(),
            })
        })
        .await
        .context("recording writer task failed")??;

        let json = serde_json::to_string(&location).context("failed to encode file location")?;
        self.store.hset(&Self::index_key(code, round), player_id, json)?;
        info!(room = %code, round, player = %player_id, "recording stored");
        Ok(())
    }

    fn location(&self, code: &RoomCode, round: u32, player_id: &str) -> GameResult<Option<FileLocation>> {
        match self.store.hget(&Self::index_key(code, round), player_id)? {
            None => Ok(None),
            Some(json) => Ok(Some(
                serde_json::from_str(&json).context("corrupt file location in round index")?,
            )),
        }
    }

    /// The reversed recording `player_id` uploaded for `round`.
    ///
    /// Round 0 never has a recording: round 1 players start from scratch.
    pub async fn get_round_file(
        &self,
        code: &RoomCode,
        round: u32,
        player_id: &str,
    ) -> GameResult<Option<Vec<u8>>> {
        if round == 0 {
            return Ok(None);
        }
        let Some(location) = self.location(code, round, player_id)? else {
            return Ok(None);
        };

        let blobs = self.blobs.clone();
        let bytes = tokio::task::spawn_blocking(move || read_or_skip(&blobs, &location.reversed))
            .await
            .context("recording reader task failed")?;
        Ok(bytes)
    }

    /// Every recording of the room's game, arranged for the summary screen.
    ///
    /// Row `i` follows the hand-off chain that starts at seat `i`: its `k`-th entry
    /// holds round `k` of the seat at `rotation_index(i, k)`. Missing uploads are
    /// entries with both payloads `None`.
    pub async fn get_all_files(&self, room: &Room) -> GameResult<Vec<Vec<SummaryFile>>> {
        let player_count = room.player_count();
        let mut cells = Vec::with_capacity(player_count);

        for start in 0..player_count {
            let mut row = Vec::with_capacity(player_count);
            for round in 1..=player_count as u32 {
                let seat = rotation_index(start, round, player_count).unwrap_or(start);
                let player_id = room.player_ids[seat].clone();
                let location = self.location(&room.code, round, &player_id)?;
                row.push((player_id, location));
            }
            cells.push(row);
        }

        let blobs = self.blobs.clone();
        let files = tokio::task::spawn_blocking(move || -> Vec<Vec<SummaryFile>> {
            cells
                .into_iter()
                .map(|row| {
                    row.into_iter()
                        .map(|(player_id, location)| summary_file(&blobs, player_id, location))
                        .collect::<Vec<_>>()
                })
                .collect()
        })
        .await
        .context("summary reader task failed")?;
        Ok(files)
    }

    /// Forget every round index of `code`, so a new game starts with no recordings.
    ///
    /// The blobs stay on disk and are overwritten as the new game's uploads arrive.
    pub fn clear_room(&self, code: &RoomCode) -> usize {
        let removed = self.store.delete_prefix(&format!("game:{}:round:", code));
        if removed > 0 {
            debug!(room = %code, rounds = removed, "cleared previous round indexes");
        }
        removed
    }
}

fn read_or_skip(blobs: &BlobStore, location: &str) -> Option<Vec<u8>> {
    match blobs.get(&PathBuf::from(location)) {
        Ok(bytes) => {
            if bytes.is_none() {
                warn!(path = %location, "indexed recording is missing on disk");
            }
            bytes
        }
        Err(e) => {
            warn!(path = %location, "failed to read recording: {}", e);
            None
        }
    }
}

fn summary_file(blobs: &BlobStore, player_id: PlayerId, location: Option<FileLocation>) -> SummaryFile {
    let (original_b64, reversed_b64) = match location {
        None => (None, None),
        Some(location) => (
            read_or_skip(blobs, &location.original).map(|bytes| STANDARD.encode(bytes)),
            read_or_skip(blobs, &location.reversed).map(|bytes| STANDARD.encode(bytes)),
        ),
    };
    SummaryFile {
        player_id,
        original_b64,
        reversed_b64,
    }
}
