//! # Game Protocol Messages
//!
//! JSON messages exchanged over `/game/`. Every message is an object whose `type`
//! field selects the variant:
//!
//! ```json
//! {"type": "join_room", "room_id": "ABCD", "player_name": "Bob"}
//! {"type": "game_round", "round_number": 2, "audio": "UklGRi4AAABXQVZF..."}
//! ```
//!
//! ## Rust Concepts:
//! - **Internally tagged enums**: `#[serde(tag = "type")]` maps the `type` field to a
//!   variant, so dispatch is a plain `match`
//! - **snake_case renaming**: `CreateRoom` travels as `"create_room"`

use crate::audio::SummaryFile;
use crate::error::{GameError, GameResult};
use crate::game::{PlayerId, Room, RoomCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Requests a client can send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    CreateRoom { player_name: String },
    JoinRoom { room_id: RoomCode, player_name: String },
    LeaveRoom,
    StartGame,
    /// A base64 recording for `round_number`.
    UploadFile { round_number: u32, file_data: String },
}

/// Values of `type` that name a known request.
const REQUEST_TYPES: [&str; 5] = ["create_room", "join_room", "leave_room", "start_game", "upload_file"];

impl ClientMessage {
    /// Parse one text frame.
    ///
    /// Frames that are not JSON or name an unknown `type` are reported as
    /// "Invalid request type"; a known `type` with missing or ill-typed fields is
    /// "Invalid request payload".
    pub fn parse(text: &str) -> GameResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|_| GameError::Validation("Invalid request type".to_string()))?;

        let known = value
            .get("type")
            .and_then(Value::as_str)
            .map_or(false, |kind| REQUEST_TYPES.contains(&kind));
        if !known {
            return Err(GameError::Validation("Invalid request type".to_string()));
        }

        serde_json::from_value(value).map_err(|_| GameError::Validation("Invalid request payload".to_string()))
    }
}

/// Messages the server pushes to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    RoomCreated { room: Room },
    RoomJoined { room: Room, player_id: PlayerId },
    RoomUpdated { room: Room },
    RoomLeft,
    GameStarted,
    /// `audio` is the reversed recording to respond to; always `null` in round 1.
    GameRound { round_number: u32, audio: Option<String> },
    /// Row `i` traces the hand-off chain starting at seat `i`, one entry per round.
    GameSummary { files: Vec<Vec<SummaryFile>> },
    Error { error: String },
}

impl ServerMessage {
    pub fn error(err: &GameError) -> Self {
        ServerMessage::Error { error: err.to_string() }
    }
}
