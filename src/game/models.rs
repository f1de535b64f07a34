//! # Game Records
//!
//! The two records shared between connections through the state store:
//! a [`Room`] (who is playing, who hosts) and a [`Game`] (which round is live).
//! Both are stored as JSON, so every field here is part of the wire format the
//! web client renders from `room_created`, `room_joined` and `room_updated`.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque per-connection player identifier (a UUID v4 string).
pub type PlayerId = String;

/// A validated 4-letter uppercase room code such as `ABCD`.
///
/// Deserializing rejects anything else, so a `join_room` with a malformed
/// `room_id` fails at the protocol layer instead of reaching the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    pub const LEN: usize = 4;

    /// Draw a fresh uniformly random code.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let code = (0..Self::LEN)
            .map(|_| char::from(b'A' + rng.gen_range(0..26u8)))
            .collect();
        RoomCode(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomCode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.len() == Self::LEN && value.bytes().all(|b| b.is_ascii_uppercase()) {
            Ok(RoomCode(value))
        } else {
            Err(format!("room code must be {} uppercase letters, got {:?}", Self::LEN, value))
        }
    }
}

impl TryFrom<&str> for RoomCode {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        RoomCode::try_from(value.to_string())
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A lobby of players identified by its code.
///
/// ## Invariants:
/// - `player_ids` keeps join order; a player's index is their seat in the rotation
/// - `player_names` has exactly one entry per distinct id in `player_ids`
/// - `host_id` is an element of `player_ids` while the room has players
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub code: RoomCode,
    pub player_ids: Vec<PlayerId>,
    pub player_names: BTreeMap<PlayerId, String>,
    pub host_id: PlayerId,
}

impl Room {
    pub fn new(code: RoomCode, host_id: &str, host_name: &str) -> Self {
        let mut player_names = BTreeMap::new();
        player_names.insert(host_id.to_string(), host_name.to_string());
        Self {
            code,
            player_ids: vec![host_id.to_string()],
            player_names,
            host_id: host_id.to_string(),
        }
    }

    /// Store key of the room record.
    pub fn key(code: &RoomCode) -> String {
        format!("room:{}", code)
    }

    pub fn player_count(&self) -> usize {
        self.player_ids.len()
    }

    pub fn is_host(&self, player_id: &str) -> bool {
        self.host_id == player_id
    }

    /// Seat of `player_id` in the rotation.
    pub fn index_of(&self, player_id: &str) -> Option<usize> {
        self.player_ids.iter().position(|id| id == player_id)
    }

    pub fn add_player(&mut self, player_id: &str, name: &str) {
        self.player_ids.push(player_id.to_string());
        self.player_names.insert(player_id.to_string(), name.to_string());
    }

    /// Remove every seat held by `player_id`, handing the host role to the
    /// earliest remaining joiner if needed. Returns whether anything changed.
    pub fn remove_player(&mut self, player_id: &str) -> bool {
        let before = self.player_ids.len();
        self.player_ids.retain(|id| id != player_id);
        self.player_names.remove(player_id);

        if self.host_id == player_id {
            if let Some(next_host) = self.player_ids.first() {
                self.host_id = next_host.clone();
            }
        }
        self.player_ids.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.player_ids.is_empty()
    }
}

/// The live round of a room's game.
///
/// `epoch` is fixed when the game is created. A round scheduler only touches the
/// game whose epoch it was started with, so a scheduler left over from an earlier
/// game of the same room can never advance or end a newer one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub room_code: RoomCode,
    pub round: u32,
    pub epoch: String,
}

impl Game {
    pub fn new(room_code: RoomCode) -> Self {
        Self {
            room_code,
            round: 1,
            epoch: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Store key of the game record, a sibling of the room key.
    pub fn key(code: &RoomCode) -> String {
        format!("room:{}:game", code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StateStore;

    fn code(s: &str) -> RoomCode {
        RoomCode::try_from(s).unwrap()
    }

    #[test]
    fn test_room_code_validation() {
        assert!(RoomCode::try_from("ABCD").is_ok());
        assert!(RoomCode::try_from("abcd").is_err());
        assert!(RoomCode::try_from("ABC").is_err());
        assert!(RoomCode::try_from("ABCDE").is_err());
        assert!(RoomCode::try_from("AB1D").is_err());
        assert!(serde_json::from_str::<RoomCode>("\"zzzz\"").is_err());
    }

    #[test]
    fn test_random_codes_are_well_formed() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let drawn = RoomCode::random(&mut rng);
            assert!(RoomCode::try_from(drawn.as_str()).is_ok(), "bad code {}", drawn);
        }
    }

    #[test]
    fn test_records_survive_the_store_unchanged() {
        let store = StateStore::new();
        let mut room = Room::new(code("WXYZ"), "p1", "Alice");
        room.add_player("p2", "Bob");
        let game = Game::new(code("WXYZ"));

        assert!(store.put_json_if_absent(&Room::key(&room.code), &room).unwrap());
        assert!(store.put_json_if_absent(&Game::key(&game.room_code), &game).unwrap());

        let stored_room: Room = store.get_json("room:WXYZ").unwrap().unwrap();
        let stored_game: Game = store.get_json("room:WXYZ:game").unwrap().unwrap();
        assert_eq!(stored_room, room);
        assert_eq!(stored_game, game);
    }

    #[test]
    fn test_room_json_shape() {
        let room = Room::new(code("ABCD"), "p1", "Alice");
        let json = serde_json::to_value(&room).unwrap();
        assert_eq!(json["code"], "ABCD");
        assert_eq!(json["player_ids"][0], "p1");
        assert_eq!(json["player_names"]["p1"], "Alice");
        assert_eq!(json["host_id"], "p1");
    }

    #[test]
    fn test_host_passes_to_next_earliest_joiner() {
        let mut room = Room::new(code("ABCD"), "alice", "Alice");
        room.add_player("bob", "Bob");
        room.add_player("carol", "Carol");

        assert!(room.remove_player("alice"));
        assert_eq!(room.host_id, "bob");
        assert_eq!(room.player_ids, vec!["bob".to_string(), "carol".to_string()]);
        assert!(!room.player_names.contains_key("alice"));

        assert!(!room.remove_player("nobody"));
        assert_eq!(room.player_count(), 2);
    }
}
