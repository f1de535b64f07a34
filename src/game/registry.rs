//! # Room Registry
//!
//! Creates rooms and applies membership changes to the shared room records.
//! Every change is an optimistic read-modify-write through
//! [`StateStore::mutate_json`], so concurrent joins and leaves never lose an update.

use super::models::{Game, PlayerId, Room, RoomCode};
use crate::store::{Mutation, StateStore};
use anyhow::{bail, Result};
use std::sync::Arc;
use tracing::{debug, info};

pub struct RoomRegistry {
    store: Arc<StateStore>,
    code_attempts: u32,
}

impl RoomRegistry {
    pub fn new(store: Arc<StateStore>, code_attempts: u32) -> Self {
        Self { store, code_attempts }
    }

    /// Create a room hosted by `host_id` under a fresh random code.
    ///
    /// Codes are claimed with create-if-absent, so two concurrent creations can
    /// never end up sharing a code.
    pub fn create_room(&self, host_id: &str, host_name: &str) -> Result<Room> {
        let mut rng = rand::thread_rng();
        for attempt in 1..=self.code_attempts {
            let room = Room::new(RoomCode::random(&mut rng), host_id, host_name);
            if self.store.put_json_if_absent(&Room::key(&room.code), &room)? {
                info!(room = %room.code, host = %host_id, attempt, "room created");
                return Ok(room);
            }
            debug!(room = %room.code, attempt, "room code taken, drawing another");
        }
        bail!("no free room code found after {} attempts", self.code_attempts)
    }

    pub fn get_room(&self, code: &RoomCode) -> Result<Option<Room>> {
        self.store.get_json(&Room::key(code))
    }

    /// Append a player. Returns `None` when the room does not exist.
    pub fn add_player(&self, code: &RoomCode, player_id: &str, name: &str) -> Result<Option<Room>> {
        let room = self.store.mutate_json(&Room::key(code), |current: Option<Room>| match current {
            None => (Mutation::Keep, None),
            Some(mut room) => {
                room.add_player(player_id, name);
                (Mutation::Put(room.clone()), Some(room))
            }
        })?;

        if room.is_some() {
            info!(room = %code, player = %player_id, "player joined room");
        }
        Ok(room)
    }

    /// Remove a player. Returns the updated room, or `None` if the room is gone,
    /// either because it never existed or because the last player just left.
    ///
    /// Deleting a room also deletes its game record.
    pub fn remove_player(&self, code: &RoomCode, player_id: &str) -> Result<Option<Room>> {
        let (room, deleted) = self.store.mutate_json(&Room::key(code), |current: Option<Room>| match current {
            None => (Mutation::Keep, (None, false)),
            Some(mut room) => {
                if !room.remove_player(player_id) {
                    return (Mutation::Keep, (Some(room), false));
                }
                if room.is_empty() {
                    (Mutation::Delete, (None, true))
                } else {
                    (Mutation::Put(room.clone()), (Some(room), false))
                }
            }
        })?;

        if deleted {
            self.store.delete(&Game::key(code));
            info!(room = %code, player = %player_id, "last player left, room deleted");
        } else if let Some(room) = &room {
            debug!(room = %code, player = %player_id, host = %room.host_id, "player left room");
        }
        Ok(room)
    }

    /// Ids of everyone seated in `code`, or an empty list if the room is gone.
    pub fn players(&self, code: &RoomCode) -> Result<Vec<PlayerId>> {
        Ok(self.get_room(code)?.map(|room| room.player_ids).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn registry() -> (Arc<StateStore>, RoomRegistry) {
        let store = Arc::new(StateStore::new());
        (store.clone(), RoomRegistry::new(store, 1000))
    }

    #[test]
    fn test_create_and_get_room() {
        let (_, registry) = registry();
        let room = registry.create_room("alice", "Alice").unwrap();

        assert_eq!(room.player_ids, vec!["alice".to_string()]);
        assert_eq!(room.host_id, "alice");
        assert_eq!(registry.get_room(&room.code).unwrap(), Some(room));
    }

    #[test]
    fn test_join_missing_room_returns_none() {
        let (_, registry) = registry();
        let missing = RoomCode::try_from("ZZZZ").unwrap();
        assert_eq!(registry.add_player(&missing, "bob", "Bob").unwrap(), None);
        assert_eq!(registry.remove_player(&missing, "bob").unwrap(), None);
    }

    #[test]
    fn test_concurrent_creations_never_share_a_code() {
        let (_, registry) = registry();
        let registry = Arc::new(registry);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .map(|i| registry.create_room(&format!("p{}-{}", t, i), "P").unwrap().code)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut codes = HashSet::new();
        for handle in handles {
            for code in handle.join().unwrap() {
                assert!(codes.insert(code), "duplicate live room code");
            }
        }
        assert_eq!(codes.len(), 400);
    }

    #[test]
    fn test_exhausted_code_space_is_an_error() {
        let store = Arc::new(StateStore::new());
        let registry = RoomRegistry::new(store, 1);
        // A single draw can only collide if the code is taken, so fill the whole space.
        for a in b'A'..=b'Z' {
            for b in b'A'..=b'Z' {
                for c in b'A'..=b'Z' {
                    for d in b'A'..=b'Z' {
                        let code = String::from_utf8(vec![a, b, c, d]).unwrap();
                        registry.store.set(&format!("room:{}", code), "{}".to_string());
                    }
                }
            }
        }
        assert!(registry.create_room("alice", "Alice").is_err());
    }

    #[test]
    fn test_concurrent_joins_are_all_kept() {
        let (_, registry) = registry();
        let registry = Arc::new(registry);
        let code = registry.create_room("host", "Host").unwrap().code;

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = registry.clone();
                let code = code.clone();
                std::thread::spawn(move || {
                    registry.add_player(&code, &format!("p{}", i), "P").unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let room = registry.get_room(&code).unwrap().unwrap();
        assert_eq!(room.player_count(), 17);
        assert_eq!(room.player_names.len(), 17);
    }

    #[test]
    fn test_host_reassignment_and_room_deletion() {
        let (store, registry) = registry();
        let code = registry.create_room("alice", "Alice").unwrap().code;
        registry.add_player(&code, "bob", "Bob").unwrap();
        registry.add_player(&code, "carol", "Carol").unwrap();
        store.set(&Game::key(&code), "{}".to_string());

        let room = registry.remove_player(&code, "alice").unwrap().unwrap();
        assert_eq!(room.host_id, "bob");
        assert_eq!(registry.players(&code).unwrap(), vec!["bob".to_string(), "carol".to_string()]);

        registry.remove_player(&code, "bob").unwrap();
        assert_eq!(registry.remove_player(&code, "carol").unwrap(), None);
        assert_eq!(registry.get_room(&code).unwrap(), None);
        assert!(!store.exists(&Game::key(&code)));
    }
}
