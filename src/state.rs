//! # Application State Management
//!
//! This module holds everything that HTTP handlers and WebSocket sessions share:
//! the runtime configuration, server metrics, and the game services built on top
//! of one in-process state store.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Lets every request handler and every session task own a handle to
//!   the same services
//! - **Memory safety**: The services are dropped when the last handle goes away
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Arc**: Multiple ownership (many handlers can hold a reference)
//! - **RwLock**: Many readers OR one writer
//! - Used for the configuration and the metrics, which change at runtime
//!
//! The game services need no outer lock: each one synchronizes through the state
//! store, whose mutations are atomic per key.

use crate::audio::{AudioCodec, AudioVault, BlobStore, PcmReverser};
use crate::config::AppConfig;
use crate::events::EventBus;
use crate::game::{GameClock, RoomRegistry};
use crate::store::StateStore;
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

/// The state shared by every HTTP handler and every game connection.
///
/// ## Thread Safety Pattern:
/// Cloning an `AppState` only clones the `Arc`s inside it, so every clone sees the
/// same rooms, games and metrics.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Server-wide counters, updated by sessions as they go
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,

    /// Shared key-value store holding rooms, games and round indexes
    pub store: Arc<StateStore>,

    pub rooms: Arc<RoomRegistry>,
    pub games: Arc<GameClock>,
    pub vault: Arc<AudioVault>,
    pub events: EventBus,

    /// Recording transform, shared by the vault and the `/reverse/` endpoint
    pub codec: Arc<dyn AudioCodec>,
}

/// Counters collected since server start.
///
/// ## Why these metrics matter:
/// - **active_sessions**: Current WebSocket connections (enforces the session limit)
/// - **total_connections**: Connections accepted since start
/// - **rooms_created / games_started / files_uploaded**: Game activity
/// - **protocol_errors**: `error` messages sent to players (bad requests, wrong state)
#[derive(Debug, Default, Clone, Serialize)]
pub struct AppMetrics {
    pub active_sessions: usize,
    pub total_connections: u64,
    pub rooms_created: u64,
    pub games_started: u64,
    pub files_uploaded: u64,
    pub protocol_errors: u64,
}

impl AppState {
    /// Build the state and wire the game services to one fresh store.
    ///
    /// ## What this does:
    /// 1. Wraps the config and metrics in Arc<RwLock<>> for sharing and updating
    /// 2. Creates the state store and every service on top of it
    /// 3. Records the current time as the server start time
    ///
    /// The room code attempt limit and the storage directory are read once here;
    /// changing them at runtime takes effect after a restart.
    pub fn new(config: AppConfig) -> Self {
        let store = Arc::new(StateStore::new());
        let codec: Arc<dyn AudioCodec> = Arc::new(PcmReverser);
        let rooms = Arc::new(RoomRegistry::new(store.clone(), config.game.room_code_attempts));
        let games = Arc::new(GameClock::new(store.clone()));
        let vault = Arc::new(AudioVault::new(
            store.clone(),
            BlobStore::new(config.files_dir()),
            codec.clone(),
        ));
        let events = EventBus::new(store.clone());

        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            store,
            rooms,
            games,
            vault,
            events,
            codec,
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// ## Why clone:
    /// Cloning releases the lock immediately, so other threads aren't blocked.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap_or_else(PoisonError::into_inner) = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    fn with_metrics(&self, update: impl FnOnce(&mut AppMetrics)) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut metrics);
    }

    /// Count a newly accepted WebSocket connection.
    pub fn session_opened(&self) {
        self.with_metrics(|m| {
            m.active_sessions += 1;
            m.total_connections += 1;
        });
    }

    /// Count a closed WebSocket connection.
    ///
    /// ## Safety check:
    /// Never goes below zero, even if a close is reported twice.
    pub fn session_closed(&self) {
        self.with_metrics(|m| m.active_sessions = m.active_sessions.saturating_sub(1));
    }

    pub fn record_room_created(&self) {
        self.with_metrics(|m| m.rooms_created += 1);
    }

    pub fn record_game_started(&self) {
        self.with_metrics(|m| m.games_started += 1);
    }

    pub fn record_file_uploaded(&self) {
        self.with_metrics(|m| m.files_uploaded += 1);
    }

    pub fn record_protocol_error(&self) {
        self.with_metrics(|m| m.protocol_errors += 1);
    }

    pub fn active_sessions(&self) -> usize {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner).active_sessions
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of live rooms and running games, read from the store's key space.
    pub fn live_counts(&self) -> (usize, usize) {
        let keys = self.store.keys("room:");
        let games = keys.iter().filter(|key| key.ends_with(":game")).count();
        (keys.len() - games, games)
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState {
        let mut config = AppConfig::default();
        config.storage.files_dir = std::env::temp_dir()
            .join(format!("relay-state-{}", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .into_owned();
        AppState::new(config)
    }

    #[test]
    fn test_session_counters() {
        let state = state();
        state.session_opened();
        state.session_opened();
        state.session_closed();
        state.session_closed();
        state.session_closed();

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.active_sessions, 0);
        assert_eq!(metrics.total_connections, 2);
    }

    #[test]
    fn test_live_counts_follow_the_store() {
        let state = state();
        let room = state.rooms.create_room("alice", "Alice").unwrap();
        state.rooms.create_room("bob", "Bob").unwrap();
        state.games.start_game(&room.code).unwrap();

        assert_eq!(state.live_counts(), (2, 1));
    }

    #[test]
    fn test_update_config_rejects_invalid() {
        let state = state();
        let mut config = state.get_config();
        config.game.round_duration_secs = 0;
        assert!(state.update_config(config).is_err());
        assert_eq!(state.get_config().game.round_duration_secs, 30);
    }
}
