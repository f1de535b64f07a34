//! # Game Module
//!
//! Shared game state and the services that mutate it:
//!
//! - **models**: the `Room` and `Game` records stored in the state store
//! - **registry**: room creation and membership changes
//! - **clock**: game start, round advance and game end
//! - **scheduler**: the per-game timer that drives the clock
//! - **rotation**: who hears whose recording in each round

pub mod clock;
pub mod models;
pub mod registry;
pub mod rotation;
pub mod scheduler;

pub use clock::{GameClock, StartOutcome};
pub use models::{Game, PlayerId, Room, RoomCode};
pub use registry::RoomRegistry;
pub use rotation::rotation_index;
pub use scheduler::RoundScheduler;
