//! # Audio Module
//!
//! Everything that touches recording bytes:
//!
//! - **codec**: turns an upload into the reversed copy the next player hears
//! - **blobs**: filesystem storage for both copies
//! - **vault**: per-round index of who uploaded what, plus summary assembly
//!
//! ## Accepted Formats:
//! - WAV files of any channel count and bit depth supported by the `wav` crate
//! - Raw 16-bit little-endian mono PCM

pub mod blobs;
pub mod codec;
pub mod vault;

pub use blobs::BlobStore;
pub use codec::{AudioCodec, AudioFormat, PcmReverser};
pub use vault::{AudioVault, SummaryFile};
