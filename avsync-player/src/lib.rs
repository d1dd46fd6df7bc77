//! # avsync player library
//!
//! Audio/video synchronization engine.
//!
//! **Purpose:** Feed demultiplexed samples through slot-based decoders,
//! play decoded PCM through a non-blocking audio sink whose hardware clock
//! is the master media clock, and release video frames on time against it.
//!
//! **Architecture:**
//! - [`audio`]: audio device interface and the clock-producing sink
//! - [`media`]: sample source and decoder interfaces, formats
//! - [`playback`]: track pipelines, media time provider, transport
//! - [`sim`]: deterministic simulated source, decoder and device

pub mod audio;
pub mod config;
pub mod error;
pub mod media;
pub mod playback;
pub mod sim;

pub use config::PlayerConfig;
pub use error::{Error, Result};
pub use playback::{Player, PlayerStats, StartOutcome};
