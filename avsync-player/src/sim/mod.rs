//! Simulated collaborators
//!
//! Deterministic stand-ins for a demultiplexer, a decoder and an audio
//! device. The command-line player runs on them, and the integration tests
//! drive them with a [`ManualClock`](avsync_common::time::ManualClock).

pub mod decoder;
pub mod device;
pub mod source;

pub use decoder::{LoopbackDecoder, LoopbackDecoderFactory, ReleaseLog, ReleaseRecord};
pub use device::{SimulatedAudioDevice, SimulatedAudioDeviceFactory};
pub use source::{SyntheticSource, SyntheticTrack};
