//! Audio output subsystem
//!
//! [`AudioClockSink`] queues decoded PCM in front of an [`AudioDevice`] and
//! provides the master media clock.

pub mod device;
pub mod sink;

#[cfg(feature = "cpal-output")]
pub mod cpal_output;

pub use device::{AudioDevice, AudioDeviceFactory, AudioTimestamp, LatencyQuery, PlayState};
pub use sink::AudioClockSink;

#[cfg(feature = "cpal-output")]
pub use cpal_output::{CpalAudioDevice, CpalAudioDeviceFactory};
