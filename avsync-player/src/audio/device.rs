//! Non-blocking audio output device interface

use crate::error::Result;

/// Device playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    /// Not playing; after a stop, reported only once every written frame was played
    Stopped,
    Paused,
    Playing,
}

/// Hardware presentation timestamp
///
/// `frame_position` frames had been presented at monotonic time `nano_time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioTimestamp {
    pub frame_position: i64,
    pub nano_time: i64,
}

/// Optional device latency probe, returns milliseconds or `None` if the
/// query failed (the probe is then abandoned)
pub type LatencyQuery = Box<dyn Fn() -> Option<u32> + Send>;

/// 16-bit PCM output device
pub trait AudioDevice: Send {
    /// Write as many bytes as fit without blocking.
    ///
    /// Returns the number of bytes accepted (possibly 0) or a negative
    /// device error code.
    fn write(&mut self, data: &[u8], timestamp_ns: i64) -> isize;

    fn play(&mut self) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    /// Stop after the frames already written have been played
    fn stop(&mut self) -> Result<()>;

    /// Discard written but unplayed data. Only valid while not playing.
    fn flush(&mut self) -> Result<()>;

    fn release(&mut self);

    fn play_state(&mut self) -> PlayState;

    /// Latest hardware timestamp, if the device supports them
    fn timestamp(&mut self) -> Option<AudioTimestamp>;

    /// Frames presented since playback began
    fn playback_head_position(&mut self) -> i64;

    /// One-time capability probe for a latency query
    fn latency_query(&mut self) -> Option<LatencyQuery>;
}

/// Opens output devices for decoded PCM formats
pub trait AudioDeviceFactory: Send + Sync {
    fn open(&self, sample_rate: u32, channel_count: u32) -> Result<Box<dyn AudioDevice>>;
}
