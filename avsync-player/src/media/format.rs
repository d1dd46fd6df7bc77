//! Track and decoder output formats

use avsync_common::events::TrackKind;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Supported PCM channel counts
pub const MIN_CHANNEL_COUNT: u32 = 1;
pub const MAX_CHANNEL_COUNT: u32 = 8;

/// Supported PCM sample rates (Hz)
pub const MIN_SAMPLE_RATE: u32 = 8_000;
pub const MAX_SAMPLE_RATE: u32 = 128_000;

/// Format description of a track or of decoder output
///
/// Keys that a format does not carry are `None`; the engine treats a missing
/// audio key the same as a zero value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFormat {
    /// MIME type, e.g. `audio/raw` or `video/avc`
    pub mime: String,
    pub sample_rate: Option<u32>,
    pub channel_count: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Track duration (microseconds)
    pub duration_us: Option<i64>,
}

impl MediaFormat {
    pub fn audio(mime: impl Into<String>, sample_rate: u32, channel_count: u32) -> Self {
        Self {
            mime: mime.into(),
            sample_rate: Some(sample_rate),
            channel_count: Some(channel_count),
            width: None,
            height: None,
            duration_us: None,
        }
    }

    pub fn video(mime: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            mime: mime.into(),
            sample_rate: None,
            channel_count: None,
            width: Some(width),
            height: Some(height),
            duration_us: None,
        }
    }

    pub fn with_duration_us(mut self, duration_us: i64) -> Self {
        self.duration_us = Some(duration_us);
        self
    }

    /// Media kind derived from the MIME prefix
    pub fn kind(&self) -> Option<TrackKind> {
        TrackKind::from_mime(&self.mime)
    }
}

/// Check that a decoded PCM format can be played.
///
/// Demultiplexers occasionally report zero channels or a zero sample rate;
/// such formats are rejected before an audio device is opened.
pub fn validate_audio_format(sample_rate: u32, channel_count: u32) -> Result<()> {
    if !(MIN_CHANNEL_COUNT..=MAX_CHANNEL_COUNT).contains(&channel_count) {
        return Err(Error::MalformedFormat(format!(
            "channel count {} outside {}..={}",
            channel_count, MIN_CHANNEL_COUNT, MAX_CHANNEL_COUNT
        )));
    }
    if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
        return Err(Error::MalformedFormat(format!(
            "sample rate {} Hz outside {}..={}",
            sample_rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
        )));
    }
    Ok(())
}
