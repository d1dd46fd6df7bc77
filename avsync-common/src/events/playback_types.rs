//! Playback-related type definitions
//!
//! Supporting types for transport state and track identity.

use serde::{Deserialize, Serialize};

/// Transport state machine
///
/// ```text
/// Idle -> Preparing -> Paused <-> Playing
///   ^                    |           |
///   +------- reset ------+-----------+
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    /// No sources prepared
    #[default]
    Idle,
    /// Waiting for `prepare()` to build the track pipelines
    Preparing,
    /// Pipelines exist, no decode work
    Paused,
    /// Work loop is decoding and releasing buffers
    Playing,
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportState::Idle => write!(f, "idle"),
            TransportState::Preparing => write!(f, "preparing"),
            TransportState::Paused => write!(f, "paused"),
            TransportState::Playing => write!(f, "playing"),
        }
    }
}

/// Elementary stream kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    /// Classify a MIME type (`audio/...`, `video/...`).
    pub fn from_mime(mime: &str) -> Option<Self> {
        if mime.starts_with("audio/") {
            Some(TrackKind::Audio)
        } else if mime.starts_with("video/") {
            Some(TrackKind::Video)
        } else {
            None
        }
    }
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}
