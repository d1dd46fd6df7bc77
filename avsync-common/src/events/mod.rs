//! Event types for the avsync event system
//!
//! Provides the player event definitions and the EventBus used to publish
//! them to any number of observers (UI, logging, test harnesses).

mod playback_types;

pub use playback_types::{TrackKind, TransportState};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Player event types
///
/// Events are broadcast via [`EventBus`] and can be serialized for
/// external reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// Transport state changed
    StateChanged {
        /// Playback session the change belongs to
        session_id: Uuid,
        /// State before change
        old_state: TransportState,
        /// State after change
        new_state: TransportState,
        /// When state changed
        timestamp: DateTime<Utc>,
    },

    /// Decoder reported an audio format outside the supported range;
    /// the track continues without audio output
    AudioFormatRejected {
        track_index: usize,
        sample_rate: u32,
        channel_count: u32,
        timestamp: DateTime<Utc>,
    },

    /// A video frame was released without rendering because it was late
    FrameDropped {
        track_index: usize,
        /// Frame presentation time (microseconds)
        presentation_time_us: i64,
        /// Lateness at the time of the decision (microseconds)
        late_us: i64,
    },

    /// A track pipeline saw end of stream on both input and output
    TrackEnded {
        track_index: usize,
        kind: TrackKind,
        timestamp: DateTime<Utc>,
    },

    /// Every track pipeline has ended
    PlaybackEnded {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// The work loop stopped on an unrecoverable error
    PlaybackFailed {
        session_id: Uuid,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl PlayerEvent {
    /// Event name for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            PlayerEvent::StateChanged { .. } => "StateChanged",
            PlayerEvent::AudioFormatRejected { .. } => "AudioFormatRejected",
            PlayerEvent::FrameDropped { .. } => "FrameDropped",
            PlayerEvent::TrackEnded { .. } => "TrackEnded",
            PlayerEvent::PlaybackEnded { .. } => "PlaybackEnded",
            PlayerEvent::PlaybackFailed { .. } => "PlaybackFailed",
        }
    }
}

/// Broadcast channel for [`PlayerEvent`]s
///
/// Cloning yields another handle to the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before the slowest
    ///   subscriber starts losing old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PlayerEvent,
    ) -> Result<usize, broadcast::error::SendError<PlayerEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
