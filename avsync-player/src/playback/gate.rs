//! Video frame release gating
//!
//! Lateness is `now - release_time`. A frame is held while it is more than
//! two vsync intervals early, dropped once later than the late threshold,
//! and rendered otherwise.

use serde::{Deserialize, Serialize};

/// What to do with the decoded video frame at the queue front
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameDecision {
    /// Release to the display at its release time
    Render,
    /// Release without rendering
    Drop,
    /// Too early; leave it queued and stop draining this cycle
    Hold,
}

/// Decide the fate of a frame.
///
/// * `late_us` - lateness in microseconds (negative when early)
/// * `vsync_interval_us` - display refresh interval, 0 if unknown
/// * `late_threshold_us` - frames later than this are dropped
pub fn gate_video_frame(late_us: i64, vsync_interval_us: i64, late_threshold_us: i64) -> FrameDecision {
    if late_us < -2 * vsync_interval_us {
        FrameDecision::Hold
    } else if late_us > late_threshold_us {
        FrameDecision::Drop
    } else {
        FrameDecision::Render
    }
}
