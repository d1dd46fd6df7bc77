//! Display-specific frame release adjustment

use tracing::debug;

/// Snaps computed frame release times to the display's refresh cadence.
pub trait FrameReleaseAdjuster: Send {
    fn enable(&mut self);

    fn disable(&mut self);

    /// Adjust a release time.
    ///
    /// * `frame_time_us` - frame time on the master clock timeline
    /// * `unadjusted_release_ns` - monotonic release time before adjustment
    fn adjust_release_time(&mut self, frame_time_us: i64, unadjusted_release_ns: i64) -> i64;

    /// Display refresh interval, `None` when unknown
    fn vsync_duration_ns(&self) -> Option<i64>;
}

/// Leaves release times untouched and reports a fixed refresh interval
/// while enabled.
#[derive(Debug, Clone)]
pub struct IdentityAdjuster {
    vsync_duration_ns: i64,
    enabled: bool,
}

impl IdentityAdjuster {
    pub fn new(vsync_duration_ns: i64) -> Self {
        Self {
            vsync_duration_ns,
            enabled: false,
        }
    }
}

impl FrameReleaseAdjuster for IdentityAdjuster {
    fn enable(&mut self) {
        debug!("Frame release adjuster enabled");
        self.enabled = true;
    }

    fn disable(&mut self) {
        debug!("Frame release adjuster disabled");
        self.enabled = false;
    }

    fn adjust_release_time(&mut self, _frame_time_us: i64, unadjusted_release_ns: i64) -> i64 {
        unadjusted_release_ns
    }

    fn vsync_duration_ns(&self) -> Option<i64> {
        self.enabled.then_some(self.vsync_duration_ns)
    }
}
