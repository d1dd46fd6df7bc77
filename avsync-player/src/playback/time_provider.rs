//! Media Time Provider
//!
//! Maps media presentation timestamps onto the monotonic release timeline.
//!
//! The master clock (`now_us`) is resolved in this order:
//!
//! 1. The audio sink's current time while it is playing
//! 2. Its terminal time extrapolated with wall time once it has played out
//! 3. Zero while an audio track exists but has not produced a format yet
//! 4. Session-relative wall time when there is no usable audio track
//!
//! The first release-time query of a playing session fixes the offset
//! between master clock and media time; it is invalidated on every start so
//! that a resumed session re-anchors.

use std::sync::Arc;

use avsync_common::time::{ns_to_us, us_to_ns, MonotonicClock};
use tracing::debug;

use super::frame_release::FrameReleaseAdjuster;
use crate::audio::AudioClockSink;

/// Clock queries used by video pipelines to schedule frames
pub trait MediaTimeProvider {
    /// Master clock reading (microseconds)
    fn now_us(&mut self) -> i64;

    /// Monotonic release time for a frame at `media_time_us` (microseconds)
    fn release_time_us_for(&mut self, media_time_us: i64) -> i64;

    /// Display refresh interval, `None` when unknown
    fn vsync_duration_ns(&self) -> Option<i64>;
}

/// Terminal audio time and the monotonic instant it was captured
#[derive(Debug, Clone, Copy)]
struct FinishedAnchor {
    media_us: i64,
    wall_ns: i64,
}

/// Per-session timing state owned by the transport
pub struct SessionTiming {
    clock: Arc<dyn MonotonicClock>,
    adjuster: Box<dyn FrameReleaseAdjuster>,
    offset_us: Option<i64>,
    wall_origin_ns: i64,
    audio_finished: Option<FinishedAnchor>,
}

impl SessionTiming {
    pub fn new(clock: Arc<dyn MonotonicClock>, adjuster: Box<dyn FrameReleaseAdjuster>) -> Self {
        let wall_origin_ns = clock.now_ns();
        Self {
            clock,
            adjuster,
            offset_us: None,
            wall_origin_ns,
            audio_finished: None,
        }
    }

    /// Re-anchor wall time and forget all session state.
    pub fn begin_session(&mut self) {
        self.wall_origin_ns = self.clock.now_ns();
        self.offset_us = None;
        self.audio_finished = None;
    }

    /// Forget the media offset; the next release query fixes a new one.
    pub fn invalidate_offset(&mut self) {
        self.offset_us = None;
    }

    pub fn offset_us(&self) -> Option<i64> {
        self.offset_us
    }

    pub fn enable_adjuster(&mut self) {
        self.adjuster.enable();
    }

    pub fn disable_adjuster(&mut self) {
        self.adjuster.disable();
    }

    pub fn clock(&self) -> &Arc<dyn MonotonicClock> {
        &self.clock
    }

    fn wall_us(&self) -> i64 {
        ns_to_us(self.clock.now_ns() - self.wall_origin_ns)
    }
}

/// Master audio clock candidate for a cycle
pub enum MasterAudio<'a> {
    /// Audio output exists
    Sink(&'a mut AudioClockSink),
    /// Audio track exists, output format not known yet
    Pending,
    /// No audio track, or its format was rejected
    Absent,
}

/// [`MediaTimeProvider`] over the session timing and the master audio sink
pub struct PlaybackClock<'a> {
    timing: &'a mut SessionTiming,
    audio: MasterAudio<'a>,
}

impl<'a> PlaybackClock<'a> {
    pub fn new(timing: &'a mut SessionTiming, audio: MasterAudio<'a>) -> Self {
        Self { timing, audio }
    }

    /// Clock for pipelines that never schedule against it (audio tracks)
    pub fn detached(timing: &'a mut SessionTiming) -> Self {
        Self::new(timing, MasterAudio::Absent)
    }
}

impl MediaTimeProvider for PlaybackClock<'_> {
    fn now_us(&mut self) -> i64 {
        match &mut self.audio {
            MasterAudio::Sink(sink) => {
                if !sink.has_finished() {
                    self.timing.audio_finished = None;
                    return sink.current_time_us();
                }

                let anchor = match self.timing.audio_finished {
                    Some(anchor) => anchor,
                    None => {
                        let anchor = FinishedAnchor {
                            media_us: sink.current_time_us(),
                            wall_ns: self.timing.clock.now_ns(),
                        };
                        debug!(
                            "Audio output finished at {} us, extrapolating with wall time",
                            anchor.media_us
                        );
                        self.timing.audio_finished = Some(anchor);
                        anchor
                    }
                };
                anchor.media_us + ns_to_us(self.timing.clock.now_ns() - anchor.wall_ns)
            }
            MasterAudio::Pending => 0,
            MasterAudio::Absent => self.timing.wall_us(),
        }
    }

    fn release_time_us_for(&mut self, media_time_us: i64) -> i64 {
        let offset_us = match self.timing.offset_us {
            Some(offset) => offset,
            None => {
                let offset = self.now_us() - media_time_us;
                debug!("Media offset fixed at {} us", offset);
                self.timing.offset_us = Some(offset);
                offset
            }
        };

        let early_us = offset_us + media_time_us - self.now_us();
        let unadjusted_ns = self.timing.clock.now_ns() + us_to_ns(early_us);
        let adjusted_ns = self
            .timing
            .adjuster
            .adjust_release_time(offset_us + media_time_us, unadjusted_ns);
        ns_to_us(adjusted_ns)
    }

    fn vsync_duration_ns(&self) -> Option<i64> {
        self.timing.adjuster.vsync_duration_ns()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::frame_release::IdentityAdjuster;
    use avsync_common::time::ManualClock;

    fn timing(clock: &Arc<ManualClock>) -> SessionTiming {
        let clock: Arc<dyn MonotonicClock> = Arc::clone(clock) as Arc<dyn MonotonicClock>;
        SessionTiming::new(clock, Box::new(IdentityAdjuster::new(16_666_667)))
    }

    #[test]
    fn test_wall_clock_without_audio() {
        let clock = Arc::new(ManualClock::new(5_000_000_000));
        let mut timing = timing(&clock);

        clock.advance_ms(20);
        let mut provider = PlaybackClock::new(&mut timing, MasterAudio::Absent);
        assert_eq!(provider.now_us(), 20_000);
    }

    #[test]
    fn test_pending_audio_reads_zero() {
        let clock = Arc::new(ManualClock::new(0));
        let mut timing = timing(&clock);
        clock.advance_ms(100);

        let mut provider = PlaybackClock::new(&mut timing, MasterAudio::Pending);
        assert_eq!(provider.now_us(), 0);
    }

    #[test]
    fn test_first_query_fixes_offset() {
        let clock = Arc::new(ManualClock::new(1_000_000_000));
        let mut timing = timing(&clock);
        clock.advance_us(500_000);

        let mut provider = PlaybackClock::new(&mut timing, MasterAudio::Absent);
        // Master clock reads 500 ms; first frame at media 100 ms is due now
        let release_us = provider.release_time_us_for(100_000);
        assert_eq!(release_us, clock.now_us());

        // A frame 40 ms later in media time is due 40 ms from now
        let release_us = provider.release_time_us_for(140_000);
        assert_eq!(release_us, clock.now_us() + 40_000);
        assert_eq!(timing.offset_us(), Some(400_000));
    }

    #[test]
    fn test_release_time_tracks_clock_progress() {
        let clock = Arc::new(ManualClock::new(0));
        let mut timing = timing(&clock);

        let first = PlaybackClock::new(&mut timing, MasterAudio::Absent).release_time_us_for(0);
        clock.advance_ms(10);
        let second =
            PlaybackClock::new(&mut timing, MasterAudio::Absent).release_time_us_for(33_333);

        // Both master and release timelines advance with the wall clock
        assert_eq!(second - first, 33_333);
    }

    #[test]
    fn test_invalidate_offset_reanchors() {
        let clock = Arc::new(ManualClock::new(0));
        let mut timing = timing(&clock);

        PlaybackClock::new(&mut timing, MasterAudio::Absent).release_time_us_for(0);
        assert_eq!(timing.offset_us(), Some(0));

        clock.advance_ms(1_000);
        timing.invalidate_offset();
        let release_us =
            PlaybackClock::new(&mut timing, MasterAudio::Absent).release_time_us_for(0);
        assert_eq!(timing.offset_us(), Some(1_000_000));
        assert_eq!(release_us, clock.now_us());
    }

    #[test]
    fn test_vsync_follows_adjuster_state() {
        let clock = Arc::new(ManualClock::new(0));
        let mut timing = timing(&clock);
        assert_eq!(PlaybackClock::detached(&mut timing).vsync_duration_ns(), None);

        timing.enable_adjuster();
        assert_eq!(
            PlaybackClock::detached(&mut timing).vsync_duration_ns(),
            Some(16_666_667)
        );
    }
}
