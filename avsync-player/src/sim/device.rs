//! Simulated audio output
//!
//! A fixed-size PCM FIFO that the "hardware" drains at the sample rate while
//! playing, measured against a [`MonotonicClock`]. With a [`ManualClock`]
//! every consumed frame is deterministic.
//!
//! [`ManualClock`]: avsync_common::time::ManualClock

use std::sync::{Arc, Mutex};

use avsync_common::time::MonotonicClock;
use ringbuf::{traits::*, HeapRb};
use tracing::{debug, trace};

use crate::audio::{AudioDevice, AudioDeviceFactory, AudioTimestamp, LatencyQuery, PlayState};
use crate::error::Result;

/// Default FIFO length in milliseconds of audio
pub const DEFAULT_BUFFER_MS: u32 = 100;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Output device that consumes frames in simulated real time
pub struct SimulatedAudioDevice {
    fifo: HeapRb<u8>,
    sample_rate: u32,
    frame_bytes: usize,
    clock: Arc<dyn MonotonicClock>,

    state: PlayState,
    /// Stop issued while frames were still buffered
    draining: bool,
    frames_played: i64,
    last_update_ns: i64,
    /// Sub-frame remainder carried between updates (frames * 1e9)
    carry: i64,

    latency_ms: Option<u32>,
    reports_timestamps: bool,
    fail_code: Option<isize>,
    released: bool,
}

impl SimulatedAudioDevice {
    pub fn new(sample_rate: u32, channel_count: u32, clock: Arc<dyn MonotonicClock>) -> Self {
        Self::with_buffer_ms(sample_rate, channel_count, clock, DEFAULT_BUFFER_MS)
    }

    pub fn with_buffer_ms(
        sample_rate: u32,
        channel_count: u32,
        clock: Arc<dyn MonotonicClock>,
        buffer_ms: u32,
    ) -> Self {
        let frame_bytes = channel_count.max(1) as usize * 2;
        let frames = (sample_rate as usize * buffer_ms as usize / 1000).max(1);
        let last_update_ns = clock.now_ns();
        Self {
            fifo: HeapRb::new(frames * frame_bytes),
            sample_rate,
            frame_bytes,
            clock,
            state: PlayState::Stopped,
            draining: false,
            frames_played: 0,
            last_update_ns,
            carry: 0,
            latency_ms: None,
            reports_timestamps: true,
            fail_code: None,
            released: false,
        }
    }

    /// Offer a latency probe that always reports `latency_ms`.
    pub fn with_latency_ms(mut self, latency_ms: u32) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    /// Report no hardware timestamps; the clock then comes from the head position.
    pub fn without_timestamps(mut self) -> Self {
        self.reports_timestamps = false;
        self
    }

    /// Make every write fail with `code`.
    pub fn fail_writes_with(mut self, code: isize) -> Self {
        self.fail_code = Some(code);
        self
    }

    /// Bytes written but not yet played
    pub fn buffered_bytes(&self) -> usize {
        self.fifo.occupied_len()
    }

    pub fn capacity_bytes(&self) -> usize {
        self.fifo.capacity().get()
    }

    /// Consume the frames that would have played since the last update.
    fn update(&mut self) {
        let now_ns = self.clock.now_ns();
        let elapsed_ns = (now_ns - self.last_update_ns).max(0);
        self.last_update_ns = now_ns;

        if self.state != PlayState::Playing {
            self.carry = 0;
            return;
        }

        let total = elapsed_ns * self.sample_rate as i64 + self.carry;
        let due_frames = total / NANOS_PER_SECOND;
        self.carry = total % NANOS_PER_SECOND;

        let buffered_frames = (self.fifo.occupied_len() / self.frame_bytes) as i64;
        let played = due_frames.min(buffered_frames);
        if played > 0 {
            self.fifo.skip(played as usize * self.frame_bytes);
            self.frames_played += played;
        }

        if self.draining && self.fifo.occupied_len() < self.frame_bytes {
            debug!(
                "Simulated device drained after {} frames",
                self.frames_played
            );
            self.fifo.clear();
            self.draining = false;
            self.state = PlayState::Stopped;
        }
    }
}

impl AudioDevice for SimulatedAudioDevice {
    fn write(&mut self, data: &[u8], _timestamp_ns: i64) -> isize {
        if let Some(code) = self.fail_code {
            return code;
        }
        self.update();
        let vacant = self.fifo.vacant_len();
        let accepted = data.len().min(vacant - vacant % self.frame_bytes);
        let pushed = self.fifo.push_slice(&data[..accepted]);
        trace!("Simulated device accepted {} of {} bytes", pushed, data.len());
        pushed as isize
    }

    fn play(&mut self) -> Result<()> {
        self.update();
        self.draining = false;
        self.state = PlayState::Playing;
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.update();
        self.draining = false;
        self.state = PlayState::Paused;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.update();
        if self.state == PlayState::Playing && self.fifo.occupied_len() >= self.frame_bytes {
            self.draining = true;
        } else {
            self.fifo.clear();
            self.state = PlayState::Stopped;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.update();
        if self.state != PlayState::Playing {
            self.fifo.clear();
            self.draining = false;
        }
        Ok(())
    }

    fn release(&mut self) {
        self.fifo.clear();
        self.state = PlayState::Stopped;
        self.draining = false;
        self.released = true;
    }

    fn play_state(&mut self) -> PlayState {
        self.update();
        self.state
    }

    fn timestamp(&mut self) -> Option<AudioTimestamp> {
        self.update();
        if !self.reports_timestamps || self.state != PlayState::Playing || self.frames_played == 0
        {
            return None;
        }
        Some(AudioTimestamp {
            frame_position: self.frames_played,
            nano_time: self.last_update_ns,
        })
    }

    fn playback_head_position(&mut self) -> i64 {
        self.update();
        self.frames_played
    }

    fn latency_query(&mut self) -> Option<LatencyQuery> {
        let latency_ms = self.latency_ms?;
        Some(Box::new(move || Some(latency_ms)))
    }
}

/// Opens [`SimulatedAudioDevice`]s on a shared clock
#[derive(Clone)]
pub struct SimulatedAudioDeviceFactory {
    clock: Arc<dyn MonotonicClock>,
    buffer_ms: u32,
    latency_ms: Option<u32>,
    reports_timestamps: bool,
    fail_code: Option<isize>,
    opened: Arc<Mutex<Vec<(u32, u32)>>>,
}

impl SimulatedAudioDeviceFactory {
    pub fn new(clock: Arc<dyn MonotonicClock>) -> Self {
        Self {
            clock,
            buffer_ms: DEFAULT_BUFFER_MS,
            latency_ms: None,
            reports_timestamps: true,
            fail_code: None,
            opened: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_buffer_ms(mut self, buffer_ms: u32) -> Self {
        self.buffer_ms = buffer_ms;
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: u32) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    pub fn without_timestamps(mut self) -> Self {
        self.reports_timestamps = false;
        self
    }

    pub fn fail_writes_with(mut self, code: isize) -> Self {
        self.fail_code = Some(code);
        self
    }

    /// (sample rate, channel count) of every device opened so far
    pub fn opened_formats(&self) -> Vec<(u32, u32)> {
        self.opened
            .lock()
            .map(|opened| opened.clone())
            .unwrap_or_default()
    }
}

impl AudioDeviceFactory for SimulatedAudioDeviceFactory {
    fn open(&self, sample_rate: u32, channel_count: u32) -> Result<Box<dyn AudioDevice>> {
        if let Ok(mut opened) = self.opened.lock() {
            opened.push((sample_rate, channel_count));
        }

        let mut device = SimulatedAudioDevice::with_buffer_ms(
            sample_rate,
            channel_count,
            Arc::clone(&self.clock),
            self.buffer_ms,
        );
        if let Some(latency_ms) = self.latency_ms {
            device = device.with_latency_ms(latency_ms);
        }
        if !self.reports_timestamps {
            device = device.without_timestamps();
        }
        if let Some(code) = self.fail_code {
            device = device.fail_writes_with(code);
        }
        debug!(
            "Simulated audio device opened: {} Hz, {} ch, {} ms buffer",
            sample_rate, channel_count, self.buffer_ms
        );
        Ok(Box::new(device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avsync_common::time::ManualClock;

    fn device(clock: &Arc<ManualClock>) -> SimulatedAudioDevice {
        // 48 kHz stereo, 100 ms = 4800 frames = 19200 bytes
        SimulatedAudioDevice::new(48_000, 2, Arc::clone(clock) as Arc<dyn MonotonicClock>)
    }

    #[test]
    fn test_write_limited_by_capacity() {
        let clock = Arc::new(ManualClock::new(0));
        let mut device = device(&clock);
        assert_eq!(device.capacity_bytes(), 19_200);

        assert_eq!(device.write(&[0; 16_000], 0), 16_000);
        assert_eq!(device.write(&[0; 16_000], 0), 3_200);
        assert_eq!(device.write(&[0; 16], 0), 0);
    }

    #[test]
    fn test_frames_consumed_only_while_playing() {
        let clock = Arc::new(ManualClock::new(0));
        let mut device = device(&clock);
        device.write(&[0; 19_200], 0);

        clock.advance_ms(10);
        assert_eq!(device.playback_head_position(), 0);

        device.play().unwrap();
        clock.advance_ms(10);
        assert_eq!(device.playback_head_position(), 480);
        assert_eq!(device.buffered_bytes(), 19_200 - 480 * 4);

        device.pause().unwrap();
        clock.advance_ms(10);
        assert_eq!(device.playback_head_position(), 480);
    }

    #[test]
    fn test_fractional_frames_carry_over() {
        let clock = Arc::new(ManualClock::new(0));
        let mut device = SimulatedAudioDevice::new(
            44_100,
            2,
            Arc::clone(&clock) as Arc<dyn MonotonicClock>,
        );
        device.write(&[0; 17_000], 0);
        device.play().unwrap();

        // 44.1 frames per millisecond
        for _ in 0..10 {
            clock.advance_ms(1);
            device.playback_head_position();
        }
        assert_eq!(device.playback_head_position(), 441);
    }

    #[test]
    fn test_head_stalls_on_underrun() {
        let clock = Arc::new(ManualClock::new(0));
        let mut device = device(&clock);
        device.write(&[0; 400], 0);
        device.play().unwrap();
        clock.advance_ms(50);
        assert_eq!(device.playback_head_position(), 100);
    }

    #[test]
    fn test_stop_drains_before_reporting_stopped() {
        let clock = Arc::new(ManualClock::new(0));
        let mut device = device(&clock);
        device.write(&[0; 1_920], 0); // 10 ms
        device.play().unwrap();
        device.stop().unwrap();
        assert_eq!(device.play_state(), PlayState::Playing);

        clock.advance_ms(10);
        assert_eq!(device.play_state(), PlayState::Stopped);
        assert_eq!(device.playback_head_position(), 480);
    }

    #[test]
    fn test_timestamp_while_playing() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let mut device = device(&clock);
        device.write(&[0; 19_200], 0);
        assert_eq!(device.timestamp(), None);

        device.play().unwrap();
        clock.advance_ms(20);
        let ts = device.timestamp().unwrap();
        assert_eq!(ts.frame_position, 960);
        assert_eq!(ts.nano_time, clock.now_ns());
    }

    #[test]
    fn test_flush_ignored_while_playing() {
        let clock = Arc::new(ManualClock::new(0));
        let mut device = device(&clock);
        device.write(&[0; 4_000], 0);
        device.play().unwrap();
        device.flush().unwrap();
        assert_eq!(device.buffered_bytes(), 4_000);

        device.pause().unwrap();
        device.flush().unwrap();
        assert_eq!(device.buffered_bytes(), 0);
    }

    #[test]
    fn test_write_failure_injection() {
        let clock = Arc::new(ManualClock::new(0));
        let mut device = device(&clock).fail_writes_with(-32);
        assert_eq!(device.write(&[0; 4], 0), -32);
    }

    #[test]
    fn test_factory_records_formats() {
        let clock: Arc<dyn MonotonicClock> = Arc::new(ManualClock::new(0));
        let factory = SimulatedAudioDeviceFactory::new(clock).with_latency_ms(40);
        let mut device = factory.open(44_100, 2).unwrap();
        assert_eq!(factory.opened_formats(), vec![(44_100, 2)]);

        let query = device.latency_query().unwrap();
        assert_eq!(query(), Some(40));
    }
}
