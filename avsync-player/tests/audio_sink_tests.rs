//! Integration tests for the audio clock sink over the simulated device

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use avsync_common::time::{ManualClock, MonotonicClock};
use avsync_player::audio::{
    AudioClockSink, AudioDevice, AudioTimestamp, LatencyQuery, PlayState,
};
use avsync_player::error::{Error, Result};
use avsync_player::sim::SimulatedAudioDevice;

/// 48 kHz stereo: 4 bytes per frame, 192 bytes per millisecond
const BYTES_PER_MS: usize = 192;

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(2_000_000_000))
}

fn sink_over(device: impl AudioDevice + 'static, clock: &Arc<ManualClock>) -> AudioClockSink {
    let clock: Arc<dyn MonotonicClock> = clock.clone();
    AudioClockSink::new(Box::new(device), 48_000, 2, clock, 250_000)
}

fn device(clock: &Arc<ManualClock>) -> SimulatedAudioDevice {
    let clock: Arc<dyn MonotonicClock> = clock.clone();
    SimulatedAudioDevice::new(48_000, 2, clock)
}

#[test]
fn test_clock_follows_hardware_timestamps() {
    let clock = clock();
    let mut sink = sink_over(device(&clock), &clock);
    sink.write(vec![0; 1_000 * BYTES_PER_MS], 1_000 * BYTES_PER_MS, 0);
    sink.play().unwrap();
    sink.process().unwrap();

    clock.advance_ms(20);
    sink.process().unwrap();
    assert_eq!(sink.current_time_us(), 20_000);

    clock.advance_ms(100);
    sink.process().unwrap();
    assert_eq!(sink.current_time_us(), 120_000);
}

#[test]
fn test_head_position_minus_half_latency() {
    let clock = clock();
    let device = device(&clock).without_timestamps().with_latency_ms(40);
    let mut sink = sink_over(device, &clock);
    sink.write(vec![0; 100 * BYTES_PER_MS], 100 * BYTES_PER_MS, 0);
    sink.process().unwrap();
    sink.play().unwrap();

    clock.advance_ms(50);
    assert_eq!(sink.current_time_us(), 50_000 - 20_000);
}

#[test]
fn test_clock_never_decreases_until_flush() {
    let clock = clock();
    let mut sink = sink_over(device(&clock), &clock);
    // Exactly the device buffer: 100 ms
    sink.write(vec![0; 100 * BYTES_PER_MS], 100 * BYTES_PER_MS, 0);
    sink.process().unwrap();
    sink.play().unwrap();

    clock.advance_ms(20);
    assert_eq!(sink.current_time_us(), 20_000);

    // Extrapolation runs past the underrun at 100 ms
    clock.advance_ms(200);
    assert_eq!(sink.current_time_us(), 220_000);

    // Paused: the head says 100 ms, the reported time holds
    sink.pause().unwrap();
    assert_eq!(sink.current_time_us(), 220_000);

    sink.flush().unwrap();
    assert_eq!(sink.current_time_us(), 100_000);
}

#[test]
fn test_deferred_stop_finishes_after_playout() {
    let clock = clock();
    let mut sink = sink_over(device(&clock), &clock);
    for chunk in 0..3 {
        sink.write(vec![0; 100 * BYTES_PER_MS], 100 * BYTES_PER_MS, chunk * 100_000_000);
    }
    sink.play().unwrap();
    sink.process().unwrap();
    assert_eq!(sink.queued_byte_count(), 200 * BYTES_PER_MS);

    sink.stop().unwrap();
    assert!(sink.is_stop_pending());
    assert!(!sink.has_finished());

    clock.advance_ms(100);
    sink.process().unwrap();
    assert!(sink.is_stop_pending());

    clock.advance_ms(100);
    sink.process().unwrap();
    assert!(!sink.is_stop_pending());
    assert_eq!(sink.queued_byte_count(), 0);
    // Stop issued, last 100 ms still playing out
    assert!(!sink.has_finished());
    assert_eq!(sink.play_state(), PlayState::Playing);

    clock.advance_ms(100);
    assert!(sink.has_finished());
    assert_eq!(sink.current_time_us(), 300_000);
}

#[test]
fn test_device_write_error_surfaces() {
    let clock = clock();
    let mut sink = sink_over(device(&clock).fail_writes_with(-19), &clock);
    sink.write(vec![0; 64], 64, 0);
    sink.play().unwrap();

    match sink.process() {
        Err(Error::DeviceWrite { code }) => assert_eq!(code, -19),
        other => panic!("Expected device write error, got {:?}", other),
    }
    assert_eq!(sink.queued_byte_count(), 64);
}

#[test]
fn test_play_resumes_after_stop() {
    let clock = clock();
    let mut sink = sink_over(device(&clock), &clock);
    sink.play().unwrap();
    sink.stop().unwrap();
    assert!(sink.has_finished());

    sink.play().unwrap();
    assert!(!sink.has_finished());
    assert_eq!(sink.play_state(), PlayState::Playing);
}

/// Device whose latency probe works once and then fails
struct FlakyLatencyDevice {
    inner: SimulatedAudioDevice,
    calls: Arc<AtomicUsize>,
}

impl AudioDevice for FlakyLatencyDevice {
    fn write(&mut self, data: &[u8], timestamp_ns: i64) -> isize {
        self.inner.write(data, timestamp_ns)
    }
    fn play(&mut self) -> Result<()> {
        self.inner.play()
    }
    fn pause(&mut self) -> Result<()> {
        self.inner.pause()
    }
    fn stop(&mut self) -> Result<()> {
        self.inner.stop()
    }
    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
    fn release(&mut self) {
        self.inner.release()
    }
    fn play_state(&mut self) -> PlayState {
        self.inner.play_state()
    }
    fn timestamp(&mut self) -> Option<AudioTimestamp> {
        None
    }
    fn playback_head_position(&mut self) -> i64 {
        self.inner.playback_head_position()
    }
    fn latency_query(&mut self) -> Option<LatencyQuery> {
        let calls = Arc::clone(&self.calls);
        Some(Box::new(move || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            (call == 0).then_some(60u32)
        }))
    }
}

#[test]
fn test_failed_latency_probe_is_abandoned() {
    let clock = clock();
    let calls = Arc::new(AtomicUsize::new(0));
    let device = FlakyLatencyDevice {
        inner: device(&clock),
        calls: Arc::clone(&calls),
    };
    let mut sink = sink_over(device, &clock);
    sink.play().unwrap();

    sink.current_time_us();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    clock.advance_ms(300);
    sink.current_time_us();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    clock.advance_ms(300);
    sink.current_time_us();
    clock.advance_ms(300);
    sink.current_time_us();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
