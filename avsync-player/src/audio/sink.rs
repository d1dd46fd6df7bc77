//! Audio Clock Sink
//!
//! Queues decoded PCM chunks in front of a non-blocking [`AudioDevice`] and
//! derives the master media clock from the frames the hardware has actually
//! presented.
//!
//! # Queue
//!
//! Chunks are written strictly in FIFO order. Only the front chunk is ever
//! written; a partially accepted chunk stays at the front with its remaining
//! bytes. `queued_byte_count()` is always the sum of unwritten bytes.
//!
//! # Clock
//!
//! The hardware timestamp and the latency probe are sampled at most once per
//! sampling interval (250 ms by default). With a timestamp the current
//! position is extrapolated from it; without one the playback head position
//! minus half the reported latency is used. Reported time never decreases
//! until the sink is flushed or released.

use std::collections::VecDeque;
use std::sync::Arc;

use avsync_common::time::{frames_to_us, ns_to_us, us_to_frames, MonotonicClock};
use tracing::{debug, trace, warn};

use super::device::{AudioDevice, AudioTimestamp, LatencyQuery, PlayState};
use crate::error::{Error, Result};

/// One queued PCM chunk
#[derive(Debug)]
struct QueuedAudioChunk {
    data: Vec<u8>,
    /// Bytes already accepted by the device
    offset: usize,
    timestamp_ns: i64,
}

impl QueuedAudioChunk {
    fn remaining(&self) -> &[u8] {
        &self.data[self.offset..]
    }
}

/// Non-blocking audio output with a hardware-derived clock
pub struct AudioClockSink {
    device: Box<dyn AudioDevice>,
    sample_rate: u32,
    channel_count: u32,
    clock: Arc<dyn MonotonicClock>,

    queue: VecDeque<QueuedAudioChunk>,
    queued_bytes: usize,
    /// Stop requested while data was still queued
    stop_pending: bool,
    /// Device stop has been issued
    stopped: bool,

    latency_query: Option<LatencyQuery>,
    latency_us: i64,
    timestamp_interval_us: i64,
    last_sample_us: Option<i64>,
    timestamp: Option<AudioTimestamp>,
    floor_us: Option<i64>,
}

impl AudioClockSink {
    /// Wrap an opened device.
    ///
    /// The device's latency capability is probed once here.
    pub fn new(
        mut device: Box<dyn AudioDevice>,
        sample_rate: u32,
        channel_count: u32,
        clock: Arc<dyn MonotonicClock>,
        timestamp_interval_us: i64,
    ) -> Self {
        let latency_query = device.latency_query();
        debug!(
            "Audio sink created: {} Hz, {} ch, latency probe {}",
            sample_rate,
            channel_count,
            if latency_query.is_some() { "available" } else { "unavailable" }
        );

        Self {
            device,
            sample_rate,
            channel_count,
            clock,
            queue: VecDeque::new(),
            queued_bytes: 0,
            stop_pending: false,
            stopped: false,
            latency_query,
            latency_us: 0,
            timestamp_interval_us,
            last_sample_us: None,
            timestamp: None,
            floor_us: None,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> u32 {
        self.channel_count
    }

    /// Queue the first `size` bytes of `data` for presentation at `timestamp_ns`.
    pub fn write(&mut self, mut data: Vec<u8>, size: usize, timestamp_ns: i64) {
        data.truncate(size);
        let size = data.len();
        if size == 0 {
            return;
        }

        self.queued_bytes += size;
        self.queue.push_back(QueuedAudioChunk {
            data,
            offset: 0,
            timestamp_ns,
        });
        trace!(
            "Queued {} audio bytes at {} ns ({} bytes pending)",
            size,
            timestamp_ns,
            self.queued_bytes
        );
    }

    /// Push queued chunks into the device without blocking.
    ///
    /// Stops at the first partial write. Executes a deferred stop once the
    /// queue is empty.
    pub fn process(&mut self) -> Result<()> {
        while let Some(chunk) = self.queue.front_mut() {
            let written = self.device.write(chunk.remaining(), chunk.timestamp_ns);
            if written < 0 {
                return Err(Error::DeviceWrite { code: written });
            }

            let written = (written as usize).min(chunk.data.len() - chunk.offset);
            chunk.offset += written;
            self.queued_bytes -= written;

            if chunk.offset < chunk.data.len() {
                break;
            }
            self.queue.pop_front();
        }

        if self.stop_pending && self.queue.is_empty() {
            debug!("Audio queue drained, executing deferred stop");
            self.stop_device()?;
        }
        Ok(())
    }

    /// Bytes written to the sink but not yet accepted by the device
    pub fn queued_byte_count(&self) -> usize {
        self.queued_bytes
    }

    /// Current media time of the audio output (microseconds)
    pub fn current_time_us(&mut self) -> i64 {
        let now_us = self.clock.now_us();
        let playing = self.device.play_state() == PlayState::Playing;

        let due = self
            .last_sample_us
            .map_or(true, |last| now_us - last >= self.timestamp_interval_us);
        if due {
            self.timestamp = self.device.timestamp();
            self.sample_latency();
            self.last_sample_us = Some(now_us);
        }

        let raw_us = match self.timestamp {
            Some(ts) if playing => {
                let elapsed_us = now_us - ns_to_us(ts.nano_time);
                let frames = ts.frame_position + us_to_frames(elapsed_us, self.sample_rate);
                frames_to_us(frames, self.sample_rate)
            }
            _ => {
                let played = self.device.playback_head_position();
                frames_to_us(played, self.sample_rate) - self.latency_us
            }
        };

        let time_us = match self.floor_us {
            Some(floor) => raw_us.max(floor),
            None => raw_us,
        };
        self.floor_us = Some(time_us);
        time_us
    }

    fn sample_latency(&mut self) {
        let Some(query) = &self.latency_query else {
            return;
        };
        match query() {
            Some(latency_ms) => {
                self.latency_us = (latency_ms as i64 * 1_000 / 2).max(0);
            }
            None => {
                warn!("Audio latency query failed, disabling latency compensation");
                self.latency_query = None;
            }
        }
    }

    pub fn play(&mut self) -> Result<()> {
        self.stop_pending = false;
        self.stopped = false;
        self.invalidate_timestamp();
        self.device.play()
    }

    pub fn pause(&mut self) -> Result<()> {
        self.invalidate_timestamp();
        self.device.pause()
    }

    /// Stop once everything queued has been handed to the device.
    pub fn stop(&mut self) -> Result<()> {
        if self.queue.is_empty() {
            self.stop_device()
        } else {
            debug!(
                "Deferring audio stop until {} queued bytes are written",
                self.queued_bytes
            );
            self.stop_pending = true;
            Ok(())
        }
    }

    fn stop_device(&mut self) -> Result<()> {
        self.stop_pending = false;
        self.stopped = true;
        self.queued_bytes = 0;
        self.device.stop()
    }

    /// Discard queued data. No-op while the device is playing.
    pub fn flush(&mut self) -> Result<()> {
        if self.device.play_state() == PlayState::Playing {
            return Ok(());
        }
        self.device.flush()?;
        self.queue.clear();
        self.queued_bytes = 0;
        self.stop_pending = false;
        self.floor_us = None;
        self.invalidate_timestamp();
        Ok(())
    }

    pub fn release(&mut self) {
        self.queue.clear();
        self.queued_bytes = 0;
        self.stop_pending = false;
        self.stopped = false;
        self.latency_us = 0;
        self.floor_us = None;
        self.invalidate_timestamp();
        self.device.release();
    }

    /// True once a stop was executed and the device has played out everything
    pub fn has_finished(&mut self) -> bool {
        self.stopped && self.device.play_state() == PlayState::Stopped
    }

    /// True while a stop waits for the queue to drain
    pub fn is_stop_pending(&self) -> bool {
        self.stop_pending
    }

    pub fn play_state(&mut self) -> PlayState {
        self.device.play_state()
    }

    fn invalidate_timestamp(&mut self) {
        self.timestamp = None;
        self.last_sample_us = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avsync_common::time::ManualClock;
    use std::sync::Mutex;

    /// Device accepting at most `accept` bytes per write
    struct LimitedDevice {
        accept: usize,
        accepted: Arc<Mutex<Vec<u8>>>,
        state: PlayState,
        head: i64,
        stop_calls: Arc<Mutex<usize>>,
        fail_code: Option<isize>,
    }

    impl LimitedDevice {
        fn new(accept: usize) -> Self {
            Self {
                accept,
                accepted: Arc::new(Mutex::new(Vec::new())),
                state: PlayState::Stopped,
                head: 0,
                stop_calls: Arc::new(Mutex::new(0)),
                fail_code: None,
            }
        }
    }

    impl AudioDevice for LimitedDevice {
        fn write(&mut self, data: &[u8], _timestamp_ns: i64) -> isize {
            if let Some(code) = self.fail_code {
                return code;
            }
            let n = data.len().min(self.accept);
            self.accepted.lock().unwrap().extend_from_slice(&data[..n]);
            n as isize
        }
        fn play(&mut self) -> Result<()> {
            self.state = PlayState::Playing;
            Ok(())
        }
        fn pause(&mut self) -> Result<()> {
            self.state = PlayState::Paused;
            Ok(())
        }
        fn stop(&mut self) -> Result<()> {
            *self.stop_calls.lock().unwrap() += 1;
            self.state = PlayState::Stopped;
            Ok(())
        }
        fn flush(&mut self) -> Result<()> {
            Ok(())
        }
        fn release(&mut self) {}
        fn play_state(&mut self) -> PlayState {
            self.state
        }
        fn timestamp(&mut self) -> Option<AudioTimestamp> {
            None
        }
        fn playback_head_position(&mut self) -> i64 {
            self.head
        }
        fn latency_query(&mut self) -> Option<LatencyQuery> {
            None
        }
    }

    fn sink_with(device: LimitedDevice) -> AudioClockSink {
        AudioClockSink::new(
            Box::new(device),
            48_000,
            2,
            Arc::new(ManualClock::new(0)),
            250_000,
        )
    }

    #[test]
    fn test_partial_write_keeps_fifo_order() {
        let device = LimitedDevice::new(3);
        let accepted = Arc::clone(&device.accepted);
        let mut sink = sink_with(device);

        sink.write(vec![1, 2, 3, 4, 5], 5, 0);
        sink.write(vec![6, 7], 2, 1_000);
        assert_eq!(sink.queued_byte_count(), 7);

        sink.process().unwrap();
        assert_eq!(sink.queued_byte_count(), 4);
        assert_eq!(*accepted.lock().unwrap(), vec![1, 2, 3]);

        sink.process().unwrap();
        sink.process().unwrap();
        assert_eq!(sink.queued_byte_count(), 0);
        assert_eq!(*accepted.lock().unwrap(), vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_write_truncates_to_size() {
        let mut sink = sink_with(LimitedDevice::new(1024));
        sink.write(vec![0; 16], 10, 0);
        assert_eq!(sink.queued_byte_count(), 10);
    }

    #[test]
    fn test_negative_write_is_device_error() {
        let mut device = LimitedDevice::new(1024);
        device.fail_code = Some(-6);
        let mut sink = sink_with(device);
        sink.write(vec![0; 4], 4, 0);

        match sink.process() {
            Err(Error::DeviceWrite { code }) => assert_eq!(code, -6),
            other => panic!("Expected DeviceWrite, got {:?}", other),
        }
        assert_eq!(sink.queued_byte_count(), 4);
    }

    #[test]
    fn test_stop_deferred_until_queue_empty() {
        let device = LimitedDevice::new(2);
        let stop_calls = Arc::clone(&device.stop_calls);
        let mut sink = sink_with(device);
        sink.play().unwrap();

        sink.write(vec![0; 4], 4, 0);
        sink.stop().unwrap();
        assert!(sink.is_stop_pending());
        assert_eq!(*stop_calls.lock().unwrap(), 0);

        // First pass leaves 2 bytes queued, stop stays pending
        sink.process().unwrap();
        assert!(sink.is_stop_pending());
        assert_eq!(*stop_calls.lock().unwrap(), 0);

        sink.process().unwrap();
        assert!(!sink.is_stop_pending());
        assert_eq!(*stop_calls.lock().unwrap(), 1);
        assert!(sink.has_finished());
    }

    #[test]
    fn test_flush_is_noop_while_playing() {
        let mut sink = sink_with(LimitedDevice::new(0));
        sink.play().unwrap();
        sink.write(vec![0; 8], 8, 0);

        sink.flush().unwrap();
        assert_eq!(sink.queued_byte_count(), 8);

        sink.pause().unwrap();
        sink.flush().unwrap();
        assert_eq!(sink.queued_byte_count(), 0);
    }

    #[test]
    fn test_time_from_head_position() {
        let mut device = LimitedDevice::new(0);
        device.head = 24_000;
        let mut sink = sink_with(device);
        assert_eq!(sink.current_time_us(), 500_000);
    }
}
