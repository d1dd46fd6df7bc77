//! Audio output using cpal
//!
//! Implements [`AudioDevice`] over the platform's default output device.
//! Written PCM goes into a lock-free `ringbuf` SPSC buffer; the cpal callback
//! drains it and counts presented frames for the playback head position.
//!
//! `cpal::Stream` is not `Send` on every platform, so a keeper thread owns the
//! stream and executes play/pause commands sent over a channel.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use tracing::{debug, error, info, warn};

use super::device::{AudioDevice, AudioDeviceFactory, AudioTimestamp, LatencyQuery, PlayState};
use crate::error::{Error, Result};

/// Ring buffer length in milliseconds of audio
const RING_BUFFER_MS: usize = 200;

enum StreamCommand {
    Play,
    Pause,
    Shutdown,
}

/// Output device backed by cpal, 16-bit interleaved PCM
pub struct CpalAudioDevice {
    producer: HeapProd<u8>,
    commands: Sender<StreamCommand>,
    keeper: Option<JoinHandle<()>>,
    frames_played: Arc<AtomicI64>,
    flush_requested: Arc<AtomicBool>,
    state: PlayState,
    /// Stop issued, waiting for the ring buffer to play out
    draining: bool,
}

impl CpalAudioDevice {
    /// Open the default output device at the given format.
    pub fn open(sample_rate: u32, channel_count: u32) -> Result<Self> {
        let frame_bytes = channel_count as usize * 2;
        let capacity = sample_rate as usize * RING_BUFFER_MS / 1000 * frame_bytes;
        let (producer, consumer) = HeapRb::<u8>::new(capacity).split();

        let frames_played = Arc::new(AtomicI64::new(0));
        let flush_requested = Arc::new(AtomicBool::new(false));
        let (commands, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        let keeper = {
            let frames_played = Arc::clone(&frames_played);
            let flush_requested = Arc::clone(&flush_requested);
            thread::Builder::new()
                .name("avsync-cpal".to_string())
                .spawn(move || {
                    keeper_loop(
                        sample_rate,
                        channel_count,
                        consumer,
                        frames_played,
                        flush_requested,
                        command_rx,
                        ready_tx,
                    )
                })
                .map_err(|e| Error::DeviceOpen(format!("Failed to spawn stream thread: {}", e)))?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = keeper.join();
                return Err(e);
            }
            Err(_) => {
                return Err(Error::DeviceOpen(
                    "Stream thread exited during startup".to_string(),
                ))
            }
        }

        info!(
            "Audio output opened: {} Hz, {} ch, {} byte ring buffer",
            sample_rate, channel_count, capacity
        );

        Ok(Self {
            producer,
            commands,
            keeper: Some(keeper),
            frames_played,
            flush_requested,
            state: PlayState::Stopped,
            draining: false,
        })
    }

    fn send(&self, command: StreamCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::AudioOutput("Audio stream thread is gone".to_string()))
    }

    fn update_drain(&mut self) {
        if self.draining && self.producer.occupied_len() == 0 {
            self.draining = false;
            self.state = PlayState::Stopped;
            if let Err(e) = self.send(StreamCommand::Pause) {
                warn!("Failed to pause drained stream: {}", e);
            }
        }
    }
}

fn keeper_loop(
    sample_rate: u32,
    channel_count: u32,
    mut consumer: HeapCons<u8>,
    frames_played: Arc<AtomicI64>,
    flush_requested: Arc<AtomicBool>,
    commands: Receiver<StreamCommand>,
    ready: Sender<Result<()>>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        let _ = ready.send(Err(Error::DeviceOpen(
            "No default output device found".to_string(),
        )));
        return;
    };

    let config = cpal::StreamConfig {
        channels: channel_count as u16,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let channels = channel_count as usize;

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
            if flush_requested.swap(false, Ordering::SeqCst) {
                consumer.clear();
            }

            let mut bytes = [0u8; 2];
            let mut presented = 0usize;
            for sample in data.iter_mut() {
                if consumer.pop_slice(&mut bytes) == 2 {
                    *sample = i16::from_le_bytes(bytes);
                    presented += 1;
                } else {
                    *sample = 0;
                }
            }
            frames_played.fetch_add((presented / channels) as i64, Ordering::SeqCst);
        },
        move |err| {
            error!("Audio stream error: {}", err);
        },
        None,
    );

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(Error::DeviceOpen(format!(
                "Failed to build stream: {}",
                e
            ))));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    while let Ok(command) = commands.recv() {
        let result = match command {
            StreamCommand::Play => stream.play().map_err(|e| e.to_string()),
            StreamCommand::Pause => stream.pause().map_err(|e| e.to_string()),
            StreamCommand::Shutdown => break,
        };
        if let Err(e) = result {
            error!("Audio stream command failed: {}", e);
        }
    }
    debug!("Audio stream thread exiting");
}

impl AudioDevice for CpalAudioDevice {
    fn write(&mut self, data: &[u8], _timestamp_ns: i64) -> isize {
        self.producer.push_slice(data) as isize
    }

    fn play(&mut self) -> Result<()> {
        self.draining = false;
        self.state = PlayState::Playing;
        self.send(StreamCommand::Play)
    }

    fn pause(&mut self) -> Result<()> {
        self.draining = false;
        self.state = PlayState::Paused;
        self.send(StreamCommand::Pause)
    }

    fn stop(&mut self) -> Result<()> {
        if self.state == PlayState::Playing && self.producer.occupied_len() > 0 {
            self.draining = true;
            return Ok(());
        }
        self.state = PlayState::Stopped;
        self.send(StreamCommand::Pause)
    }

    fn flush(&mut self) -> Result<()> {
        if self.play_state() == PlayState::Playing {
            return Ok(());
        }
        // Applied by the callback before it next reads
        self.flush_requested.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn release(&mut self) {
        let _ = self.send(StreamCommand::Shutdown);
        if let Some(keeper) = self.keeper.take() {
            if keeper.join().is_err() {
                error!("Audio stream thread panicked");
            }
        }
        self.state = PlayState::Stopped;
        self.draining = false;
    }

    fn play_state(&mut self) -> PlayState {
        self.update_drain();
        self.state
    }

    fn timestamp(&mut self) -> Option<AudioTimestamp> {
        None
    }

    fn playback_head_position(&mut self) -> i64 {
        self.frames_played.load(Ordering::SeqCst)
    }

    fn latency_query(&mut self) -> Option<LatencyQuery> {
        None
    }
}

impl Drop for CpalAudioDevice {
    fn drop(&mut self) {
        if self.keeper.is_some() {
            self.release();
        }
    }
}

/// Opens [`CpalAudioDevice`]s on the default host
#[derive(Debug, Default, Clone)]
pub struct CpalAudioDeviceFactory;

impl AudioDeviceFactory for CpalAudioDeviceFactory {
    fn open(&self, sample_rate: u32, channel_count: u32) -> Result<Box<dyn AudioDevice>> {
        Ok(Box::new(CpalAudioDevice::open(sample_rate, channel_count)?))
    }
}
