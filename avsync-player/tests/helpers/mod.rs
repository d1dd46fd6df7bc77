//! Test helpers for avsync-player integration tests
//!
//! - `PipelineRig`: a manual clock, pipeline environment and session timing
//!   for driving a single [`TrackPipeline`] cycle by cycle
//! - Source and event shortcuts shared by the test files

#![allow(dead_code)]

use std::sync::Arc;

use avsync_common::events::{EventBus, PlayerEvent};
use avsync_common::time::{ManualClock, MonotonicClock};
use avsync_player::config::PlayerConfig;
use avsync_player::media::{share, DecoderFactory, SampleSource};
use avsync_player::playback::{
    IdentityAdjuster, MediaTimeProvider, PipelineEnv, PlaybackClock, SessionTiming, TrackPipeline,
};
use avsync_player::sim::{
    LoopbackDecoderFactory, SimulatedAudioDeviceFactory, SyntheticSource, SyntheticTrack,
};
use tokio::sync::broadcast;

/// 60 Hz refresh interval used by the rigs (nanoseconds)
pub const VSYNC_NS: i64 = 16_666_667;

/// Drives one pipeline against a [`ManualClock`]
pub struct PipelineRig {
    pub clock: Arc<ManualClock>,
    pub env: PipelineEnv,
    pub devices: SimulatedAudioDeviceFactory,
    pub decoders: LoopbackDecoderFactory,
    pub timing: SessionTiming,
}

impl PipelineRig {
    pub fn new() -> Self {
        Self::with_config(PlayerConfig::default())
    }

    pub fn with_config(config: PlayerConfig) -> Self {
        let clock = Arc::new(ManualClock::new(1_000_000_000));
        let shared: Arc<dyn MonotonicClock> = clock.clone();
        let devices = SimulatedAudioDeviceFactory::new(Arc::clone(&shared));
        Self::assemble(clock, devices, config)
    }

    /// Rig whose audio devices come from `devices`
    pub fn with_devices(
        clock: Arc<ManualClock>,
        devices: SimulatedAudioDeviceFactory,
        config: PlayerConfig,
    ) -> Self {
        Self::assemble(clock, devices, config)
    }

    fn assemble(
        clock: Arc<ManualClock>,
        devices: SimulatedAudioDeviceFactory,
        config: PlayerConfig,
    ) -> Self {
        let shared: Arc<dyn MonotonicClock> = clock.clone();
        let env = PipelineEnv {
            config: Arc::new(config),
            clock: Arc::clone(&shared),
            audio_devices: Arc::new(devices.clone()),
            events: EventBus::new(256),
        };
        let mut timing = SessionTiming::new(shared, Box::new(IdentityAdjuster::new(VSYNC_NS)));
        timing.enable_adjuster();

        Self {
            clock,
            env,
            devices,
            decoders: LoopbackDecoderFactory::new(),
            timing,
        }
    }

    pub fn with_decoders(mut self, decoders: LoopbackDecoderFactory) -> Self {
        self.decoders = decoders;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.env.events.subscribe()
    }

    /// Build and start a pipeline for track 0 of `source`.
    pub fn pipeline(&self, mut source: SyntheticSource) -> TrackPipeline {
        source.select_track(0).unwrap();
        let format = source.track_format(0).unwrap();
        let decoder = self.decoders.create(&format).unwrap();
        let mut pipeline =
            TrackPipeline::new(0, &format, decoder, share(Box::new(source)), self.env.clone())
                .unwrap();
        pipeline.start().unwrap();
        pipeline
    }

    /// One audio cycle: decode work, then push queued PCM to the device.
    pub fn audio_cycle(&mut self, pipeline: &mut TrackPipeline) {
        let mut clock = PlaybackClock::detached(&mut self.timing);
        pipeline.do_some_work(&mut clock).unwrap();
        pipeline.process().unwrap();
    }

    /// One video cycle scheduled against session wall time.
    pub fn video_cycle(&mut self, pipeline: &mut TrackPipeline) {
        let mut clock = PlaybackClock::detached(&mut self.timing);
        pipeline.do_some_work(&mut clock).unwrap();
    }

    /// Master clock reading with `pipeline` as the audio master
    pub fn audio_clock_us(&mut self, pipeline: &mut TrackPipeline) -> i64 {
        PlaybackClock::new(&mut self.timing, pipeline.master_audio()).now_us()
    }
}

/// Single audio track: `chunks` chunks of `chunk_bytes`, one every 20 ms
pub fn audio_source(sample_rate: u32, channels: u32, chunks: usize, chunk_bytes: usize) -> SyntheticSource {
    SyntheticSource::new().with_track(
        SyntheticTrack::audio(sample_rate, channels, chunks, chunk_bytes).with_interval_us(20_000),
    )
}

/// Single 30 fps video track of `frames` frames
pub fn video_source(frames: usize) -> SyntheticSource {
    SyntheticSource::new().with_track(SyntheticTrack::video(320, 240, frames, 30, 256))
}

/// Drain every event currently buffered in `events`
pub fn drain_events(events: &mut broadcast::Receiver<PlayerEvent>) -> Vec<PlayerEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
