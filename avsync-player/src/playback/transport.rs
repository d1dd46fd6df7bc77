//! Transport Controller
//!
//! Owns the track pipelines and the playback worker thread.
//!
//! # State machine
//!
//! ```text
//! Idle --start--> Preparing --prepare--> Paused <--start/pause--> Playing
//!   ^                                                                |
//!   +----------------------------- reset ----------------------------+
//! ```
//!
//! A single mutex guards all transport state; every public operation and
//! every worker iteration takes it. The worker runs one cycle per
//! iteration while playing (video pipelines, then audio pipelines, then the
//! audio sinks) and sleeps for the configured work interval in between.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use avsync_common::events::{EventBus, PlayerEvent, TrackKind, TransportState};
use avsync_common::time::{us_to_ms_rounded, MonotonicClock};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use super::frame_release::{FrameReleaseAdjuster, IdentityAdjuster};
use super::time_provider::{MasterAudio, MediaTimeProvider, PlaybackClock, SessionTiming};
use super::track::{PipelineEnv, TrackPipeline, TrackStats};
use crate::audio::AudioDeviceFactory;
use crate::config::PlayerConfig;
use crate::error::{Error, Result};
use crate::media::{share, DecoderFactory, MediaFormat, SampleSource, SharedSource};

/// Result of [`Player::start`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Was idle; now waiting for [`Player::prepare`]
    Preparing,
    /// Already playing or preparing; nothing changed
    AlreadyActive,
    /// Pipelines started, now playing
    Started,
}

/// Snapshot of the whole player
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerStats {
    pub session_id: Uuid,
    pub state: TransportState,
    pub master_clock_us: i64,
    pub position_ms: i64,
    pub position_estimate_ms: i64,
    pub duration_ms: Option<i64>,
    pub ended: bool,
    pub last_error: Option<String>,
    pub tracks: Vec<TrackStats>,
}

/// Transport state guarded by the player mutex
struct TransportInner {
    state: TransportState,
    session_id: Uuid,

    audio_source: Option<SharedSource>,
    video_source: Option<SharedSource>,

    video_tracks: BTreeMap<usize, TrackPipeline>,
    audio_tracks: BTreeMap<usize, TrackPipeline>,
    /// Audio track whose sink is the master clock
    clock_track: Option<usize>,
    duration_us: Option<i64>,

    timing: SessionTiming,
    env: PipelineEnv,
    decoders: Arc<dyn DecoderFactory>,

    last_error: Option<String>,
    playback_ended_reported: bool,
}

impl TransportInner {
    fn set_state(&mut self, new_state: TransportState) {
        let old_state = self.state;
        if old_state == new_state {
            return;
        }
        self.state = new_state;
        debug!("Transport state: {} -> {}", old_state, new_state);
        self.env.events.emit_lossy(PlayerEvent::StateChanged {
            session_id: self.session_id,
            old_state,
            new_state,
            timestamp: Utc::now(),
        });
    }

    fn has_tracks(&self) -> bool {
        !self.video_tracks.is_empty() || !self.audio_tracks.is_empty()
    }

    fn tracks_mut(&mut self) -> impl Iterator<Item = &mut TrackPipeline> + '_ {
        self.video_tracks
            .values_mut()
            .chain(self.audio_tracks.values_mut())
    }

    fn tracks(&self) -> impl Iterator<Item = &TrackPipeline> + '_ {
        self.video_tracks.values().chain(self.audio_tracks.values())
    }

    fn is_ended(&self) -> bool {
        self.has_tracks() && self.tracks().all(|track| track.is_ended())
    }

    /// Build pipelines for every track of `kind` in `source`.
    fn add_tracks(&mut self, source: &SharedSource, kind: TrackKind) -> Result<()> {
        let selected: Vec<(usize, MediaFormat)> = {
            let mut guard = source
                .lock()
                .map_err(|_| Error::LockPoisoned("sample source"))?;
            let mut selected = Vec::new();
            for index in (0..guard.track_count()).rev() {
                let format = guard.track_format(index)?;
                if format.kind() != Some(kind) {
                    continue;
                }
                guard.select_track(index)?;
                selected.push((index, format));
            }
            selected
        };

        for (index, format) in selected {
            debug!("{} track #{}: {:?}", kind, index, format);
            let decoder = self.decoders.create(&format)?;
            let pipeline =
                TrackPipeline::new(index, &format, decoder, Arc::clone(source), self.env.clone())?;

            if let Some(duration_us) = format.duration_us {
                if self.duration_us.map_or(true, |current| duration_us > current) {
                    self.duration_us = Some(duration_us);
                }
            }

            match kind {
                TrackKind::Audio => self.audio_tracks.insert(index, pipeline),
                TrackKind::Video => self.video_tracks.insert(index, pipeline),
            };
        }
        Ok(())
    }

    fn release_tracks(&mut self) {
        for track in self.tracks_mut() {
            track.release();
        }
        self.video_tracks.clear();
        self.audio_tracks.clear();
        self.clock_track = None;
    }

    fn pause_tracks(&mut self) -> Result<()> {
        for track in self.tracks_mut() {
            track.pause()?;
        }
        Ok(())
    }

    /// One work cycle: video pipelines, audio pipelines, then audio output.
    fn run_cycle(&mut self) -> Result<()> {
        let TransportInner {
            video_tracks,
            audio_tracks,
            timing,
            clock_track,
            ..
        } = &mut *self;

        for track in video_tracks.values_mut() {
            let audio = master_audio(audio_tracks, *clock_track);
            let mut clock = PlaybackClock::new(timing, audio);
            track.do_some_work(&mut clock)?;
        }

        for track in audio_tracks.values_mut() {
            let mut clock = PlaybackClock::detached(timing);
            track.do_some_work(&mut clock)?;
        }

        for track in audio_tracks.values_mut() {
            track.process()?;
        }

        self.report_if_ended();
        Ok(())
    }

    fn report_if_ended(&mut self) {
        if self.playback_ended_reported || !self.is_ended() {
            return;
        }
        self.playback_ended_reported = true;
        info!("Playback reached end of stream");
        self.env.events.emit_lossy(PlayerEvent::PlaybackEnded {
            session_id: self.session_id,
            timestamp: Utc::now(),
        });
    }

    /// Stop playback after a fatal cycle error.
    fn fail(&mut self, err: &Error) {
        let message = err.to_string();
        self.last_error = Some(message.clone());
        if let Err(e) = self.pause_tracks() {
            warn!("Failed to pause tracks after error: {}", e);
        }
        self.set_state(TransportState::Paused);
        self.env.events.emit_lossy(PlayerEvent::PlaybackFailed {
            session_id: self.session_id,
            message,
            timestamp: Utc::now(),
        });
    }

    fn master_clock_us(&mut self) -> i64 {
        let audio = master_audio(&mut self.audio_tracks, self.clock_track);
        PlaybackClock::new(&mut self.timing, audio).now_us()
    }

    fn max_video_position_us(&self, position: impl Fn(&TrackPipeline) -> i64) -> i64 {
        self.video_tracks
            .values()
            .map(position)
            .fold(0, i64::max)
    }
}

fn master_audio(
    audio_tracks: &mut BTreeMap<usize, TrackPipeline>,
    clock_track: Option<usize>,
) -> MasterAudio<'_> {
    match clock_track.and_then(|index| audio_tracks.get_mut(&index)) {
        Some(track) => track.master_audio(),
        None => MasterAudio::Absent,
    }
}

struct Worker {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    exited: mpsc::Receiver<()>,
}

/// A/V playback engine
///
/// All methods take `&self`; the player can be shared across threads behind
/// an `Arc`.
pub struct Player {
    inner: Arc<Mutex<TransportInner>>,
    worker: Mutex<Option<Worker>>,
    /// Worker that missed the stop timeout, joined before the next spawn
    detached: Mutex<Option<Worker>>,
    config: Arc<PlayerConfig>,
    events: EventBus,
}

impl Player {
    /// Create a player with an [`IdentityAdjuster`] for frame release times.
    pub fn new(
        config: PlayerConfig,
        decoders: Arc<dyn DecoderFactory>,
        audio_devices: Arc<dyn AudioDeviceFactory>,
        clock: Arc<dyn MonotonicClock>,
    ) -> Result<Self> {
        let adjuster = Box::new(IdentityAdjuster::new(config.default_vsync_interval_ns));
        Self::with_adjuster(config, decoders, audio_devices, clock, adjuster)
    }

    /// Create a player with a display-specific release time adjuster.
    pub fn with_adjuster(
        config: PlayerConfig,
        decoders: Arc<dyn DecoderFactory>,
        audio_devices: Arc<dyn AudioDeviceFactory>,
        clock: Arc<dyn MonotonicClock>,
        adjuster: Box<dyn FrameReleaseAdjuster>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let events = EventBus::new(config.event_bus_capacity);

        let env = PipelineEnv {
            config: Arc::clone(&config),
            clock: Arc::clone(&clock),
            audio_devices,
            events: events.clone(),
        };

        let inner = TransportInner {
            state: TransportState::Idle,
            session_id: Uuid::new_v4(),
            audio_source: None,
            video_source: None,
            video_tracks: BTreeMap::new(),
            audio_tracks: BTreeMap::new(),
            clock_track: None,
            duration_us: None,
            timing: SessionTiming::new(clock, adjuster),
            env,
            decoders,
            last_error: None,
            playback_ended_reported: false,
        };

        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
            worker: Mutex::new(None),
            detached: Mutex::new(None),
            config,
            events,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, TransportInner>> {
        self.inner
            .lock()
            .map_err(|_| Error::LockPoisoned("transport state"))
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Subscribe to player events
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    /// Set the source of the audio tracks.
    pub fn set_audio_source(&self, source: Box<dyn SampleSource>) -> Result<()> {
        let mut inner = self.lock()?;
        ensure_unprepared(inner.state, "set audio source")?;
        inner.audio_source = Some(share(source));
        Ok(())
    }

    /// Set the source of the video tracks.
    pub fn set_video_source(&self, source: Box<dyn SampleSource>) -> Result<()> {
        let mut inner = self.lock()?;
        ensure_unprepared(inner.state, "set video source")?;
        inner.video_source = Some(share(source));
        Ok(())
    }

    /// Build a pipeline for every audio track of the audio source and every
    /// video track of the video source, then move to `Paused`.
    pub fn prepare(&self) -> Result<()> {
        let mut inner = self.lock()?;
        ensure_unprepared(inner.state, "prepare")?;

        let audio_source = inner.audio_source.clone();
        let video_source = inner.video_source.clone();
        if audio_source.is_none() && video_source.is_none() {
            return Err(Error::Source("No data source set".to_string()));
        }

        inner.release_tracks();
        inner.duration_us = None;
        if let Some(source) = &audio_source {
            inner.add_tracks(source, TrackKind::Audio)?;
        }
        if let Some(source) = &video_source {
            inner.add_tracks(source, TrackKind::Video)?;
        }
        if !inner.has_tracks() {
            return Err(Error::Source("No audio or video tracks found".to_string()));
        }

        inner.clock_track = inner.audio_tracks.keys().next().copied();
        inner.session_id = Uuid::new_v4();
        inner.timing.begin_session();
        inner.last_error = None;
        inner.playback_ended_reported = false;

        info!(
            "Prepared session {}: {} audio, {} video tracks, duration {:?} us",
            inner.session_id,
            inner.audio_tracks.len(),
            inner.video_tracks.len(),
            inner.duration_us
        );
        inner.set_state(TransportState::Paused);
        Ok(())
    }

    /// Advance the transport towards playing.
    ///
    /// `Idle` moves to `Preparing`; `Paused` starts every pipeline and moves
    /// to `Playing`; `Playing` and `Preparing` are left alone.
    pub fn start(&self) -> Result<StartOutcome> {
        let mut inner = self.lock()?;
        debug!("start requested in state {}", inner.state);

        match inner.state {
            TransportState::Playing | TransportState::Preparing => Ok(StartOutcome::AlreadyActive),
            TransportState::Idle => {
                inner.set_state(TransportState::Preparing);
                Ok(StartOutcome::Preparing)
            }
            TransportState::Paused => {
                for track in inner.video_tracks.values_mut() {
                    track.start()?;
                }
                for track in inner.audio_tracks.values_mut() {
                    track.start()?;
                }
                inner.timing.invalidate_offset();
                inner.set_state(TransportState::Playing);
                Ok(StartOutcome::Started)
            }
        }
    }

    /// Enable frame release adjustment, [`start`](Self::start), and launch
    /// the worker thread if it is not already running.
    ///
    /// Fails with [`Error::Worker`] while a worker detached by a timed-out
    /// [`reset`](Self::reset) is still running.
    pub fn start_worker(&self) -> Result<StartOutcome> {
        self.join_detached()?;
        self.lock()?.timing.enable_adjuster();
        let outcome = self.start()?;

        let mut worker = self
            .worker
            .lock()
            .map_err(|_| Error::LockPoisoned("worker handle"))?;
        if let Some(existing) = worker.as_ref() {
            if existing.running.load(Ordering::SeqCst) {
                return Ok(outcome);
            }
        }
        // A previous worker stopped on its own (fatal cycle error)
        if let Some(stale) = worker.take() {
            if stale.handle.join().is_err() {
                error!("Previous playback worker panicked");
            }
        }

        let running = Arc::new(AtomicBool::new(true));
        let (exited_tx, exited_rx) = mpsc::channel();
        let handle = {
            let inner = Arc::clone(&self.inner);
            let running = Arc::clone(&running);
            let interval = self.config.work_interval();
            thread::Builder::new()
                .name("avsync-playback".to_string())
                .spawn(move || worker_loop(inner, running, interval, exited_tx))
                .map_err(|e| Error::Worker(format!("Failed to spawn playback worker: {}", e)))?
        };

        *worker = Some(Worker {
            running,
            handle,
            exited: exited_rx,
        });
        info!("Playback worker started");
        Ok(outcome)
    }

    /// Pause playback. No-op when already paused.
    pub fn pause(&self) -> Result<()> {
        let mut inner = self.lock()?;
        debug!("pause requested in state {}", inner.state);

        match inner.state {
            TransportState::Paused => Ok(()),
            TransportState::Playing => {
                inner.pause_tracks()?;
                inner.set_state(TransportState::Paused);
                Ok(())
            }
            state => Err(Error::IllegalTransition {
                operation: "pause",
                state,
            }),
        }
    }

    /// Discard in-flight buffers and clear end-of-stream on every pipeline.
    ///
    /// Not permitted while playing or preparing.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.lock()?;
        debug!("flush requested in state {}", inner.state);

        match inner.state {
            TransportState::Playing | TransportState::Preparing => Err(Error::IllegalTransition {
                operation: "flush",
                state: inner.state,
            }),
            TransportState::Idle | TransportState::Paused => {
                for track in inner.audio_tracks.values_mut() {
                    track.flush()?;
                }
                for track in inner.video_tracks.values_mut() {
                    track.flush()?;
                }
                inner.playback_ended_reported = false;
                Ok(())
            }
        }
    }

    /// Stop the worker, release every pipeline and source, return to `Idle`.
    ///
    /// Safe to call repeatedly.
    pub fn reset(&self) -> Result<()> {
        self.stop_worker()?;

        let mut inner = self.lock()?;
        if inner.state == TransportState::Playing {
            if let Err(e) = inner.pause_tracks() {
                warn!("Pause during reset failed: {}", e);
            }
            inner.set_state(TransportState::Paused);
        }

        inner.release_tracks();
        for source in [inner.audio_source.take(), inner.video_source.take()]
            .into_iter()
            .flatten()
        {
            match source.lock() {
                Ok(mut source) => source.release(),
                Err(_) => warn!("Sample source lock poisoned during reset"),
            }
        }

        inner.timing.disable_adjuster();
        inner.duration_us = None;
        inner.playback_ended_reported = false;
        inner.set_state(TransportState::Idle);
        Ok(())
    }

    fn stop_worker(&self) -> Result<()> {
        let worker = self
            .worker
            .lock()
            .map_err(|_| Error::LockPoisoned("worker handle"))?
            .take();
        let Some(worker) = worker else {
            return Ok(());
        };

        worker.running.store(false, Ordering::SeqCst);
        let timeout = self.config.worker_stop_timeout();
        match worker.exited.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    error!("Playback worker panicked");
                }
                debug!("Playback worker joined");
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Playback worker did not stop within {:?}, detaching",
                    timeout
                );
                *self
                    .detached
                    .lock()
                    .map_err(|_| Error::LockPoisoned("worker handle"))? = Some(worker);
            }
        }
        Ok(())
    }

    /// Join a worker detached by an earlier stop timeout.
    ///
    /// Fails if it is still running after another stop timeout, so two loops
    /// never run at once.
    fn join_detached(&self) -> Result<()> {
        let mut detached = self
            .detached
            .lock()
            .map_err(|_| Error::LockPoisoned("worker handle"))?;
        let Some(worker) = detached.take() else {
            return Ok(());
        };

        let timeout = self.config.worker_stop_timeout();
        match worker.exited.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    error!("Detached playback worker panicked");
                }
                debug!("Detached playback worker joined");
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("Detached playback worker is still running");
                *detached = Some(worker);
                Err(Error::Worker(
                    "Previous playback worker is still running".to_string(),
                ))
            }
        }
    }

    pub fn state(&self) -> Result<TransportState> {
        Ok(self.lock()?.state)
    }

    /// True once every pipeline has seen input and output end of stream
    pub fn is_ended(&self) -> Result<bool> {
        Ok(self.lock()?.is_ended())
    }

    /// Largest committed video position, rounded to milliseconds
    pub fn current_position_ms(&self) -> Result<i64> {
        let inner = self.lock()?;
        Ok(us_to_ms_rounded(
            inner.max_video_position_us(TrackPipeline::current_position_us),
        ))
    }

    /// Largest video input position estimate, rounded to milliseconds
    pub fn position_estimate_ms(&self) -> Result<i64> {
        let inner = self.lock()?;
        Ok(us_to_ms_rounded(
            inner.max_video_position_us(TrackPipeline::position_estimate_us),
        ))
    }

    /// Longest track duration, rounded to milliseconds
    pub fn duration_ms(&self) -> Result<Option<i64>> {
        Ok(self.lock()?.duration_us.map(us_to_ms_rounded))
    }

    /// Master clock reading (microseconds)
    pub fn now_us(&self) -> Result<i64> {
        Ok(self.lock()?.master_clock_us())
    }

    pub fn session_id(&self) -> Result<Uuid> {
        Ok(self.lock()?.session_id)
    }

    /// Message of the error that stopped the worker, if any
    pub fn last_error(&self) -> Result<Option<String>> {
        Ok(self.lock()?.last_error.clone())
    }

    pub fn stats(&self) -> Result<PlayerStats> {
        let mut inner = self.lock()?;
        let master_clock_us = inner.master_clock_us();
        Ok(PlayerStats {
            session_id: inner.session_id,
            state: inner.state,
            master_clock_us,
            position_ms: us_to_ms_rounded(
                inner.max_video_position_us(TrackPipeline::current_position_us),
            ),
            position_estimate_ms: us_to_ms_rounded(
                inner.max_video_position_us(TrackPipeline::position_estimate_us),
            ),
            duration_ms: inner.duration_us.map(us_to_ms_rounded),
            ended: inner.is_ended(),
            last_error: inner.last_error.clone(),
            tracks: inner.tracks().map(TrackPipeline::stats).collect(),
        })
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        if let Ok(worker) = self.worker.get_mut() {
            if let Some(worker) = worker.as_ref() {
                worker.running.store(false, Ordering::SeqCst);
            }
        }
    }
}

fn ensure_unprepared(state: TransportState, operation: &'static str) -> Result<()> {
    match state {
        TransportState::Idle | TransportState::Preparing => Ok(()),
        state => Err(Error::IllegalTransition { operation, state }),
    }
}

fn worker_loop(
    inner: Arc<Mutex<TransportInner>>,
    running: Arc<AtomicBool>,
    interval: Duration,
    exited: mpsc::Sender<()>,
) {
    debug!("Playback worker loop running every {:?}", interval);

    while running.load(Ordering::SeqCst) {
        {
            let mut guard = match inner.lock() {
                Ok(guard) => guard,
                Err(_) => {
                    error!("Transport state lock poisoned, stopping worker");
                    break;
                }
            };

            if guard.state == TransportState::Playing {
                let _span = info_span!("playback", session = %guard.session_id).entered();
                if let Err(e) = guard.run_cycle() {
                    error!("Playback cycle failed: {}", e);
                    guard.fail(&e);
                    break;
                }
            }
        }
        thread::sleep(interval);
    }

    running.store(false, Ordering::SeqCst);
    debug!("Playback worker loop exited");
    let _ = exited.send(());
}
