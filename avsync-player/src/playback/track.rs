//! Track Pipeline
//!
//! One pipeline per elementary stream. Each work cycle it:
//!
//! 1. Leases at most one free input slot from the decoder
//! 2. Feeds samples from the source into free input slots
//! 3. Polls at most one output event from the decoder
//! 4. Drains decoded buffers: audio into the [`AudioClockSink`], video
//!    through the release gate against the master clock
//!
//! Audio and video behavior is selected by the pipeline's role, fixed from
//! the track format and re-derived whenever the decoder reports a new
//! output format.

use std::sync::Arc;
use std::time::Duration;

use avsync_common::events::{EventBus, PlayerEvent, TrackKind};
use avsync_common::time::{ns_to_us, us_to_ns, MonotonicClock};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use super::gate::{gate_video_frame, FrameDecision};
use super::slots::{InputSlotQueue, OutputSlotQueue};
use super::time_provider::{MasterAudio, MediaTimeProvider};
use crate::audio::{AudioClockSink, AudioDeviceFactory};
use crate::config::PlayerConfig;
use crate::error::{Error, Result};
use crate::media::{
    validate_audio_format, BufferFlags, BufferInfo, Decoder, MediaFormat, OutputSlot,
    ReleaseMode, SharedSource,
};

/// Shared collaborators handed to every pipeline
#[derive(Clone)]
pub struct PipelineEnv {
    pub config: Arc<PlayerConfig>,
    pub clock: Arc<dyn MonotonicClock>,
    pub audio_devices: Arc<dyn AudioDeviceFactory>,
    pub events: EventBus,
}

/// Per-track counters and flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackStats {
    pub track_index: usize,
    pub kind: TrackKind,
    pub samples_fed: u64,
    pub frames_rendered: u64,
    pub frames_dropped: u64,
    pub audio_bytes_queued: u64,
    pub input_eos: bool,
    pub output_eos: bool,
    /// Last committed presentation time (microseconds)
    pub position_us: i64,
    /// Re-based input time of the last fed video sample (microseconds)
    pub position_estimate_us: i64,
}

#[derive(Debug, Default, Clone, Copy)]
struct TrackCounters {
    samples_fed: u64,
    frames_rendered: u64,
    frames_dropped: u64,
    audio_bytes_queued: u64,
}

#[derive(Default)]
struct AudioOutput {
    sink: Option<AudioClockSink>,
    format_rejected: bool,
}

enum TrackRole {
    Audio(AudioOutput),
    Video {
        /// First input sample time; later input times are re-based on it
        sample_base_time_us: Option<i64>,
    },
}

impl TrackRole {
    fn for_kind(kind: TrackKind) -> Self {
        match kind {
            TrackKind::Audio => TrackRole::Audio(AudioOutput::default()),
            TrackKind::Video => TrackRole::Video {
                sample_base_time_us: None,
            },
        }
    }

    fn kind(&self) -> TrackKind {
        match self {
            TrackRole::Audio(_) => TrackKind::Audio,
            TrackRole::Video { .. } => TrackKind::Video,
        }
    }
}

/// Decode pipeline for one elementary stream
pub struct TrackPipeline {
    track_index: usize,
    decoder: Box<dyn Decoder>,
    source: SharedSource,
    role: TrackRole,
    env: PipelineEnv,

    input_slots: InputSlotQueue,
    output_slots: OutputSlotQueue,

    saw_input_eos: bool,
    saw_output_eos: bool,
    /// Last committed position, from decoder output timestamps
    presentation_time_us: i64,
    /// Re-based input time of the last fed video sample
    position_estimate_us: i64,

    decoder_started: bool,
    ended_reported: bool,
    counters: TrackCounters,
}

impl TrackPipeline {
    /// Create a pipeline for `track_index` of `source`.
    ///
    /// The track must already be selected on the source.
    pub fn new(
        track_index: usize,
        format: &MediaFormat,
        decoder: Box<dyn Decoder>,
        source: SharedSource,
        env: PipelineEnv,
    ) -> Result<Self> {
        let kind = format.kind().ok_or_else(|| {
            Error::Source(format!(
                "Track {} has unsupported MIME type {}",
                track_index, format.mime
            ))
        })?;
        debug!("Track {} pipeline created: {} ({})", track_index, kind, format.mime);

        Ok(Self {
            track_index,
            decoder,
            source,
            role: TrackRole::for_kind(kind),
            env,
            input_slots: InputSlotQueue::new(),
            output_slots: OutputSlotQueue::new(),
            saw_input_eos: false,
            saw_output_eos: false,
            presentation_time_us: 0,
            position_estimate_us: 0,
            decoder_started: false,
            ended_reported: false,
            counters: TrackCounters::default(),
        })
    }

    pub fn track_index(&self) -> usize {
        self.track_index
    }

    pub fn kind(&self) -> TrackKind {
        self.role.kind()
    }

    /// Start the decoder (first call only) and resume audio output.
    ///
    /// After output end of stream the sink stop is issued again, so a pause
    /// during playout does not cancel it.
    pub fn start(&mut self) -> Result<()> {
        if !self.decoder_started {
            self.decoder.start()?;
            self.decoder_started = true;
        }
        let saw_output_eos = self.saw_output_eos;
        if let Some(sink) = self.sink_mut() {
            sink.play()?;
            if saw_output_eos {
                sink.stop()?;
            }
        }
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        if let Some(sink) = self.sink_mut() {
            sink.pause()?;
        }
        Ok(())
    }

    /// Drop leased slots, clear end-of-stream flags and flush the decoder.
    ///
    /// The audio sink is flushed only if it is not playing.
    pub fn flush(&mut self) -> Result<()> {
        self.input_slots.clear();
        self.output_slots.clear();
        self.saw_input_eos = false;
        self.saw_output_eos = false;
        self.ended_reported = false;

        if let Some(sink) = self.sink_mut() {
            sink.flush()?;
        }
        self.decoder.flush()
    }

    /// Stop and release the decoder and the audio output.
    pub fn release(&mut self) {
        if self.decoder_started {
            if let Err(e) = self.decoder.stop() {
                warn!("Track {}: decoder stop failed: {}", self.track_index, e);
            }
            self.decoder_started = false;
        }
        self.input_slots.clear();
        self.output_slots.clear();
        self.decoder.release();

        if let TrackRole::Audio(output) = &mut self.role {
            if let Some(mut sink) = output.sink.take() {
                sink.release();
            }
        }
        debug!("Track {} released", self.track_index);
    }

    /// Both input and output end of stream have been seen
    pub fn is_ended(&self) -> bool {
        self.saw_input_eos && self.saw_output_eos
    }

    pub fn saw_input_eos(&self) -> bool {
        self.saw_input_eos
    }

    pub fn saw_output_eos(&self) -> bool {
        self.saw_output_eos
    }

    /// Last committed presentation time (microseconds)
    pub fn current_position_us(&self) -> i64 {
        self.presentation_time_us
    }

    /// Input-side position estimate; committed position for audio
    pub fn position_estimate_us(&self) -> i64 {
        match self.role {
            TrackRole::Video { .. } => self.position_estimate_us,
            TrackRole::Audio(_) => self.presentation_time_us,
        }
    }

    /// Bytes waiting in the audio sink, 0 without one
    pub fn queued_audio_bytes(&self) -> usize {
        match &self.role {
            TrackRole::Audio(AudioOutput {
                sink: Some(sink), ..
            }) => sink.queued_byte_count(),
            _ => 0,
        }
    }

    pub fn has_audio_output(&self) -> bool {
        matches!(
            &self.role,
            TrackRole::Audio(AudioOutput { sink: Some(_), .. })
        )
    }

    pub fn audio_format_rejected(&self) -> bool {
        matches!(
            &self.role,
            TrackRole::Audio(AudioOutput {
                format_rejected: true,
                ..
            })
        )
    }

    /// This pipeline's contribution to the master clock
    pub fn master_audio(&mut self) -> MasterAudio<'_> {
        match &mut self.role {
            TrackRole::Audio(AudioOutput {
                sink: Some(sink), ..
            }) => MasterAudio::Sink(sink),
            TrackRole::Audio(AudioOutput {
                format_rejected: true,
                ..
            }) => MasterAudio::Absent,
            TrackRole::Audio(_) => MasterAudio::Pending,
            TrackRole::Video { .. } => MasterAudio::Absent,
        }
    }

    /// Write queued audio to the device.
    pub fn process(&mut self) -> Result<()> {
        match self.sink_mut() {
            Some(sink) => sink.process(),
            None => Ok(()),
        }
    }

    pub fn stats(&self) -> TrackStats {
        TrackStats {
            track_index: self.track_index,
            kind: self.kind(),
            samples_fed: self.counters.samples_fed,
            frames_rendered: self.counters.frames_rendered,
            frames_dropped: self.counters.frames_dropped,
            audio_bytes_queued: self.counters.audio_bytes_queued,
            input_eos: self.saw_input_eos,
            output_eos: self.saw_output_eos,
            position_us: self.presentation_time_us,
            position_estimate_us: self.position_estimate_us(),
        }
    }

    /// Run one work cycle.
    pub fn do_some_work(&mut self, clock: &mut dyn MediaTimeProvider) -> Result<()> {
        if let Some(index) = self.decoder.dequeue_input_slot(Duration::ZERO)? {
            self.input_slots.push(index);
        }

        while self.feed_input()? {}

        match self.decoder.dequeue_output_slot(Duration::ZERO)? {
            OutputSlot::Buffer { index, info } => self.output_slots.push(index, info),
            OutputSlot::FormatChanged => {
                let format = self.decoder.output_format()?;
                self.on_output_format_changed(&format)?;
            }
            OutputSlot::BuffersChanged => {
                trace!("Track {}: output buffers changed", self.track_index);
            }
            OutputSlot::TryAgainLater => {}
        }

        while self.drain_output(clock)? {}

        self.report_if_ended();
        Ok(())
    }

    /// Feed one sample into the oldest free input slot.
    ///
    /// Returns true if another sample may be fed this cycle.
    pub fn feed_input(&mut self) -> Result<bool> {
        if self.saw_input_eos {
            return Ok(false);
        }
        let Some(index) = self.input_slots.peek() else {
            return Ok(false);
        };

        if self.audio_queue_full() {
            trace!(
                "Track {}: audio queue above {} bytes, pausing input",
                self.track_index,
                self.env.config.audio_queue_limit_bytes
            );
            return Ok(false);
        }

        let track_index = self.track_index;
        let mut source = self
            .source
            .lock()
            .map_err(|_| Error::LockPoisoned("sample source"))?;

        match source.sample_track_index() {
            Some(sample_track) if sample_track == track_index => {
                let buffer = self.decoder.input_buffer(index)?;
                let sample_size = source.read_sample(buffer);
                let mut sample_time_us = source.sample_time_us();
                let sample_flags = source.sample_flags();

                if sample_size <= 0 {
                    debug!(
                        "Track {}: sample size {} at {} us, treating as input EOS",
                        track_index, sample_size, sample_time_us
                    );
                    self.saw_input_eos = true;
                    return Ok(false);
                }

                if let TrackRole::Video {
                    sample_base_time_us,
                } = &mut self.role
                {
                    let base = *sample_base_time_us.get_or_insert(sample_time_us);
                    sample_time_us -= base;
                    self.position_estimate_us = sample_time_us;
                }

                if sample_flags.encrypted {
                    let crypto = source.sample_crypto_info().ok_or_else(|| {
                        Error::Source(format!(
                            "Encrypted sample on track {} has no cipher metadata",
                            track_index
                        ))
                    })?;
                    self.decoder
                        .queue_secure_input(index, &crypto, sample_time_us)?;
                } else {
                    self.decoder.queue_input(
                        index,
                        sample_size as usize,
                        sample_time_us,
                        BufferFlags::NONE,
                    )?;
                }

                self.input_slots.pop();
                source.advance();
                self.counters.samples_fed += 1;
                trace!(
                    "Track {}: fed {} bytes at {} us into slot {}",
                    track_index,
                    sample_size,
                    sample_time_us,
                    index
                );
                Ok(true)
            }
            Some(_) => Ok(false),
            None => {
                debug!("Track {}: saw input EOS", track_index);
                self.saw_input_eos = true;
                self.decoder
                    .queue_input(index, 0, 0, BufferFlags::END_OF_STREAM)?;
                self.input_slots.pop();
                Ok(false)
            }
        }
    }

    /// Consume the decoded buffer at the front of the output queue.
    ///
    /// Returns true if another buffer may be drained this cycle.
    pub fn drain_output(&mut self, clock: &mut dyn MediaTimeProvider) -> Result<bool> {
        if self.saw_output_eos {
            return Ok(false);
        }
        let Some((index, info)) = self.output_slots.front() else {
            return Ok(false);
        };

        if info.flags.end_of_stream {
            debug!("Track {}: saw output EOS", self.track_index);
            self.saw_output_eos = true;
            self.decoder.release_output(index, ReleaseMode::Drop)?;
            self.output_slots.pop();

            // Let the sink play out everything queued before stopping
            if let Some(sink) = self.sink_mut() {
                sink.stop()?;
            }
            return Ok(false);
        }

        match self.role {
            TrackRole::Audio(_) => self.drain_audio_buffer(index, info),
            TrackRole::Video { .. } => self.drain_video_frame(index, info, clock),
        }
    }

    fn drain_audio_buffer(&mut self, index: usize, info: BufferInfo) -> Result<bool> {
        let track_index = self.track_index;
        if let TrackRole::Audio(AudioOutput {
            sink: Some(sink), ..
        }) = &mut self.role
        {
            let data = self
                .decoder
                .output_buffer(index)?
                .get(..info.size)
                .ok_or_else(|| {
                    Error::Decoder(format!(
                        "Track {}: output slot {} shorter than {} bytes",
                        track_index, index, info.size
                    ))
                })?
                .to_vec();
            sink.write(data, info.size, us_to_ns(info.presentation_time_us));
            self.counters.audio_bytes_queued += info.size as u64;
        }

        self.decoder.release_output(index, ReleaseMode::Drop)?;
        self.output_slots.pop();
        self.presentation_time_us = info.presentation_time_us;
        Ok(true)
    }

    fn drain_video_frame(
        &mut self,
        index: usize,
        info: BufferInfo,
        clock: &mut dyn MediaTimeProvider,
    ) -> Result<bool> {
        let vsync_interval_us = clock.vsync_duration_ns().map_or(0, ns_to_us);
        let release_us = clock.release_time_us_for(info.presentation_time_us);
        let late_us = self.env.clock.now_us() - release_us;

        match gate_video_frame(
            late_us,
            vsync_interval_us,
            self.env.config.late_frame_threshold_us,
        ) {
            FrameDecision::Hold => Ok(false),
            FrameDecision::Drop => {
                debug!(
                    "Track {}: video late by {} us, dropping frame at {} us",
                    self.track_index, late_us, info.presentation_time_us
                );
                self.decoder.release_output(index, ReleaseMode::Drop)?;
                self.output_slots.pop();
                self.counters.frames_dropped += 1;
                self.env.events.emit_lossy(PlayerEvent::FrameDropped {
                    track_index: self.track_index,
                    presentation_time_us: info.presentation_time_us,
                    late_us,
                });
                Ok(true)
            }
            FrameDecision::Render => {
                self.decoder.release_output(
                    index,
                    ReleaseMode::Render {
                        at_ns: us_to_ns(release_us),
                    },
                )?;
                self.output_slots.pop();
                self.presentation_time_us = info.presentation_time_us;
                self.counters.frames_rendered += 1;
                trace!(
                    "Track {}: frame at {} us released for {} us",
                    self.track_index,
                    info.presentation_time_us,
                    release_us
                );
                Ok(true)
            }
        }
    }

    fn on_output_format_changed(&mut self, format: &MediaFormat) -> Result<()> {
        debug!(
            "Track {}: output format changed to {}",
            self.track_index, format.mime
        );

        match format.kind() {
            Some(TrackKind::Audio) => {
                if !matches!(self.role, TrackRole::Audio(_)) {
                    self.role = TrackRole::for_kind(TrackKind::Audio);
                }
                self.configure_audio_output(format)
            }
            Some(TrackKind::Video) => {
                if let TrackRole::Audio(output) = &mut self.role {
                    if let Some(mut sink) = output.sink.take() {
                        sink.release();
                    }
                    self.role = TrackRole::for_kind(TrackKind::Video);
                }
                debug!(
                    "Track {}: video {}x{}",
                    self.track_index,
                    format.width.unwrap_or(0),
                    format.height.unwrap_or(0)
                );
                Ok(())
            }
            None => {
                warn!(
                    "Track {}: unrecognized output MIME type {}",
                    self.track_index, format.mime
                );
                Ok(())
            }
        }
    }

    fn configure_audio_output(&mut self, format: &MediaFormat) -> Result<()> {
        let sample_rate = format.sample_rate.unwrap_or(0);
        let channel_count = format.channel_count.unwrap_or(0);
        let track_index = self.track_index;

        let TrackRole::Audio(output) = &mut self.role else {
            return Ok(());
        };

        if let Some(mut previous) = output.sink.take() {
            debug!("Track {}: replacing audio output", track_index);
            previous.release();
        }

        if let Err(e) = validate_audio_format(sample_rate, channel_count) {
            warn!(
                "Track {}: {}, continuing without audio output",
                track_index, e
            );
            output.format_rejected = true;
            self.env.events.emit_lossy(PlayerEvent::AudioFormatRejected {
                track_index,
                sample_rate,
                channel_count,
                timestamp: Utc::now(),
            });
            return Ok(());
        }

        let device = self.env.audio_devices.open(sample_rate, channel_count)?;
        let mut sink = AudioClockSink::new(
            device,
            sample_rate,
            channel_count,
            Arc::clone(&self.env.clock),
            self.env.config.timestamp_sample_interval_us,
        );
        sink.play()?;
        output.sink = Some(sink);
        output.format_rejected = false;
        info!(
            "Track {}: audio output {} Hz, {} ch",
            track_index, sample_rate, channel_count
        );
        Ok(())
    }

    fn audio_queue_full(&self) -> bool {
        self.env.config.limit_audio_queue_depth
            && self.queued_audio_bytes() as u64 > self.env.config.audio_queue_limit_bytes
    }

    fn sink_mut(&mut self) -> Option<&mut AudioClockSink> {
        match &mut self.role {
            TrackRole::Audio(output) => output.sink.as_mut(),
            TrackRole::Video { .. } => None,
        }
    }

    fn report_if_ended(&mut self) {
        if self.ended_reported || !self.is_ended() {
            return;
        }
        self.ended_reported = true;
        info!("Track {} ({}) reached end of stream", self.track_index, self.kind());
        self.env.events.emit_lossy(PlayerEvent::TrackEnded {
            track_index: self.track_index,
            kind: self.kind(),
            timestamp: Utc::now(),
        });
    }
}
