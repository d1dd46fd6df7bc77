//! Pass-through decoder
//!
//! "Decodes" by copying each queued input sample into a free output slot.
//! Input slots stay leased until their sample has moved to the output side,
//! so a consumer that stops draining output stalls the input side as well.
//!
//! The first output poll after `start()` reports a format change; every
//! output slot handed back is appended to a shared release log.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use avsync_common::events::TrackKind;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::media::{
    BufferFlags, BufferInfo, CryptoInfo, Decoder, DecoderFactory, MediaFormat, OutputSlot,
    ReleaseMode,
};

/// Default slots per side
pub const DEFAULT_SLOT_COUNT: usize = 4;

/// Default input slot capacity in bytes
pub const DEFAULT_SLOT_CAPACITY: usize = 64 * 1024;

/// One output slot handed back by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseRecord {
    pub kind: Option<TrackKind>,
    pub index: usize,
    pub presentation_time_us: i64,
    pub mode: ReleaseMode,
}

/// Shared log of released output slots
pub type ReleaseLog = Arc<Mutex<Vec<ReleaseRecord>>>;

#[derive(Debug, Clone, Copy)]
struct QueuedInput {
    slot: usize,
    size: usize,
    presentation_time_us: i64,
    flags: BufferFlags,
}

/// Decoder that copies input to output unchanged
pub struct LoopbackDecoder {
    output_format: MediaFormat,
    kind: Option<TrackKind>,

    input_buffers: Vec<Vec<u8>>,
    free_inputs: VecDeque<usize>,
    queued_inputs: VecDeque<QueuedInput>,

    output_buffers: Vec<Vec<u8>>,
    free_outputs: VecDeque<usize>,
    /// Output slots handed out and not yet released
    leased_outputs: Vec<Option<BufferInfo>>,

    started: bool,
    format_reported: bool,
    released: bool,
    release_log: ReleaseLog,
}

impl LoopbackDecoder {
    pub fn new(output_format: MediaFormat) -> Self {
        Self::with_slots(
            output_format,
            DEFAULT_SLOT_COUNT,
            DEFAULT_SLOT_CAPACITY,
            Arc::new(Mutex::new(Vec::new())),
        )
    }

    pub fn with_slots(
        output_format: MediaFormat,
        slot_count: usize,
        slot_capacity: usize,
        release_log: ReleaseLog,
    ) -> Self {
        let kind = output_format.kind();
        Self {
            output_format,
            kind,
            input_buffers: vec![vec![0; slot_capacity]; slot_count],
            free_inputs: (0..slot_count).collect(),
            queued_inputs: VecDeque::new(),
            output_buffers: vec![Vec::new(); slot_count],
            free_outputs: (0..slot_count).collect(),
            leased_outputs: vec![None; slot_count],
            started: false,
            format_reported: false,
            released: false,
            release_log,
        }
    }

    pub fn release_log(&self) -> ReleaseLog {
        Arc::clone(&self.release_log)
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    fn ensure_started(&self, operation: &str) -> Result<()> {
        if self.released {
            return Err(Error::Decoder(format!("{} on released decoder", operation)));
        }
        if !self.started {
            return Err(Error::Decoder(format!("{} before start", operation)));
        }
        Ok(())
    }

    fn check_input_lease(&self, index: usize) -> Result<()> {
        if index >= self.input_buffers.len()
            || self.free_inputs.contains(&index)
            || self.queued_inputs.iter().any(|queued| queued.slot == index)
        {
            return Err(Error::Decoder(format!("Input slot {} is not leased", index)));
        }
        Ok(())
    }

    fn enqueue(&mut self, input: QueuedInput) -> Result<()> {
        self.check_input_lease(input.slot)?;
        if input.size > self.input_buffers[input.slot].len() {
            return Err(Error::Decoder(format!(
                "{} bytes exceed input slot capacity",
                input.size
            )));
        }
        trace!(
            "Decoder input slot {} queued: {} bytes at {} us",
            input.slot,
            input.size,
            input.presentation_time_us
        );
        self.queued_inputs.push_back(input);
        Ok(())
    }
}

impl Decoder for LoopbackDecoder {
    fn start(&mut self) -> Result<()> {
        if self.released {
            return Err(Error::Decoder("start on released decoder".to_string()));
        }
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.ensure_started("stop")?;
        self.started = false;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_started("flush")?;
        let slot_count = self.input_buffers.len();
        self.queued_inputs.clear();
        self.free_inputs = (0..slot_count).collect();
        self.free_outputs = (0..self.output_buffers.len()).collect();
        self.leased_outputs.iter_mut().for_each(|lease| *lease = None);
        debug!("Decoder flushed, {} slots free per side", slot_count);
        Ok(())
    }

    fn release(&mut self) {
        self.started = false;
        self.released = true;
        self.queued_inputs.clear();
    }

    fn dequeue_input_slot(&mut self, _timeout: Duration) -> Result<Option<usize>> {
        self.ensure_started("dequeue_input_slot")?;
        Ok(self.free_inputs.pop_front())
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8]> {
        self.check_input_lease(index)?;
        Ok(self.input_buffers[index].as_mut_slice())
    }

    fn queue_input(
        &mut self,
        index: usize,
        size: usize,
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> Result<()> {
        self.ensure_started("queue_input")?;
        self.enqueue(QueuedInput {
            slot: index,
            size,
            presentation_time_us,
            flags,
        })
    }

    fn queue_secure_input(
        &mut self,
        index: usize,
        crypto: &CryptoInfo,
        presentation_time_us: i64,
    ) -> Result<()> {
        self.ensure_started("queue_secure_input")?;
        self.enqueue(QueuedInput {
            slot: index,
            size: crypto.payload_size(),
            presentation_time_us,
            flags: BufferFlags::NONE,
        })
    }

    fn dequeue_output_slot(&mut self, _timeout: Duration) -> Result<OutputSlot> {
        self.ensure_started("dequeue_output_slot")?;
        if !self.format_reported {
            self.format_reported = true;
            return Ok(OutputSlot::FormatChanged);
        }
        if self.queued_inputs.is_empty() {
            return Ok(OutputSlot::TryAgainLater);
        }
        let Some(output) = self.free_outputs.pop_front() else {
            return Ok(OutputSlot::TryAgainLater);
        };
        let Some(input) = self.queued_inputs.pop_front() else {
            return Ok(OutputSlot::TryAgainLater);
        };

        let data = &self.input_buffers[input.slot][..input.size];
        self.output_buffers[output].clear();
        self.output_buffers[output].extend_from_slice(data);
        self.free_inputs.push_back(input.slot);

        let info = BufferInfo {
            size: input.size,
            presentation_time_us: input.presentation_time_us,
            flags: input.flags,
        };
        self.leased_outputs[output] = Some(info);
        Ok(OutputSlot::Buffer {
            index: output,
            info,
        })
    }

    fn output_buffer(&self, index: usize) -> Result<&[u8]> {
        match self.leased_outputs.get(index) {
            Some(Some(_)) => Ok(self.output_buffers[index].as_slice()),
            _ => Err(Error::Decoder(format!("Output slot {} is not leased", index))),
        }
    }

    fn release_output(&mut self, index: usize, mode: ReleaseMode) -> Result<()> {
        let info = self
            .leased_outputs
            .get_mut(index)
            .and_then(Option::take)
            .ok_or_else(|| Error::Decoder(format!("Output slot {} is not leased", index)))?;
        self.free_outputs.push_back(index);

        let mut log = self
            .release_log
            .lock()
            .map_err(|_| Error::LockPoisoned("release log"))?;
        log.push(ReleaseRecord {
            kind: self.kind,
            index,
            presentation_time_us: info.presentation_time_us,
            mode,
        });
        Ok(())
    }

    fn output_format(&self) -> Result<MediaFormat> {
        Ok(self.output_format.clone())
    }
}

/// Creates [`LoopbackDecoder`]s that share one release log
#[derive(Debug, Clone)]
pub struct LoopbackDecoderFactory {
    slot_count: usize,
    slot_capacity: usize,
    /// Output format replacements by track kind
    output_formats: Vec<(TrackKind, MediaFormat)>,
    release_log: ReleaseLog,
}

impl Default for LoopbackDecoderFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackDecoderFactory {
    pub fn new() -> Self {
        Self {
            slot_count: DEFAULT_SLOT_COUNT,
            slot_capacity: DEFAULT_SLOT_CAPACITY,
            output_formats: Vec::new(),
            release_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_slots(mut self, slot_count: usize, slot_capacity: usize) -> Self {
        self.slot_count = slot_count;
        self.slot_capacity = slot_capacity;
        self
    }

    /// Report `format` as decoder output for every track of `kind`.
    pub fn with_output_format(mut self, kind: TrackKind, format: MediaFormat) -> Self {
        self.output_formats.retain(|(existing, _)| *existing != kind);
        self.output_formats.push((kind, format));
        self
    }

    pub fn release_log(&self) -> ReleaseLog {
        Arc::clone(&self.release_log)
    }

    /// Released slots so far, in release order
    pub fn releases(&self) -> Vec<ReleaseRecord> {
        self.release_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }
}

impl DecoderFactory for LoopbackDecoderFactory {
    fn create(&self, format: &MediaFormat) -> Result<Box<dyn Decoder>> {
        let output_format = format
            .kind()
            .and_then(|kind| {
                self.output_formats
                    .iter()
                    .find(|(candidate, _)| *candidate == kind)
                    .map(|(_, replacement)| replacement.clone())
            })
            .unwrap_or_else(|| format.clone());
        Ok(Box::new(LoopbackDecoder::with_slots(
            output_format,
            self.slot_count,
            self.slot_capacity,
            Arc::clone(&self.release_log),
        )))
    }
}
