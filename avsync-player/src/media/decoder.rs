//! Slot-based decoder interface
//!
//! A decoder owns a fixed set of indexed input and output buffers. The engine
//! leases a free input slot, fills it and queues it back; decoded output is
//! leased the same way and handed back with [`Decoder::release_output`].
//! All dequeue calls are polled with a zero timeout by the work loop.

use std::time::Duration;

use super::format::MediaFormat;
use super::sample::{BufferFlags, BufferInfo, CryptoInfo};
use crate::error::Result;

/// Result of polling for decoded output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSlot {
    /// A decoded buffer is ready in slot `index`
    Buffer { index: usize, info: BufferInfo },
    /// Output format changed; read it with [`Decoder::output_format`]
    FormatChanged,
    /// Output buffer set was reallocated
    BuffersChanged,
    /// Nothing available yet
    TryAgainLater,
}

/// How an output slot is handed back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseMode {
    /// Present the frame at this monotonic time (nanoseconds)
    Render { at_ns: i64 },
    /// Return the slot without presenting anything
    Drop,
}

/// Decoder interface
pub trait Decoder: Send {
    fn start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Discard all queued input and output; every slot returns to the decoder
    fn flush(&mut self) -> Result<()>;

    fn release(&mut self);

    /// Lease a free input slot, `None` if none is free within `timeout`
    fn dequeue_input_slot(&mut self, timeout: Duration) -> Result<Option<usize>>;

    /// Writable memory of a leased input slot
    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8]>;

    /// Submit `size` bytes of a leased input slot
    fn queue_input(
        &mut self,
        index: usize,
        size: usize,
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> Result<()>;

    /// Submit an encrypted sample together with its cipher metadata
    fn queue_secure_input(
        &mut self,
        index: usize,
        crypto: &CryptoInfo,
        presentation_time_us: i64,
    ) -> Result<()>;

    fn dequeue_output_slot(&mut self, timeout: Duration) -> Result<OutputSlot>;

    /// Contents of a leased output slot
    fn output_buffer(&self, index: usize) -> Result<&[u8]>;

    /// Hand a leased output slot back to the decoder
    fn release_output(&mut self, index: usize, mode: ReleaseMode) -> Result<()>;

    /// Current output format (valid after [`OutputSlot::FormatChanged`])
    fn output_format(&self) -> Result<MediaFormat>;
}

/// Creates a decoder for a track format
pub trait DecoderFactory: Send + Sync {
    fn create(&self, format: &MediaFormat) -> Result<Box<dyn Decoder>>;
}
