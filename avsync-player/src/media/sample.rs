//! Sample and buffer metadata

use serde::{Deserialize, Serialize};

/// Flags attached to a demultiplexed sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleFlags {
    /// Sample starts a decodable unit
    pub sync: bool,
    /// Payload is encrypted; cipher metadata comes from the source
    pub encrypted: bool,
}

/// Flags carried with decoder input and output buffers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferFlags {
    pub end_of_stream: bool,
}

impl BufferFlags {
    pub const NONE: BufferFlags = BufferFlags {
        end_of_stream: false,
    };

    pub const END_OF_STREAM: BufferFlags = BufferFlags {
        end_of_stream: true,
    };
}

/// Metadata for one decoded output buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferInfo {
    /// Valid bytes at the start of the output buffer
    pub size: usize,
    /// Presentation time (microseconds)
    pub presentation_time_us: i64,
    pub flags: BufferFlags,
}

impl BufferInfo {
    pub fn end_of_stream(presentation_time_us: i64) -> Self {
        Self {
            size: 0,
            presentation_time_us,
            flags: BufferFlags::END_OF_STREAM,
        }
    }
}

/// Cipher mode of an encrypted sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoMode {
    Unencrypted,
    AesCtr,
    AesCbc,
}

/// Cipher metadata for an encrypted sample
///
/// Passed through to the decoder untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoInfo {
    pub mode: CryptoMode,
    pub key: Vec<u8>,
    pub iv: Vec<u8>,
    /// Clear bytes per subsample
    pub clear_bytes: Vec<usize>,
    /// Encrypted bytes per subsample
    pub encrypted_bytes: Vec<usize>,
}

impl CryptoInfo {
    /// Total payload size covered by the subsample layout
    pub fn payload_size(&self) -> usize {
        self.clear_bytes.iter().sum::<usize>() + self.encrypted_bytes.iter().sum::<usize>()
    }
}
