//! Media collaborator interfaces
//!
//! The engine does not parse containers or decode codecs itself. It drives
//! a [`SampleSource`] (demultiplexer) and a [`Decoder`] per track through the
//! traits in this module.

pub mod decoder;
pub mod format;
pub mod sample;
pub mod source;

pub use decoder::{Decoder, DecoderFactory, OutputSlot, ReleaseMode};
pub use format::{validate_audio_format, MediaFormat};
pub use sample::{BufferFlags, BufferInfo, CryptoInfo, CryptoMode, SampleFlags};
pub use source::{share, SampleSource, SharedSource};
