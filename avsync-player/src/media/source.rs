//! Demultiplexed sample source
//!
//! A source interleaves the samples of all selected tracks in timestamp
//! order. Several track pipelines may read from one source; each consumes
//! only the samples of its own track and leaves the rest for its siblings.

use std::sync::{Arc, Mutex};

use super::format::MediaFormat;
use super::sample::{CryptoInfo, SampleFlags};
use crate::error::Result;

/// Demultiplexer interface
pub trait SampleSource: Send {
    /// Number of tracks in the container
    fn track_count(&self) -> usize;

    /// Format of track `index`
    fn track_format(&self, index: usize) -> Result<MediaFormat>;

    /// Include track `index` in the sample stream
    fn select_track(&mut self, index: usize) -> Result<()>;

    /// Track of the current sample, `None` once every selected track is exhausted
    fn sample_track_index(&self) -> Option<usize>;

    /// Copy the current sample into `buffer`.
    ///
    /// Returns the sample size, or a non-positive value when no sample is
    /// available.
    fn read_sample(&mut self, buffer: &mut [u8]) -> isize;

    /// Timestamp of the current sample (microseconds)
    fn sample_time_us(&self) -> i64;

    fn sample_flags(&self) -> SampleFlags;

    /// Cipher metadata of the current sample, if it is encrypted
    fn sample_crypto_info(&self) -> Option<CryptoInfo>;

    /// Move to the next sample. Returns false when none is left.
    fn advance(&mut self) -> bool;

    /// Free container resources
    fn release(&mut self);
}

/// Source handle shared by the pipelines reading from it
pub type SharedSource = Arc<Mutex<Box<dyn SampleSource>>>;

/// Wrap a source for sharing between pipelines
pub fn share(source: Box<dyn SampleSource>) -> SharedSource {
    Arc::new(Mutex::new(source))
}
