//! Generated sample source
//!
//! Produces fixed-size samples at a fixed interval for each configured
//! track. Samples of the selected tracks are interleaved in timestamp order,
//! ties going to the lower track index.

use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::media::{CryptoInfo, CryptoMode, MediaFormat, SampleFlags, SampleSource};

/// Description of one generated track
#[derive(Debug, Clone)]
pub struct SyntheticTrack {
    pub format: MediaFormat,
    pub sample_count: usize,
    pub sample_size: usize,
    pub interval_us: i64,
    pub start_time_us: i64,
    pub encrypted: bool,
}

impl SyntheticTrack {
    /// 16-bit PCM chunks of `chunk_bytes` each; the interval follows from
    /// the chunk's frame count.
    pub fn audio(sample_rate: u32, channel_count: u32, chunk_count: usize, chunk_bytes: usize) -> Self {
        let frame_bytes = (channel_count.max(1) * 2) as usize;
        let frames = (chunk_bytes / frame_bytes) as i64;
        let interval_us = if sample_rate == 0 {
            0
        } else {
            frames * 1_000_000 / sample_rate as i64
        };
        Self {
            format: MediaFormat::audio("audio/raw", sample_rate, channel_count)
                .with_duration_us(interval_us * chunk_count as i64),
            sample_count: chunk_count,
            sample_size: chunk_bytes,
            interval_us,
            start_time_us: 0,
            encrypted: false,
        }
    }

    /// `frame_count` frames of `frame_bytes` each at `fps`.
    pub fn video(width: u32, height: u32, frame_count: usize, fps: u32, frame_bytes: usize) -> Self {
        let interval_us = 1_000_000 / fps.max(1) as i64;
        Self {
            format: MediaFormat::video("video/raw", width, height)
                .with_duration_us(interval_us * frame_count as i64),
            sample_count: frame_count,
            sample_size: frame_bytes,
            interval_us,
            start_time_us: 0,
            encrypted: false,
        }
    }

    pub fn with_interval_us(mut self, interval_us: i64) -> Self {
        self.interval_us = interval_us;
        self.format.duration_us = Some(interval_us * self.sample_count as i64);
        self
    }

    pub fn with_start_time_us(mut self, start_time_us: i64) -> Self {
        self.start_time_us = start_time_us;
        self
    }

    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }

    fn sample_time_us(&self, sample: usize) -> i64 {
        self.start_time_us + sample as i64 * self.interval_us
    }
}

/// [`SampleSource`] over generated tracks
#[derive(Debug, Default)]
pub struct SyntheticSource {
    tracks: Vec<SyntheticTrack>,
    selected: Vec<bool>,
    /// Next sample per track
    cursors: Vec<usize>,
    released: bool,
}

impl SyntheticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_track(mut self, track: SyntheticTrack) -> Self {
        self.tracks.push(track);
        self.selected.push(false);
        self.cursors.push(0);
        self
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Track and sample index of the current sample
    fn current(&self) -> Option<(usize, usize)> {
        if self.released {
            return None;
        }
        self.tracks
            .iter()
            .enumerate()
            .filter(|(index, track)| self.selected[*index] && self.cursors[*index] < track.sample_count)
            .min_by_key(|(index, track)| (track.sample_time_us(self.cursors[*index]), *index))
            .map(|(index, _)| (index, self.cursors[index]))
    }
}

impl SampleSource for SyntheticSource {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, index: usize) -> Result<MediaFormat> {
        self.tracks
            .get(index)
            .map(|track| track.format.clone())
            .ok_or_else(|| Error::Source(format!("No track {}", index)))
    }

    fn select_track(&mut self, index: usize) -> Result<()> {
        let selected = self
            .selected
            .get_mut(index)
            .ok_or_else(|| Error::Source(format!("No track {}", index)))?;
        *selected = true;
        Ok(())
    }

    fn sample_track_index(&self) -> Option<usize> {
        self.current().map(|(track, _)| track)
    }

    fn read_sample(&mut self, buffer: &mut [u8]) -> isize {
        let Some((track, sample)) = self.current() else {
            return -1;
        };
        let size = self.tracks[track].sample_size;
        if buffer.len() < size {
            warn!(
                "Input buffer of {} bytes too small for {} byte sample",
                buffer.len(),
                size
            );
            return -1;
        }
        for (offset, byte) in buffer[..size].iter_mut().enumerate() {
            *byte = (sample + offset) as u8;
        }
        size as isize
    }

    fn sample_time_us(&self) -> i64 {
        self.current()
            .map_or(-1, |(track, sample)| self.tracks[track].sample_time_us(sample))
    }

    fn sample_flags(&self) -> SampleFlags {
        match self.current() {
            Some((track, _)) => SampleFlags {
                sync: true,
                encrypted: self.tracks[track].encrypted,
            },
            None => SampleFlags::default(),
        }
    }

    fn sample_crypto_info(&self) -> Option<CryptoInfo> {
        let (track, _) = self.current()?;
        let track = &self.tracks[track];
        track.encrypted.then(|| CryptoInfo {
            mode: CryptoMode::AesCtr,
            key: vec![0; 16],
            iv: vec![0; 16],
            clear_bytes: vec![0],
            encrypted_bytes: vec![track.sample_size],
        })
    }

    fn advance(&mut self) -> bool {
        if let Some((track, sample)) = self.current() {
            trace!("Source advancing past track {} sample {}", track, sample);
            self.cursors[track] += 1;
        }
        self.current().is_some()
    }

    fn release(&mut self) {
        self.released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_track_source() -> SyntheticSource {
        let mut source = SyntheticSource::new()
            .with_track(SyntheticTrack::audio(44_100, 2, 3, 1024).with_interval_us(20_000))
            .with_track(SyntheticTrack::video(320, 240, 2, 25, 64));
        source.select_track(0).unwrap();
        source.select_track(1).unwrap();
        source
    }

    #[test]
    fn test_interleaves_by_timestamp() {
        let mut source = two_track_source();
        let mut order = Vec::new();
        while let Some(track) = source.sample_track_index() {
            order.push((track, source.sample_time_us()));
            source.advance();
        }
        assert_eq!(
            order,
            vec![(0, 0), (1, 0), (0, 20_000), (0, 40_000), (1, 40_000)]
        );
    }

    #[test]
    fn test_unselected_tracks_are_skipped() {
        let mut source = SyntheticSource::new()
            .with_track(SyntheticTrack::audio(44_100, 2, 2, 1024))
            .with_track(SyntheticTrack::video(320, 240, 2, 25, 64));
        source.select_track(1).unwrap();
        assert_eq!(source.sample_track_index(), Some(1));
        source.advance();
        source.advance();
        assert_eq!(source.sample_track_index(), None);
    }

    #[test]
    fn test_read_sample_fills_buffer() {
        let mut source = two_track_source();
        let mut buffer = vec![0u8; 2048];
        assert_eq!(source.read_sample(&mut buffer), 1024);

        let mut small = vec![0u8; 16];
        assert_eq!(source.read_sample(&mut small), -1);
    }

    #[test]
    fn test_audio_interval_from_chunk_size() {
        // 1024 bytes of 16-bit stereo = 256 frames = 5804 us at 44.1 kHz
        let track = SyntheticTrack::audio(44_100, 2, 10, 1024);
        assert_eq!(track.interval_us, 5_804);
        assert_eq!(track.format.duration_us, Some(58_040));
    }

    #[test]
    fn test_released_source_is_exhausted() {
        let mut source = two_track_source();
        source.release();
        assert!(source.is_released());
        assert_eq!(source.sample_track_index(), None);
    }
}
