//! Streaming resampler for the capture callback (rubato FFT-based).

use anyhow::{Context, Result};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{Fft, FixedSync, Resampler};

/// Chunk size for FFT-based resampling (provides good quality and performance).
const CHUNK_SIZE: usize = 1024;

/// Number of sub-chunks for FFT processing (higher = better quality but more CPU).
const SUB_CHUNKS: usize = 2;

/// Resampler state kept across audio callbacks.
///
/// Callbacks deliver variable-size buffers; samples accumulate until a full
/// chunk can be resampled.
pub struct StreamResampler {
    resampler: Fft<f32>,
    output_buffer: Vec<f32>,
    output_frames_max: usize,
    pending: Vec<f32>,
}

impl StreamResampler {
    /// Create a mono resampler from `from_rate` (device) to `to_rate` (recognizer).
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let resampler = Fft::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, SUB_CHUNKS, 1, FixedSync::Input)
            .context("Failed to create resampler")?;

        let output_frames_max = resampler.output_frames_max();

        Ok(Self {
            resampler,
            output_buffer: vec![0.0f32; output_frames_max],
            output_frames_max,
            pending: Vec::with_capacity(CHUNK_SIZE * 2),
        })
    }

    /// Push samples; returns resampled audio for every full chunk available.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        self.pending.extend_from_slice(samples);

        let mut output = Vec::new();
        loop {
            let needed = self.resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            if let Some(resampled) = self.process_chunk(&chunk) {
                output.extend_from_slice(resampled);
            }
        }
        output
    }

    fn process_chunk(&mut self, chunk: &[f32]) -> Option<&[f32]> {
        let input_adapter = InterleavedSlice::new(chunk, 1, chunk.len()).ok()?;
        let mut output_adapter = InterleavedSlice::new_mut(&mut self.output_buffer, 1, self.output_frames_max).ok()?;

        let (_, frames_written) = self.resampler.process_into_buffer(&input_adapter, &mut output_adapter, None).ok()?;
        Some(&self.output_buffer[..frames_written])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_input_is_buffered() {
        let mut resampler = StreamResampler::new(48000, 16000).unwrap();
        assert!(resampler.process(&[0.0; 16]).is_empty());
    }

    #[test]
    fn test_downsampling_shrinks_output() {
        let mut resampler = StreamResampler::new(48000, 16000).unwrap();
        let output = resampler.process(&vec![0.0; 48000]);
        assert!(!output.is_empty());
        assert!(output.len() <= 16000, "got {}", output.len());
    }
}
