//! Offline rendering
//!
//! Drives a [`Mixer`] to the end of its window and streams the result as
//! raw little-endian PCM in interleaved frame order.

use mixdown_core::domain::audio::MixError;
use mixdown_core::{Mixer, SampleSlice};
use serde::Serialize;
use std::io::{self, Write};
use thiserror::Error;
use tracing::{debug, info, instrument, trace};

/// Errors that can occur while rendering
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Mix error: {0}")]
    Mix(#[from] MixError),

    #[error("Invalid block size: {0}")]
    InvalidBlock(usize),
}

/// Summary of a finished render
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RenderStats {
    /// Frames written (one sample per channel each)
    pub frames: u64,
    pub blocks: u64,
    pub channels: usize,
    pub rate: f64,
    /// Largest absolute sample, normalized to full scale
    pub peak: f32,
    pub rms: f32,
}

impl RenderStats {
    pub fn duration_secs(&self) -> f64 {
        if self.rate > 0.0 {
            self.frames as f64 / self.rate
        } else {
            0.0
        }
    }
}

/// Pulls fixed-size blocks from a mixer until it runs dry
#[derive(Debug, Clone, Copy)]
pub struct OfflineRenderer {
    block: usize,
}

impl OfflineRenderer {
    pub fn new(block: usize) -> Result<Self, RenderError> {
        if block == 0 {
            return Err(RenderError::InvalidBlock(block));
        }
        Ok(Self { block })
    }

    pub fn block(&self) -> usize {
        self.block
    }

    /// Render the rest of `mixer`'s window into `sink`
    #[instrument(skip(self, mixer, sink))]
    pub fn render<W: Write>(&self, mixer: &mut Mixer, sink: &mut W) -> Result<RenderStats, RenderError> {
        let channels = mixer.num_channels();
        let mut stats = RenderStats {
            channels,
            rate: mixer.rate(),
            ..RenderStats::default()
        };
        info!(
            block = self.block,
            channels,
            rate = mixer.rate(),
            format = ?mixer.format(),
            "Rendering"
        );

        let bytes_per_frame = channels * mixer.format().bytes_per_sample();
        let mut bytes = Vec::with_capacity(self.block.min(mixer.buffer_size()) * bytes_per_frame);
        let mut sum_squares = 0.0f64;

        loop {
            let frames = mixer.process(self.block)?;
            if frames == 0 {
                break;
            }

            bytes.clear();
            if mixer.num_buffers() == 1 {
                let block = mixer.buffer();
                block.extend_le_bytes(&mut bytes);
                accumulate(&block, &mut stats.peak, &mut sum_squares);
            } else {
                let planes: Vec<SampleSlice<'_>> = (0..mixer.num_buffers())
                    .filter_map(|c| mixer.channel_buffer(c))
                    .collect();
                for frame in 0..frames {
                    for plane in &planes {
                        plane.push_le_bytes(frame, &mut bytes);
                    }
                }
                for plane in &planes {
                    accumulate(plane, &mut stats.peak, &mut sum_squares);
                }
            }
            sink.write_all(&bytes)?;

            stats.frames += frames as u64;
            stats.blocks += 1;
            trace!(frames, total = stats.frames, "Rendered block");
        }
        sink.flush()?;

        let samples = stats.frames as f64 * channels as f64;
        if samples > 0.0 {
            stats.rms = (sum_squares / samples).sqrt() as f32;
        }

        debug!(
            frames = stats.frames,
            blocks = stats.blocks,
            peak = stats.peak,
            rms = stats.rms,
            "Render finished"
        );
        Ok(stats)
    }
}

impl Default for OfflineRenderer {
    fn default() -> Self {
        Self { block: 1024 }
    }
}

fn accumulate(samples: &SampleSlice<'_>, peak: &mut f32, sum_squares: &mut f64) {
    for s in (0..samples.len()).filter_map(|i| samples.get(i)) {
        *peak = peak.max(s.abs());
        *sum_squares += f64::from(s) * f64::from(s);
    }
}
