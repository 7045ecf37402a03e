//! Resampler seam
//!
//! The mixer treats resampling as an opaque, stateful, variable-ratio
//! converter. This module defines that contract and ships a linear
//! interpolator; the sinc implementation lives in `mixdown-infra`.

use crate::domain::audio::Result;
use tracing::debug;

/// Stateful variable-ratio sample rate converter for one mono stream
pub trait Resample: Send {
    /// Convert as much of `input` as fits into `output`
    ///
    /// `factor` is output rate divided by input rate and may change on every
    /// call. `last` marks the end of the input stream, allowing the converter
    /// to consume the tail without waiting for more lookahead.
    ///
    /// Returns `(input samples consumed, output samples produced)`. Input that
    /// was not consumed must be offered again, in order, on the next call.
    fn process(
        &mut self,
        factor: f64,
        input: &[f32],
        last: bool,
        output: &mut [f32],
    ) -> Result<(usize, usize)>;

    /// Forget all interpolation history
    fn reset(&mut self);
}

/// Creates resamplers for the mixer
pub trait ResamplerFactory: Send + Sync {
    /// Build a resampler that will only ever see factors in `[min_factor, max_factor]`
    fn make(&self, high_quality: bool, min_factor: f64, max_factor: f64) -> Result<Box<dyn Resample>>;
}

/// Linear interpolation resampler
///
/// Cheap and exact at a factor of 1.0, where every output sample is a copy of
/// an input sample.
#[derive(Debug, Clone, Default)]
pub struct LinearResampler {
    /// Read position relative to the first sample of the next input run
    position: f64,
}

impl LinearResampler {
    pub fn new() -> Self {
        Self { position: 0.0 }
    }
}

impl Resample for LinearResampler {
    fn process(
        &mut self,
        factor: f64,
        input: &[f32],
        last: bool,
        output: &mut [f32],
    ) -> Result<(usize, usize)> {
        let len = input.len();
        if len == 0 {
            return Ok((0, 0));
        }

        let step = factor.recip();
        let mut produced = 0;

        while produced < output.len() {
            let i0 = self.position.floor() as usize;
            let i1 = if i0 + 1 < len {
                i0 + 1
            } else if last && i0 < len {
                i0
            } else {
                break;
            };

            let frac = (self.position - i0 as f64) as f32;
            let x0 = input[i0];
            output[produced] = x0 + frac * (input[i1] - x0);

            produced += 1;
            self.position += step;
        }

        let consumed = (self.position.floor() as usize).min(len);
        self.position -= consumed as f64;

        Ok((consumed, produced))
    }

    fn reset(&mut self) {
        self.position = 0.0;
    }
}

/// Factory for [`LinearResampler`], ignoring the quality flag
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearResamplerFactory;

impl ResamplerFactory for LinearResamplerFactory {
    fn make(&self, high_quality: bool, min_factor: f64, max_factor: f64) -> Result<Box<dyn Resample>> {
        debug!(
            high_quality,
            min_factor, max_factor, "Creating linear resampler"
        );
        Ok(Box::new(LinearResampler::new()))
    }
}
