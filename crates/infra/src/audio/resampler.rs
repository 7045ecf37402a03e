//! Variable-ratio resampling with rubato
//!
//! rubato resamplers work on fixed chunks, while the mixer hands over
//! whatever its lookahead queue holds and wants an exact number of output
//! frames back. [`RubatoResampler`] bridges the two with a small input
//! staging buffer and a pending-output buffer.

use mixdown_core::domain::audio::{MixError, Result};
use mixdown_core::{Resample, ResamplerFactory};
use rubato::{
    FastFixedOut, PolynomialDegree, Resampler, SincFixedOut, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};
use std::fmt;
use tracing::{debug, trace, warn};

/// Output frames per rubato call
pub const DEFAULT_CHUNK_SIZE: usize = 256;

fn resample_error(err: impl fmt::Display) -> MixError {
    MixError::Resample(err.to_string())
}

/// The two rubato engines; the `Resampler` trait is generic and cannot be boxed
enum Engine {
    Sinc(SincFixedOut<f32>),
    Fast(FastFixedOut<f32>),
}

macro_rules! dispatch {
    ($engine:expr, $r:ident => $body:expr) => {
        match $engine {
            Engine::Sinc($r) => $body,
            Engine::Fast($r) => $body,
        }
    };
}

impl Engine {
    fn new(high_quality: bool, ratio: f64, max_relative: f64, chunk_size: usize) -> Result<Self> {
        if high_quality {
            let params = SincInterpolationParameters {
                sinc_len: 256,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Cubic,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            };
            SincFixedOut::<f32>::new(ratio, max_relative, params, chunk_size, 1)
                .map(Engine::Sinc)
                .map_err(resample_error)
        } else {
            FastFixedOut::<f32>::new(ratio, max_relative, PolynomialDegree::Cubic, chunk_size, 1)
                .map(Engine::Fast)
                .map_err(resample_error)
        }
    }

    fn input_frames_next(&self) -> usize {
        dispatch!(self, r => r.input_frames_next())
    }

    fn input_frames_max(&self) -> usize {
        dispatch!(self, r => r.input_frames_max())
    }

    fn output_frames_max(&self) -> usize {
        dispatch!(self, r => r.output_frames_max())
    }

    fn output_delay(&self) -> usize {
        dispatch!(self, r => r.output_delay())
    }

    fn reset(&mut self) {
        dispatch!(self, r => r.reset())
    }

    /// Change the ratio, ramping over the next chunk unless `ramp` is false
    fn set_ratio(&mut self, ratio: f64, ramp: bool) -> Result<()> {
        dispatch!(self, r => r.set_resample_ratio(ratio, ramp)).map_err(resample_error)
    }

    fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<(usize, usize)> {
        dispatch!(self, r => r.process_into_buffer(&[input], &mut [output], None))
            .map_err(resample_error)
    }

    /// Final call with a short chunk, or `None` to push out the delay line
    fn process_partial(&mut self, input: Option<&[f32]>, output: &mut [f32]) -> Result<(usize, usize)> {
        let result = match input {
            Some(input) => {
                dispatch!(self, r => r.process_partial_into_buffer(Some(&[input][..]), &mut [output], None))
            }
            None => {
                dispatch!(self, r => r.process_partial_into_buffer(None::<&[&[f32]]>, &mut [output], None))
            }
        };
        result.map_err(resample_error)
    }
}

/// rubato resampler behind the mixer's [`Resample`] contract
///
/// Sinc interpolation in high quality, cubic polynomial otherwise. The ratio
/// may move freely inside the `[min_factor, max_factor]` range given at
/// construction. Output is aligned so that the first frame corresponds to the
/// first input sample, and the stream tail is flushed once `last` is seen.
pub struct RubatoResampler {
    engine: Engine,
    high_quality: bool,
    min_factor: f64,
    max_factor: f64,
    initial_ratio: f64,
    ratio: f64,

    input: Vec<f32>,
    input_len: usize,

    pending: Vec<f32>,
    pending_start: usize,
    pending_len: usize,

    /// Output frames still to drop to compensate for the filter delay
    skip: usize,
    /// Output frames owed for the input seen since the last reset
    expected: f64,
    emitted: usize,
    finished: bool,
}

impl RubatoResampler {
    pub fn new(high_quality: bool, min_factor: f64, max_factor: f64, chunk_size: usize) -> Result<Self> {
        if !(min_factor.is_finite() && max_factor.is_finite() && min_factor > 0.0 && min_factor <= max_factor) {
            return Err(MixError::InvalidConfiguration(format!(
                "resample factor range [{min_factor}, {max_factor}] must be positive and ordered"
            )));
        }
        if chunk_size == 0 {
            return Err(MixError::InvalidConfiguration(
                "resample chunk size must be positive".to_string(),
            ));
        }

        let ratio = (min_factor * max_factor).sqrt();
        let max_relative = ((max_factor / min_factor).sqrt() * (1.0 + 1e-9)).max(1.0);
        let engine = Engine::new(high_quality, ratio, max_relative, chunk_size)?;

        debug!(
            high_quality,
            min_factor,
            max_factor,
            chunk_size,
            delay = engine.output_delay(),
            "Creating rubato resampler"
        );

        Ok(Self {
            input: vec![0.0; engine.input_frames_max()],
            input_len: 0,
            pending: vec![0.0; engine.output_frames_max()],
            pending_start: 0,
            pending_len: 0,
            skip: engine.output_delay(),
            expected: 0.0,
            emitted: 0,
            finished: false,
            high_quality,
            min_factor,
            max_factor,
            initial_ratio: ratio,
            ratio,
            engine,
        })
    }

    pub fn is_high_quality(&self) -> bool {
        self.high_quality
    }

    /// Current conversion ratio
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Move up to `output.len()` pending frames into `output`
    fn drain_pending(&mut self, output: &mut [f32]) -> usize {
        let n = self.pending_len.min(output.len());
        output[..n].copy_from_slice(&self.pending[self.pending_start..self.pending_start + n]);
        self.pending_start += n;
        self.pending_len -= n;
        self.emitted += n;
        n
    }

    /// Expose the frames of the last engine call, minus any delay still owed
    fn stage(&mut self, made: usize) {
        let skipped = self.skip.min(made);
        self.skip -= skipped;
        self.pending_start = skipped;
        self.pending_len = made - skipped;
    }

    /// Run the engine past the end of the input, bounded by the frames owed
    fn finish_stream(&mut self) -> Result<()> {
        let (used, made) = if self.input_len > 0 {
            let len = self.input_len;
            let (_, made) = self
                .engine
                .process_partial(Some(&self.input[..len]), &mut self.pending)?;
            self.expected += len as f64 * self.ratio;
            self.input_len = 0;
            (len, made)
        } else {
            let (_, made) = self.engine.process_partial(None, &mut self.pending)?;
            (0, made)
        };
        self.stage(made);

        let owed = (self.expected.round() as usize).saturating_sub(self.emitted);
        self.pending_len = self.pending_len.min(owed);
        if owed <= self.pending_len || (used == 0 && made == 0) {
            self.finished = true;
        }
        trace!(used, made, owed, "Flushed resampler tail");
        Ok(())
    }
}

impl Resample for RubatoResampler {
    fn process(
        &mut self,
        factor: f64,
        input: &[f32],
        last: bool,
        output: &mut [f32],
    ) -> Result<(usize, usize)> {
        let factor = factor.max(self.min_factor).min(self.max_factor);
        if factor != self.ratio {
            // Nothing has been converted yet, so jump straight to the first ratio
            let ramp = self.expected > 0.0 || self.input_len > 0;
            self.engine.set_ratio(factor, ramp)?;
            self.ratio = factor;
        }

        let mut consumed = 0;
        let mut produced = 0;

        loop {
            produced += self.drain_pending(&mut output[produced..]);
            if produced == output.len() {
                break;
            }

            let need = self.engine.input_frames_next();
            if self.input_len < need && consumed < input.len() {
                let take = (need - self.input_len).min(input.len() - consumed);
                self.input[self.input_len..self.input_len + take]
                    .copy_from_slice(&input[consumed..consumed + take]);
                self.input_len += take;
                consumed += take;
                self.finished = false;
            }

            if self.input_len >= need {
                let (used, made) = self
                    .engine
                    .process(&self.input[..need], &mut self.pending)?;
                self.input.copy_within(used..self.input_len, 0);
                self.input_len -= used;
                self.expected += used as f64 * self.ratio;
                self.stage(made);
            } else if last && consumed == input.len() && !self.finished {
                self.finish_stream()?;
            } else {
                break;
            }
        }

        Ok((consumed, produced))
    }

    fn reset(&mut self) {
        self.engine.reset();
        if let Err(err) = self.engine.set_ratio(self.initial_ratio, false) {
            warn!(error = %err, "Failed to restore initial resample ratio");
        }
        self.ratio = self.initial_ratio;
        self.input_len = 0;
        self.pending_start = 0;
        self.pending_len = 0;
        self.skip = self.engine.output_delay();
        self.expected = 0.0;
        self.emitted = 0;
        self.finished = false;
    }
}

impl fmt::Debug for RubatoResampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RubatoResampler")
            .field("high_quality", &self.high_quality)
            .field("min_factor", &self.min_factor)
            .field("max_factor", &self.max_factor)
            .field("ratio", &self.ratio)
            .finish()
    }
}

/// Creates [`RubatoResampler`]s for the mixer
#[derive(Debug, Clone, Copy)]
pub struct RubatoResamplerFactory {
    chunk_size: usize,
}

impl RubatoResamplerFactory {
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }
}

impl Default for RubatoResamplerFactory {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl ResamplerFactory for RubatoResamplerFactory {
    fn make(&self, high_quality: bool, min_factor: f64, max_factor: f64) -> Result<Box<dyn Resample>> {
        Ok(Box::new(RubatoResampler::new(
            high_quality,
            min_factor,
            max_factor,
            self.chunk_size,
        )?))
    }
}
