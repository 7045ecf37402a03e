//! Output sample formats and float-to-format conversion
//!
//! The mixer accumulates in `f32` and converts once per block into the
//! caller's format. Integer formats can be dithered; the noise source is a
//! seeded RNG so that a restarted mixer reproduces its output exactly.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const DITHER_SEED: u64 = 0x6d69_7864_6f77_6e21;

/// Supported output sample formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    Int16,
    /// 24-bit integer samples, stored widened in an `i32`
    Int24,
    #[default]
    Float,
}

impl SampleFormat {
    /// Size of one sample once packed for a PCM stream
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::Int16 => 2,
            SampleFormat::Int24 => 3,
            SampleFormat::Float => 4,
        }
    }

    /// Full-scale magnitude of the integer formats
    fn scale(self) -> f32 {
        match self {
            SampleFormat::Int16 => 32768.0,
            SampleFormat::Int24 => 8_388_608.0,
            SampleFormat::Float => 1.0,
        }
    }
}

/// Noise added before quantizing to an integer format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DitherType {
    /// Plain rounding
    #[default]
    None,
    /// Uniform noise of one LSB peak-to-peak
    Rectangle,
    /// Triangular (TPDF) noise of two LSB peak-to-peak
    Triangle,
}

impl DitherType {
    /// Dither used by the mixer for a given quality setting
    pub fn for_quality(high_quality: bool) -> Self {
        if high_quality {
            DitherType::Triangle
        } else {
            DitherType::None
        }
    }
}

/// Owned output storage in one sample format
#[derive(Debug, Clone, PartialEq)]
pub enum SampleBuffer {
    Int16(Vec<i16>),
    Int24(Vec<i32>),
    Float(Vec<f32>),
}

impl SampleBuffer {
    /// Allocate a zeroed buffer of `len` samples
    pub fn new(format: SampleFormat, len: usize) -> Self {
        match format {
            SampleFormat::Int16 => SampleBuffer::Int16(vec![0; len]),
            SampleFormat::Int24 => SampleBuffer::Int24(vec![0; len]),
            SampleFormat::Float => SampleBuffer::Float(vec![0.0; len]),
        }
    }

    pub fn format(&self) -> SampleFormat {
        match self {
            SampleBuffer::Int16(_) => SampleFormat::Int16,
            SampleBuffer::Int24(_) => SampleFormat::Int24,
            SampleBuffer::Float(_) => SampleFormat::Float,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SampleBuffer::Int16(b) => b.len(),
            SampleBuffer::Int24(b) => b.len(),
            SampleBuffer::Float(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow the first `len` samples
    pub fn slice(&self, len: usize) -> SampleSlice<'_> {
        match self {
            SampleBuffer::Int16(b) => SampleSlice::Int16(&b[..len.min(b.len())]),
            SampleBuffer::Int24(b) => SampleSlice::Int24(&b[..len.min(b.len())]),
            SampleBuffer::Float(b) => SampleSlice::Float(&b[..len.min(b.len())]),
        }
    }
}

/// Borrowed view of converted samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleSlice<'a> {
    Int16(&'a [i16]),
    Int24(&'a [i32]),
    Float(&'a [f32]),
}

impl<'a> SampleSlice<'a> {
    pub fn format(&self) -> SampleFormat {
        match self {
            SampleSlice::Int16(_) => SampleFormat::Int16,
            SampleSlice::Int24(_) => SampleFormat::Int24,
            SampleSlice::Float(_) => SampleFormat::Float,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SampleSlice::Int16(b) => b.len(),
            SampleSlice::Int24(b) => b.len(),
            SampleSlice::Float(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The samples as floats, when the format is `Float`
    pub fn as_f32(&self) -> Option<&'a [f32]> {
        match *self {
            SampleSlice::Float(b) => Some(b),
            _ => None,
        }
    }

    /// Sample `index` normalized back to `[-1.0, 1.0]`
    pub fn get(&self, index: usize) -> Option<f32> {
        let scale = self.format().scale();
        match self {
            SampleSlice::Int16(b) => b.get(index).map(|&s| s as f32 / scale),
            SampleSlice::Int24(b) => b.get(index).map(|&s| s as f32 / scale),
            SampleSlice::Float(b) => b.get(index).copied(),
        }
    }

    /// Append the samples as little-endian packed PCM
    pub fn extend_le_bytes(&self, out: &mut Vec<u8>) {
        match self {
            SampleSlice::Int16(b) => b.iter().for_each(|s| out.extend_from_slice(&s.to_le_bytes())),
            SampleSlice::Int24(b) => b
                .iter()
                .for_each(|s| out.extend_from_slice(&s.to_le_bytes()[..3])),
            SampleSlice::Float(b) => b.iter().for_each(|s| out.extend_from_slice(&s.to_le_bytes())),
        }
    }

    /// Append sample `index` as little-endian packed PCM; `false` if out of range
    pub fn push_le_bytes(&self, index: usize, out: &mut Vec<u8>) -> bool {
        match self {
            SampleSlice::Int16(b) => b.get(index).map(|s| out.extend_from_slice(&s.to_le_bytes())),
            SampleSlice::Int24(b) => b
                .get(index)
                .map(|s| out.extend_from_slice(&s.to_le_bytes()[..3])),
            SampleSlice::Float(b) => b.get(index).map(|s| out.extend_from_slice(&s.to_le_bytes())),
        }
        .is_some()
    }
}

/// Converts float runs into a [`SampleBuffer`], adding dither noise
#[derive(Debug, Clone)]
pub struct Ditherer {
    dither: DitherType,
    rng: StdRng,
}

impl Ditherer {
    pub fn new(dither: DitherType) -> Self {
        Self {
            dither,
            rng: StdRng::seed_from_u64(DITHER_SEED),
        }
    }

    pub fn dither(&self) -> DitherType {
        self.dither
    }

    /// Rewind the noise sequence
    pub fn reset(&mut self) {
        self.rng = StdRng::seed_from_u64(DITHER_SEED);
    }

    /// Convert `src` into the start of `dest`
    ///
    /// Converts `min(src.len(), dest.len())` samples. Float output is copied
    /// untouched; integer output is scaled, dithered, rounded and clipped.
    pub fn convert(&mut self, src: &[f32], dest: &mut SampleBuffer) -> usize {
        let len = src.len().min(dest.len());
        match dest {
            SampleBuffer::Float(out) => out[..len].copy_from_slice(&src[..len]),
            SampleBuffer::Int16(out) => {
                for (o, &s) in out[..len].iter_mut().zip(src) {
                    *o = self.quantize(s, SampleFormat::Int16) as i16;
                }
            }
            SampleBuffer::Int24(out) => {
                for (o, &s) in out[..len].iter_mut().zip(src) {
                    *o = self.quantize(s, SampleFormat::Int24);
                }
            }
        }
        len
    }

    #[inline]
    fn quantize(&mut self, sample: f32, format: SampleFormat) -> i32 {
        let scale = format.scale();
        let noise = match self.dither {
            DitherType::None => 0.0,
            DitherType::Rectangle => self.rng.gen::<f32>() - 0.5,
            DitherType::Triangle => self.rng.gen::<f32>() - self.rng.gen::<f32>(),
        };
        let value = (sample * scale + noise).round();
        value.clamp(-scale, scale - 1.0) as i32
    }
}
