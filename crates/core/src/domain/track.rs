//! Track sources and the per-track read adapter
//!
//! The mixer never owns or mutates track data. It holds shared handles
//! ([`SharedTrack`]) and pulls samples through a [`TrackCache`], which is also
//! where the "silence instead of failure" policy for real-time callers lives.

use crate::domain::audio::{self, ChannelPlacement, MixError, Result, TrackError};
use crate::domain::envelope::Envelope;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// A mono source of audio samples at a fixed native rate
///
/// Sample positions are absolute: position `n` is the sample at time
/// `n / rate()`, regardless of where the track's audio starts.
pub trait SampleTrack: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Native sample rate in Hz
    fn rate(&self) -> f64;

    /// Time of the first sample, in seconds
    fn start_time(&self) -> f64;

    /// Time just past the last sample, in seconds
    fn end_time(&self) -> f64;

    /// Default routing when the mixer has no explicit matrix
    fn placement(&self) -> ChannelPlacement {
        ChannelPlacement::Mono
    }

    /// Linear gain applied when this track feeds output `channel`
    fn channel_gain(&self, _channel: usize) -> f32 {
        1.0
    }

    /// Per-sample gain envelope starting at `t0`, one value every `tstep` seconds
    fn envelope_values(&self, out: &mut [f32], _t0: f64, _tstep: f64) {
        out.fill(1.0);
    }

    /// Fill `dest` with the samples starting at absolute position `start`
    ///
    /// Positions outside the track's extent read as silence.
    fn get_floats(&self, dest: &mut [f32], start: i64) -> std::result::Result<(), TrackError>;

    /// Nearest sample position for time `t`
    fn time_to_samples(&self, t: f64) -> i64 {
        audio::time_to_samples(t, self.rate())
    }
}

/// Shared, immutable handle to a track
pub type SharedTrack = Arc<dyn SampleTrack>;

/// In-memory mono track
#[derive(Debug, Clone)]
pub struct MemoryTrack {
    name: String,
    rate: f64,
    offset: f64,
    samples: Arc<[f32]>,
    gain: f32,
    pan: f32,
    placement: ChannelPlacement,
    envelope: Option<Envelope>,
}

impl MemoryTrack {
    pub fn new(name: impl Into<String>, rate: f64, samples: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            rate,
            offset: 0.0,
            samples: samples.into(),
            gain: 1.0,
            pan: 0.0,
            placement: ChannelPlacement::Mono,
            envelope: None,
        }
    }

    /// Start the audio at `offset` seconds instead of zero
    #[must_use]
    pub fn with_offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }

    #[must_use]
    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    /// Pan in `[-1.0, 1.0]`, negative favours even channels
    #[must_use]
    pub fn with_pan(mut self, pan: f32) -> Self {
        self.pan = pan.clamp(-1.0, 1.0);
        self
    }

    #[must_use]
    pub fn with_placement(mut self, placement: ChannelPlacement) -> Self {
        self.placement = placement;
        self
    }

    /// Attach a gain envelope, in track time
    #[must_use]
    pub fn with_envelope(mut self, envelope: Envelope) -> Self {
        self.envelope = Some(envelope);
        self
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn into_shared(self) -> SharedTrack {
        Arc::new(self)
    }

    fn first_sample(&self) -> i64 {
        audio::time_to_samples(self.offset, self.rate)
    }
}

impl SampleTrack for MemoryTrack {
    fn name(&self) -> &str {
        &self.name
    }

    fn rate(&self) -> f64 {
        self.rate
    }

    fn start_time(&self) -> f64 {
        self.offset
    }

    fn end_time(&self) -> f64 {
        self.offset + self.samples.len() as f64 / self.rate
    }

    fn placement(&self) -> ChannelPlacement {
        self.placement
    }

    fn channel_gain(&self, channel: usize) -> f32 {
        let (left, right) = if self.pan < 0.0 {
            (1.0, 1.0 + self.pan)
        } else {
            (1.0 - self.pan, 1.0)
        };
        if channel % 2 == 0 {
            left * self.gain
        } else {
            right * self.gain
        }
    }

    fn envelope_values(&self, out: &mut [f32], t0: f64, tstep: f64) {
        match &self.envelope {
            Some(envelope) => envelope.values(out, t0, tstep),
            None => out.fill(1.0),
        }
    }

    fn get_floats(&self, dest: &mut [f32], start: i64) -> std::result::Result<(), TrackError> {
        let first = self.first_sample();
        let len = self.samples.len() as i64;

        for (i, slot) in dest.iter_mut().enumerate() {
            let rel = start.saturating_add(i as i64).saturating_sub(first);
            *slot = if (0..len).contains(&rel) {
                self.samples[rel as usize]
            } else {
                0.0
            };
        }
        Ok(())
    }
}

/// Per-track read adapter owned by the mixer
///
/// Reads are split on block boundaries (multiples of `block_len` samples) so a
/// storage failure only silences the blocks it actually touches.
#[derive(Debug)]
pub struct TrackCache {
    track: SharedTrack,
    block_len: usize,
    failing: bool,
}

impl TrackCache {
    pub fn new(track: SharedTrack, block_len: usize) -> Self {
        Self {
            track,
            block_len: block_len.max(1),
            failing: false,
        }
    }

    pub fn track(&self) -> &SharedTrack {
        &self.track
    }

    /// Fill `dest` from absolute sample position `start`
    ///
    /// With `may_throw` unset a failed block is replaced by silence and the
    /// call succeeds; with it set the first failure is returned.
    pub fn get_floats(&mut self, dest: &mut [f32], start: i64, may_throw: bool) -> Result<()> {
        let block_len = self.block_len as i64;
        let mut done = 0usize;

        while done < dest.len() {
            let pos = start + done as i64;
            let rest = dest.len() - done;
            // The last block before the integer limit has no end to align to
            let n = pos
                .div_euclid(block_len)
                .checked_add(1)
                .and_then(|block| block.checked_mul(block_len))
                .map_or(rest, |block_end| rest.min((block_end - pos) as usize));
            let chunk = &mut dest[done..done + n];

            match self.track.get_floats(chunk, pos) {
                Ok(()) => {
                    if self.failing {
                        debug!(track = self.track.name(), position = pos, "Track reads recovered");
                        self.failing = false;
                    }
                }
                Err(source) if may_throw => {
                    return Err(MixError::TrackRead {
                        track: self.track.name().to_string(),
                        source,
                    });
                }
                Err(err) => {
                    chunk.fill(0.0);
                    if !self.failing {
                        warn!(
                            track = self.track.name(),
                            position = pos,
                            error = %err,
                            "Track read failed, substituting silence"
                        );
                        self.failing = true;
                    }
                }
            }

            done += n;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::envelope::BoundedEnvelope;
    use std::ops::Range;

    /// Track whose reads fail whenever they touch `bad`
    #[derive(Debug)]
    struct FlakyTrack {
        inner: MemoryTrack,
        bad: Range<i64>,
    }

    impl SampleTrack for FlakyTrack {
        fn name(&self) -> &str {
            self.inner.name()
        }
        fn rate(&self) -> f64 {
            self.inner.rate()
        }
        fn start_time(&self) -> f64 {
            self.inner.start_time()
        }
        fn end_time(&self) -> f64 {
            self.inner.end_time()
        }
        fn get_floats(&self, dest: &mut [f32], start: i64) -> std::result::Result<(), TrackError> {
            let end = start + dest.len() as i64;
            if start < self.bad.end && end > self.bad.start {
                return Err(TrackError::Unavailable { start, end });
            }
            self.inner.get_floats(dest, start)
        }
    }

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| i as f32).collect()
    }

    #[test]
    fn test_memory_track_extent() {
        let track = MemoryTrack::new("ramp", 100.0, ramp(50)).with_offset(1.0);

        assert_eq!(track.start_time(), 1.0);
        assert!((track.end_time() - 1.5).abs() < 1e-12);
        assert_eq!(track.time_to_samples(1.0), 100);
    }

    #[test]
    fn test_memory_track_reads_outside_are_silent() {
        let track = MemoryTrack::new("ramp", 100.0, ramp(4)).with_offset(0.02);
        let mut dest = [9.0f32; 8];
        track.get_floats(&mut dest, 0).unwrap();

        assert_eq!(dest, [0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 0.0, 0.0]);
    }

    #[test]
    fn test_channel_gain_with_pan() {
        let track = MemoryTrack::new("t", 100.0, vec![]).with_gain(0.5).with_pan(0.5);
        assert!((track.channel_gain(0) - 0.25).abs() < 1e-6);
        assert!((track.channel_gain(1) - 0.5).abs() < 1e-6);

        let track = MemoryTrack::new("t", 100.0, vec![]).with_pan(-1.0);
        assert_eq!(track.channel_gain(0), 1.0);
        assert_eq!(track.channel_gain(1), 0.0);
    }

    #[test]
    fn test_envelope_values_default_and_custom() {
        let plain = MemoryTrack::new("t", 100.0, vec![0.0; 4]);
        let mut out = [0.0f32; 3];
        plain.envelope_values(&mut out, 0.0, 0.01);
        assert_eq!(out, [1.0; 3]);

        let env = Envelope::new(0.0, 1.0, 1.0).with_point(0.0, 0.0).with_point(1.0, 1.0);
        assert_eq!(env.range_upper(), 1.0);
        let shaped = plain.with_envelope(env);
        shaped.envelope_values(&mut out, 0.0, 0.5);
        assert_eq!(out, [0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_cache_substitutes_silence_per_block() {
        let track: SharedTrack = Arc::new(FlakyTrack {
            inner: MemoryTrack::new("flaky", 100.0, vec![1.0; 16]),
            bad: 8..12,
        });
        let mut cache = TrackCache::new(track, 4);
        let mut dest = [0.0f32; 16];

        cache.get_floats(&mut dest, 0, false).unwrap();

        assert!(dest[..8].iter().all(|&s| s == 1.0));
        assert!(dest[8..12].iter().all(|&s| s == 0.0));
        assert!(dest[12..].iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_cache_propagates_when_allowed() {
        let track: SharedTrack = Arc::new(FlakyTrack {
            inner: MemoryTrack::new("flaky", 100.0, vec![1.0; 16]),
            bad: 0..1,
        });
        let mut cache = TrackCache::new(track, 4);
        let mut dest = [0.0f32; 4];

        let err = cache.get_floats(&mut dest, 0, true).unwrap_err();
        assert!(matches!(err, MixError::TrackRead { ref track, .. } if track == "flaky"));
    }

    #[test]
    fn test_cache_blocks_align_to_absolute_positions() {
        let track: SharedTrack = Arc::new(FlakyTrack {
            inner: MemoryTrack::new("flaky", 100.0, vec![1.0; 32]),
            bad: 10..11,
        });
        let mut cache = TrackCache::new(track, 8);
        let mut dest = [0.0f32; 12];

        // Reads [6, 18): blocks [6, 8), [8, 16), [16, 18)
        cache.get_floats(&mut dest, 6, false).unwrap();

        assert_eq!(&dest[..2], &[1.0, 1.0]);
        assert!(dest[2..10].iter().all(|&s| s == 0.0));
        assert_eq!(&dest[10..], &[1.0, 1.0]);
    }

    #[test]
    fn test_cache_reads_at_integer_limit() {
        let track = MemoryTrack::new("ramp", 100.0, ramp(16)).into_shared();
        let mut dest = [9.0f32; 2];

        TrackCache::new(track.clone(), 8)
            .get_floats(&mut dest, i64::MAX - 2, false)
            .unwrap();
        assert_eq!(dest, [0.0, 0.0]);

        dest = [9.0; 2];
        TrackCache::new(track, 1)
            .get_floats(&mut dest, i64::MAX - 1, false)
            .unwrap();
        assert_eq!(dest, [0.0, 0.0]);
    }
}
