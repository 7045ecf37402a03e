//! Real-time multi-track mixer
//!
//! The [`Mixer`] pulls samples from any number of mono tracks, each at its own
//! native rate, brings them to one output rate (optionally under a time warp
//! or a runtime playback speed), applies per-track gains and routing, and
//! produces fixed-size blocks of output in the caller's sample format.
//!
//! Playback runs from `t0` towards `t1`; when `t1 < t0` it runs backwards and
//! samples come out in reverse order.

mod queue;
pub mod spec;

use self::queue::SampleQueue;
use self::spec::MixerSpec;
use crate::domain::audio::{MixError, Result};
use crate::domain::envelope::BoundedEnvelope;
use crate::domain::format::{DitherType, Ditherer, SampleBuffer, SampleFormat, SampleSlice};
use crate::domain::resample::{LinearResamplerFactory, Resample, ResamplerFactory};
use crate::domain::track::{SharedTrack, TrackCache};
use crate::domain::warp::WarpOptions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Samples of lookahead kept per resampled track
pub const DEFAULT_QUEUE_MAX_LEN: usize = 65536;

/// Samples handed to a resampler per call
pub const DEFAULT_PROCESS_LEN: usize = 1024;

/// Samples per track read block
pub const DEFAULT_READ_BLOCK_LEN: usize = 4096;

/// How several tracks feeding one channel are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownmixPolicy {
    /// Plain sum; loud material can exceed full scale
    #[default]
    Sum,
    /// Sum divided by the number of tracks routed to the channel
    Average,
}

/// Output and processing parameters of a mixer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerSettings {
    /// Number of output channels
    pub channels: usize,
    /// Maximum frames produced per `process` call
    pub buffer_size: usize,
    /// One interleaved output buffer instead of one per channel
    pub interleaved: bool,
    /// Output sample rate in Hz
    pub rate: f64,
    pub format: SampleFormat,
    /// Sinc resampling and triangle dither instead of cubic and none
    pub high_quality: bool,
    pub apply_track_gains: bool,
    /// Propagate track read failures instead of substituting silence
    pub may_throw: bool,
    pub downmix: DownmixPolicy,
    pub queue_max_len: usize,
    pub process_len: usize,
    pub read_block_len: usize,
}

impl Default for MixerSettings {
    fn default() -> Self {
        Self {
            channels: 2,
            buffer_size: 4096,
            interleaved: true,
            rate: 44100.0,
            format: SampleFormat::Float,
            high_quality: true,
            apply_track_gains: true,
            may_throw: false,
            downmix: DownmixPolicy::Sum,
            queue_max_len: DEFAULT_QUEUE_MAX_LEN,
            process_len: DEFAULT_PROCESS_LEN,
            read_block_len: DEFAULT_READ_BLOCK_LEN,
        }
    }
}

impl MixerSettings {
    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            return Err(invalid("output needs at least one channel"));
        }
        if self.buffer_size == 0 {
            return Err(invalid("buffer size must be positive"));
        }
        if !(self.rate.is_finite() && self.rate > 0.0) {
            return Err(invalid(format!("output rate {} must be positive", self.rate)));
        }
        if self.process_len < 2 {
            return Err(invalid("resample block length must be at least 2"));
        }
        if self.queue_max_len < self.process_len {
            return Err(invalid(format!(
                "queue length {} is shorter than the resample block length {}",
                self.queue_max_len, self.process_len
            )));
        }
        if self.read_block_len == 0 {
            return Err(invalid("read block length must be positive"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> MixError {
    MixError::InvalidConfiguration(message.into())
}

/// Collects everything a [`Mixer`] needs before it is built
pub struct MixerBuilder {
    tracks: Vec<SharedTrack>,
    start: f64,
    stop: f64,
    warp: WarpOptions,
    settings: MixerSettings,
    mixer_spec: Option<MixerSpec>,
    factory: Arc<dyn ResamplerFactory>,
}

impl MixerBuilder {
    /// Mix `tracks` over the window `[start, stop]`, backwards if `stop < start`
    pub fn new(tracks: Vec<SharedTrack>, start: f64, stop: f64) -> Self {
        Self {
            tracks,
            start,
            stop,
            warp: WarpOptions::default(),
            settings: MixerSettings::default(),
            mixer_spec: None,
            factory: Arc::new(LinearResamplerFactory),
        }
    }

    #[must_use]
    pub fn warp(mut self, warp: WarpOptions) -> Self {
        self.warp = warp;
        self
    }

    #[must_use]
    pub fn settings(mut self, settings: MixerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Explicit routing; its shape must match the tracks and output channels
    #[must_use]
    pub fn mixer_spec(mut self, spec: MixerSpec) -> Self {
        self.mixer_spec = Some(spec);
        self
    }

    #[must_use]
    pub fn resampler_factory(mut self, factory: Arc<dyn ResamplerFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn build(self) -> Result<Mixer> {
        Mixer::new(self)
    }
}

impl fmt::Debug for MixerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MixerBuilder")
            .field("tracks", &self.tracks.len())
            .field("start", &self.start)
            .field("stop", &self.stop)
            .field("warp", &self.warp)
            .field("settings", &self.settings)
            .field("mixer_spec", &self.mixer_spec)
            .finish()
    }
}

/// Runtime state of one input track
struct TrackState {
    cache: TrackCache,
    rate: f64,
    /// Next absolute sample position to read
    position: i64,
    queue: SampleQueue,
    resampler: Option<Box<dyn Resample>>,
    min_factor: f64,
    max_factor: f64,
    /// Output channels this track feeds
    routes: Vec<bool>,
}

/// Pull-based multi-track mixer
///
/// All buffers are sized at construction; `process` does not allocate.
pub struct Mixer {
    tracks: Vec<TrackState>,
    settings: MixerSettings,
    warp: Option<Arc<dyn BoundedEnvelope>>,
    variable_rates: bool,
    /// End of the last track, in seconds
    span_end: f64,
    t0: f64,
    t1: f64,
    time: f64,
    speed: f64,
    /// Float accumulation, one buffer per output buffer
    temp: Vec<Vec<f32>>,
    /// One track's contribution to the current block
    float_buffer: Vec<f32>,
    env_values: Vec<f32>,
    channel_scale: Vec<f32>,
    output: Vec<SampleBuffer>,
    ditherer: Ditherer,
    last_out: usize,
}

impl Mixer {
    pub fn builder(tracks: Vec<SharedTrack>, start: f64, stop: f64) -> MixerBuilder {
        MixerBuilder::new(tracks, start, stop)
    }

    fn new(builder: MixerBuilder) -> Result<Self> {
        let MixerBuilder {
            tracks,
            start,
            stop,
            warp,
            settings,
            mixer_spec,
            factory,
        } = builder;

        settings.validate()?;
        if start.is_nan() || stop.is_nan() {
            return Err(invalid("playback window must not be NaN"));
        }
        if let Some(track) = tracks.iter().find(|t| !(t.rate().is_finite() && t.rate() > 0.0)) {
            return Err(invalid(format!(
                "track '{}' has invalid rate {}",
                track.name(),
                track.rate()
            )));
        }
        if let Some(spec) = &mixer_spec {
            if spec.num_tracks() != tracks.len() || spec.num_channels() != settings.channels {
                return Err(invalid(format!(
                    "mixer spec routes {} tracks to {} channels, mixer has {} tracks and {} channels",
                    spec.num_tracks(),
                    spec.num_channels(),
                    tracks.len(),
                    settings.channels
                )));
            }
        }

        let envelope = warp.envelope().cloned();
        if let Some(envelope) = &envelope {
            let (lower, upper) = (envelope.range_lower(), envelope.range_upper());
            if !(lower > 0.0 && lower <= upper && upper.is_finite()) {
                return Err(invalid(format!(
                    "warp envelope range [{lower}, {upper}] must be positive and ordered"
                )));
            }
        }
        let speed_range = warp.speed_range();
        let variable_rates = envelope.is_some() || speed_range.is_some();
        let channels = settings.channels;
        let span_end = tracks
            .iter()
            .map(|t| t.end_time())
            .fold(f64::NEG_INFINITY, f64::max);
        let cursor_start = cursor_time(start, stop < start, span_end);

        let mut states = Vec::with_capacity(tracks.len());
        for (index, track) in tracks.into_iter().enumerate() {
            let rate = track.rate();
            let factor = settings.rate / rate;
            let (min_factor, max_factor) = match (&envelope, speed_range) {
                (Some(envelope), _) => (
                    factor / envelope.range_upper(),
                    factor / envelope.range_lower(),
                ),
                (None, Some((min_speed, max_speed))) => (factor / max_speed, factor / min_speed),
                (None, None) => (factor, factor),
            };

            let needs_resampler = variable_rates || rate != settings.rate;
            let resampler = if needs_resampler {
                Some(factory.make(settings.high_quality, min_factor, max_factor)?)
            } else {
                None
            };
            let queue = SampleQueue::new(if needs_resampler {
                settings.queue_max_len
            } else {
                0
            });

            let routes = (0..channels)
                .map(|channel| match &mixer_spec {
                    Some(spec) => spec.is_routed(index, channel),
                    None => track.placement().feeds(channel, channels),
                })
                .collect();

            states.push(TrackState {
                position: track.time_to_samples(cursor_start),
                cache: TrackCache::new(track, settings.read_block_len),
                rate,
                queue,
                resampler,
                min_factor,
                max_factor,
                routes,
            });
        }

        let channel_scale = (0..channels)
            .map(|channel| match settings.downmix {
                DownmixPolicy::Sum => 1.0,
                DownmixPolicy::Average => {
                    let feeding = states.iter().filter(|s| s.routes[channel]).count();
                    1.0 / feeding.max(1) as f32
                }
            })
            .collect();

        let (num_buffers, buffer_len) = if settings.interleaved {
            (1, settings.buffer_size * channels)
        } else {
            (channels, settings.buffer_size)
        };

        debug!(
            tracks = states.len(),
            channels,
            rate = settings.rate,
            start,
            stop,
            variable_rates,
            resamplers = states.iter().filter(|s| s.resampler.is_some()).count(),
            "Mixer created"
        );

        Ok(Self {
            tracks: states,
            warp: envelope,
            variable_rates,
            span_end,
            t0: start,
            t1: stop,
            time: start,
            speed: warp.initial_speed(),
            temp: vec![vec![0.0; buffer_len]; num_buffers],
            float_buffer: vec![0.0; settings.buffer_size],
            env_values: vec![0.0; settings.buffer_size.max(settings.queue_max_len)],
            channel_scale,
            output: (0..num_buffers)
                .map(|_| SampleBuffer::new(settings.format, buffer_len))
                .collect(),
            ditherer: Ditherer::new(DitherType::for_quality(settings.high_quality)),
            last_out: 0,
            settings,
        })
    }

    /// Mix the next block of at most `max_samples` frames
    ///
    /// Returns the number of frames now available through [`Mixer::buffer`]
    /// and [`Mixer::channel_buffer`]; zero means playback reached the end of
    /// the window.
    pub fn process(&mut self, max_samples: usize) -> Result<usize> {
        let max_out = max_samples.min(self.settings.buffer_size);
        let stride = self.stride();
        for buffer in &mut self.temp {
            buffer[..max_out * stride].fill(0.0);
        }

        let backwards = self.is_backwards();
        let mut out = 0;
        for index in 0..self.tracks.len() {
            let produced = if self.tracks[index].resampler.is_some() {
                self.mix_variable_rates(index, max_out)?
            } else {
                self.mix_same_rate(index, max_out)?
            };
            self.accumulate(index, produced);
            out = out.max(produced);

            let state = &self.tracks[index];
            let t = state.position as f64 / state.rate;
            self.time = if backwards {
                t.min(self.time).max(self.t1)
            } else {
                t.max(self.time).min(self.t1)
            };
        }

        for (temp, output) in self.temp.iter().zip(self.output.iter_mut()) {
            self.ditherer.convert(&temp[..out * stride], output);
        }
        self.last_out = out;

        trace!(frames = out, time = self.time, "Mixed block");
        Ok(out)
    }

    /// Seek back to the start of the window and forget all history
    pub fn restart(&mut self) {
        self.time = self.t0;
        let t = cursor_time(self.t0, self.is_backwards(), self.span_end);
        for state in &mut self.tracks {
            state.position = state.cache.track().time_to_samples(t);
            state.queue.clear();
            if let Some(resampler) = state.resampler.as_mut() {
                resampler.reset();
            }
        }
        self.ditherer.reset();
        self.last_out = 0;
        debug!(t0 = self.t0, "Mixer restarted");
    }

    /// Move the playback position to `t`, clamped into the window
    ///
    /// `skipping` marks a discontinuity: resampler history is dropped too.
    pub fn reposition(&mut self, t: f64, skipping: bool) {
        self.time = if self.is_backwards() {
            t.min(self.t0).max(self.t1)
        } else {
            t.min(self.t1).max(self.t0)
        };

        let t = cursor_time(self.time, self.is_backwards(), self.span_end);
        for state in &mut self.tracks {
            state.position = state.cache.track().time_to_samples(t);
            state.queue.clear();
            if skipping {
                if let Some(resampler) = state.resampler.as_mut() {
                    resampler.reset();
                }
            }
        }
        debug!(time = self.time, skipping, "Mixer repositioned");
    }

    /// Replace the window and speed, then reposition to the new `t0`
    pub fn set_times_and_speed(&mut self, t0: f64, t1: f64, speed: f64, skipping: bool) -> Result<()> {
        check_speed(speed)?;
        if t0.is_nan() || t1.is_nan() {
            return Err(invalid("playback window must not be NaN"));
        }

        self.t0 = t0;
        self.t1 = t1;
        self.speed = speed.abs();
        debug!(t0, t1, speed = self.speed, "Mixer window and speed changed");
        self.reposition(t0, skipping);
        Ok(())
    }

    /// Change speed, flipping direction around `start_time` when its sign changes
    ///
    /// A direction change replaces the window with an unbounded one in the new
    /// direction. A later [`Mixer::restart`] towards the open bound starts
    /// from the end of the last track.
    pub fn set_speed_for_keyboard_scrubbing(&mut self, speed: f64, start_time: f64) -> Result<()> {
        check_speed(speed)?;

        if (speed > 0.0 && self.t1 < self.t0) || (speed < 0.0 && self.t1 > self.t0) {
            if speed > 0.0 {
                self.t0 = 0.0;
                self.t1 = f64::MAX;
            } else {
                self.t0 = f64::MAX;
                self.t1 = 0.0;
            }
            debug!(speed, start_time, "Scrub direction changed");
            self.reposition(start_time, true);
        }

        self.speed = speed.abs();
        Ok(())
    }

    /// Current playback time in seconds
    pub fn mix_get_current_time(&self) -> f64 {
        self.time
    }

    /// Output of the last `process` call in the first buffer
    ///
    /// For interleaved output this holds every channel.
    pub fn buffer(&self) -> SampleSlice<'_> {
        self.output[0].slice(self.last_out * self.stride())
    }

    /// Output of the last `process` call in buffer `channel`
    ///
    /// Interleaved output only has buffer 0.
    pub fn channel_buffer(&self, channel: usize) -> Option<SampleSlice<'_>> {
        let len = self.last_out * self.stride();
        self.output.get(channel).map(|buffer| buffer.slice(len))
    }

    pub fn num_buffers(&self) -> usize {
        self.output.len()
    }

    pub fn num_channels(&self) -> usize {
        self.settings.channels
    }

    pub fn num_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn rate(&self) -> f64 {
        self.settings.rate
    }

    pub fn format(&self) -> SampleFormat {
        self.settings.format
    }

    pub fn buffer_size(&self) -> usize {
        self.settings.buffer_size
    }

    pub fn settings(&self) -> &MixerSettings {
        &self.settings
    }

    /// Whether every track goes through a resampler to follow a warp or speed
    pub fn is_variable_rate(&self) -> bool {
        self.variable_rates
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Current `(t0, t1)` window
    pub fn window(&self) -> (f64, f64) {
        (self.t0, self.t1)
    }

    fn is_backwards(&self) -> bool {
        self.t1 < self.t0
    }

    fn stride(&self) -> usize {
        if self.settings.interleaved {
            self.settings.channels
        } else {
            1
        }
    }

    /// Copy a track at the output rate straight into `float_buffer`
    fn mix_same_rate(&mut self, index: usize, max_out: usize) -> Result<usize> {
        let backwards = self.is_backwards();
        let may_throw = self.settings.may_throw;
        let t1 = self.t1;
        let state = &mut self.tracks[index];
        let rate = state.rate;

        let t = state.position as f64 / rate;
        let t_end = {
            let track = state.cache.track();
            if backwards {
                track.start_time().max(t1)
            } else {
                track.end_time().min(t1)
            }
        };
        if (backwards && t <= t_end) || (!backwards && t >= t_end) {
            return Ok(0);
        }

        let remaining = if backwards { t - t_end } else { t_end - t };
        let len = max_out.min((remaining * rate + 0.5) as usize);
        if len == 0 {
            return Ok(0);
        }

        let buffer = &mut self.float_buffer[..len];
        let env = &mut self.env_values[..len];
        let first = if backwards {
            state.position - (len as i64 - 1)
        } else {
            state.position
        };

        state.cache.get_floats(buffer, first, may_throw)?;
        state
            .cache
            .track()
            .envelope_values(env, first as f64 / rate, 1.0 / rate);
        for (sample, gain) in buffer.iter_mut().zip(env.iter()) {
            *sample *= gain;
        }

        if backwards {
            buffer.reverse();
            state.position -= len as i64;
        } else {
            state.position += len as i64;
        }
        Ok(len)
    }

    /// Run a track through its resampler into `float_buffer`
    fn mix_variable_rates(&mut self, index: usize, max_out: usize) -> Result<usize> {
        let backwards = self.is_backwards();
        let may_throw = self.settings.may_throw;
        let process_len = self.settings.process_len;
        let out_rate = self.settings.rate;
        let speed = self.speed;
        let t1 = self.t1;
        let warp = self.warp.as_deref();

        let TrackState {
            cache,
            rate,
            position,
            queue,
            resampler,
            min_factor,
            max_factor,
            ..
        } = &mut self.tracks[index];
        let rate = *rate;
        let tstep = 1.0 / rate;
        let Some(resampler) = resampler.as_mut() else {
            return Ok(0);
        };

        let t_end = {
            let track = cache.track();
            if backwards {
                track.start_time().max(t1)
            } else {
                track.end_time().min(t1)
            }
        };
        let end_pos = cache.track().time_to_samples(t_end);

        // Time of the head of the queue
        let queued = queue.len() as f64;
        let mut t = (*position as f64 + if backwards { queued } else { -queued }) / rate;

        let initial_factor = out_rate / speed / rate;
        let mut out = 0;
        while out < max_out {
            if queue.len() < process_len {
                let available = if backwards {
                    *position - end_pos
                } else {
                    end_pos - *position
                };
                let tail = queue.free_tail();
                let get_len = tail.len().min(available.max(0) as usize);

                if get_len > 0 {
                    let chunk = &mut tail[..get_len];
                    let first = if backwards {
                        *position - (get_len as i64 - 1)
                    } else {
                        *position
                    };

                    cache.get_floats(chunk, first, may_throw)?;
                    let env = &mut self.env_values[..get_len];
                    cache.track().envelope_values(env, first as f64 / rate, tstep);
                    for (sample, gain) in chunk.iter_mut().zip(env.iter()) {
                        *sample *= gain;
                    }

                    if backwards {
                        chunk.reverse();
                        *position -= get_len as i64;
                    } else {
                        *position += get_len as i64;
                    }
                    queue.commit(get_len);
                }
            }

            let last = queue.len() < process_len;
            let this_len = if last { queue.len() } else { process_len };

            let mut factor = initial_factor;
            if let Some(envelope) = warp {
                let span = this_len as f64 / rate;
                factor *= if backwards {
                    envelope.average_of_inverse(t - span + tstep, t + tstep)
                } else {
                    envelope.average_of_inverse(t, t + span)
                };
            }
            let factor = factor.max(*min_factor).min(*max_factor);

            let (used, produced) = resampler.process(
                factor,
                queue.head(this_len),
                last,
                &mut self.float_buffer[out..max_out],
            )?;
            queue.consume(used);
            out += produced;
            t += if backwards { -(used as f64) } else { used as f64 } / rate;

            if last || (used == 0 && produced == 0) {
                break;
            }
        }

        Ok(out)
    }

    /// Add `float_buffer[..len]` into every channel the track feeds
    fn accumulate(&mut self, index: usize, len: usize) {
        if len == 0 {
            return;
        }

        let channels = self.settings.channels;
        let interleaved = self.settings.interleaved;
        let apply_gains = self.settings.apply_track_gains;
        let state = &self.tracks[index];
        let source = &self.float_buffer[..len];

        for channel in (0..channels).filter(|&c| state.routes[c]) {
            let track_gain = if apply_gains {
                state.cache.track().channel_gain(channel)
            } else {
                1.0
            };
            let gain = track_gain * self.channel_scale[channel];

            if interleaved {
                let dest = &mut self.temp[0];
                for (frame, &sample) in source.iter().enumerate() {
                    dest[frame * channels + channel] += sample * gain;
                }
            } else {
                for (dest, &sample) in self.temp[channel][..len].iter_mut().zip(source) {
                    *dest += sample * gain;
                }
            }
        }
    }
}

/// Time the track cursors start from when playback is at `t`
///
/// Backwards playback never starts past the end of the last track, so an
/// unbounded window (see [`Mixer::set_speed_for_keyboard_scrubbing`]) keeps
/// every cursor at a real sample position. All tracks share the clamp, which
/// keeps them aligned.
fn cursor_time(t: f64, backwards: bool, span_end: f64) -> f64 {
    if backwards && t > span_end {
        span_end
    } else {
        t
    }
}

fn check_speed(speed: f64) -> Result<()> {
    if speed.is_finite() {
        Ok(())
    } else {
        Err(invalid(format!("speed {speed} must be finite")))
    }
}

impl fmt::Debug for Mixer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mixer")
            .field("tracks", &self.tracks.len())
            .field("settings", &self.settings)
            .field("variable_rates", &self.variable_rates)
            .field("t0", &self.t0)
            .field("t1", &self.t1)
            .field("time", &self.time)
            .field("speed", &self.speed)
            .finish()
    }
}
