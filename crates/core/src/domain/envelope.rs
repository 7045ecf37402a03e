//! Time envelopes
//!
//! An envelope is a scalar curve over time. The mixer uses them two ways:
//! - as a per-track gain curve sampled once per input sample
//! - as a time warp, where the curve is a playback speed and the mixer needs
//!   the mean of its inverse over an interval to derive a resampling factor

use serde::{Deserialize, Serialize};
use std::fmt;

/// Smallest value used when integrating `1 / v`
const MIN_WARP_VALUE: f64 = 1e-6;

/// A time-varying curve with known value bounds
pub trait BoundedEnvelope: Send + Sync + fmt::Debug {
    /// Lowest value the curve can take
    fn range_lower(&self) -> f64;

    /// Highest value the curve can take
    fn range_upper(&self) -> f64;

    /// Value of the curve at time `t` (seconds)
    fn value_at(&self, t: f64) -> f64;

    /// Mean of `1 / value` over `[t0, t1]`
    ///
    /// For a speed curve this is the ratio of track time to playback time
    /// across the interval.
    fn average_of_inverse(&self, t0: f64, t1: f64) -> f64;
}

/// A single breakpoint of an [`Envelope`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvelopePoint {
    pub time: f64,
    pub value: f64,
}

/// Piecewise-linear envelope clamped to `[lower, upper]`
///
/// Before the first point the curve holds the first value, after the last it
/// holds the last value. With no points it is constant at `default_value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    lower: f64,
    upper: f64,
    default_value: f64,
    points: Vec<EnvelopePoint>,
}

impl Envelope {
    /// Create an envelope with no breakpoints
    ///
    /// Bounds are swapped if given in the wrong order.
    pub fn new(lower: f64, upper: f64, default_value: f64) -> Self {
        let (lower, upper) = if lower <= upper {
            (lower, upper)
        } else {
            (upper, lower)
        };
        Self {
            lower,
            upper,
            default_value: default_value.clamp(lower, upper),
            points: Vec::new(),
        }
    }

    /// Constant curve
    pub fn constant(value: f64) -> Self {
        Self::new(value, value, value)
    }

    /// Builder-style [`Envelope::insert`]
    #[must_use]
    pub fn with_point(mut self, time: f64, value: f64) -> Self {
        self.insert(time, value);
        self
    }

    /// Insert a breakpoint, replacing any existing point at the same time
    pub fn insert(&mut self, time: f64, value: f64) {
        let value = value.clamp(self.lower, self.upper);
        let idx = self.points.partition_point(|p| p.time < time);
        match self.points.get_mut(idx) {
            Some(existing) if existing.time == time => existing.value = value,
            _ => self.points.insert(idx, EnvelopePoint { time, value }),
        }
    }

    pub fn points(&self) -> &[EnvelopePoint] {
        &self.points
    }

    /// Fill `out` with values sampled at `t0, t0 + tstep, ...`
    pub fn values(&self, out: &mut [f32], t0: f64, tstep: f64) {
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.value_at(t0 + i as f64 * tstep) as f32;
        }
    }

    /// Integral of `1 / v` over a span with no breakpoint inside it
    fn inverse_integral(&self, a: f64, b: f64) -> f64 {
        let va = self.value_at(a).max(MIN_WARP_VALUE);
        let vb = self.value_at(b).max(MIN_WARP_VALUE);
        let dt = b - a;
        if (vb - va).abs() <= f64::EPSILON * va.max(vb) {
            dt / va
        } else {
            dt * (vb.ln() - va.ln()) / (vb - va)
        }
    }
}

impl BoundedEnvelope for Envelope {
    fn range_lower(&self) -> f64 {
        self.lower
    }

    fn range_upper(&self) -> f64 {
        self.upper
    }

    fn value_at(&self, t: f64) -> f64 {
        let (first, last) = match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return self.default_value,
        };
        if t <= first.time {
            return first.value;
        }
        if t >= last.time {
            return last.value;
        }

        let idx = self.points.partition_point(|p| p.time <= t);
        let p0 = self.points[idx - 1];
        let p1 = self.points[idx];
        let span = p1.time - p0.time;
        if span <= 0.0 {
            return p1.value;
        }
        p0.value + (p1.value - p0.value) * (t - p0.time) / span
    }

    fn average_of_inverse(&self, t0: f64, t1: f64) -> f64 {
        let (t0, t1) = if t0 <= t1 { (t0, t1) } else { (t1, t0) };
        if t1 - t0 <= f64::EPSILON * t0.abs().max(1.0) {
            return 1.0 / self.value_at(t0).max(MIN_WARP_VALUE);
        }

        let mut total = 0.0;
        let mut a = t0;
        for point in self.points.iter().filter(|p| p.time > t0 && p.time < t1) {
            total += self.inverse_integral(a, point.time);
            a = point.time;
        }
        total += self.inverse_integral(a, t1);

        total / (t1 - t0)
    }
}
