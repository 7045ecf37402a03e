//! Shared audio vocabulary and error types
//!
//! The mixer and every adapter around it report failures through the types in
//! this module. Track implementations fail with [`TrackError`]; the mixer wraps
//! those (and its own configuration checks) into [`MixError`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by a track implementation when samples cannot be produced
#[derive(Debug, Error)]
pub enum TrackError {
    /// The requested sample range could not be retrieved
    #[error("Samples unavailable in range {start}..{end}")]
    Unavailable { start: i64, end: i64 },

    /// Underlying storage failed
    #[error("Track I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while building or running a mixer
#[derive(Debug, Error)]
pub enum MixError {
    /// Rejected construction parameter or mismatched routing
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A track read failed while the mixer was allowed to propagate failures
    #[error("Failed to read track '{track}': {source}")]
    TrackRead {
        track: String,
        #[source]
        source: TrackError,
    },

    /// The resampler backend refused its input or configuration
    #[error("Resampler error: {0}")]
    Resample(String),
}

pub type Result<T> = std::result::Result<T, MixError>;

/// Which output channels a track feeds when no explicit routing is given
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelPlacement {
    /// Feeds every output channel
    #[default]
    Mono,
    /// Feeds channel 0
    Left,
    /// Feeds channel 1, or channel 0 when the output is mono
    Right,
}

impl ChannelPlacement {
    /// Whether a track with this placement feeds `channel` of a `num_channels` output
    pub fn feeds(self, channel: usize, num_channels: usize) -> bool {
        match self {
            ChannelPlacement::Mono => channel < num_channels,
            ChannelPlacement::Left => channel == 0,
            ChannelPlacement::Right => {
                if num_channels >= 2 {
                    channel == 1
                } else {
                    channel == 0
                }
            }
        }
    }
}

/// Convert a time in seconds to the nearest sample position at `rate`
#[inline]
pub fn time_to_samples(t: f64, rate: f64) -> i64 {
    (t * rate + 0.5).floor() as i64
}
