//! Track-to-channel routing matrix
//!
//! A [`MixerSpec`] says which input tracks feed which output channels. It is
//! pure metadata: the mixer consults it once per block and never changes it.

use crate::domain::audio::{MixError, Result};
use tracing::trace;

/// Boolean routing matrix of `num_tracks` rows by `max_num_channels` columns
///
/// Only the first `num_channels` columns are active. Rows are allocated at
/// full width so the active channel count can change without reallocating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixerSpec {
    num_tracks: usize,
    num_channels: usize,
    max_num_channels: usize,
    map: Vec<Vec<bool>>,
}

impl MixerSpec {
    /// Identity routing: track `i` feeds channel `i`
    ///
    /// The active channel count starts at `min(num_tracks, max_num_channels)`.
    pub fn new(num_tracks: usize, max_num_channels: usize) -> Self {
        let num_channels = num_tracks.min(max_num_channels);
        let map = (0..num_tracks)
            .map(|track| {
                (0..max_num_channels)
                    .map(|channel| channel < num_channels && channel == track)
                    .collect()
            })
            .collect();

        Self {
            num_tracks,
            num_channels,
            max_num_channels,
            map,
        }
    }

    pub fn num_tracks(&self) -> usize {
        self.num_tracks
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn max_num_channels(&self) -> usize {
        self.max_num_channels
    }

    /// Change the active channel count
    ///
    /// Returns `false` and leaves the spec untouched when `num_channels`
    /// exceeds the maximum. Entries between the old and the new count are
    /// cleared, so a channel that becomes active starts unrouted.
    pub fn set_num_channels(&mut self, num_channels: usize) -> bool {
        if num_channels == self.num_channels {
            return true;
        }
        if num_channels > self.max_num_channels {
            return false;
        }

        let lo = num_channels.min(self.num_channels);
        let hi = num_channels.max(self.num_channels);
        for row in &mut self.map {
            row[lo..hi].fill(false);
        }

        trace!(
            from = self.num_channels,
            to = num_channels,
            "Mixer spec channel count changed"
        );
        self.num_channels = num_channels;
        true
    }

    /// Whether `track` feeds active `channel`
    pub fn is_routed(&self, track: usize, channel: usize) -> bool {
        channel < self.num_channels
            && self
                .map
                .get(track)
                .and_then(|row| row.get(channel))
                .copied()
                .unwrap_or(false)
    }

    /// Enable or disable one route; `false` if either index is out of range
    pub fn set_route(&mut self, track: usize, channel: usize, enabled: bool) -> bool {
        if channel >= self.num_channels {
            return false;
        }
        match self.map.get_mut(track) {
            Some(row) => {
                row[channel] = enabled;
                true
            }
            None => false,
        }
    }

    /// Active channels fed by `track`
    pub fn routes_for_track(&self, track: usize) -> impl Iterator<Item = usize> + '_ {
        (0..self.num_channels).filter(move |&channel| self.is_routed(track, channel))
    }

    /// Overwrite this spec with `other`
    ///
    /// Both specs must have the same track count and maximum channel count.
    pub fn assign_from(&mut self, other: &MixerSpec) -> Result<()> {
        if self.num_tracks != other.num_tracks || self.max_num_channels != other.max_num_channels {
            return Err(MixError::InvalidConfiguration(format!(
                "cannot assign a {}x{} mixer spec to a {}x{} one",
                other.num_tracks, other.max_num_channels, self.num_tracks, self.max_num_channels
            )));
        }

        for (dst, src) in self.map.iter_mut().zip(&other.map) {
            dst.copy_from_slice(src);
        }
        self.num_channels = other.num_channels;
        Ok(())
    }
}
