//! Time-warp configuration for the mixer
//!
//! A mixer either follows a speed envelope (track time runs at the envelope's
//! speed) or plays at a speed chosen at runtime from a fixed range. Which
//! envelope applies to a set of tracks can be decided by a lookup function
//! registered on a [`WarpRegistry`] that the caller owns and passes in.

use crate::domain::audio::{MixError, Result};
use crate::domain::envelope::BoundedEnvelope;
use crate::domain::track::SharedTrack;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Lookup returning the time warp that applies to a set of tracks
pub type DefaultWarpFunction =
    Arc<dyn Fn(&[SharedTrack]) -> Option<Arc<dyn BoundedEnvelope>> + Send + Sync>;

/// Holder for the installable default-warp lookup
///
/// Replacing the function is last-writer-wins. A lookup that is already
/// running keeps using the function it started with.
#[derive(Default)]
pub struct WarpRegistry {
    default_warp: RwLock<Option<DefaultWarpFunction>>,
}

impl WarpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `function`, returning the previously installed one
    pub fn set_default_warp_function(
        &self,
        function: Option<DefaultWarpFunction>,
    ) -> Option<DefaultWarpFunction> {
        let mut guard = match self.default_warp.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        debug!(installed = function.is_some(), "Default warp function replaced");
        std::mem::replace(&mut *guard, function)
    }

    /// Apply the installed lookup, if any
    pub fn default_warp(&self, tracks: &[SharedTrack]) -> Option<Arc<dyn BoundedEnvelope>> {
        let function = match self.default_warp.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        function.and_then(|f| f(tracks))
    }
}

impl fmt::Debug for WarpRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let installed = self
            .default_warp
            .read()
            .map(|g| g.is_some())
            .unwrap_or(false);
        f.debug_struct("WarpRegistry")
            .field("installed", &installed)
            .finish()
    }
}

#[derive(Debug, Clone)]
enum WarpMode {
    /// Follow an envelope; `None` means no warp at all
    Envelope(Option<Arc<dyn BoundedEnvelope>>),
    /// No envelope, speed varies inside `[min, max]`
    SpeedRange { min: f64, max: f64, initial: f64 },
}

/// How playback time maps to track time
///
/// Immutable once built; exactly one mode is active.
#[derive(Debug, Clone)]
pub struct WarpOptions {
    mode: WarpMode,
}

impl WarpOptions {
    /// Use whatever the registry's default lookup returns for `tracks`
    pub fn from_tracks(registry: &WarpRegistry, tracks: &[SharedTrack]) -> Self {
        Self {
            mode: WarpMode::Envelope(registry.default_warp(tracks)),
        }
    }

    /// Follow an explicit envelope
    pub fn with_envelope(envelope: Arc<dyn BoundedEnvelope>) -> Self {
        Self {
            mode: WarpMode::Envelope(Some(envelope)),
        }
    }

    /// No envelope, speed chosen at runtime from `[min, max]`
    ///
    /// A range with `min > 0` makes every track go through a resampler so
    /// the speed can change between blocks.
    pub fn with_speed_range(min: f64, max: f64, initial: f64) -> Result<Self> {
        if !(min.is_finite() && max.is_finite() && initial.is_finite()) {
            return Err(MixError::InvalidConfiguration(
                "speed range must be finite".to_string(),
            ));
        }
        if min < 0.0 || max < 0.0 {
            return Err(MixError::InvalidConfiguration(format!(
                "speed range [{min}, {max}] must not be negative"
            )));
        }
        if min > max {
            return Err(MixError::InvalidConfiguration(format!(
                "minimum speed {min} exceeds maximum speed {max}"
            )));
        }
        if initial <= 0.0 || (max > 0.0 && !(min..=max).contains(&initial)) {
            return Err(MixError::InvalidConfiguration(format!(
                "initial speed {initial} outside [{min}, {max}]"
            )));
        }

        Ok(Self {
            mode: WarpMode::SpeedRange { min, max, initial },
        })
    }

    /// No warp and a fixed speed of 1.0
    pub fn constant() -> Self {
        Self {
            mode: WarpMode::SpeedRange {
                min: 0.0,
                max: 0.0,
                initial: 1.0,
            },
        }
    }

    pub fn envelope(&self) -> Option<&Arc<dyn BoundedEnvelope>> {
        match &self.mode {
            WarpMode::Envelope(envelope) => envelope.as_ref(),
            WarpMode::SpeedRange { .. } => None,
        }
    }

    /// The speed range, when no envelope is in use and the range is positive
    pub fn speed_range(&self) -> Option<(f64, f64)> {
        match self.mode {
            WarpMode::SpeedRange { min, max, .. } if min > 0.0 && max > 0.0 => Some((min, max)),
            _ => None,
        }
    }

    /// Speed the mixer starts at
    pub fn initial_speed(&self) -> f64 {
        match self.mode {
            WarpMode::SpeedRange { initial, .. } => initial,
            WarpMode::Envelope(_) => 1.0,
        }
    }
}

impl Default for WarpOptions {
    fn default() -> Self {
        Self::constant()
    }
}
