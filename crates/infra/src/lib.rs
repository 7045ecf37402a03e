//! Infrastructure adapters for the mixdown engine
//!
//! - `audio::resampler`: rubato-backed [`mixdown_core::Resample`] implementation
//! - `audio::render`: offline rendering of a mixer to a PCM sink

pub mod audio;

pub use audio::*;
