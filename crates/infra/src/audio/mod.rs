//! Audio backends for the mixer
//!
//! This module provides the pieces the core crate leaves abstract:
//! - Band-limited resampling through rubato
//! - Offline rendering into any `std::io::Write` sink

pub mod render;
pub mod resampler;

pub use render::*;
pub use resampler::*;
