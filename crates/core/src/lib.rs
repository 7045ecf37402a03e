//! Mixdown core: the multi-track sample mixing engine
//!
//! Everything platform-agnostic lives under [`domain`]. Adapters that pull in
//! heavier third-party machinery (sinc resampling, PCM sinks) live in the
//! `mixdown-infra` crate.

pub mod domain;

pub use domain::*;
