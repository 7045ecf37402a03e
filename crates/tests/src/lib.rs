//! Cross-crate tests for the mixer, its resampler backends and the renderer

#[cfg(test)]
mod mixer_integration;
