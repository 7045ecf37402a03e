//! Domain entities and mixing rules

pub mod audio;
pub mod config;
pub mod envelope;
pub mod format;
pub mod mixer;
pub mod resample;
pub mod track;
pub mod warp;

// Re-export specific items to avoid ambiguous glob imports
pub use audio::{ChannelPlacement, MixError, TrackError};
pub use config::{ConfigError, SessionConfig};
pub use envelope::{BoundedEnvelope, Envelope};
pub use format::{DitherType, SampleBuffer, SampleFormat, SampleSlice};
pub use mixer::spec::MixerSpec;
pub use mixer::{DownmixPolicy, Mixer, MixerBuilder, MixerSettings};
pub use resample::{LinearResampler, LinearResamplerFactory, Resample, ResamplerFactory};
pub use track::{MemoryTrack, SampleTrack, SharedTrack, TrackCache};
pub use warp::{DefaultWarpFunction, WarpOptions, WarpRegistry};
