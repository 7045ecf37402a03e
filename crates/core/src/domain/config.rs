//! Session configuration
//!
//! A session file describes everything needed to build a [`Mixer`]:
//! - `[mixer]` output settings
//! - `[window]` playback window
//! - `[warp]` time warp or speed range
//! - `[routing]` optional explicit track-to-channel matrix
//! - `[[tracks]]` synthetic track generators
//!
//! Sessions are stored as TOML and loaded asynchronously.

use crate::domain::audio::{ChannelPlacement, MixError};
use crate::domain::envelope::{Envelope, EnvelopePoint};
use crate::domain::mixer::spec::MixerSpec;
use crate::domain::mixer::{Mixer, MixerSettings};
use crate::domain::resample::ResamplerFactory;
use crate::domain::track::{MemoryTrack, SampleTrack, SharedTrack};
use crate::domain::warp::WarpOptions;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, instrument};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur while loading or applying a session
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Mixer rejected the session: {0}")]
    Mix(#[from] MixError),
}

fn default_one() -> f64 {
    1.0
}

fn default_gain() -> f32 {
    1.0
}

fn default_rate() -> f64 {
    44100.0
}

fn default_frequency() -> f64 {
    440.0
}

fn default_amplitude() -> f32 {
    0.5
}

/// Playback window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WindowConfig {
    #[serde(default)]
    pub start: f64,

    /// End of the window (None = end of the longest track)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<f64>,
}

/// Time warp selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum WarpConfig {
    /// Fixed speed of 1.0
    #[default]
    None,

    /// Runtime speed inside `[min_speed, max_speed]`
    Range {
        min_speed: f64,
        max_speed: f64,
        #[serde(default = "default_one")]
        initial_speed: f64,
    },

    /// Speed follows a piecewise-linear envelope
    Envelope {
        lower: f64,
        upper: f64,
        #[serde(default)]
        points: Vec<EnvelopePoint>,
    },
}

/// Single route configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub track: usize,
    pub channel: usize,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Explicit routing matrix
///
/// Every route not listed is off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub max_channels: usize,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

/// Waveform of a synthetic track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Generator {
    #[default]
    Sine,
    Constant,
    Silence,
}

/// Track configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackConfig {
    pub name: String,

    #[serde(default = "default_rate")]
    pub rate: f64,

    #[serde(default)]
    pub generator: Generator,

    /// Sine frequency in Hz
    #[serde(default = "default_frequency")]
    pub frequency: f64,

    #[serde(default = "default_amplitude")]
    pub amplitude: f32,

    /// Length in seconds
    pub duration: f64,

    /// Start time in seconds
    #[serde(default)]
    pub offset: f64,

    #[serde(default = "default_gain")]
    pub gain: f32,

    #[serde(default)]
    pub pan: f32,

    #[serde(default)]
    pub placement: ChannelPlacement,

    /// Gain envelope in track time
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub envelope: Vec<EnvelopePoint>,
}

impl TrackConfig {
    /// Render the generator into an in-memory track
    pub fn to_track(&self) -> Result<MemoryTrack> {
        if !(self.rate.is_finite() && self.rate > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "track '{}' has invalid rate {}",
                self.name, self.rate
            )));
        }
        if !(self.duration.is_finite() && self.duration >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "track '{}' has invalid duration {}",
                self.name, self.duration
            )));
        }

        let len = (self.duration * self.rate).round() as usize;
        let samples: Vec<f32> = match self.generator {
            Generator::Sine => {
                let step = TAU * self.frequency / self.rate;
                (0..len)
                    .map(|i| self.amplitude * (step * i as f64).sin() as f32)
                    .collect()
            }
            Generator::Constant => vec![self.amplitude; len],
            Generator::Silence => vec![0.0; len],
        };

        let mut track = MemoryTrack::new(self.name.clone(), self.rate, samples)
            .with_offset(self.offset)
            .with_gain(self.gain)
            .with_pan(self.pan)
            .with_placement(self.placement);

        if !self.envelope.is_empty() {
            let upper = self
                .envelope
                .iter()
                .map(|p| p.value)
                .fold(1.0, f64::max);
            let envelope = self
                .envelope
                .iter()
                .fold(Envelope::new(0.0, upper, 1.0), |env, p| {
                    env.with_point(p.time, p.value)
                });
            track = track.with_envelope(envelope);
        }

        Ok(track)
    }
}

/// Complete session description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub mixer: MixerSettings,

    #[serde(default)]
    pub window: WindowConfig,

    #[serde(default)]
    pub warp: WarpConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingConfig>,

    #[serde(default)]
    pub tracks: Vec<TrackConfig>,
}

impl SessionConfig {
    /// Load a session from a TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading session");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;

        debug!(tracks = config.tracks.len(), "Session loaded successfully");
        Ok(config)
    }

    /// Save the session to a TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving session");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Session saved successfully");
        Ok(())
    }

    /// Two tones at different rates, panned apart, the second fading out
    pub fn factory_default() -> Self {
        let mut config = Self::default();

        config.tracks.push(TrackConfig {
            name: "tone".to_string(),
            rate: 44100.0,
            generator: Generator::Sine,
            frequency: 440.0,
            amplitude: 0.4,
            duration: 2.0,
            offset: 0.0,
            gain: 1.0,
            pan: -0.3,
            placement: ChannelPlacement::Mono,
            envelope: Vec::new(),
        });

        config.tracks.push(TrackConfig {
            name: "bass".to_string(),
            rate: 22050.0,
            generator: Generator::Sine,
            frequency: 110.0,
            amplitude: 0.4,
            duration: 2.0,
            offset: 0.5,
            gain: 0.8,
            pan: 0.3,
            placement: ChannelPlacement::Mono,
            envelope: vec![
                EnvelopePoint { time: 1.5, value: 1.0 },
                EnvelopePoint { time: 2.5, value: 0.0 },
            ],
        });

        config
    }

    pub fn build_tracks(&self) -> Result<Vec<SharedTrack>> {
        self.tracks
            .iter()
            .map(|t| t.to_track().map(MemoryTrack::into_shared))
            .collect()
    }

    pub fn build_warp(&self) -> Result<WarpOptions> {
        let warp = match &self.warp {
            WarpConfig::None => WarpOptions::constant(),
            WarpConfig::Range {
                min_speed,
                max_speed,
                initial_speed,
            } => WarpOptions::with_speed_range(*min_speed, *max_speed, *initial_speed)?,
            WarpConfig::Envelope {
                lower,
                upper,
                points,
            } => {
                let envelope = points
                    .iter()
                    .fold(Envelope::new(*lower, *upper, 1.0), |env, p| {
                        env.with_point(p.time, p.value)
                    });
                WarpOptions::with_envelope(Arc::new(envelope))
            }
        };
        Ok(warp)
    }

    /// The routing matrix for `num_tracks` tracks, if the session has one
    pub fn build_mixer_spec(&self, num_tracks: usize) -> Result<Option<MixerSpec>> {
        let Some(routing) = &self.routing else {
            return Ok(None);
        };

        let mut spec = MixerSpec::new(num_tracks, routing.max_channels);
        if !spec.set_num_channels(self.mixer.channels) {
            return Err(ConfigError::Invalid(format!(
                "{} output channels exceed the routing maximum of {}",
                self.mixer.channels, routing.max_channels
            )));
        }
        for track in 0..num_tracks {
            for channel in 0..spec.num_channels() {
                spec.set_route(track, channel, false);
            }
        }
        for route in &routing.routes {
            if !spec.set_route(route.track, route.channel, route.enabled) {
                return Err(ConfigError::Invalid(format!(
                    "route {} -> {} is out of range",
                    route.track, route.channel
                )));
            }
        }

        Ok(Some(spec))
    }

    /// End of the window, defaulting to the end of the longest track
    pub fn stop_time(&self, tracks: &[SharedTrack]) -> f64 {
        self.window.stop.unwrap_or_else(|| {
            tracks
                .iter()
                .map(|t| t.end_time())
                .fold(self.window.start, f64::max)
        })
    }

    /// Build a ready-to-run mixer for this session
    pub fn build_mixer(&self, factory: Arc<dyn ResamplerFactory>) -> Result<Mixer> {
        let tracks = self.build_tracks()?;
        let stop = self.stop_time(&tracks);
        let spec = self.build_mixer_spec(tracks.len())?;

        let mut builder = Mixer::builder(tracks, self.window.start, stop)
            .warp(self.build_warp()?)
            .settings(self.mixer.clone())
            .resampler_factory(factory);
        if let Some(spec) = spec {
            builder = builder.mixer_spec(spec);
        }

        Ok(builder.build()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::resample::LinearResamplerFactory;
    use tempfile::TempDir;

    const SESSION: &str = r#"
[mixer]
channels = 1
buffer_size = 256
rate = 8000.0
downmix = "average"

[window]
start = 0.0
stop = 0.5

[warp]
mode = "range"
min_speed = 0.5
max_speed = 2.0

[routing]
max_channels = 2
routes = [{ track = 1, channel = 0 }]

[[tracks]]
name = "a"
rate = 8000.0
generator = "constant"
amplitude = 0.25
duration = 1.0

[[tracks]]
name = "b"
rate = 4000.0
generator = "silence"
duration = 1.0
placement = "left"
"#;

    #[test]
    fn test_config_serialization() {
        let config = SessionConfig::factory_default();

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: SessionConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed, config);
    }

    #[test]
    fn test_parse_handwritten_session() {
        let config: SessionConfig = toml::from_str(SESSION).unwrap();

        assert_eq!(config.mixer.channels, 1);
        assert_eq!(config.mixer.buffer_size, 256);
        // Unspecified settings keep their defaults
        assert_eq!(config.mixer.process_len, MixerSettings::default().process_len);
        assert_eq!(
            config.warp,
            WarpConfig::Range {
                min_speed: 0.5,
                max_speed: 2.0,
                initial_speed: 1.0
            }
        );
        assert_eq!(config.tracks[1].placement, ChannelPlacement::Left);
        assert_eq!(config.tracks[1].gain, 1.0);

        let spec = config.build_mixer_spec(2).unwrap().unwrap();
        assert_eq!(spec.num_channels(), 1);
        assert!(!spec.is_routed(0, 0));
        assert!(spec.is_routed(1, 0));
    }

    #[test]
    fn test_build_mixer_from_session() {
        let config: SessionConfig = toml::from_str(SESSION).unwrap();
        let mixer = config.build_mixer(Arc::new(LinearResamplerFactory)).unwrap();

        assert_eq!(mixer.num_tracks(), 2);
        assert_eq!(mixer.num_channels(), 1);
        assert!(mixer.is_variable_rate());
        assert_eq!(mixer.window(), (0.0, 0.5));
    }

    #[test]
    fn test_generators() {
        let mut track = TrackConfig {
            name: "sine".to_string(),
            rate: 8.0,
            generator: Generator::Sine,
            frequency: 2.0,
            amplitude: 1.0,
            duration: 1.0,
            offset: 0.0,
            gain: 1.0,
            pan: 0.0,
            placement: ChannelPlacement::Mono,
            envelope: Vec::new(),
        };

        let built = track.to_track().unwrap();
        assert_eq!(built.len(), 8);
        let mut samples = [0.0f32; 8];
        built.get_floats(&mut samples, 0).unwrap();
        // Quarter period is two samples
        assert!(samples[0].abs() < 1e-6);
        assert!((samples[1] - 1.0).abs() < 1e-6);

        track.generator = Generator::Constant;
        track.amplitude = 0.3;
        let built = track.to_track().unwrap();
        built.get_floats(&mut samples, 0).unwrap();
        assert_eq!(samples, [0.3; 8]);

        track.rate = 0.0;
        assert!(matches!(track.to_track(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_invalid_sessions() {
        let mut config: SessionConfig = toml::from_str(SESSION).unwrap();
        config.warp = WarpConfig::Range {
            min_speed: 2.0,
            max_speed: 1.0,
            initial_speed: 1.0,
        };
        assert!(matches!(config.build_warp(), Err(ConfigError::Mix(_))));

        let mut config: SessionConfig = toml::from_str(SESSION).unwrap();
        config.mixer.channels = 3;
        assert!(matches!(config.build_mixer_spec(2), Err(ConfigError::Invalid(_))));

        let mut config: SessionConfig = toml::from_str(SESSION).unwrap();
        if let Some(routing) = config.routing.as_mut() {
            routing.routes.push(RouteConfig {
                track: 5,
                channel: 0,
                enabled: true,
            });
        }
        assert!(matches!(config.build_mixer_spec(2), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_stop_time_defaults_to_longest_track() {
        let config = SessionConfig::factory_default();
        let tracks = config.build_tracks().unwrap();

        assert!((config.stop_time(&tracks) - 2.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_save_and_load_session() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sessions").join("default.toml");

        let config = SessionConfig::factory_default();
        config.save_to_file(&path).await.unwrap();

        assert!(path.exists());

        let loaded = SessionConfig::load_from_file(&path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = SessionConfig::load_from_file(temp_dir.path().join("nope.toml")).await;

        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
