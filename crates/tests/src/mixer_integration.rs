//! Integration tests for the mixing pipeline
//!
//! These drive complete mixers through both resampler backends and the
//! offline renderer, checking levels, lengths and failure handling end to end.

use mixdown_core::{
    ChannelPlacement, Envelope, LinearResamplerFactory, MemoryTrack, MixError, Mixer,
    MixerSettings, MixerSpec, ResamplerFactory, SampleFormat, SampleTrack, SessionConfig,
    SharedTrack, TrackError, WarpOptions,
};
use mixdown_infra::{OfflineRenderer, RubatoResamplerFactory};
use proptest::prelude::*;
use std::io;
use std::sync::Arc;

fn constant_track(name: &str, rate: f64, seconds: f64, value: f32) -> SharedTrack {
    MemoryTrack::new(name, rate, vec![value; (rate * seconds) as usize]).into_shared()
}

fn sine_track(name: &str, rate: f64, seconds: f64, frequency: f64) -> SharedTrack {
    let samples = (0..(rate * seconds) as usize)
        .map(|i| (2.0 * std::f64::consts::PI * frequency * i as f64 / rate).sin() as f32 * 0.5)
        .collect();
    MemoryTrack::new(name, rate, samples).into_shared()
}

fn mono(rate: f64) -> MixerSettings {
    MixerSettings {
        channels: 1,
        buffer_size: 1024,
        rate,
        high_quality: false,
        ..MixerSettings::default()
    }
}

/// Pull every block out of `mixer` as floats, interleaved
fn drain(mixer: &mut Mixer, block: usize) -> Vec<f32> {
    let mut out = Vec::new();
    loop {
        let n = mixer.process(block).unwrap();
        if n == 0 {
            break;
        }
        assert!(n <= block);
        out.extend_from_slice(mixer.buffer().as_f32().unwrap());
    }
    out
}

/// Track whose reads fail from sample `fail_from` onwards
#[derive(Debug)]
struct FailingTrack {
    inner: MemoryTrack,
    fail_from: i64,
}

impl SampleTrack for FailingTrack {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn rate(&self) -> f64 {
        self.inner.rate()
    }

    fn start_time(&self) -> f64 {
        self.inner.start_time()
    }

    fn end_time(&self) -> f64 {
        self.inner.end_time()
    }

    fn get_floats(&self, dest: &mut [f32], start: i64) -> Result<(), TrackError> {
        let end = start + dest.len() as i64;
        if end > self.fail_from {
            return Err(TrackError::Unavailable { start, end });
        }
        self.inner.get_floats(dest, start)
    }
}

// ============================================================================
// SAME-RATE MIXING
// ============================================================================

#[test]
fn test_constant_track_passes_through() {
    let tracks = vec![constant_track("dc", 44100.0, 1.0, 0.5)];
    let mut mixer = Mixer::builder(tracks, 0.0, 1.0)
        .settings(MixerSettings {
            buffer_size: 44100,
            ..mono(44100.0)
        })
        .build()
        .unwrap();

    assert_eq!(mixer.process(44100).unwrap(), 44100);
    let out = mixer.buffer().as_f32().unwrap();
    assert_eq!(out.len(), 44100);
    assert!(out.iter().all(|&s| s == 0.5));
    assert!((mixer.mix_get_current_time() - 1.0).abs() < 1e-9);
    assert_eq!(mixer.process(44100).unwrap(), 0);
}

#[test]
fn test_two_tracks_sum_into_one_channel() {
    let tracks = vec![
        constant_track("a", 44100.0, 0.1, 0.25),
        constant_track("b", 44100.0, 0.1, 0.5),
    ];
    let mut spec = MixerSpec::new(2, 2);
    assert!(spec.set_num_channels(1));
    assert!(spec.set_route(1, 0, true));

    let mut mixer = Mixer::builder(tracks, 0.0, 0.1)
        .settings(mono(44100.0))
        .mixer_spec(spec)
        .build()
        .unwrap();

    let out = drain(&mut mixer, 512);

    assert_eq!(out.len(), 4410);
    assert!(out.iter().all(|&s| (s - 0.75).abs() < 1e-6));
}

#[test]
fn test_channel_count_above_maximum_is_refused() {
    let mut spec = MixerSpec::new(3, 2);

    assert!(!spec.set_num_channels(3));
    assert_eq!(spec.num_channels(), 2);
    assert!(spec.set_num_channels(1));
}

#[test]
fn test_stereo_placement_and_pan() {
    let left = MemoryTrack::new("left", 100.0, vec![0.5; 100]).with_placement(ChannelPlacement::Left);
    let panned = MemoryTrack::new("panned", 100.0, vec![0.5; 100]).with_pan(0.5);
    let tracks = vec![left.into_shared(), panned.into_shared()];

    let mut mixer = Mixer::builder(tracks, 0.0, 1.0)
        .settings(MixerSettings {
            channels: 2,
            rate: 100.0,
            ..MixerSettings::default()
        })
        .build()
        .unwrap();

    let out = drain(&mut mixer, 64);

    assert_eq!(out.len(), 200);
    for frame in out.chunks(2) {
        // left: 0.5 + 0.5 * 0.5, right: 0.5
        assert!((frame[0] - 0.75).abs() < 1e-6);
        assert!((frame[1] - 0.5).abs() < 1e-6);
    }
}

// ============================================================================
// VARIABLE-RATE MIXING
// ============================================================================

#[test]
fn test_forced_resampling_at_unity_matches_direct_copy() {
    let tracks = vec![sine_track("sine", 8000.0, 0.5, 220.0)];

    let mut direct = Mixer::builder(tracks.clone(), 0.0, 0.5)
        .settings(mono(8000.0))
        .build()
        .unwrap();
    let mut resampled = Mixer::builder(tracks, 0.0, 0.5)
        .warp(WarpOptions::with_speed_range(1.0, 1.0, 1.0).unwrap())
        .settings(mono(8000.0))
        .resampler_factory(Arc::new(LinearResamplerFactory))
        .build()
        .unwrap();

    assert!(!direct.is_variable_rate());
    assert!(resampled.is_variable_rate());
    assert_eq!(drain(&mut direct, 300), drain(&mut resampled, 300));
}

#[test]
fn test_read_failure_is_silenced_after_upsampling() {
    let track = FailingTrack {
        inner: MemoryTrack::new("flaky", 22050.0, vec![0.5; 22050]),
        fail_from: 11025,
    };
    let settings = MixerSettings {
        read_block_len: 11025,
        may_throw: false,
        ..mono(44100.0)
    };
    let mut mixer = Mixer::builder(vec![Arc::new(track) as SharedTrack], 0.0, 1.0)
        .settings(settings)
        .resampler_factory(Arc::new(LinearResamplerFactory))
        .build()
        .unwrap();

    let out = drain(&mut mixer, 1024);

    assert_eq!(out.len(), 44100);
    assert!(out[..22049].iter().all(|&s| s == 0.5));
    assert_eq!(out[22049], 0.25);
    assert!(out[22050..].iter().all(|&s| s == 0.0));
}

#[test]
fn test_read_failure_propagates_when_allowed() {
    let track = FailingTrack {
        inner: MemoryTrack::new("flaky", 22050.0, vec![0.5; 22050]),
        fail_from: 0,
    };
    let settings = MixerSettings {
        may_throw: true,
        ..mono(44100.0)
    };
    let mut mixer = Mixer::builder(vec![Arc::new(track) as SharedTrack], 0.0, 1.0)
        .settings(settings)
        .build()
        .unwrap();

    assert!(matches!(
        mixer.process(256),
        Err(MixError::TrackRead { ref track, .. }) if track == "flaky"
    ));
}

#[test]
fn test_rubato_upsampling_end_to_end() {
    let tracks = vec![constant_track("dc", 22050.0, 1.0, 0.5)];
    let mut mixer = Mixer::builder(tracks, 0.0, 1.0)
        .settings(mono(44100.0))
        .resampler_factory(Arc::new(RubatoResamplerFactory::default()))
        .build()
        .unwrap();

    let out = drain(&mut mixer, 1000);

    assert!((out.len() as i64 - 44100).abs() <= 2, "got {} frames", out.len());
    assert!(out[2000..42000].iter().all(|&s| (s - 0.5).abs() < 0.01));
}

#[test]
fn test_rubato_speed_range_halves_length() {
    let tracks = vec![constant_track("dc", 44100.0, 1.0, 0.5)];
    let mut mixer = Mixer::builder(tracks, 0.0, 1.0)
        .warp(WarpOptions::with_speed_range(0.5, 2.0, 2.0).unwrap())
        .settings(mono(44100.0))
        .resampler_factory(Arc::new(RubatoResamplerFactory::default()))
        .build()
        .unwrap();

    let out = drain(&mut mixer, 1024);

    assert!((out.len() as i64 - 22050).abs() <= 2, "got {} frames", out.len());
    assert!(out[1000..21000].iter().all(|&s| (s - 0.5).abs() < 0.01));
}

#[test]
fn test_warp_envelope_slows_playback() {
    let tracks = vec![constant_track("dc", 8000.0, 1.0, 0.5)];
    let envelope = Arc::new(Envelope::new(0.25, 4.0, 0.5));
    let mut mixer = Mixer::builder(tracks, 0.0, 1.0)
        .warp(WarpOptions::with_envelope(envelope))
        .settings(mono(8000.0))
        .resampler_factory(Arc::new(LinearResamplerFactory))
        .build()
        .unwrap();

    let out = drain(&mut mixer, 1024);

    // Half speed doubles the output
    assert!((out.len() as i64 - 16000).abs() <= 2, "got {} frames", out.len());
}

#[test]
fn test_restart_reproduces_output_with_both_backends() {
    let factories: [Arc<dyn ResamplerFactory>; 2] = [
        Arc::new(LinearResamplerFactory),
        Arc::new(RubatoResamplerFactory::default()),
    ];

    for factory in factories {
        let tracks = vec![sine_track("sine", 22050.0, 0.25, 330.0)];
        let mut mixer = Mixer::builder(tracks, 0.0, 0.25)
            .settings(MixerSettings {
                format: SampleFormat::Int16,
                high_quality: true,
                ..mono(44100.0)
            })
            .resampler_factory(factory)
            .build()
            .unwrap();

        let collect = |mixer: &mut Mixer| {
            let mut bytes = Vec::new();
            while mixer.process(500).unwrap() > 0 {
                mixer.buffer().extend_le_bytes(&mut bytes);
            }
            bytes
        };

        let first = collect(&mut mixer);
        mixer.restart();
        let second = collect(&mut mixer);

        assert!(!first.is_empty());
        assert_eq!(first, second);
    }
}

#[test]
fn test_backwards_playback_reverses_samples() {
    let ramp: Vec<f32> = (0..100).map(|i| i as f32 / 100.0).collect();
    let tracks = vec![MemoryTrack::new("ramp", 100.0, ramp).into_shared()];
    let mut mixer = Mixer::builder(tracks, 0.99, 0.0)
        .settings(mono(100.0))
        .build()
        .unwrap();

    let out = drain(&mut mixer, 30);

    assert_eq!(out.len(), 99);
    assert!(out.windows(2).all(|w| w[0] > w[1]));
    assert!((out[0] - 0.99).abs() < 1e-6);
    assert!(mixer.mix_get_current_time().abs() < 1e-9);
}

// ============================================================================
// RENDERING
// ============================================================================

#[test]
fn test_render_planar_int24() {
    let tracks = vec![
        constant_track("l", 48000.0, 0.5, 0.5),
        constant_track("r", 48000.0, 0.5, -0.5),
    ];
    let mut mixer = Mixer::builder(tracks, 0.0, 0.5)
        .settings(MixerSettings {
            channels: 2,
            interleaved: false,
            rate: 48000.0,
            format: SampleFormat::Int24,
            high_quality: false,
            ..MixerSettings::default()
        })
        .mixer_spec(MixerSpec::new(2, 2))
        .build()
        .unwrap();

    let mut sink = Vec::new();
    let stats = OfflineRenderer::new(4096).unwrap().render(&mut mixer, &mut sink).unwrap();

    assert_eq!(stats.frames, 24000);
    assert_eq!(sink.len(), 24000 * 2 * 3);
    // +0.5 then -0.5 of 24-bit full scale
    assert_eq!(&sink[..6], &[0x00, 0x00, 0x40, 0x00, 0x00, 0xC0]);
    assert!((stats.peak - 0.5).abs() < 1e-6);
}

#[tokio::test]
async fn test_render_saved_session() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("session.toml");
    SessionConfig::factory_default().save_to_file(&path).await.unwrap();

    let config = SessionConfig::load_from_file(&path).await.unwrap();
    let stats = tokio::task::spawn_blocking(move || {
        let mut mixer = config
            .build_mixer(Arc::new(RubatoResamplerFactory::default()))
            .unwrap();
        OfflineRenderer::default().render(&mut mixer, &mut io::sink()).unwrap()
    })
    .await
    .unwrap();

    // Longest track ends at 2.5 s
    assert!((stats.duration_secs() - 2.5).abs() < 1e-3);
    assert_eq!(stats.channels, 2);
    assert!(stats.peak > 0.1 && stats.peak <= 1.0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_blocks_never_exceed_request(
        rate in prop::sample::select(vec![8000.0, 11025.0, 16000.0]),
        block in 1usize..700,
    ) {
        let tracks = vec![constant_track("dc", rate, 0.2, 0.5)];
        let mut mixer = Mixer::builder(tracks, 0.0, 0.2)
            .settings(MixerSettings { buffer_size: 512, ..mono(16000.0) })
            .resampler_factory(Arc::new(RubatoResamplerFactory::default()))
            .build()
            .unwrap();

        let mut total = 0;
        loop {
            let n = mixer.process(block).unwrap();
            prop_assert!(n <= block.min(512));
            if n == 0 {
                break;
            }
            total += n;
        }
        prop_assert!((total as i64 - 3200).abs() <= 2);
    }
}
