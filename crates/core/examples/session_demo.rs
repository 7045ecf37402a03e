//! Example building a mixer from the factory default session
//!
//! Run with: cargo run --package mixdown-core --example session_demo

use mixdown_core::{LinearResamplerFactory, SessionConfig};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("mixdown_core=debug,info")
        .init();

    println!("=== Mixdown Session Demo ===\n");

    println!("1. Creating factory default session...");
    let config = SessionConfig::factory_default();
    println!("   ✓ Created session with {} tracks", config.tracks.len());

    println!("\n2. Saving session to file...");
    let path = std::env::temp_dir().join("mixdown_demo_session.toml");
    config.save_to_file(&path).await?;
    println!("   ✓ Session saved to {}", path.display());

    println!("\n3. Loading session from file...");
    let loaded = SessionConfig::load_from_file(&path).await?;
    for (i, track) in loaded.tracks.iter().enumerate() {
        println!(
            "   {}. {} - {:?} {} Hz at {} Hz, {} s from {} s",
            i + 1,
            track.name,
            track.generator,
            track.frequency,
            track.rate,
            track.duration,
            track.offset
        );
    }

    println!("\n4. Mixing...");
    let mut mixer = loaded.build_mixer(Arc::new(LinearResamplerFactory))?;
    let mut frames = 0;
    let mut blocks = 0;
    loop {
        let n = mixer.process(mixer.buffer_size())?;
        if n == 0 {
            break;
        }
        frames += n;
        blocks += 1;
    }
    println!(
        "   ✓ Mixed {} frames in {} blocks, ended at {:.3} s",
        frames,
        blocks,
        mixer.mix_get_current_time()
    );

    println!("\n5. Restarting and mixing one block...");
    mixer.restart();
    let n = mixer.process(mixer.buffer_size())?;
    println!(
        "   ✓ {} frames, peak {:.3}",
        n,
        (0..mixer.buffer().len())
            .filter_map(|i| mixer.buffer().get(i))
            .fold(0.0f32, |peak, s| peak.max(s.abs()))
    );

    tokio::fs::remove_file(&path).await?;
    println!("\n=== Demo Complete ===");
    Ok(())
}
