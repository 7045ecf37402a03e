//! Mixdown CLI Application

use anyhow::Context;
use clap::{Parser, Subcommand};
use mixdown_core::SessionConfig;
use mixdown_infra::{OfflineRenderer, RenderStats, RubatoResamplerFactory};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mixdown")]
#[command(about = "Render multi-track sessions to raw PCM", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the factory default session to a file
    Init {
        path: PathBuf,
    },

    /// Mix a session down to little-endian PCM
    Render {
        session: PathBuf,

        /// Output file; standard output when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Frames requested per process call
        #[arg(short, long, default_value_t = 1024)]
        block: usize,

        /// Print render statistics as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so rendered audio can be piped from stdout
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Init { path } => {
            SessionConfig::factory_default()
                .save_to_file(&path)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            tracing::info!(path = %path.display(), "Session created");
        }
        Command::Render {
            session,
            output,
            block,
            json,
        } => {
            if json && output.is_none() {
                anyhow::bail!("--json needs --output, standard output carries the audio");
            }
            let config = SessionConfig::load_from_file(&session)
                .await
                .with_context(|| format!("loading {}", session.display()))?;

            let stats = tokio::task::spawn_blocking(move || render(&config, output, block)).await??;

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                tracing::info!(
                    frames = stats.frames,
                    seconds = stats.duration_secs(),
                    peak = stats.peak,
                    rms = stats.rms,
                    "Render complete"
                );
            }
        }
    }

    Ok(())
}

fn render(config: &SessionConfig, output: Option<PathBuf>, block: usize) -> anyhow::Result<RenderStats> {
    let mut mixer = config.build_mixer(Arc::new(RubatoResamplerFactory::default()))?;
    let renderer = OfflineRenderer::new(block)?;

    let mut sink: Box<dyn Write> = match &output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    Ok(renderer.render(&mut mixer, &mut sink)?)
}
