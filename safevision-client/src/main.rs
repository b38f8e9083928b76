//! SafeVision client entry point.
//!
//! ```text
//! safevision-client                       Stream to the configured processor
//! safevision-client --processor <addr>    Override the processor address
//! safevision-client --loopback            Stream to an in-process processor
//! safevision-client --duration-secs <n>   Stop after n seconds
//! safevision-client --record              Record the session
//! safevision-client --config <path>       Load a custom config TOML
//! safevision-client --gen-config          Write default config to stdout
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use safevision_client::app::{self, RunOptions};
use safevision_client::config::ClientConfig;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "safevision-client", about = "SafeVision adaptive camera streaming client")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "safevision-client.toml")]
    config: PathBuf,

    /// Processor address (`host:port`), overriding the config file.
    #[arg(short, long)]
    processor: Option<String>,

    /// Use the in-process loopback processor.
    #[arg(long)]
    loopback: bool,

    /// Stop after this many seconds.
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Start recording when the stream starts.
    #[arg(long)]
    record: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        println!("{}", ClientConfig::default().to_toml()?);
        return Ok(());
    }

    let config = ClientConfig::load(&cli.config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("safevision-client v{}", env!("CARGO_PKG_VERSION"));
    info!(
        facing = %config.camera.facing,
        width = config.camera.width,
        height = config.camera.height,
        fps = config.camera.frame_rate,
        "camera"
    );

    let options = RunOptions {
        processor: cli.processor,
        loopback: cli.loopback,
        duration: cli.duration_secs.map(Duration::from_secs),
        record: cli.record,
    };
    app::run(config, options).await?;

    Ok(())
}
