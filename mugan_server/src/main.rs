// `mugan-server`: standalone generation and training server.
//
// Usage:
//   mugan-server [--port PORT] [--config FILE] [--catalog FILE] [--model FILE]
//
// Without `--catalog` the catalog lives in memory for the lifetime of the
// process. Without `--model` the model path from the configuration is used;
// if that file does not exist the server starts with an untrained model.
// Logging follows `RUST_LOG` (default `info`).

use std::path::PathBuf;

use clap::Parser;

use mugan_music::config::MuganConfig;
use mugan_server::{ServerConfig, start_server};

#[derive(Parser, Debug)]
#[command(name = "mugan-server", about = "MuGAN generation and training server")]
struct Args {
    /// Listen port on 127.0.0.1. 0 picks a free port.
    #[arg(long, default_value_t = 7979)]
    port: u16,

    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Catalog file, created on first write.
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Model file to serve and to overwrite after training.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Milliseconds between training progress polls.
    #[arg(long, default_value_t = 50)]
    poll_ms: u64,
}

fn main() -> mugan_music::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let music = MuganConfig::load_or_default(args.config.as_deref())?;
    let config = ServerConfig {
        port: args.port,
        music,
        catalog_path: args.catalog,
        model_path: args.model,
        poll_interval: std::time::Duration::from_millis(args.poll_ms.max(1)),
    };

    let (_handle, addr) = start_server(config)?;
    println!("mugan-server listening on {addr}");

    // Runs until the process is killed.
    loop {
        std::thread::park();
    }
}
