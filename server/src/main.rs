use clap::Parser;
use log::{error, info};
use server::config::Config;
use server::network::Server;
use std::path::PathBuf;

/// Main-method of the server.
/// Loads the configuration, applies command-line overrides and runs the
/// websocket server until it fails or Ctrl+C is pressed.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long)]
        host: Option<String>,
        /// Server port to listen on
        #[clap(short, long)]
        port: Option<u16>,
        /// TOML configuration file
        #[clap(short, long)]
        config: Option<PathBuf>,
        /// Round length in seconds
        #[clap(short, long)]
        round_duration: Option<u64>,
        /// Log level used when RUST_LOG is not set
        #[clap(short, long)]
        log_level: Option<String>,
    }

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(secs) = args.round_duration {
        config.game.round_duration_secs = secs;
    }
    if let Some(level) = args.log_level {
        config.server.log_level = level;
    }
    config.game.validate()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.server.log_level.as_str()),
    )
    .init();

    info!(
        "Starting server: {}s rounds, range [{}, {}], up to {} rooms",
        config.game.round_duration_secs,
        config.game.range_low,
        config.game.range_high,
        config.game.max_rooms
    );

    let server = Server::bind(&config).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
