use clap::Parser;
use client::network::Client;
use client::session::ClientSession;
use log::info;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server websocket URL
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:5000")]
    server: String,

    /// Your display name in rooms
    #[arg(short = 'n', long)]
    name: String,

    /// Where to keep the session cache
    #[arg(short = 'c', long, default_value = ".guess_session.json")]
    cache: PathBuf,

    /// Ignore the cached session on start
    #[arg(long)]
    no_resume: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);

    let session = ClientSession::new(&args.name, Some(args.cache));
    let mut client = Client::new(&args.server, session, !args.no_resume);

    client.run().await?;

    Ok(())
}
