use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use shared::{DEFAULT_DUMP_FILE, DEFAULT_PORT};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// File written by the /save command
    #[arg(short = 'o', long, default_value = DEFAULT_DUMP_FILE)]
    dump_file: PathBuf,

    /// Lines allowed per flood window before a client is banned (0 disables)
    #[arg(long, default_value_t = 50)]
    flood_limit: u32,

    /// Flood window in seconds
    #[arg(long, default_value_t = 4)]
    flood_window: u64,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            host: args.host,
            port: args.port,
            dump_path: args.dump_file,
            flood_limit: args.flood_limit,
            flood_window: Duration::from_secs(args.flood_window),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = ServerConfig::from(args);

    info!("Starting chat server on {}", config.bind_addr());
    info!("Log dumps go to {}", config.dump_path.display());

    let server = Server::bind(config).await?;
    server.run().await?;

    Ok(())
}
