use shared::{DEFAULT_DUMP_FILE, DEFAULT_PORT};
use std::net::Ipv6Addr;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings for a chat server instance
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// File written by `/save`, overwritten on every dump
    pub dump_path: PathBuf,
    /// Lines allowed per flood window before an automatic ban; 0 disables
    pub flood_limit: u32,
    pub flood_window: Duration,
}

impl ServerConfig {
    /// `host:port`, with IPv6 literals bracketed
    pub fn bind_addr(&self) -> String {
        if self.host.parse::<Ipv6Addr>().is_ok() {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            dump_path: PathBuf::from(DEFAULT_DUMP_FILE),
            flood_limit: 50,
            flood_window: Duration::from_secs(4),
        }
    }
}
