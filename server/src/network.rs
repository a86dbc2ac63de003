//! Connection acceptor: binds the listener and spawns one task per client

use crate::broadcast::{spawn_dispatcher, Broadcaster};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::registry::{SessionRegistry, SharedRegistry};
use crate::session::handle_connection;
use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};

/// Chat server owning the listener, the registry and the broadcast queue
pub struct Server {
    listener: TcpListener,
    registry: SharedRegistry,
    broadcast_rx: mpsc::UnboundedReceiver<String>,
    config: Arc<ServerConfig>,
}

impl Server {
    /// Binds the listening socket. Failure here is fatal for the process.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        info!("Server listening on {}", listener.local_addr()?);

        let (broadcaster, broadcast_rx) = Broadcaster::channel();

        Ok(Server {
            listener,
            registry: Arc::new(RwLock::new(SessionRegistry::new(broadcaster))),
            broadcast_rx,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle to the shared registry, e.g. for inspection in tests
    pub fn registry(&self) -> SharedRegistry {
        Arc::clone(&self.registry)
    }

    /// Starts the broadcast dispatcher and accepts connections forever.
    /// Per-accept errors are logged and do not stop the loop.
    pub async fn run(self) -> Result<(), ServerError> {
        let Server {
            listener,
            registry,
            broadcast_rx,
            config,
        } = self;

        spawn_dispatcher(Arc::clone(&registry), broadcast_rx);
        info!("Server started successfully");

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    info!("New connection from {}", addr);
                    let registry = Arc::clone(&registry);
                    let config = Arc::clone(&config);

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, registry, config).await {
                            warn!("Session for {} ended with error: {}", addr, e);
                        }
                        info!("Connection from {} closed", addr);
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    fn local_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = assert_ok!(Server::bind(local_config()).await);
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert!(server.registry().read().await.is_empty());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_fatal_error() {
        let first = Server::bind(local_config()).await.unwrap();
        let taken = first.local_addr().unwrap();

        let config = ServerConfig {
            port: taken.port(),
            ..local_config()
        };
        match Server::bind(config).await {
            Err(ServerError::Bind { addr, .. }) => assert_eq!(addr, taken.to_string()),
            Err(other) => panic!("unexpected error {}", other),
            Ok(_) => panic!("second bind on {} should fail", taken),
        }
    }

    #[tokio::test]
    async fn test_bind_uses_configured_host() {
        let config = ServerConfig {
            host: "127.0.0.2".to_string(),
            ..local_config()
        };
        let server = assert_ok!(Server::bind(config).await);
        let addr = server.local_addr().unwrap();
        assert_eq!(addr.ip(), "127.0.0.2".parse::<std::net::IpAddr>().unwrap());
    }
}
