//! Error types for the chat server
//!
//! `ServerError` covers failures of the listener and of individual
//! connections. `Refusal` is not a failure of the server at all: it is the
//! reason a connection is turned away before it becomes an active session,
//! and its `Display` output is the exact line written back to the client.

use std::net::SocketAddr;
use thiserror::Error;
use tokio_util::codec::LinesCodecError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("connection {addr} failed: {source}")]
    Connection {
        addr: SocketAddr,
        #[source]
        source: LinesCodecError,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Refusal {
    #[error("Your IP is blocked.")]
    AddressBlocked,
    #[error("Your IP is not whitelisted.")]
    NotWhitelisted,
    #[error("(!) You are banned from this server.")]
    Banned,
    #[error("Name {0} is already in use.")]
    NameTaken(String),
    #[error("Name must not be empty.")]
    EmptyName,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refusal_lines() {
        assert_eq!(Refusal::AddressBlocked.to_string(), "Your IP is blocked.");
        assert_eq!(
            Refusal::Banned.to_string(),
            "(!) You are banned from this server."
        );
        assert_eq!(
            Refusal::NameTaken("alice".to_string()).to_string(),
            "Name alice is already in use."
        );
    }

    #[test]
    fn test_bind_error_mentions_address() {
        let err = ServerError::Bind {
            addr: "0.0.0.0:8080".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(err.to_string().contains("0.0.0.0:8080"));
    }
}
