//! # Chat Server Library
//!
//! A multi-client broadcast chat server over plain TCP. Clients connect,
//! choose a display name, exchange chat lines and issue moderation commands
//! that act on shared room state.
//!
//! ## Architecture
//!
//! ### One Task per Connection
//! The acceptor spawns an independent task for every accepted connection.
//! Each task blocks only on its own socket and its own outbox.
//!
//! ### Single Registry Lock
//! All shared state (live sessions, message logs, ban/block/whitelist sets,
//! counters) lives in one [`registry::SessionRegistry`] behind a single
//! `RwLock`. Moderation actions that touch several structures at once, such
//! as a ban that closes a live session and announces it, happen inside one
//! critical section and are never observed half-applied.
//!
//! ### Ordered Broadcast
//! Room-wide lines go through one unbounded FIFO drained by exactly one
//! dispatcher task. The dispatcher snapshots the live outboxes under the
//! lock and delivers outside it, so lines from a single sender reach every
//! recipient in the order they were sent.
//!
//! ## Module Organization
//!
//! - `network`: listener binding and the accept loop
//! - `session`: the per-connection `Connecting -> Authenticating -> Active -> Closed` state machine
//! - `commands`: command dispatch and private replies
//! - `registry`: shared state and its atomic operations
//! - `broadcast`: the broadcast queue and dispatcher
//! - `dump`: writing all logs to disk for `/save`
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Limitations
//!
//! There is no authentication, no encryption and no graceful shutdown:
//! stopping the process drops every connection immediately.

pub mod broadcast;
pub mod commands;
pub mod config;
pub mod dump;
pub mod error;
pub mod network;
pub mod registry;
pub mod session;
