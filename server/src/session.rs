//! Per-connection session handler
//!
//! Each accepted connection is driven through
//! `Connecting -> Authenticating -> Active -> Closed`:
//! - **Connecting**: the peer address is checked against the blocked and
//!   whitelisted sets; a refused peer gets one line and is dropped.
//! - **Authenticating**: the name prompt is written and the first line read
//!   back is the display name, checked against the ban set and live names.
//! - **Active**: the session is registered and the handler multiplexes lines
//!   from the client with lines queued on its outbox by the dispatcher.
//! - **Closed**: on EOF, read error, `/quit` or a moderation close. The
//!   registry entries are removed (if a moderation action has not already
//!   done so) and the connection is shut down.

use crate::commands::{self, CommandContext};
use crate::config::ServerConfig;
use crate::error::{Refusal, ServerError};
use crate::registry::{Outbound, SessionId, SharedRegistry};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::{is_command, MAX_LINE_LENGTH, NAME_PROMPT};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

type LineReader = FramedRead<OwnedReadHalf, LinesCodec>;
type LineWriter = FramedWrite<OwnedWriteHalf, LinesCodec>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Active { id: SessionId, name: String },
    Closed,
}

/// Why the active loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    /// Client hung up or sent `/quit`
    ClientLeft,
    /// Removed by kick, ban, block or flood ban
    Removed,
}

/// Fixed-window line counter used to ban flooding clients
#[derive(Debug)]
pub struct FloodGuard {
    limit: u32,
    window: Duration,
    window_start: Instant,
    count: u32,
}

impl FloodGuard {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            window_start: Instant::now(),
            count: 0,
        }
    }

    /// Counts one line at `now`; returns true once the limit is exceeded
    /// within the current window. A limit of 0 disables the guard.
    pub fn record(&mut self, now: Instant) -> bool {
        if self.limit == 0 {
            return false;
        }

        if now.duration_since(self.window_start) <= self.window {
            self.count += 1;
        } else {
            self.window_start = now;
            self.count = 1;
        }

        self.count > self.limit
    }
}

/// Drives one connection from accept to close
pub struct SessionHandler {
    addr: SocketAddr,
    registry: SharedRegistry,
    config: Arc<ServerConfig>,
    reader: LineReader,
    writer: LineWriter,
    state: SessionState,
}

impl SessionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        registry: SharedRegistry,
        config: Arc<ServerConfig>,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();

        Self {
            addr,
            registry,
            config,
            reader: FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
            writer: FramedWrite::new(write_half, LinesCodec::new()),
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Runs the state machine to completion, leaving the handler `Closed`
    pub async fn run(&mut self) -> Result<(), ServerError> {
        let result = self.drive().await;

        // Whatever happened, make sure the registry no longer lists us
        if let SessionState::Active { id, .. } = self.state {
            self.registry.write().await.unregister(id);
        }
        self.state = SessionState::Closed;

        let _ = self.writer.get_mut().shutdown().await;
        result
    }

    async fn drive(&mut self) -> Result<(), ServerError> {
        // Connecting
        let admitted = self.registry.read().await.check_address(self.addr.ip());
        if let Err(refusal) = admitted {
            return self.refuse(refusal).await;
        }

        // Authenticating
        self.state = SessionState::Authenticating;
        let Some(name) = self.read_name().await? else {
            debug!("{} disconnected before choosing a name", self.addr);
            return Ok(());
        };

        let name_ok = self.registry.read().await.check_name(&name);
        if let Err(refusal) = name_ok {
            return self.refuse(refusal).await;
        }

        // Active
        let (outbox, mut inbox) = mpsc::unbounded_channel();
        let registered = self.registry.write().await.register(&name, self.addr, outbox);
        let id = match registered {
            Ok(id) => id,
            Err(refusal) => return self.refuse(refusal).await,
        };
        self.state = SessionState::Active {
            id,
            name: name.clone(),
        };

        let reason = self.active_loop(id, &name, &mut inbox).await?;
        info!("`{}` ({}) closed: {:?}", name, self.addr, reason);
        Ok(())
    }

    async fn read_name(&mut self) -> Result<Option<String>, ServerError> {
        let prompt = self.writer.get_mut();
        prompt.write_all(NAME_PROMPT.as_bytes()).await?;
        prompt.flush().await?;

        match self.reader.next().await {
            Some(Ok(line)) => Ok(Some(line.trim().to_string())),
            Some(Err(source)) => Err(ServerError::Connection {
                addr: self.addr,
                source,
            }),
            None => Ok(None),
        }
    }

    async fn refuse(&mut self, refusal: Refusal) -> Result<(), ServerError> {
        warn!("Refused {}: {}", self.addr, refusal);
        self.writer.send(refusal.to_string()).await.map_err(|source| {
            ServerError::Connection {
                addr: self.addr,
                source,
            }
        })
    }

    async fn active_loop(
        &mut self,
        id: SessionId,
        name: &str,
        inbox: &mut mpsc::UnboundedReceiver<Outbound>,
    ) -> Result<CloseReason, ServerError> {
        let mut flood = FloodGuard::new(self.config.flood_limit, self.config.flood_window);

        loop {
            tokio::select! {
                // A queued Close must win over lines already buffered from the client
                biased;

                outbound = inbox.recv() => {
                    match outbound {
                        Some(Outbound::Line(line)) => self.write_line(line).await?,
                        Some(Outbound::Close) | None => return Ok(CloseReason::Removed),
                    }
                }
                incoming = self.reader.next() => {
                    let line = match incoming {
                        Some(Ok(line)) => line,
                        Some(Err(source)) => {
                            return Err(ServerError::Connection { addr: self.addr, source });
                        }
                        None => return Ok(CloseReason::ClientLeft),
                    };

                    if !self.registry.read().await.is_live(id) {
                        return Ok(CloseReason::Removed);
                    }

                    if flood.record(Instant::now()) {
                        warn!("`{}` ({}) exceeded the flood limit", name, self.addr);
                        self.registry.write().await.ban_flooder(name);
                        // The Close queued by the ban ends the loop on the next turn
                        continue;
                    }

                    if let Some(reason) = self.handle_line(id, name, line.trim()).await? {
                        return Ok(reason);
                    }
                }
            }
        }
    }

    async fn handle_line(
        &mut self,
        id: SessionId,
        name: &str,
        line: &str,
    ) -> Result<Option<CloseReason>, ServerError> {
        if line.is_empty() {
            return Ok(None);
        }

        if is_command(line) {
            // Removed between reading the line and getting here
            if !self.registry.read().await.is_live(id) {
                return Ok(Some(CloseReason::Removed));
            }

            let ctx = CommandContext {
                registry: &self.registry,
                issuer: name,
                dump_path: &self.config.dump_path,
            };
            let outcome = commands::dispatch(line, &ctx).await;

            for reply in outcome.replies {
                self.write_line(reply).await?;
            }
            return Ok(outcome.disconnect.then_some(CloseReason::ClientLeft));
        }

        debug!("`{}`: {}", name, line);
        self.registry.write().await.record_chat(id, line);
        Ok(None)
    }

    async fn write_line(&mut self, line: String) -> Result<(), ServerError> {
        self.writer
            .send(line)
            .await
            .map_err(|source| ServerError::Connection {
                addr: self.addr,
                source,
            })
    }
}

/// Handles one accepted connection until it closes
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: SharedRegistry,
    config: Arc<ServerConfig>,
) -> Result<(), ServerError> {
    let mut handler = SessionHandler::new(stream, addr, registry, config);
    handler.run().await
}
