//! Session registry: the single owner of all shared chat state
//!
//! This module holds everything the connection handlers share:
//! - Live sessions, indexed both by session id and by display name
//! - Append-only per-name message logs
//! - Banned names, blocked addresses and whitelisted addresses
//! - The chat message counter and server start time
//!
//! The registry is a plain struct whose methods each perform one complete
//! state transition. It is shared as `Arc<RwLock<SessionRegistry>>`, so every
//! method runs under the one lock and multi-structure updates such as
//! "ban implies close implies notify" are never observed half-applied.
//! Methods never perform connection I/O: closing a session means removing it
//! from both tables and sending `Outbound::Close` to its outbox, and notices
//! are pushed onto the non-blocking broadcast queue.

use crate::broadcast::Broadcaster;
use crate::dump::LogDump;
use crate::error::Refusal;
use chrono::{DateTime, Utc};
use log::info;
use shared::{canonical_ip, Notice};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};

pub type SessionId = u64;

/// Messages delivered to a session's connection task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A line to write to the client
    Line(String),
    /// The session was removed by a moderation action; close the connection
    Close,
}

pub type Outbox = mpsc::UnboundedSender<Outbound>;

/// Shared, lock-guarded registry handed to every connection task
pub type SharedRegistry = Arc<RwLock<SessionRegistry>>;

/// Registry-side view of a live session
#[derive(Debug)]
pub struct SessionHandle {
    pub id: SessionId,
    pub name: String,
    pub addr: SocketAddr,
    pub connected_at: Instant,
    outbox: Outbox,
}

impl SessionHandle {
    fn ip(&self) -> IpAddr {
        canonical_ip(self.addr.ip())
    }
}

/// One chat line as stored in a user's log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(sender: &str, text: &str) -> Self {
        Self {
            sender: sender.to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Renders the message as a transcript line
    pub fn render(&self) -> String {
        format!(
            "[{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            Notice::Chat {
                name: &self.sender,
                text: &self.text
            }
        )
    }
}

/// Consistent point-in-time view of the server counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub uptime: Duration,
    pub message_count: u64,
    pub live_sessions: usize,
}

/// One row of the `/connections` listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub name: String,
    pub addr: SocketAddr,
    pub connected_for: Duration,
}

pub struct SessionRegistry {
    /// Live sessions by id
    sessions: HashMap<SessionId, SessionHandle>,
    /// Live session ids by display name
    names: HashMap<String, SessionId>,
    logs: BTreeMap<String, Vec<Message>>,
    banned_names: HashSet<String>,
    blocked_addrs: HashSet<IpAddr>,
    whitelisted_addrs: HashSet<IpAddr>,
    message_count: u64,
    started_at: Instant,
    next_session_id: SessionId,
    broadcaster: Broadcaster,
}

impl SessionRegistry {
    pub fn new(broadcaster: Broadcaster) -> Self {
        Self {
            sessions: HashMap::new(),
            names: HashMap::new(),
            logs: BTreeMap::new(),
            banned_names: HashSet::new(),
            blocked_addrs: HashSet::new(),
            whitelisted_addrs: HashSet::new(),
            message_count: 0,
            started_at: Instant::now(),
            next_session_id: 1,
            broadcaster,
        }
    }

    /// Pre-handshake address check.
    ///
    /// A blocked address is refused; once any address is whitelisted, every
    /// address outside the whitelist is refused too.
    pub fn check_address(&self, ip: IpAddr) -> Result<(), Refusal> {
        let ip = canonical_ip(ip);
        if self.blocked_addrs.contains(&ip) {
            return Err(Refusal::AddressBlocked);
        }
        if !self.whitelisted_addrs.is_empty() && !self.whitelisted_addrs.contains(&ip) {
            return Err(Refusal::NotWhitelisted);
        }
        Ok(())
    }

    /// Handshake name check: empty, banned and already-live names are refused
    pub fn check_name(&self, name: &str) -> Result<(), Refusal> {
        if name.is_empty() {
            return Err(Refusal::EmptyName);
        }
        if self.banned_names.contains(name) {
            return Err(Refusal::Banned);
        }
        if self.names.contains_key(name) {
            return Err(Refusal::NameTaken(name.to_string()));
        }
        Ok(())
    }

    /// Registers a new live session and queues its join notice.
    ///
    /// Address and name are re-checked here because a ban or block may have
    /// landed between the handshake checks and registration.
    pub fn register(
        &mut self,
        name: &str,
        addr: SocketAddr,
        outbox: Outbox,
    ) -> Result<SessionId, Refusal> {
        self.check_address(addr.ip())?;
        self.check_name(name)?;

        let id = self.next_session_id;
        self.next_session_id += 1;

        self.sessions.insert(
            id,
            SessionHandle {
                id,
                name: name.to_string(),
                addr,
                connected_at: Instant::now(),
                outbox,
            },
        );
        self.names.insert(name.to_string(), id);

        info!("Session {} registered as `{}` from {}", id, name, addr);
        self.broadcaster.send(Notice::Joined { name }.to_string());

        Ok(id)
    }

    /// Removes a session that ended on its own (EOF, read error, `/quit`).
    ///
    /// Returns None when the session was already removed by a moderation
    /// action, in which case that action has already queued its notice.
    pub fn unregister(&mut self, id: SessionId) -> Option<SessionHandle> {
        let session = self.remove(id)?;
        info!("Session {} (`{}`) unregistered", id, session.name);
        self.broadcaster.send(
            Notice::Left {
                name: &session.name,
            }
            .to_string(),
        );
        Some(session)
    }

    pub fn is_live(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Appends a message to a user's log, creating the log on first use
    pub fn append_log(&mut self, name: &str, text: &str) -> Message {
        let message = Message::new(name, text);
        self.logs
            .entry(name.to_string())
            .or_default()
            .push(message.clone());
        message
    }

    /// Records a chat line from a live session: logs it, counts it and
    /// queues it for broadcast as `name: text`.
    ///
    /// Returns false if the session is no longer live, in which case nothing
    /// is recorded.
    pub fn record_chat(&mut self, id: SessionId, text: &str) -> bool {
        let Some(name) = self.sessions.get(&id).map(|s| s.name.clone()) else {
            return false;
        };

        self.append_log(&name, text);
        self.message_count += 1;
        self.broadcaster.send(
            Notice::Chat {
                name: &name,
                text,
            }
            .to_string(),
        );
        true
    }

    /// Closes the live session using `name`. Returns false if none exists.
    pub fn kick(&mut self, name: &str) -> bool {
        match self.names.get(name).copied() {
            Some(id) => {
                self.close(id, |name| Notice::Kicked { name }.to_string());
                info!("`{}` was kicked", name);
                true
            }
            None => false,
        }
    }

    /// Bans a name, closing its live session if there is one.
    ///
    /// The name is recorded even when nobody is using it. Returns whether a
    /// live session was closed.
    pub fn ban(&mut self, name: &str) -> bool {
        self.ban_with(name, |name| Notice::Banned { name }.to_string())
    }

    /// Same as [`ban`](Self::ban) but announces the flood as the reason
    pub fn ban_flooder(&mut self, name: &str) -> bool {
        self.ban_with(name, |name| Notice::Flooding { name }.to_string())
    }

    fn ban_with(&mut self, name: &str, notice: impl Fn(&str) -> String) -> bool {
        self.banned_names.insert(name.to_string());
        info!("`{}` was banned", name);

        match self.names.get(name).copied() {
            Some(id) => {
                self.close(id, notice);
                true
            }
            None => false,
        }
    }

    /// Lifts a ban. Returns whether the name was banned.
    pub fn unban(&mut self, name: &str) -> bool {
        let removed = self.banned_names.remove(name);
        if removed {
            info!("`{}` was unbanned", name);
        }
        removed
    }

    pub fn is_banned(&self, name: &str) -> bool {
        self.banned_names.contains(name)
    }

    /// Blocks an address and closes every live session connected from it.
    /// Returns the names of the closed sessions.
    pub fn block_address(&mut self, ip: IpAddr) -> Vec<String> {
        let ip = canonical_ip(ip);
        self.blocked_addrs.insert(ip);

        let mut affected: Vec<(SessionId, String)> = self
            .sessions
            .values()
            .filter(|session| session.ip() == ip)
            .map(|session| (session.id, session.name.clone()))
            .collect();
        affected.sort_by_key(|(id, _)| *id);

        for (id, _) in &affected {
            self.close(*id, |name| Notice::AddressBlocked { name }.to_string());
        }

        info!("{} blocked, {} session(s) closed", ip, affected.len());
        affected.into_iter().map(|(_, name)| name).collect()
    }

    /// Whitelists an address and lifts any block on it.
    /// Returns whether a block was lifted.
    pub fn whitelist_address(&mut self, ip: IpAddr) -> bool {
        let ip = canonical_ip(ip);
        self.whitelisted_addrs.insert(ip);
        let unblocked = self.blocked_addrs.remove(&ip);
        info!("{} whitelisted", ip);
        unblocked
    }

    pub fn snapshot_stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime: self.started_at.elapsed(),
            message_count: self.message_count,
            live_sessions: self.sessions.len(),
        }
    }

    /// Display names of all live sessions, sorted
    pub fn active_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names.keys().cloned().collect();
        names.sort();
        names
    }

    /// Rendered transcript of a user's log, if they ever said anything
    pub fn transcript(&self, name: &str) -> Option<Vec<String>> {
        self.logs
            .get(name)
            .map(|log| log.iter().map(Message::render).collect())
    }

    /// Live sessions with their remote address and connected duration,
    /// oldest first
    pub fn connections(&self) -> Vec<ConnectionSummary> {
        let mut sessions: Vec<&SessionHandle> = self.sessions.values().collect();
        sessions.sort_by_key(|session| session.id);

        sessions
            .into_iter()
            .map(|session| ConnectionSummary {
                name: session.name.clone(),
                addr: session.addr,
                connected_for: session.connected_at.elapsed(),
            })
            .collect()
    }

    /// Copies every log so it can be written out after the lock is released
    pub fn snapshot_logs(&self) -> LogDump {
        LogDump::new(
            self.logs
                .iter()
                .map(|(name, log)| (name.clone(), log.iter().map(Message::render).collect()))
                .collect(),
        )
    }

    /// Outboxes of all live sessions, for the broadcast dispatcher
    pub fn outboxes(&self) -> Vec<(SessionId, Outbox)> {
        self.sessions
            .values()
            .map(|session| (session.id, session.outbox.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Removes a session from both tables together
    fn remove(&mut self, id: SessionId) -> Option<SessionHandle> {
        let session = self.sessions.remove(&id)?;
        self.names.remove(&session.name);
        Some(session)
    }

    /// Force-closes a live session and queues the given departure notice
    fn close(&mut self, id: SessionId, notice: impl Fn(&str) -> String) {
        if let Some(session) = self.remove(id) {
            // The connection task may already be gone; nothing to close then
            let _ = session.outbox.send(Outbound::Close);
            self.broadcaster.send(notice(&session.name));
        }
    }
}
