//! Command processor
//!
//! Turns a command line from an active session into registry operations and
//! a private reply. Parsing failures, unknown commands and unknown targets
//! only ever produce a reply to the issuer; room-wide notices are queued by
//! the registry itself when a moderation action removes a live session.

use crate::registry::SharedRegistry;
use log::{info, warn};
use shared::{format_duration, Command, HELP_LINES};
use std::path::Path;

/// What a command needs to know about where it was issued
pub struct CommandContext<'a> {
    pub registry: &'a SharedRegistry,
    /// Display name of the issuing session
    pub issuer: &'a str,
    pub dump_path: &'a Path,
}

/// Private reply lines plus whether the issuer asked to leave
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub replies: Vec<String>,
    pub disconnect: bool,
}

impl CommandOutcome {
    fn reply(line: impl Into<String>) -> Self {
        Self {
            replies: vec![line.into()],
            disconnect: false,
        }
    }

    fn lines(replies: Vec<String>) -> Self {
        Self {
            replies,
            disconnect: false,
        }
    }
}

/// Parses and executes one command line
pub async fn dispatch(line: &str, ctx: &CommandContext<'_>) -> CommandOutcome {
    match Command::parse(line) {
        Ok(command) => execute(command, ctx).await,
        Err(e) => CommandOutcome::reply(e.to_string()),
    }
}

pub async fn execute(command: Command, ctx: &CommandContext<'_>) -> CommandOutcome {
    info!("`{}` issued {:?}", ctx.issuer, command);

    match command {
        Command::Stats => {
            let stats = ctx.registry.read().await.snapshot_stats();
            CommandOutcome::lines(vec![
                format!("Server has been running for {}", format_duration(stats.uptime)),
                format!("Total messages sent: {}", stats.message_count),
                format!("Active users: {}", stats.live_sessions),
            ])
        }
        Command::Uptime => {
            let stats = ctx.registry.read().await.snapshot_stats();
            CommandOutcome::reply(format!("Server uptime: {}", format_duration(stats.uptime)))
        }
        Command::MsgCount => {
            let stats = ctx.registry.read().await.snapshot_stats();
            CommandOutcome::reply(format!("Total messages sent: {}", stats.message_count))
        }
        Command::Users => {
            let names = ctx.registry.read().await.active_names();
            let mut replies = vec!["Active users:".to_string()];
            replies.extend(names);
            CommandOutcome::lines(replies)
        }
        Command::Kick { name } => {
            if ctx.registry.write().await.kick(&name) {
                CommandOutcome::reply(format!("{} has been kicked.", name))
            } else {
                CommandOutcome::reply(format!("User {} not found.", name))
            }
        }
        Command::Ban { name } => {
            ctx.registry.write().await.ban(&name);
            CommandOutcome::reply(format!("{} has been banned.", name))
        }
        Command::Unban { name } => {
            if ctx.registry.write().await.unban(&name) {
                CommandOutcome::reply(format!("{} has been unbanned.", name))
            } else {
                CommandOutcome::reply(format!("User {} not found in ban list.", name))
            }
        }
        Command::Log { name } => match ctx.registry.read().await.transcript(&name) {
            Some(lines) => {
                let mut replies = vec![format!("Log for {}:", name)];
                replies.extend(lines);
                CommandOutcome::lines(replies)
            }
            None => CommandOutcome::reply(format!("No log found for {}.", name)),
        },
        Command::Connections => {
            let connections = ctx.registry.read().await.connections();
            let mut replies = vec!["Active connections:".to_string()];
            replies.extend(connections.into_iter().map(|c| {
                format!(
                    "{} ({}) - Connected for: {}",
                    c.name,
                    c.addr,
                    format_duration(c.connected_for)
                )
            }));
            CommandOutcome::lines(replies)
        }
        Command::BlockIp { addr } => {
            let closed = ctx.registry.write().await.block_address(addr);
            CommandOutcome::reply(format!(
                "IP {} has been blocked ({} session(s) closed).",
                addr,
                closed.len()
            ))
        }
        Command::WhitelistIp { addr } => {
            ctx.registry.write().await.whitelist_address(addr);
            CommandOutcome::reply(format!("IP {} has been whitelisted.", addr))
        }
        Command::Save => save_logs(ctx).await,
        Command::Help => CommandOutcome::lines(HELP_LINES.iter().map(|l| l.to_string()).collect()),
        Command::Quit => CommandOutcome {
            replies: vec!["Goodbye.".to_string()],
            disconnect: true,
        },
    }
}

async fn save_logs(ctx: &CommandContext<'_>) -> CommandOutcome {
    let dump = ctx.registry.read().await.snapshot_logs();

    match dump.save(ctx.dump_path).await {
        Ok(()) => {
            info!(
                "Saved logs for {} user(s) to {}",
                dump.user_count(),
                ctx.dump_path.display()
            );
            CommandOutcome::reply(format!("Logs saved to {}.", ctx.dump_path.display()))
        }
        Err(e) => {
            warn!("Failed to save logs to {}: {}", ctx.dump_path.display(), e);
            CommandOutcome::reply(format!("Error saving logs: {}", e))
        }
    }
}
