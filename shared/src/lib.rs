use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

pub const COMMAND_PREFIX: char = '/';
pub const NAME_PROMPT: &str = "Enter your name: ";
pub const MAX_LINE_LENGTH: usize = 8192;
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_DUMP_FILE: &str = "server_logs.txt";

/// A parsed command line issued by an active session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Stats,
    Uptime,
    MsgCount,
    Users,
    Kick { name: String },
    Ban { name: String },
    Unban { name: String },
    Log { name: String },
    Connections,
    BlockIp { addr: IpAddr },
    WhitelistIp { addr: IpAddr },
    Save,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Unknown command: {0}. Type /help for a list of commands.")]
    Unknown(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
    #[error("Invalid address `{0}`. Usage: /blockip <address> or /whitelistip <address>")]
    InvalidAddress(String),
}

impl Command {
    /// Parses a command line. The line must start with [`COMMAND_PREFIX`];
    /// surplus arguments after the first are ignored.
    pub fn parse(line: &str) -> Result<Command, CommandError> {
        let mut tokens = line.split_whitespace();
        let head = tokens.next().unwrap_or_default();
        let name = head.strip_prefix(COMMAND_PREFIX).unwrap_or(head);
        let arg = tokens.next();

        match name {
            "stats" => Ok(Command::Stats),
            "uptime" => Ok(Command::Uptime),
            "msgcount" => Ok(Command::MsgCount),
            "users" => Ok(Command::Users),
            "connections" => Ok(Command::Connections),
            "save" => Ok(Command::Save),
            "help" => Ok(Command::Help),
            "quit" => Ok(Command::Quit),
            "kick" => required(arg, "/kick <username>").map(|name| Command::Kick { name }),
            "ban" => required(arg, "/ban <username>").map(|name| Command::Ban { name }),
            "unban" => required(arg, "/unban <username>").map(|name| Command::Unban { name }),
            "log" => required(arg, "/log <username>").map(|name| Command::Log { name }),
            "blockip" => address(arg, "/blockip <address>").map(|addr| Command::BlockIp { addr }),
            "whitelistip" => {
                address(arg, "/whitelistip <address>").map(|addr| Command::WhitelistIp { addr })
            }
            _ => Err(CommandError::Unknown(head.to_string())),
        }
    }
}

fn required(arg: Option<&str>, usage: &'static str) -> Result<String, CommandError> {
    arg.map(str::to_string).ok_or(CommandError::Usage(usage))
}

fn address(arg: Option<&str>, usage: &'static str) -> Result<IpAddr, CommandError> {
    let raw = arg.ok_or(CommandError::Usage(usage))?;
    raw.parse::<IpAddr>()
        .map(canonical_ip)
        .map_err(|_| CommandError::InvalidAddress(raw.to_string()))
}

/// Collapses IPv4-mapped IPv6 addresses to their IPv4 form so that
/// block/whitelist entries match regardless of the listener's family.
pub fn canonical_ip(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

pub fn is_command(line: &str) -> bool {
    line.starts_with(COMMAND_PREFIX)
}

/// Lines broadcast to the whole room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice<'a> {
    Chat { name: &'a str, text: &'a str },
    Joined { name: &'a str },
    Left { name: &'a str },
    Kicked { name: &'a str },
    Banned { name: &'a str },
    AddressBlocked { name: &'a str },
    Flooding { name: &'a str },
}

impl fmt::Display for Notice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Chat { name, text } => write!(f, "{}: {}", name, text),
            Notice::Joined { name } => write!(f, "* `{}` has joined the chat!", name),
            Notice::Left { name } => write!(f, "* `{}` has left the chat.", name),
            Notice::Kicked { name } => write!(f, "{} was kicked from the server.", name),
            Notice::Banned { name } => write!(f, "{} was banned and kicked from the server.", name),
            Notice::AddressBlocked { name } => write!(f, "{} was kicked due to IP block.", name),
            Notice::Flooding { name } => write!(f, "{} was banned for flooding.", name),
        }
    }
}

pub const HELP_LINES: &[&str] = &[
    "Available commands:",
    "/stats - uptime, total messages and active users",
    "/uptime - server uptime",
    "/msgcount - total messages sent",
    "/users - list active users",
    "/kick <username> - disconnect a user",
    "/ban <username> - ban a user and disconnect them if online",
    "/unban <username> - lift a ban",
    "/log <username> - show a user's message log",
    "/connections - list active connections",
    "/blockip <address> - block an address and disconnect its sessions",
    "/whitelistip <address> - whitelist an address",
    "/save - write all message logs to disk",
    "/quit - leave the chat",
];

/// Formats a duration as `1h 2m 3s`, omitting leading zero units.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
