//! Error types shared across the broker.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// IPC listener or connection failure.
    Ipc(String),
    /// A peer sent a message its current state does not permit.
    Protocol(String),
    /// Operation is not permitted in the current manager or client state.
    BadState(String),
    /// Requested client or session does not exist.
    NotFound(String),
    /// A restart, discard, or shutdown command could not be launched.
    Spawn(String),
    /// A power-state transition failed or is unavailable.
    Power(String),
    /// Session file content is malformed.
    Session(String),
    /// No regular session and no usable failsafe session.
    Failsafe(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::BadState(msg) => write!(f, "bad state: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Power(msg) => write!(f, "power: {msg}"),
            Self::Session(msg) => write!(f, "session: {msg}"),
            Self::Failsafe(msg) => write!(f, "failsafe: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Session(format!("cannot serialize session file: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
