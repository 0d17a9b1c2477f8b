//! Per-application restart contract.

use serde::{Deserialize, Serialize};

/// Startup priority assigned when a client does not publish one.
pub const DEFAULT_PRIORITY: u8 = 50;

/// Policy governing whether and when an application is relaunched.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RestartStyleHint {
    /// Restart next session only if it was running at save time.
    #[default]
    IfRunning,
    /// Restart next session even if it exited during this one.
    Anyway,
    /// Relaunch as soon as it exits.
    Immediately,
    /// Never restart.
    Never,
}

impl RestartStyleHint {
    /// Numeric code used in session files.
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Self::IfRunning => 0,
            Self::Anyway => 1,
            Self::Immediately => 2,
            Self::Never => 3,
        }
    }

    /// Parse a session-file code.
    #[must_use]
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::IfRunning),
            1 => Some(Self::Anyway),
            2 => Some(Self::Immediately),
            3 => Some(Self::Never),
            _ => None,
        }
    }
}

/// Restart contract for one application, persisted across sessions.
///
/// Command vectors are empty when the client has not published them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyRecord {
    /// Identity stable across restarts within a session generation.
    pub client_id: String,
    /// Host the client runs on.
    pub hostname: String,
    /// Program name, used for exemptions and display.
    pub program: Option<String>,
    /// Working directory for restart and discard commands.
    pub current_directory: Option<String>,
    /// Ordered `KEY=VALUE` environment.
    pub environment: Vec<String>,
    /// Command that relaunches the client.
    pub restart_command: Vec<String>,
    /// Command that deletes the client's saved state.
    pub discard_command: Vec<String>,
    /// Command run at shutdown for clients that already exited.
    pub shutdown_command: Vec<String>,
    /// Restart policy.
    pub restart_style_hint: RestartStyleHint,
    /// Startup ordering; lower values start first.
    pub priority: u8,
    /// Immediate restarts since the client last proved stable.
    pub restart_attempts: u32,
}

impl PropertyRecord {
    /// Fresh record for a newly registered client.
    #[must_use]
    pub fn new(client_id: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            hostname: hostname.into(),
            program: None,
            current_directory: None,
            environment: Vec::new(),
            restart_command: Vec::new(),
            discard_command: Vec::new(),
            shutdown_command: Vec::new(),
            restart_style_hint: RestartStyleHint::default(),
            priority: DEFAULT_PRIORITY,
            restart_attempts: 0,
        }
    }

    /// Whether the record carries enough to be restarted.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.client_id.is_empty()
            && !self.hostname.is_empty()
            && self.program.as_deref().is_some_and(|p| !p.is_empty())
            && !self.restart_command.is_empty()
    }

    /// Program name or `"<unknown>"` for logging.
    #[must_use]
    pub fn program_name(&self) -> &str {
        self.program.as_deref().unwrap_or("<unknown>")
    }

    /// Environment split into key/value pairs; malformed entries are skipped.
    pub fn env_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.environment
            .iter()
            .filter_map(|entry| entry.split_once('='))
    }

    /// Overwrite every field present in `update`.
    pub fn apply(&mut self, update: &PropertyUpdate) {
        if let Some(ref program) = update.program {
            self.program = Some(program.clone());
        }
        if let Some(ref dir) = update.current_directory {
            self.current_directory = Some(dir.clone());
        }
        if let Some(ref env) = update.environment {
            self.environment.clone_from(env);
        }
        if let Some(ref cmd) = update.restart_command {
            self.restart_command.clone_from(cmd);
        }
        if let Some(ref cmd) = update.discard_command {
            self.discard_command.clone_from(cmd);
        }
        if let Some(ref cmd) = update.shutdown_command {
            self.shutdown_command.clone_from(cmd);
        }
        if let Some(hint) = update.restart_style_hint {
            self.restart_style_hint = hint;
        }
        if let Some(priority) = update.priority {
            self.priority = priority;
        }
    }

    /// Clear the named properties. Unknown names are ignored.
    pub fn delete(&mut self, names: &[String]) {
        for name in names {
            match name.as_str() {
                "Program" => self.program = None,
                "CurrentDirectory" => self.current_directory = None,
                "Environment" => self.environment.clear(),
                "RestartCommand" => self.restart_command.clear(),
                "DiscardCommand" => self.discard_command.clear(),
                "ShutdownCommand" => self.shutdown_command.clear(),
                "RestartStyleHint" => self.restart_style_hint = RestartStyleHint::default(),
                "Priority" => self.priority = DEFAULT_PRIORITY,
                _ => {}
            }
        }
    }
}

/// Partial property set published by a client.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PropertyUpdate {
    /// Program name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    /// Working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_directory: Option<String>,
    /// Ordered `KEY=VALUE` environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Vec<String>>,
    /// Restart command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_command: Option<Vec<String>>,
    /// Discard command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discard_command: Option<Vec<String>>,
    /// Shutdown command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutdown_command: Option<Vec<String>>,
    /// Restart policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_style_hint: Option<RestartStyleHint>,
    /// Startup priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
}
