//! Semantic protocol messages exchanged with session clients.
//!
//! The broker never parses wire bytes directly; transports decode frames
//! into [`ClientMessage`] and encode [`ServerMessage`] values.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use super::properties::PropertyUpdate;

/// Opaque per-connection identity assigned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl Display for ConnectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Manager-level lifecycle state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ManagerState {
    /// Applications are being launched from the loaded or failsafe session.
    Startup,
    /// No checkpoint or shutdown in progress.
    Idle,
    /// Save-yourself in progress without shutdown intent.
    Checkpoint,
    /// Save-yourself in progress with shutdown intent.
    Shutdown,
    /// All clients told to die; waiting for connections to close.
    ShutdownPhase2,
}

impl ManagerState {
    /// Stable lower-case name used in logs and control replies.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Idle => "idle",
            Self::Checkpoint => "checkpoint",
            Self::Shutdown => "shutdown",
            Self::ShutdownPhase2 => "shutdown_phase2",
        }
    }

    /// Whether a group save-yourself is running.
    #[must_use]
    pub fn is_saving(self) -> bool {
        matches!(self, Self::Checkpoint | Self::Shutdown)
    }
}

impl Display for ManagerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which data a client is asked to save.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SaveType {
    /// Only the state needed to restart the client.
    Local,
    /// Only user data.
    Global,
    /// Both restart state and user data.
    Both,
}

/// How much user interaction a client may request while saving.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InteractStyle {
    /// No interaction allowed.
    None,
    /// Interaction only to report errors.
    Errors,
    /// Any interaction.
    Any,
}

/// What a shutdown request ends in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownType {
    /// End the session only.
    Logout,
    /// Power the machine off.
    Shutdown,
    /// Reboot the machine.
    Restart,
    /// Suspend to RAM; the session survives.
    Suspend,
    /// Suspend to disk; the session survives.
    Hibernate,
    /// Ask the user which of the above to do.
    Ask,
}

impl ShutdownType {
    /// Whether this transition keeps the session alive.
    #[must_use]
    pub fn preserves_session(self) -> bool {
        matches!(self, Self::Suspend | Self::Hibernate)
    }
}

/// Kind of dialog a client wants to show when it asks to interact.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DialogType {
    /// Error report only.
    Error,
    /// Any dialog.
    #[default]
    Normal,
}

/// Messages sent by a client to the broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join the session, optionally resuming a previous identity.
    Register {
        /// Client id from a previous run, if restarted by the broker.
        #[serde(default)]
        previous_id: Option<String>,
        /// Host the client runs on.
        hostname: String,
    },
    /// Publish or update restart-contract properties.
    SetProperties {
        /// Fields to overwrite; absent fields are left untouched.
        properties: PropertyUpdate,
    },
    /// Clear named properties.
    DeleteProperties {
        /// Property names, e.g. `DiscardCommand`.
        names: Vec<String>,
    },
    /// Client asks the broker to start a save-yourself.
    SaveYourselfRequest {
        /// Data to save.
        save_type: SaveType,
        /// Whether the save ends the session.
        shutdown: bool,
        /// Permitted interaction.
        interact_style: InteractStyle,
        /// Save as quickly as possible.
        fast: bool,
        /// Session-wide save instead of this client only.
        global: bool,
    },
    /// Client wants to prompt the user before finishing its save.
    InteractRequest {
        /// Requested dialog kind.
        #[serde(default)]
        dialog_type: DialogType,
    },
    /// Client finished prompting the user.
    InteractDone {
        /// The user asked to cancel the shutdown.
        #[serde(default)]
        cancel_shutdown: bool,
    },
    /// Client finished saving.
    SaveYourselfDone {
        /// Whether the save succeeded.
        #[serde(default = "default_success")]
        success: bool,
    },
    /// Client wants to save again after every other client finished.
    SaveYourselfPhase2Request,
    /// Client is leaving.
    CloseConnection {
        /// Free-form reasons reported by the client.
        #[serde(default)]
        reasons: Vec<String>,
    },
}

fn default_success() -> bool {
    true
}

impl ClientMessage {
    /// Short message name for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::SetProperties { .. } => "set_properties",
            Self::DeleteProperties { .. } => "delete_properties",
            Self::SaveYourselfRequest { .. } => "save_yourself_request",
            Self::InteractRequest { .. } => "interact_request",
            Self::InteractDone { .. } => "interact_done",
            Self::SaveYourselfDone { .. } => "save_yourself_done",
            Self::SaveYourselfPhase2Request => "save_yourself_phase2_request",
            Self::CloseConnection { .. } => "close_connection",
        }
    }
}

/// Messages sent by the broker to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Registration accepted.
    RegisterReply {
        /// Identity assigned to the client.
        client_id: String,
    },
    /// Registration refused; the client may retry.
    RegisterFailed {
        /// Why registration failed.
        reason: String,
    },
    /// Save your state.
    SaveYourself {
        /// Data to save.
        save_type: SaveType,
        /// Whether the session is ending.
        shutdown: bool,
        /// Permitted interaction.
        interact_style: InteractStyle,
        /// Save as quickly as possible.
        fast: bool,
    },
    /// Interaction granted.
    Interact,
    /// The save-yourself round is complete.
    SaveComplete,
    /// The user cancelled the shutdown.
    ShutdownCancelled,
    /// Second save phase granted.
    SaveYourselfPhase2,
    /// Exit now.
    Die,
}
