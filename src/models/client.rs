//! Registered session client.

use serde::{Deserialize, Serialize};

use super::protocol::ConnectionId;
use crate::session::store::RecordId;
use crate::session::timers::TimerId;

/// Per-client position in the save-yourself handshake.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    /// Registered and not saving.
    #[default]
    Idle,
    /// Saving for itself, outside a group save.
    SavingLocal,
    /// Saving as part of a group checkpoint or shutdown.
    Saving,
    /// Granted interaction with the user.
    Interacting,
    /// Queued behind another interacting client.
    WaitForInteract,
    /// Finished phase 1 and waiting for everyone else.
    WaitForPhase2,
    /// Finished saving in the current group save.
    SaveDone,
    /// Connection gone or forcibly closed.
    Disconnected,
}

impl ClientState {
    /// Stable lower-case name used in logs and control replies.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::SavingLocal => "saving_local",
            Self::Saving => "saving",
            Self::Interacting => "interacting",
            Self::WaitForInteract => "wait_for_interact",
            Self::WaitForPhase2 => "wait_for_phase2",
            Self::SaveDone => "save_done",
            Self::Disconnected => "disconnected",
        }
    }

    /// Whether the client still blocks group completion.
    #[must_use]
    pub fn blocks_completion(self) -> bool {
        matches!(
            self,
            Self::Saving | Self::WaitForInteract | Self::Interacting
        )
    }
}

/// One live peer and the record it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    /// Transport connection the client speaks on.
    pub conn: ConnectionId,
    /// Restart contract owned by this client.
    pub record: RecordId,
    /// Handshake state.
    pub state: ClientState,
    /// Pending save-yourself deadline.
    pub save_timer: Option<TimerId>,
}

impl Client {
    /// Newly registered client in `Idle`.
    #[must_use]
    pub fn new(conn: ConnectionId, record: RecordId) -> Self {
        Self {
            conn,
            record,
            state: ClientState::Idle,
            save_timer: None,
        }
    }
}

/// Name of this host, reported for clients that register without one.
#[must_use]
pub fn local_hostname() -> String {
    #[cfg(unix)]
    {
        if let Some(name) = nix::unistd::gethostname()
            .ok()
            .and_then(|name| name.into_string().ok())
        {
            return format!("local/{name}");
        }
    }
    "local/localhost".into()
}
