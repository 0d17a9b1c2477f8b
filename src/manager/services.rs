//! Collaborators the manager talks to.
//!
//! Every trait is synchronous: the manager runs on a single reactor task and
//! must never await. Implementations that need async work spawn it and report
//! back through the reactor channel.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::properties::PropertyRecord;
use crate::session::store::LaunchId;
use crate::models::protocol::{ConnectionId, ServerMessage, ShutdownType};
use crate::session::persistence::SessionSummary;
use crate::Result;

/// Outbound half of the client connection layer.
pub trait Transport: Send + Sync {
    /// Queue `message` for delivery on `conn`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` when the connection is gone.
    fn send(&self, conn: ConnectionId, message: ServerMessage) -> Result<()>;

    /// Tear down `conn`. Closing an unknown connection is a no-op.
    fn close(&self, conn: ConnectionId);
}

/// Starts application processes.
pub trait Launcher: Send + Sync {
    /// Run the record's restart command without waiting for it. The exit is
    /// reported tagged with `launch`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` when the process cannot be created.
    fn start(&self, record: &PropertyRecord, launch: LaunchId) -> Result<()>;

    /// Run a bare command, optionally bound to a screen, without waiting.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` when the process cannot be created.
    fn start_command(&self, command: &[String], screen: Option<usize>) -> Result<()>;

    /// Run `command` in the record's directory and environment and wait.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` when the command cannot run or exits
    /// unsuccessfully.
    fn run_sync(&self, command: &[String], record: &PropertyRecord) -> Result<()>;
}

/// Machine power transition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PowerAction {
    /// Power off.
    Shutdown,
    /// Reboot.
    Restart,
    /// Suspend to RAM.
    Suspend,
    /// Suspend to disk.
    Hibernate,
}

impl PowerAction {
    /// Power action that ends a session of the given shutdown type.
    #[must_use]
    pub fn for_shutdown(kind: ShutdownType) -> Option<Self> {
        match kind {
            ShutdownType::Shutdown => Some(Self::Shutdown),
            ShutdownType::Restart => Some(Self::Restart),
            ShutdownType::Suspend => Some(Self::Suspend),
            ShutdownType::Hibernate => Some(Self::Hibernate),
            ShutdownType::Logout | ShutdownType::Ask => None,
        }
    }
}

/// Whether a power action can be performed by this user.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PowerCapability {
    /// The platform supports the action.
    pub available: bool,
    /// The user may perform it.
    pub authorized: bool,
}

/// Power-state backend.
pub trait PowerControl: Send + Sync {
    /// Probe support for `action`.
    fn capability(&self, action: PowerAction) -> PowerCapability;

    /// Perform `action`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Power` when the transition fails.
    fn try_action(&self, action: PowerAction) -> Result<()>;
}

/// Window-manager queries.
pub trait Desktop: Send + Sync {
    /// Number of screens on the display.
    fn screen_count(&self) -> usize;

    /// Active workspace on `screen`.
    fn active_workspace(&self, screen: usize) -> Option<u32>;

    /// Number of workspaces on `screen`.
    fn workspace_count(&self, screen: usize) -> u32;

    /// Switch `screen` to `workspace`.
    ///
    /// # Errors
    ///
    /// Returns an error when the window manager refuses.
    fn activate_workspace(&self, screen: usize, workspace: u32) -> Result<()>;
}

/// The user's answer to a logout prompt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogoutChoice {
    /// What to do; never `Ask`.
    pub shutdown_type: ShutdownType,
    /// Whether to save the session first.
    pub allow_save: bool,
}

/// The user's pick in the session chooser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChooserAnswer {
    /// End the login instead of starting a session.
    Logout,
    /// Load the named saved session.
    Load(String),
    /// Start a fresh session under this name.
    New(String),
}

/// User-facing prompts.
pub trait Dialogs: Send + Sync {
    /// Ask whether to log out. The answer is delivered later through
    /// `Manager::answer_logout`.
    fn request_logout(&self, current: ShutdownType, allow_save: bool);

    /// Let the user pick a session to start.
    fn choose_session(&self, sessions: &[SessionSummary]) -> ChooserAnswer;

    /// Report an error.
    fn show_error(&self, message: &str);
}

/// Bundle of collaborators handed to the manager.
#[derive(Clone)]
pub struct Services {
    /// Client connection layer.
    pub transport: Arc<dyn Transport>,
    /// Process launcher.
    pub launcher: Arc<dyn Launcher>,
    /// Power backend.
    pub power: Arc<dyn PowerControl>,
    /// Window-manager queries.
    pub desktop: Arc<dyn Desktop>,
    /// User prompts.
    pub dialogs: Arc<dyn Dialogs>,
}
