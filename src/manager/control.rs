//! Control surface: queries and session-wide commands.

use serde::{Deserialize, Serialize};
use tracing::{info, info_span};

use super::save::{DeferredSave, SaveRequest};
use super::services::{LogoutChoice, PowerAction};
use super::Manager;
use crate::models::properties::RestartStyleHint;
use crate::models::protocol::{ManagerState, ShutdownType};
use crate::{AppError, Result};

fn default_true() -> bool {
    true
}

/// Request accepted on the control socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Session summary.
    GetInfo,
    /// Registered clients.
    ListClients,
    /// Manager state.
    GetState,
    /// Save the session, optionally under another name.
    Checkpoint {
        /// Session name override for this save only.
        #[serde(default)]
        name: Option<String>,
    },
    /// End the session.
    Logout {
        /// Ask the user first.
        #[serde(default)]
        show_dialog: bool,
        /// Store the session before leaving.
        #[serde(default = "default_true")]
        allow_save: bool,
    },
    /// End the session and power off.
    Shutdown {
        /// Store the session before leaving.
        #[serde(default = "default_true")]
        allow_save: bool,
    },
    /// End the session and reboot.
    Restart {
        /// Store the session before leaving.
        #[serde(default = "default_true")]
        allow_save: bool,
    },
    /// Suspend to RAM.
    Suspend,
    /// Suspend to disk.
    Hibernate,
    /// Whether power-off is possible.
    CanShutdown,
    /// Whether reboot is possible.
    CanRestart,
    /// Whether suspend is possible and permitted.
    CanSuspend,
    /// Whether hibernate is possible and permitted.
    CanHibernate,
    /// Ask one idle client to exit.
    TerminateClient {
        /// Client to terminate.
        client_id: String,
    },
    /// Answer the pending logout prompt; `None` cancels.
    AnswerLogout {
        /// Chosen action.
        #[serde(default)]
        choice: Option<LogoutChoice>,
    },
}

/// Session summary returned by `GetInfo`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session name.
    pub name: String,
    /// Broker version.
    pub version: String,
    /// Broker vendor.
    pub vendor: String,
    /// Manager state.
    pub state: ManagerState,
    /// Whether the failsafe session is running.
    pub failsafe: bool,
    /// Type of the running or last shutdown.
    pub shutdown_type: ShutdownType,
    /// Whether a logout prompt awaits an answer.
    pub prompt_pending: bool,
    /// Registered clients.
    pub clients: usize,
    /// Records not yet launched.
    pub pending: usize,
    /// Records launched but not registered.
    pub starting: usize,
    /// Records deferred to the next session.
    pub restart: usize,
}

/// One registered client as reported by `ListClients`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientInfo {
    /// Client id.
    pub client_id: String,
    /// Program name, if published.
    pub program: Option<String>,
    /// Host the client runs on.
    pub hostname: String,
    /// Handshake state.
    pub state: String,
    /// Restart policy.
    pub restart_style_hint: RestartStyleHint,
    /// Startup priority.
    pub priority: u8,
}

/// Successful control reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlReply {
    /// Session summary.
    Info(SessionInfo),
    /// Registered clients.
    Clients {
        /// Clients in registration order.
        clients: Vec<ClientInfo>,
    },
    /// Manager state.
    State {
        /// Current state.
        state: ManagerState,
    },
    /// Capability probe result.
    Capability {
        /// Whether the action can be performed.
        allowed: bool,
    },
    /// Command accepted; its effect follows asynchronously.
    Accepted,
}

impl Manager {
    /// Serve one control request.
    ///
    /// Save and shutdown commands are checked now and run on the next
    /// reactor turn.
    ///
    /// # Errors
    ///
    /// * `AppError::BadState` for save or shutdown commands outside `Idle`,
    ///   or an answer with no prompt pending.
    /// * `AppError::Power` when suspend or hibernate fails.
    /// * `AppError::NotFound` for an unknown client id.
    pub fn handle_control(&mut self, request: ControlRequest) -> Result<ControlReply> {
        let span = info_span!("control_request", ?request);
        let _guard = span.enter();

        match request {
            ControlRequest::GetInfo => Ok(ControlReply::Info(self.info())),
            ControlRequest::ListClients => Ok(ControlReply::Clients {
                clients: self.client_infos(),
            }),
            ControlRequest::GetState => Ok(ControlReply::State { state: self.state }),
            ControlRequest::Checkpoint { name } => {
                self.require_idle("checkpoint")?;
                let session_name = name.filter(|n| !n.is_empty());
                info!(name = ?session_name, "checkpoint scheduled");
                self.deferred.push_back(DeferredSave {
                    request: SaveRequest::checkpoint(),
                    session_name,
                });
                Ok(ControlReply::Accepted)
            }
            ControlRequest::Logout {
                show_dialog,
                allow_save,
            } => {
                let kind = if show_dialog {
                    ShutdownType::Ask
                } else {
                    ShutdownType::Logout
                };
                self.schedule_shutdown(kind, allow_save)
            }
            ControlRequest::Shutdown { allow_save } => {
                self.schedule_shutdown(ShutdownType::Shutdown, allow_save)
            }
            ControlRequest::Restart { allow_save } => {
                self.schedule_shutdown(ShutdownType::Restart, allow_save)
            }
            ControlRequest::Suspend => self.power_now(PowerAction::Suspend),
            ControlRequest::Hibernate => self.power_now(PowerAction::Hibernate),
            ControlRequest::CanShutdown => Ok(self.capability(PowerAction::Shutdown, false)),
            ControlRequest::CanRestart => Ok(self.capability(PowerAction::Restart, false)),
            ControlRequest::CanSuspend => Ok(self.capability(PowerAction::Suspend, true)),
            ControlRequest::CanHibernate => Ok(self.capability(PowerAction::Hibernate, true)),
            ControlRequest::TerminateClient { client_id } => {
                self.terminate_client(&client_id)?;
                Ok(ControlReply::Accepted)
            }
            ControlRequest::AnswerLogout { choice } => {
                if self.pending_prompt.is_none() {
                    return Err(AppError::BadState("no logout prompt is pending".into()));
                }
                self.answer_logout(choice);
                Ok(ControlReply::Accepted)
            }
        }
    }

    /// Session summary.
    #[must_use]
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            name: self.session_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            vendor: env!("CARGO_PKG_AUTHORS").to_owned(),
            state: self.state,
            failsafe: self.failsafe_mode,
            shutdown_type: self.shutdown_type,
            prompt_pending: self.pending_prompt.is_some(),
            clients: self.clients.len(),
            pending: self.records.pending().len(),
            starting: self.records.starting().len(),
            restart: self.records.restart().len(),
        }
    }

    /// Registered clients in registration order.
    #[must_use]
    pub fn client_infos(&self) -> Vec<ClientInfo> {
        self.clients
            .iter()
            .filter_map(|client| {
                let record = self.records.get(client.record)?;
                Some(ClientInfo {
                    client_id: record.client_id.clone(),
                    program: record.program.clone(),
                    hostname: record.hostname.clone(),
                    state: client.state.as_str().to_owned(),
                    restart_style_hint: record.restart_style_hint,
                    priority: record.priority,
                })
            })
            .collect()
    }

    fn require_idle(&self, what: &str) -> Result<()> {
        if self.state == ManagerState::Idle {
            Ok(())
        } else {
            Err(AppError::BadState(format!(
                "session manager must be idle to request a {what}"
            )))
        }
    }

    fn schedule_shutdown(&mut self, kind: ShutdownType, allow_save: bool) -> Result<ControlReply> {
        self.require_idle("shutdown")?;
        self.deferred.push_back(DeferredSave {
            request: SaveRequest::shutdown(kind, allow_save),
            session_name: None,
        });
        info!(?kind, allow_save, "shutdown scheduled");
        Ok(ControlReply::Accepted)
    }

    fn power_now(&self, action: PowerAction) -> Result<ControlReply> {
        self.services.power.try_action(action)?;
        Ok(ControlReply::Accepted)
    }

    fn capability(&self, action: PowerAction, needs_auth: bool) -> ControlReply {
        let cap = self.services.power.capability(action);
        ControlReply::Capability {
            allowed: cap.available && (!needs_auth || cap.authorized),
        }
    }
}
