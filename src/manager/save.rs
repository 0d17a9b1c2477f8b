//! Save-yourself handshake, group completion and session storage.

use chrono::Utc;
use tracing::{debug, error, info, info_span, warn};

use super::services::{LogoutChoice, PowerAction};
use super::{Manager, ManagerEvent};
use crate::models::client::ClientState;
use crate::models::properties::{PropertyRecord, RestartStyleHint};
use crate::models::protocol::{
    ConnectionId, DialogType, InteractStyle, ManagerState, SaveType, ServerMessage, ShutdownType,
};
use crate::session::persistence::{self, SessionFile};
use crate::session::timers::TimerId;
use crate::AppError;

/// Parameters of a group save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveRequest {
    /// Data clients are asked to save.
    pub save_type: SaveType,
    /// Whether the session ends afterwards.
    pub shutdown: bool,
    /// Interaction clients may request.
    pub interact_style: InteractStyle,
    /// Skip prompts and save quickly.
    pub fast: bool,
    /// What the shutdown ends in; `Ask` prompts the user.
    pub shutdown_type: ShutdownType,
    /// Whether a shutdown stores the session.
    pub allow_save: bool,
}

/// A global save queued by a control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct DeferredSave {
    pub(super) request: SaveRequest,
    /// Checkpoint name override, applied only if the save starts.
    pub(super) session_name: Option<String>,
}

impl SaveRequest {
    /// Checkpoint without shutdown.
    #[must_use]
    pub fn checkpoint() -> Self {
        Self {
            save_type: SaveType::Both,
            shutdown: false,
            interact_style: InteractStyle::None,
            fast: false,
            shutdown_type: ShutdownType::Ask,
            allow_save: true,
        }
    }

    /// Save followed by `shutdown_type`.
    #[must_use]
    pub fn shutdown(shutdown_type: ShutdownType, allow_save: bool) -> Self {
        Self {
            save_type: SaveType::Both,
            shutdown: true,
            interact_style: InteractStyle::Any,
            fast: false,
            shutdown_type,
            allow_save,
        }
    }
}

impl Manager {
    /// Start a session-wide save.
    ///
    /// Ignored with a warning unless the manager is idle and no logout
    /// prompt is pending. A shutdown of type `Ask` first prompts the user
    /// and resumes in [`Manager::answer_logout`].
    pub fn save_yourself_global(&mut self, request: SaveRequest) {
        let span = info_span!(
            "save_yourself_global",
            shutdown = request.shutdown,
            shutdown_type = ?request.shutdown_type
        );
        let _guard = span.enter();

        if !self.can_start_global_save() {
            warn!(
                state = %self.state,
                prompt_pending = self.pending_prompt.is_some(),
                "global save requested while busy, ignoring"
            );
            return;
        }

        if request.shutdown {
            if !request.fast && request.shutdown_type == ShutdownType::Ask {
                info!("asking user to confirm logout");
                self.pending_prompt = Some(request);
                self.emit(ManagerEvent::ConfirmationRequested);
                self.services
                    .dialogs
                    .request_logout(self.shutdown_type, request.allow_save);
                return;
            }
            if request.shutdown_type != ShutdownType::Ask {
                self.shutdown_type = request.shutdown_type;
            }
        }

        self.begin_global_save(request);
    }

    fn can_start_global_save(&self) -> bool {
        self.state == ManagerState::Idle && self.pending_prompt.is_none()
    }

    /// Run a queued save, naming the checkpoint only if it actually starts.
    pub(super) fn run_deferred_save(&mut self, deferred: DeferredSave) {
        if deferred.session_name.is_some() && self.can_start_global_save() {
            self.checkpoint_session_name = deferred.session_name;
        }
        self.save_yourself_global(deferred.request);
    }

    /// Resolve the pending logout prompt. `None` means the user cancelled.
    pub fn answer_logout(&mut self, choice: Option<LogoutChoice>) {
        let Some(mut request) = self.pending_prompt.take() else {
            debug!("logout answer without a pending prompt");
            return;
        };
        let Some(choice) = choice else {
            info!("logout cancelled by user");
            return;
        };
        if choice.shutdown_type == ShutdownType::Ask {
            warn!("logout answer did not pick an action, treating as cancel");
            return;
        }
        if self.state != ManagerState::Idle {
            warn!(state = %self.state, "logout answered while busy, ignoring");
            return;
        }

        info!(shutdown_type = ?choice.shutdown_type, allow_save = choice.allow_save, "logout confirmed");
        self.shutdown_type = choice.shutdown_type;
        request.allow_save = choice.allow_save;
        self.begin_global_save(request);
    }

    fn begin_global_save(&mut self, request: SaveRequest) {
        if request.shutdown && self.shutdown_type.preserves_session() {
            let (action, verb) = if self.shutdown_type == ShutdownType::Suspend {
                (PowerAction::Suspend, "suspend")
            } else {
                (PowerAction::Hibernate, "hibernate")
            };
            if let Err(err) = self.services.power.try_action(action) {
                warn!(%err, ?action, "power transition failed");
                self.services
                    .dialogs
                    .show_error(&format!("Failed to {verb} session: {err}"));
            }
            return;
        }

        self.save_session = !request.shutdown || request.allow_save;
        let save_type = if request.save_type == SaveType::Both && !self.save_session {
            SaveType::Global
        } else {
            request.save_type
        };

        self.set_state(if request.shutdown {
            ManagerState::Shutdown
        } else {
            ManagerState::Checkpoint
        });

        for idx in 0..self.clients.len() {
            let exempt = self
                .records
                .get(self.clients[idx].record)
                .and_then(|r| r.program.as_deref())
                .is_some_and(|program| self.config.is_exempt(program));
            if exempt {
                debug!(conn = %self.clients[idx].conn, "exempt from save-yourself");
                continue;
            }

            if self.clients[idx].state != ClientState::SavingLocal {
                self.send(
                    self.clients[idx].conn,
                    ServerMessage::SaveYourself {
                        save_type,
                        shutdown: request.shutdown,
                        interact_style: request.interact_style,
                        fast: request.fast,
                    },
                );
            }
            self.clients[idx].state = ClientState::Saving;
            self.arm_save_timer(idx);
        }

        // Nothing to wait for when every client is exempt or there are none.
        self.complete_save_yourself();
    }

    pub(super) fn save_yourself(&mut self, conn: ConnectionId, request: SaveRequest, global: bool) {
        let Some(idx) = self.client_index(conn) else {
            return;
        };
        if self.clients[idx].state != ClientState::Idle {
            self.nuke(conn, "save requested while not idle");
            return;
        }
        if self.state != ManagerState::Idle {
            self.nuke(conn, "save requested while manager busy");
            return;
        }

        if global {
            self.save_yourself_global(request);
        } else {
            self.send(
                conn,
                ServerMessage::SaveYourself {
                    save_type: request.save_type,
                    shutdown: false,
                    interact_style: request.interact_style,
                    fast: request.fast,
                },
            );
            self.clients[idx].state = ClientState::SavingLocal;
            self.arm_save_timer(idx);
        }
    }

    pub(super) fn interact(&mut self, conn: ConnectionId, dialog_type: DialogType) {
        let Some(idx) = self.client_index(conn) else {
            return;
        };
        if self.clients[idx].state != ClientState::Saving {
            self.nuke(conn, "interact requested while not saving");
            return;
        }
        if !self.state.is_saving() {
            self.nuke(conn, "interact requested outside a group save");
            return;
        }

        if self
            .clients
            .iter()
            .any(|c| c.state == ClientState::Interacting)
        {
            debug!(%conn, ?dialog_type, "another client is interacting, queueing");
            self.clients[idx].state = ClientState::WaitForInteract;
            self.cancel_save_timer(idx);
            return;
        }

        self.start_interact(idx);
    }

    fn start_interact(&mut self, idx: usize) {
        self.send(self.clients[idx].conn, ServerMessage::Interact);
        self.clients[idx].state = ClientState::Interacting;
        self.cancel_save_timer(idx);
    }

    /// Grant interaction to the first queued client. Returns whether one was found.
    pub(super) fn promote_next_interact(&mut self) -> bool {
        match self
            .clients
            .iter()
            .position(|c| c.state == ClientState::WaitForInteract)
        {
            Some(next) => {
                self.start_interact(next);
                true
            }
            None => false,
        }
    }

    pub(super) fn interact_done(&mut self, conn: ConnectionId, cancel_shutdown: bool) {
        let Some(idx) = self.client_index(conn) else {
            return;
        };
        if self.clients[idx].state != ClientState::Interacting {
            self.nuke(conn, "interact done while not interacting");
            return;
        }
        if !self.state.is_saving() {
            self.nuke(conn, "interact done outside a group save");
            return;
        }

        self.clients[idx].state = ClientState::Saving;

        if cancel_shutdown && self.state == ManagerState::Shutdown {
            info!(%conn, "shutdown cancelled by client");
            self.set_state(ManagerState::Checkpoint);
            for waiting in 0..self.clients.len() {
                if self.clients[waiting].state != ClientState::WaitForInteract {
                    continue;
                }
                self.clients[waiting].state = ClientState::Saving;
                self.send(self.clients[waiting].conn, ServerMessage::ShutdownCancelled);
                self.arm_save_timer(waiting);
            }
            self.emit(ManagerEvent::ShutdownCancelled);
        } else {
            self.promote_next_interact();
        }

        self.arm_save_timer(idx);
    }

    pub(super) fn save_yourself_phase2(&mut self, conn: ConnectionId) {
        let Some(idx) = self.client_index(conn) else {
            return;
        };
        if !matches!(
            self.clients[idx].state,
            ClientState::Saving | ClientState::SavingLocal
        ) {
            self.nuke(conn, "phase 2 requested while not saving");
            return;
        }

        if self.state.is_saving() {
            self.clients[idx].state = ClientState::WaitForPhase2;
            self.cancel_save_timer(idx);
            if !self.clients_saving() {
                self.maybe_enter_phase2();
            }
        } else {
            self.send(conn, ServerMessage::SaveYourselfPhase2);
            self.clients[idx].state = ClientState::SavingLocal;
            self.arm_save_timer(idx);
        }
    }

    pub(super) fn save_yourself_done(&mut self, conn: ConnectionId, success: bool) {
        let Some(idx) = self.client_index(conn) else {
            return;
        };
        let state = self.clients[idx].state;
        if !matches!(
            state,
            ClientState::SavingLocal | ClientState::Saving | ClientState::WaitForInteract
        ) {
            self.nuke(conn, "save done while not saving");
            return;
        }

        self.cancel_save_timer(idx);
        if !success {
            warn!(%conn, "client reported an unsuccessful save");
        }

        if state == ClientState::SavingLocal {
            self.clients[idx].state = ClientState::Idle;
            self.send(conn, ServerMessage::SaveComplete);
        } else if !self.state.is_saving() {
            self.nuke(conn, "save done outside a group save");
        } else {
            self.clients[idx].state = ClientState::SaveDone;
            self.complete_save_yourself();
        }
    }

    fn clients_saving(&self) -> bool {
        self.clients.iter().any(|c| c.state.blocks_completion())
    }

    fn maybe_enter_phase2(&mut self) -> bool {
        let mut entered = false;
        for idx in 0..self.clients.len() {
            if self.clients[idx].state != ClientState::WaitForPhase2 {
                continue;
            }
            entered = true;
            debug!(conn = %self.clients[idx].conn, "entering save-yourself phase 2");
            self.send(self.clients[idx].conn, ServerMessage::SaveYourselfPhase2);
            self.clients[idx].state = ClientState::Saving;
            self.arm_save_timer(idx);
        }
        entered
    }

    /// Finish the group save once no client is still working on it.
    pub(super) fn complete_save_yourself(&mut self) {
        if !self.state.is_saving() {
            return;
        }
        if self.clients_saving() || self.maybe_enter_phase2() {
            return;
        }

        info!(state = %self.state, "all clients finished saving");
        if self.save_session {
            self.store_session();
        }

        if self.state == ManagerState::Checkpoint {
            self.set_state(ManagerState::Idle);
            for idx in 0..self.clients.len() {
                self.clients[idx].state = ClientState::Idle;
                self.send(self.clients[idx].conn, ServerMessage::SaveComplete);
            }
        } else {
            self.perform_shutdown();
        }
    }

    pub(super) fn save_timeout(&mut self, conn: ConnectionId, timer: TimerId) {
        let Some(idx) = self.client_index(conn) else {
            return;
        };
        if self.clients[idx].save_timer != Some(timer) {
            return;
        }
        self.clients[idx].save_timer = None;
        warn!(%conn, state = self.clients[idx].state.as_str(), "client did not finish saving in time");
        self.close_connection(conn, true);
    }

    /// Write the current session to the session file.
    ///
    /// The previous file is kept as a hard-linked `.bak`. Failures are logged
    /// and never abort the caller.
    pub fn store_session(&mut self) {
        let path = self.config.session_file();
        let span = info_span!("store_session", path = %path.display());
        let _guard = span.enter();

        if let Err(err) = persistence::backup(&path) {
            warn!(%err, "failed to create session file backup");
        }

        let mut file = match SessionFile::open(&path) {
            Ok(file) => file,
            Err(AppError::Session(msg)) => {
                warn!(%msg, "session file is malformed, starting a fresh one");
                SessionFile::empty(&path)
            }
            Err(err) => {
                error!(%err, "cannot open session file, session not stored");
                return;
            }
        };

        let name = match (self.state, &self.checkpoint_session_name) {
            (ManagerState::Checkpoint, Some(name)) => name.clone(),
            _ => self.session_name.clone(),
        };

        let restart = self
            .records
            .restart()
            .iter()
            .filter_map(|id| self.records.get(*id));
        let running = self
            .clients
            .iter()
            .filter_map(|c| self.records.get(c.record))
            .filter(|r| r.is_valid() && r.restart_style_hint != RestartStyleHint::Never);
        let records: Vec<&PropertyRecord> = restart.chain(running).collect();
        let count = records.len();

        let desktop = &self.services.desktop;
        let workspaces: Vec<u32> = (0..desktop.screen_count())
            .map(|screen| desktop.active_workspace(screen).unwrap_or(0))
            .collect();

        file.store(&name, records, &workspaces, Utc::now().timestamp());
        match file.write() {
            Ok(()) => info!(session = %name, count, "session stored"),
            Err(err) => error!(%err, "failed to write session file"),
        }

        self.checkpoint_session_name = None;
    }
}
