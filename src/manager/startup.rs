//! Session selection and application launch.

use tracing::{debug, info, info_span, warn};

use super::services::ChooserAnswer;
use super::Manager;
use crate::models::protocol::ManagerState;
use crate::session::failsafe::load_failsafe;
use crate::session::persistence::SessionFile;
use crate::session::store::{LaunchId, Location, RecordId};
use crate::session::timers::TimerId;
use crate::Result;

/// What [`Manager::load`] decided to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A saved session with at least one record.
    Session(String),
    /// The failsafe session from configuration.
    Failsafe(String),
    /// The user chose to log out from the chooser.
    Logout,
}

impl Manager {
    /// Pick the session to start and fill the pending queue.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Failsafe` when no saved session is usable and the
    /// failsafe session cannot be loaded. The error is also reported through
    /// the dialog collaborator.
    pub fn load(&mut self) -> Result<LoadOutcome> {
        let path = self.config.session_file();
        let span = info_span!("load_session", path = %path.display());
        let _guard = span.enter();

        let file = match SessionFile::open(&path) {
            Ok(file) => Some(file),
            Err(err) => {
                warn!(%err, "ignoring unreadable session file");
                None
            }
        };

        let mut name = self.session_name.clone();
        let mut fresh = false;
        if let Some(ref file) = file {
            let sessions = file.sessions();
            if self.config.chooser.always_display && !sessions.is_empty() {
                match self.services.dialogs.choose_session(&sessions) {
                    ChooserAnswer::Logout => {
                        info!("user chose to log out from the session chooser");
                        return Ok(LoadOutcome::Logout);
                    }
                    ChooserAnswer::Load(chosen) => name = chosen,
                    ChooserAnswer::New(chosen) => {
                        name = chosen;
                        fresh = true;
                    }
                }
            }
        }
        self.session_name.clone_from(&name);

        if !fresh {
            if let Some(saved) = file.as_ref().and_then(|f| f.load(&name)) {
                if !saved.records.is_empty() {
                    for record in saved.records {
                        if self.records.contains_client_id(&record.client_id) {
                            warn!(client_id = %record.client_id, "duplicate client id in session file");
                            continue;
                        }
                        self.records.insert(record, Location::Pending);
                    }
                    self.saved_workspaces = saved.workspaces;
                    info!(session = %name, records = self.records.len(), "saved session loaded");
                    return Ok(LoadOutcome::Session(name));
                }
            }
        }

        let screens = self.services.desktop.screen_count();
        match load_failsafe(&self.config, screens) {
            Ok(failsafe) => {
                info!(session = %failsafe.name, clients = failsafe.clients.len(), "using failsafe session");
                self.failsafe_mode = true;
                self.failsafe_clients = failsafe.clients;
                Ok(LoadOutcome::Failsafe(failsafe.name))
            }
            Err(err) => {
                self.services
                    .dialogs
                    .show_error(&format!("Unable to load a failsafe session: {err}"));
                Err(err)
            }
        }
    }

    /// Launch compat services and then the session itself.
    pub fn startup(&mut self) {
        let span = info_span!("startup", failsafe = self.failsafe_mode);
        let _guard = span.enter();

        for command in &self.config.compat.commands {
            if let Err(err) = self.services.launcher.start_command(command, None) {
                warn!(%err, ?command, "failed to start compat service");
            }
        }

        self.records.sort_pending_by_priority();

        if self.failsafe_mode {
            for client in std::mem::take(&mut self.failsafe_clients) {
                if let Err(err) = self
                    .services
                    .launcher
                    .start_command(&client.command, Some(client.screen))
                {
                    warn!(%err, command = ?client.command, "failed to start failsafe client");
                }
            }
            self.startup_done();
            return;
        }

        self.startup_continue();
    }

    /// Launch the next priority group once nothing is starting.
    pub(super) fn startup_continue(&mut self) {
        loop {
            if self.state != ManagerState::Startup || !self.records.starting().is_empty() {
                return;
            }
            let Some(priority) = self
                .records
                .pending()
                .front()
                .and_then(|id| self.records.get(*id))
                .map(|r| r.priority)
            else {
                self.startup_done();
                return;
            };

            let group: Vec<RecordId> = self
                .records
                .pending()
                .iter()
                .copied()
                .take_while(|id| self.records.get(*id).is_some_and(|r| r.priority == priority))
                .collect();
            debug!(priority, count = group.len(), "launching priority group");

            let mut launched = 0_usize;
            for id in group {
                match self.try_launch(id) {
                    Ok(()) => launched += 1,
                    Err(err) => {
                        warn!(%err, record = %id, "failed to launch client");
                        self.handle_failed_properties(id);
                    }
                }
            }
            if launched > 0 {
                return;
            }
        }
    }

    fn startup_done(&mut self) {
        info!("session startup complete");
        self.set_state(ManagerState::Idle);
        if !self.failsafe_mode && !self.workspaces_restored {
            self.workspaces_restored = true;
            self.restore_workspaces();
        }
    }

    fn restore_workspaces(&self) {
        let desktop = &self.services.desktop;
        let screens = desktop.screen_count();
        for (screen, workspace) in self.saved_workspaces.iter().enumerate().take(screens) {
            let Some(workspace) = *workspace else {
                continue;
            };
            if workspace >= desktop.workspace_count(screen) {
                debug!(screen, workspace, "saved workspace no longer exists");
                continue;
            }
            if let Err(err) = desktop.activate_workspace(screen, workspace) {
                warn!(%err, screen, workspace, "failed to restore workspace");
            }
        }
    }

    pub(super) fn startup_timeout(&mut self, id: RecordId, timer: TimerId) {
        let Some(entry) = self.records.entry_mut(id) else {
            return;
        };
        if entry.startup_timer != Some(timer) {
            return;
        }
        entry.startup_timer = None;
        warn!(client_id = %entry.record.client_id, "client did not register in time");
        self.handle_failed_properties(id);
        self.startup_continue();
    }

    /// A launched process exited. Records still waiting to register are
    /// treated as failed, unless `launch` is not their latest launch.
    pub fn handle_process_exit(&mut self, client_id: &str, launch: LaunchId) {
        let Some(id) = self.records.find_queued(Location::Starting, client_id) else {
            debug!(client_id, %launch, "process exited after registering");
            return;
        };
        if self.records.entry(id).and_then(|e| e.launch) != Some(launch) {
            debug!(client_id, %launch, "ignoring exit of a superseded launch");
            return;
        }
        warn!(client_id, %launch, "client exited before registering");
        self.handle_failed_properties(id);
        self.startup_continue();
    }
}
