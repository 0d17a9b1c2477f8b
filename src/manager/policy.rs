//! Restart policy and shutdown phase 2.

use tracing::{debug, info, info_span, warn};

use super::{ExitReason, Manager};
use crate::models::client::ClientState;
use crate::models::properties::{PropertyRecord, RestartStyleHint};
use crate::models::protocol::{ManagerState, ServerMessage};
use crate::session::store::{Location, RecordId};
use crate::session::timers::{TimerId, TimerKind};
use crate::{AppError, Result};

impl Manager {
    /// Decide what happens to a record whose process went away.
    ///
    /// `Anyway` records wait for the next session. `Immediately` records are
    /// relaunched until they exceed the attempt limit. Everything else is
    /// dropped after running its discard command.
    pub(super) fn handle_failed_properties(&mut self, id: RecordId) {
        if let Some(entry) = self.records.entry_mut(id) {
            for timer in [entry.reset_timer.take(), entry.startup_timer.take()]
                .into_iter()
                .flatten()
            {
                self.timers.cancel(timer);
            }
        }

        let Some(record) = self.records.get_mut(id) else {
            return;
        };
        let span = info_span!(
            "handle_failed_properties",
            client_id = %record.client_id,
            program = record.program_name()
        );
        let _guard = span.enter();

        match record.restart_style_hint {
            RestartStyleHint::Anyway => {
                info!("deferring client to next session");
                self.records.move_to(id, Location::Restart);
            }
            RestartStyleHint::Immediately => {
                record.restart_attempts += 1;
                let attempts = record.restart_attempts;
                if attempts > self.config.max_restart_attempts {
                    warn!(attempts, "client keeps failing, deferring to next session");
                    self.records.move_to(id, Location::Restart);
                } else if let Err(err) = self.try_launch(id) {
                    warn!(%err, "immediate restart failed, deferring to next session");
                    self.records.move_to(id, Location::Restart);
                } else {
                    info!(attempts, "client restarted");
                }
            }
            RestartStyleHint::IfRunning | RestartStyleHint::Never => {
                if let Some(entry) = self.records.remove(id) {
                    debug!("dropping client properties");
                    self.run_discard(&entry.record);
                }
            }
        }
    }

    /// Launch the record's restart command and wait for it to register.
    pub(super) fn try_launch(&mut self, id: RecordId) -> Result<()> {
        if self.records.get(id).is_none() {
            return Err(AppError::NotFound(format!("no record {id}")));
        }
        let launch = self.records.next_launch();
        let Some(record) = self.records.get(id) else {
            return Err(AppError::NotFound(format!("no record {id}")));
        };
        self.services.launcher.start(record, launch)?;

        self.records.move_to(id, Location::Starting);
        let timer = self
            .timers
            .schedule(self.config.startup_timeout(), TimerKind::StartupTimeout(id));
        if let Some(entry) = self.records.entry_mut(id) {
            entry.launch = Some(launch);
            if let Some(old) = entry.startup_timer.replace(timer) {
                self.timers.cancel(old);
            }
        }
        Ok(())
    }

    fn run_discard(&self, record: &PropertyRecord) {
        if record.discard_command.is_empty() {
            return;
        }
        if let Err(err) = self
            .services
            .launcher
            .run_sync(&record.discard_command, record)
        {
            warn!(%err, client_id = %record.client_id, "discard command failed");
        }
    }

    /// Tell every client to die and wait for the connections to close.
    pub(super) fn perform_shutdown(&mut self) {
        let span = info_span!("perform_shutdown");
        let _guard = span.enter();

        self.set_state(ManagerState::ShutdownPhase2);
        for client in self
            .clients
            .iter()
            .filter(|c| c.state != ClientState::Disconnected)
        {
            self.send(client.conn, ServerMessage::Die);
        }

        for id in self.records.restart() {
            let Some(record) = self.records.get(*id) else {
                continue;
            };
            if record.restart_style_hint != RestartStyleHint::Anyway
                || record.shutdown_command.is_empty()
            {
                continue;
            }
            debug!(client_id = %record.client_id, "running shutdown command");
            if let Err(err) = self
                .services
                .launcher
                .run_sync(&record.shutdown_command, record)
            {
                warn!(%err, client_id = %record.client_id, "shutdown command failed");
            }
        }

        if self
            .clients
            .iter()
            .all(|c| c.state == ClientState::Disconnected)
        {
            self.exit(ExitReason::AllClientsGone);
            return;
        }

        self.die_timer = Some(
            self.timers
                .schedule(self.config.die_timeout(), TimerKind::DieTimeout),
        );
    }

    pub(super) fn die_timeout(&mut self, timer: TimerId) {
        if self.die_timer != Some(timer) {
            return;
        }
        self.die_timer = None;
        let remaining = self
            .clients
            .iter()
            .filter(|c| c.state != ClientState::Disconnected)
            .count();
        warn!(remaining, "clients did not exit in time");
        self.exit(ExitReason::DieTimeout);
    }

    pub(super) fn reset_restart_attempts(&mut self, id: RecordId, timer: TimerId) {
        let Some(entry) = self.records.entry_mut(id) else {
            return;
        };
        if entry.reset_timer != Some(timer) {
            return;
        }
        entry.reset_timer = None;
        entry.record.restart_attempts = 0;
        debug!(client_id = %entry.record.client_id, "restart attempts reset");
    }
}
