//! Client registration, property updates and disconnects.

use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use super::{ExitReason, Manager, ManagerEvent};
use crate::models::client::{local_hostname, Client, ClientState};
use crate::models::properties::{PropertyRecord, PropertyUpdate};
use crate::models::protocol::{
    ConnectionId, InteractStyle, ManagerState, SaveType, ServerMessage,
};
use crate::session::store::Location;
use crate::session::timers::TimerKind;
use crate::{AppError, Result};

impl Manager {
    /// Register the client on `conn`, resuming `previous_id` if given.
    ///
    /// Returns the client id assigned to the connection.
    ///
    /// # Errors
    ///
    /// * `AppError::BadState` outside `Startup` and `Idle`.
    /// * `AppError::Protocol` when the connection is already registered or
    ///   `previous_id` matches no pending or starting record.
    pub fn register_client(
        &mut self,
        conn: ConnectionId,
        previous_id: Option<&str>,
        hostname: &str,
    ) -> Result<String> {
        let span = info_span!("register_client", %conn, previous_id = previous_id.unwrap_or(""));
        let _guard = span.enter();

        if self.client_index(conn).is_some() {
            self.nuke(conn, "registered twice");
            return Err(AppError::Protocol(format!("{conn} is already registered")));
        }

        if !matches!(self.state, ManagerState::Startup | ManagerState::Idle) {
            self.send(
                conn,
                ServerMessage::RegisterFailed {
                    reason: format!("session is in {} state", self.state),
                },
            );
            return Err(AppError::BadState(format!(
                "cannot register clients while in {} state",
                self.state
            )));
        }

        let record = if let Some(previous) = previous_id {
            let found = self
                .records
                .find_queued(Location::Starting, previous)
                .or_else(|| self.records.find_queued(Location::Pending, previous));
            let Some(id) = found else {
                self.send(
                    conn,
                    ServerMessage::RegisterFailed {
                        reason: format!("unknown client id {previous}"),
                    },
                );
                return Err(AppError::Protocol(format!(
                    "no saved properties match client id {previous}"
                )));
            };

            self.records.move_to(id, Location::Client(conn));
            let reset_after = self.config.restart_reset_timeout();
            if let Some(entry) = self.records.entry_mut(id) {
                if let Some(timer) = entry.startup_timer.take() {
                    self.timers.cancel(timer);
                }
                if !hostname.is_empty() {
                    entry.record.hostname = hostname.to_owned();
                }
                if entry.record.restart_attempts > 0 && entry.reset_timer.is_none() {
                    entry.reset_timer = Some(
                        self.timers
                            .schedule(reset_after, TimerKind::RestartReset(id)),
                    );
                }
            }
            id
        } else {
            let client_id = self.generate_client_id();
            let hostname = if hostname.is_empty() {
                local_hostname()
            } else {
                hostname.to_owned()
            };
            self.records.insert(
                PropertyRecord::new(client_id, hostname),
                Location::Client(conn),
            )
        };

        self.clients.push(Client::new(conn, record));
        let client_id = self
            .records
            .get(record)
            .map(|r| r.client_id.clone())
            .unwrap_or_default();

        self.send(
            conn,
            ServerMessage::RegisterReply {
                client_id: client_id.clone(),
            },
        );
        self.emit(ManagerEvent::ClientRegistered {
            client_id: client_id.clone(),
        });
        info!(client_id, "client registered");

        if previous_id.is_none() {
            self.send(
                conn,
                ServerMessage::SaveYourself {
                    save_type: SaveType::Local,
                    shutdown: false,
                    interact_style: InteractStyle::None,
                    fast: false,
                },
            );
            let idx = self.clients.len() - 1;
            self.clients[idx].state = ClientState::SavingLocal;
            self.arm_save_timer(idx);
        } else if self.state == ManagerState::Startup && self.records.starting().is_empty() {
            self.startup_continue();
        }

        Ok(client_id)
    }

    pub(super) fn set_properties(&mut self, conn: ConnectionId, update: &PropertyUpdate) {
        let Some(idx) = self.client_index(conn) else {
            return;
        };
        if let Some(record) = self.records.get_mut(self.clients[idx].record) {
            record.apply(update);
            debug!(client_id = %record.client_id, "properties updated");
        }
    }

    pub(super) fn delete_properties(&mut self, conn: ConnectionId, names: &[String]) {
        let Some(idx) = self.client_index(conn) else {
            return;
        };
        if let Some(record) = self.records.get_mut(self.clients[idx].record) {
            record.delete(names);
            debug!(client_id = %record.client_id, ?names, "properties deleted");
        }
    }

    /// Ask the idle client with `client_id` to exit.
    ///
    /// # Errors
    ///
    /// Returns `AppError::BadState` unless both the manager and the client
    /// are idle, or `AppError::NotFound` for an unknown id.
    pub fn terminate_client(&mut self, client_id: &str) -> Result<()> {
        if self.state != ManagerState::Idle {
            return Err(AppError::BadState(
                "can only terminate clients when in the idle state".into(),
            ));
        }
        let Some(client) = self.clients.iter().find(|c| {
            self.records
                .get(c.record)
                .is_some_and(|r| r.client_id == client_id)
        }) else {
            return Err(AppError::NotFound(format!("no client with id {client_id}")));
        };
        if client.state != ClientState::Idle {
            return Err(AppError::BadState(format!(
                "client {client_id} is {}",
                client.state.as_str()
            )));
        }
        let conn = client.conn;
        info!(client_id, "terminating client");
        self.send(conn, ServerMessage::Die);
        Ok(())
    }

    /// Forget the client on `conn`, tearing the connection down if `cleanup`.
    pub fn close_connection(&mut self, conn: ConnectionId, cleanup: bool) {
        let Some(idx) = self.client_index(conn) else {
            if cleanup {
                self.services.transport.close(conn);
            }
            return;
        };

        let was_interacting = self.clients[idx].state == ClientState::Interacting;
        self.clients[idx].state = ClientState::Disconnected;
        self.cancel_save_timer(idx);
        if cleanup {
            self.services.transport.close(conn);
        }

        match self.state {
            ManagerState::ShutdownPhase2 => {
                if self
                    .clients
                    .iter()
                    .all(|c| c.state == ClientState::Disconnected)
                {
                    if let Some(timer) = self.die_timer.take() {
                        self.timers.cancel(timer);
                    }
                    self.exit(ExitReason::AllClientsGone);
                }
            }
            ManagerState::Checkpoint | ManagerState::Shutdown => {
                warn!(%conn, "client left during a save, dropping it");
                let client = self.clients.remove(idx);
                self.drop_record(client.record);
                if was_interacting {
                    self.promote_next_interact();
                }
                self.complete_save_yourself();
            }
            ManagerState::Startup | ManagerState::Idle => {
                let client = self.clients.remove(idx);
                let valid = self
                    .records
                    .get(client.record)
                    .is_some_and(PropertyRecord::is_valid);
                if valid {
                    self.handle_failed_properties(client.record);
                } else {
                    self.drop_record(client.record);
                }
            }
        }
    }

    pub(super) fn nuke(&mut self, conn: ConnectionId, reason: &str) {
        warn!(%conn, reason, "protocol violation, disconnecting client");
        self.close_connection(conn, true);
    }

    fn generate_client_id(&self) -> String {
        loop {
            let candidate = Uuid::new_v4().simple().to_string();
            if !self.records.contains_client_id(&candidate) {
                return candidate;
            }
        }
    }
}
