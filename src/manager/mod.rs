//! Session manager: the protocol state machine.
//!
//! [`Manager`] owns every record, client and deadline. It is driven one
//! event at a time by the reactor and never awaits; collaborators are
//! reached through the synchronous traits in [`services`].

use std::collections::VecDeque;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use tracing::{debug, info, info_span, warn};

use crate::config::GlobalConfig;
use crate::models::client::{Client, ClientState};
use crate::models::protocol::{ClientMessage, ConnectionId, ManagerState, ServerMessage, ShutdownType};
use crate::session::failsafe::FailsafeClient;
use crate::session::store::{RecordId, RecordStore};
use crate::session::timers::{Clock, TimerId, TimerKind, TimerRegistry};

mod clients;
mod control;
mod policy;
mod save;
pub mod services;
mod startup;

pub use control::{ClientInfo, ControlReply, ControlRequest, SessionInfo};
use save::DeferredSave;
pub use save::SaveRequest;
pub use services::Services;
pub use startup::LoadOutcome;

const EVENT_CAPACITY: usize = 64;

/// Notifications for observers of the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    /// The manager moved between states.
    StateChanged {
        /// Previous state.
        old: ManagerState,
        /// New state.
        new: ManagerState,
    },
    /// A client finished registering.
    ClientRegistered {
        /// Assigned client id.
        client_id: String,
    },
    /// A client cancelled the running shutdown.
    ShutdownCancelled,
    /// The user is being asked whether to log out.
    ConfirmationRequested,
}

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Every client closed its connection during shutdown.
    AllClientsGone,
    /// Clients were still connected when the die timeout expired.
    DieTimeout,
}

impl Display for ExitReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllClientsGone => f.write_str("all clients gone"),
            Self::DieTimeout => f.write_str("die timeout"),
        }
    }
}

/// Session manager context.
pub struct Manager {
    config: Arc<GlobalConfig>,
    services: Services,
    timers: TimerRegistry,
    records: RecordStore,
    clients: Vec<Client>,
    state: ManagerState,
    session_name: String,
    checkpoint_session_name: Option<String>,
    shutdown_type: ShutdownType,
    save_session: bool,
    failsafe_mode: bool,
    failsafe_clients: Vec<FailsafeClient>,
    saved_workspaces: Vec<Option<u32>>,
    workspaces_restored: bool,
    pending_prompt: Option<SaveRequest>,
    deferred: VecDeque<DeferredSave>,
    die_timer: Option<TimerId>,
    exit: Option<ExitReason>,
    events: broadcast::Sender<ManagerEvent>,
}

impl Manager {
    /// Create a manager in `Startup` with empty queues.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>, services: Services, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let session_name = config.session_name.clone();
        Self {
            config,
            services,
            timers: TimerRegistry::new(clock),
            records: RecordStore::new(),
            clients: Vec::new(),
            state: ManagerState::Startup,
            session_name,
            checkpoint_session_name: None,
            shutdown_type: ShutdownType::Logout,
            save_session: true,
            failsafe_mode: false,
            failsafe_clients: Vec::new(),
            saved_workspaces: Vec::new(),
            workspaces_restored: false,
            pending_prompt: None,
            deferred: VecDeque::new(),
            die_timer: None,
            exit: None,
            events,
        }
    }

    /// Current manager state.
    #[must_use]
    pub fn state(&self) -> ManagerState {
        self.state
    }

    /// Name the session is stored under.
    #[must_use]
    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    /// Override for the next checkpoint's session name.
    #[must_use]
    pub fn checkpoint_session_name(&self) -> Option<&str> {
        self.checkpoint_session_name.as_deref()
    }

    /// What the running or last shutdown ends in.
    #[must_use]
    pub fn shutdown_type(&self) -> ShutdownType {
        self.shutdown_type
    }

    /// Whether the current group save will be written to disk.
    #[must_use]
    pub fn save_session(&self) -> bool {
        self.save_session
    }

    /// Whether the failsafe session was started.
    #[must_use]
    pub fn failsafe_mode(&self) -> bool {
        self.failsafe_mode
    }

    /// Whether a logout prompt is waiting for an answer.
    #[must_use]
    pub fn prompt_pending(&self) -> bool {
        self.pending_prompt.is_some()
    }

    /// Registered clients in registration order.
    #[must_use]
    pub fn clients(&self) -> &[Client] {
        &self.clients
    }

    /// Record arena and queues.
    #[must_use]
    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    /// Armed deadlines.
    #[must_use]
    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    /// Why the session ended, once it has.
    #[must_use]
    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.exit
    }

    /// Earliest armed deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Subscribe to manager notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    /// Client id of the client on `conn`.
    #[must_use]
    pub fn client_id(&self, conn: ConnectionId) -> Option<&str> {
        let client = self.clients.iter().find(|c| c.conn == conn)?;
        self.records.get(client.record).map(|r| r.client_id.as_str())
    }

    /// State of the client on `conn`.
    #[must_use]
    pub fn client_state(&self, conn: ConnectionId) -> Option<ClientState> {
        self.clients.iter().find(|c| c.conn == conn).map(|c| c.state)
    }

    /// Dispatch one inbound protocol message.
    pub fn handle_message(&mut self, conn: ConnectionId, message: ClientMessage) {
        let span = info_span!("client_message", %conn, message = message.name());
        let _guard = span.enter();

        let message = match message {
            ClientMessage::Register {
                previous_id,
                hostname,
            } => {
                if let Err(err) = self.register_client(conn, previous_id.as_deref(), &hostname) {
                    warn!(%err, "registration refused");
                }
                return;
            }
            other => other,
        };

        if self.client_index(conn).is_none() {
            warn!("message from unregistered connection, closing");
            self.services.transport.close(conn);
            return;
        }

        match message {
            ClientMessage::Register { .. } => {}
            ClientMessage::SetProperties { properties } => self.set_properties(conn, &properties),
            ClientMessage::DeleteProperties { names } => self.delete_properties(conn, &names),
            ClientMessage::SaveYourselfRequest {
                save_type,
                shutdown,
                interact_style,
                fast,
                global,
            } => self.save_yourself(
                conn,
                SaveRequest {
                    save_type,
                    shutdown,
                    interact_style,
                    fast,
                    shutdown_type: ShutdownType::Ask,
                    allow_save: true,
                },
                global,
            ),
            ClientMessage::InteractRequest { dialog_type } => self.interact(conn, dialog_type),
            ClientMessage::InteractDone { cancel_shutdown } => {
                self.interact_done(conn, cancel_shutdown);
            }
            ClientMessage::SaveYourselfDone { success } => self.save_yourself_done(conn, success),
            ClientMessage::SaveYourselfPhase2Request => self.save_yourself_phase2(conn),
            ClientMessage::CloseConnection { reasons } => {
                info!(?reasons, "client closing connection");
                self.close_connection(conn, true);
            }
        }
    }

    /// The transport lost `conn`.
    pub fn handle_disconnect(&mut self, conn: ConnectionId) {
        let span = info_span!("client_disconnect", %conn);
        let _guard = span.enter();
        self.close_connection(conn, false);
    }

    /// Run every deadline that has expired.
    pub fn fire_due_timers(&mut self) {
        while self.exit.is_none() {
            let Some((timer, kind)) = self.timers.pop_due() else {
                break;
            };
            debug!(%timer, ?kind, "deadline expired");
            match kind {
                TimerKind::SaveTimeout(conn) => self.save_timeout(conn, timer),
                TimerKind::DieTimeout => self.die_timeout(timer),
                TimerKind::RestartReset(record) => self.reset_restart_attempts(record, timer),
                TimerKind::StartupTimeout(record) => self.startup_timeout(record, timer),
            }
        }
    }

    /// Run actions queued by control requests.
    pub fn run_deferred(&mut self) {
        while let Some(deferred) = self.deferred.pop_front() {
            if self.exit.is_some() {
                break;
            }
            self.run_deferred_save(deferred);
        }
    }

    // ── Internal helpers ────────────────────────────────

    fn set_state(&mut self, new: ManagerState) {
        let old = self.state;
        if old == new {
            return;
        }
        info!(%old, %new, "manager state changed");
        self.state = new;
        self.emit(ManagerEvent::StateChanged { old, new });
    }

    fn emit(&self, event: ManagerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn send(&self, conn: ConnectionId, message: ServerMessage) {
        if let Err(err) = self.services.transport.send(conn, message) {
            warn!(%conn, %err, "failed to send to client");
        }
    }

    fn client_index(&self, conn: ConnectionId) -> Option<usize> {
        self.clients.iter().position(|c| c.conn == conn)
    }

    fn arm_save_timer(&mut self, idx: usize) {
        let conn = self.clients[idx].conn;
        let timer = self
            .timers
            .schedule(self.config.save_timeout(), TimerKind::SaveTimeout(conn));
        if let Some(old) = self.clients[idx].save_timer.replace(timer) {
            self.timers.cancel(old);
        }
    }

    fn cancel_save_timer(&mut self, idx: usize) {
        if let Some(timer) = self.clients[idx].save_timer.take() {
            self.timers.cancel(timer);
        }
    }

    fn drop_record(&mut self, id: RecordId) {
        if let Some(entry) = self.records.remove(id) {
            for timer in [entry.startup_timer, entry.reset_timer].into_iter().flatten() {
                self.timers.cancel(timer);
            }
        }
    }

    fn exit(&mut self, reason: ExitReason) {
        if self.exit.is_none() {
            info!(%reason, "session ending");
            self.exit = Some(reason);
        }
    }
}
