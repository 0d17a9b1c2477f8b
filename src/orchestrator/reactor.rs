//! Single-task event loop driving the manager.
//!
//! Transport tasks, process watchers, the control server and dialogs talk to
//! the manager only by sending [`ReactorEvent`]s. The reactor handles them one
//! at a time, sleeps until the next deadline in between, and stops once the
//! manager reports an exit reason.

use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::manager::services::LogoutChoice;
use crate::manager::{ControlReply, ControlRequest, ExitReason, Manager};
use crate::models::protocol::{ClientMessage, ConnectionId};
use crate::session::store::LaunchId;
use crate::Result;

/// Input delivered to the reactor.
#[derive(Debug)]
pub enum ReactorEvent {
    /// A decoded protocol message.
    Message {
        /// Sending connection.
        conn: ConnectionId,
        /// Decoded message.
        message: ClientMessage,
    },
    /// A connection closed or failed.
    Disconnected {
        /// Closed connection.
        conn: ConnectionId,
    },
    /// A control request awaiting a reply.
    Control {
        /// Request.
        request: ControlRequest,
        /// Where to send the reply.
        reply: oneshot::Sender<Result<ControlReply>>,
    },
    /// A launched process exited.
    ProcessExited {
        /// Client id the process was launched for.
        client_id: String,
        /// Launch the process belonged to.
        launch: LaunchId,
    },
    /// The user answered the logout prompt; `None` cancels.
    LogoutAnswer(Option<LogoutChoice>),
}

/// Sending half of the reactor channel.
pub type ReactorSender = mpsc::UnboundedSender<ReactorEvent>;

/// Receiving half of the reactor channel.
pub type ReactorReceiver = mpsc::UnboundedReceiver<ReactorEvent>;

/// Create a reactor channel.
#[must_use]
pub fn channel() -> (ReactorSender, ReactorReceiver) {
    mpsc::unbounded_channel()
}

/// Why the reactor returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorExit {
    /// The session ended.
    Session(ExitReason),
    /// The cancellation token fired.
    Cancelled,
    /// Every sender was dropped.
    ChannelClosed,
}

/// Drive `manager` until the session ends or `ct` is cancelled.
pub async fn run_reactor(
    manager: &mut Manager,
    mut events: ReactorReceiver,
    ct: CancellationToken,
) -> ReactorExit {
    let span = info_span!("reactor");
    async move {
        loop {
            manager.run_deferred();
            if let Some(reason) = manager.exit_reason() {
                info!(%reason, "reactor stopping");
                return ReactorExit::Session(reason);
            }

            let deadline = manager.next_deadline();
            tokio::select! {
                () = ct.cancelled() => {
                    info!("reactor cancelled");
                    return ReactorExit::Cancelled;
                }
                () = sleep_until(deadline) => manager.fire_due_timers(),
                event = events.recv() => match event {
                    Some(event) => dispatch(manager, event),
                    None => {
                        warn!("reactor channel closed");
                        return ReactorExit::ChannelClosed;
                    }
                },
            }
        }
    }
    .instrument(span)
    .await
}

fn dispatch(manager: &mut Manager, event: ReactorEvent) {
    match event {
        ReactorEvent::Message { conn, message } => manager.handle_message(conn, message),
        ReactorEvent::Disconnected { conn } => manager.handle_disconnect(conn),
        ReactorEvent::Control { request, reply } => {
            let result = manager.handle_control(request);
            if reply.send(result).is_err() {
                debug!("control requester went away before the reply");
            }
        }
        ReactorEvent::ProcessExited { client_id, launch } => {
            manager.handle_process_exit(&client_id, launch);
        }
        ReactorEvent::LogoutAnswer(choice) => manager.answer_logout(choice),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
        }
        None => std::future::pending().await,
    }
}
