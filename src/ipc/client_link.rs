//! Client protocol connections.
//!
//! Every accepted connection gets a [`ConnectionId`] and a task that decodes
//! inbound lines into [`ClientMessage`]s for the reactor and writes queued
//! [`ServerMessage`]s back out. The manager reaches connections only through
//! the [`ConnectionHub`], which implements [`Transport`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::ipc::codec::LineCodec;
use crate::manager::services::Transport;
use crate::models::protocol::{ClientMessage, ConnectionId, ServerMessage};
use crate::orchestrator::reactor::{ReactorEvent, ReactorSender};
use crate::{AppError, Result};

struct Peer {
    outbound: mpsc::UnboundedSender<ServerMessage>,
    cancel: CancellationToken,
}

/// Registry of live client connections.
#[derive(Default)]
pub struct ConnectionHub {
    next_id: AtomicU64,
    peers: Mutex<HashMap<ConnectionId, Peer>>,
}

impl ConnectionHub {
    /// Empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id for a new connection.
    ///
    /// Returns the id, the queue of messages to write, and a token that is
    /// cancelled when the manager closes the connection or `parent` fires.
    pub fn attach(
        &self,
        parent: &CancellationToken,
    ) -> (
        ConnectionId,
        mpsc::UnboundedReceiver<ServerMessage>,
        CancellationToken,
    ) {
        let conn = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (outbound, rx) = mpsc::unbounded_channel();
        let cancel = parent.child_token();
        if let Ok(mut peers) = self.peers.lock() {
            peers.insert(
                conn,
                Peer {
                    outbound,
                    cancel: cancel.clone(),
                },
            );
        }
        (conn, rx, cancel)
    }

    /// Forget `conn` without cancelling it.
    pub fn detach(&self, conn: ConnectionId) {
        if let Ok(mut peers) = self.peers.lock() {
            peers.remove(&conn);
        }
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.lock().map_or(0, |peers| peers.len())
    }

    /// Whether no connection is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Transport for ConnectionHub {
    fn send(&self, conn: ConnectionId, message: ServerMessage) -> Result<()> {
        let peers = self
            .peers
            .lock()
            .map_err(|_| AppError::Ipc("connection table poisoned".into()))?;
        let peer = peers
            .get(&conn)
            .ok_or_else(|| AppError::Ipc(format!("{conn} is not connected")))?;
        peer.outbound
            .send(message)
            .map_err(|_| AppError::Ipc(format!("{conn} is closing")))
    }

    fn close(&self, conn: ConnectionId) {
        let peer = self
            .peers
            .lock()
            .ok()
            .and_then(|mut peers| peers.remove(&conn));
        if let Some(peer) = peer {
            debug!(%conn, "closing client connection");
            peer.cancel.cancel();
        }
    }
}

/// Spawn the listener accepting protocol clients on `name`.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the listener cannot be created.
pub fn spawn_client_listener(
    name: &str,
    hub: Arc<ConnectionHub>,
    events: ReactorSender,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let name = name.to_owned();
    let listener_name = name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{name}': {err}")))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to create client listener: {err}")))?;

    info!(ipc_name = %name, "client listener ready");

    let handle = tokio::spawn(async move {
        let span = info_span!("client_listener", name = %name);
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("client listener shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                tokio::spawn(serve_connection(
                                    stream,
                                    Arc::clone(&hub),
                                    events.clone(),
                                    ct.clone(),
                                ));
                            }
                            Err(err) => warn!(%err, "client accept failed"),
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await;
    });

    Ok(handle)
}

/// Pump one client connection until either side closes it.
///
/// Malformed or oversized lines drop the connection. The reactor always
/// receives a final [`ReactorEvent::Disconnected`].
pub async fn serve_connection<S>(
    stream: S,
    hub: Arc<ConnectionHub>,
    events: ReactorSender,
    ct: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (conn, mut outbound, cancel) = hub.attach(&ct);
    let span = info_span!("client_conn", %conn);
    async move {
        debug!("client connected");
        let (reader, writer) = tokio::io::split(stream);
        let mut inbound = FramedRead::new(reader, LineCodec::new());
        let mut sink = FramedWrite::new(writer, LineCodec::new());

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!("connection cancelled");
                    break;
                }

                message = outbound.recv() => {
                    let Some(message) = message else { break };
                    let line = match serde_json::to_string(&message) {
                        Ok(line) => line,
                        Err(err) => {
                            warn!(%err, "failed to serialise server message");
                            continue;
                        }
                    };
                    if let Err(err) = sink.send(line).await {
                        warn!(%err, "write to client failed");
                        break;
                    }
                }

                item = inbound.next() => match item {
                    None => {
                        debug!("client closed the stream");
                        break;
                    }
                    Some(Err(err)) => {
                        warn!(%err, "client stream error, dropping connection");
                        break;
                    }
                    Some(Ok(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<ClientMessage>(&line) {
                            Ok(message) => {
                                if events.send(ReactorEvent::Message { conn, message }).is_err() {
                                    debug!("reactor gone, stopping");
                                    break;
                                }
                            }
                            Err(err) => {
                                warn!(%err, raw_line = %line, "malformed client message, dropping connection");
                                break;
                            }
                        }
                    }
                },
            }
        }

        hub.detach(conn);
        // The reactor may already be gone during teardown.
        let _ = events.send(ReactorEvent::Disconnected { conn });
        debug!("client connection closed");
    }
    .instrument(span)
    .await;
}
