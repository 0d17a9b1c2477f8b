//! Local IPC server for `session-broker-ctl` commands.
//!
//! Accepts `interprocess` local-socket connections on `control_ipc_name`.
//! Each inbound line is one JSON-encoded
//! [`ControlRequest`]; the reactor serves it and the reply goes back as one
//! JSON line.
//!
//! ## Protocol
//!
//! Requests:
//! ```json
//! {"command": "get_info"}
//! {"command": "checkpoint", "name": "Work"}
//! {"command": "logout", "show_dialog": true}
//! {"command": "answer_logout", "choice": {"shutdown_type": "shutdown", "allow_save": true}}
//! ```
//!
//! Replies:
//! ```json
//! {"ok": true, "data": { ... } }
//! {"ok": false, "error": "bad state: ..."}
//! ```

use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::manager::ControlRequest;
use crate::orchestrator::reactor::{ReactorEvent, ReactorSender};
use crate::{AppError, Result};

/// Outbound IPC response to `session-broker-ctl`.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct IpcResponse {
    /// Whether the command succeeded.
    pub ok: bool,
    /// Payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IpcResponse {
    fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Spawn the control server task.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the listener cannot be created.
pub fn spawn_ipc_server(
    name: &str,
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
        .map_err(|err| AppError::Ipc(format!("failed to create ipc listener: {err}")))?;

    info!(ipc_name = %name, "control listener ready");

    let handle = tokio::spawn(async move {
        let span = info_span!("control_server", name = %name);
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("control listener stopping");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                tokio::spawn(handle_connection(stream, events.clone()));
                            }
                            Err(err) => {
                                warn!(%err, "control accept failed");
                            }
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

/// Serve control requests on one connection until EOF.
pub async fn handle_connection<S>(stream: S, events: ReactorSender)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let span = info_span!("control_conn");
    async move {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines_in = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match lines_in.read_line(&mut line).await {
                Ok(0) => break, // EOF
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let response = match serde_json::from_str::<ControlRequest>(trimmed) {
                        Ok(request) => dispatch_command(request, &events).await,
                        Err(err) => IpcResponse::error(format!("invalid request: {err}")),
                    };

                    let mut out = serde_json::to_string(&response).unwrap_or_else(|_| {
                        r#"{"ok":false,"error":"reply encoding failed"}"#.to_owned()
                    });
                    out.push('\n');

                    if let Err(err) = writer.write_all(out.as_bytes()).await {
                        warn!(%err, "failed to write control reply");
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "control read error");
                    break;
                }
            }
        }

        info!("control connection closed");
    }
    .instrument(span)
    .await;
}

/// Hand `request` to the reactor and wait for its reply.
async fn dispatch_command(request: ControlRequest, events: &ReactorSender) -> IpcResponse {
    let (reply, rx) = oneshot::channel();
    if events
        .send(ReactorEvent::Control { request, reply })
        .is_err()
    {
        return IpcResponse::error("session manager is shutting down");
    }

    match rx.await {
        Ok(Ok(reply)) => match serde_json::to_value(&reply) {
            Ok(data) => IpcResponse::success(data),
            Err(err) => IpcResponse::error(format!("failed to encode reply: {err}")),
        },
        Ok(Err(err)) => IpcResponse::error(err.to_string()),
        Err(_) => IpcResponse::error("session manager dropped the request"),
    }
}
