//! Failsafe session resolution from configuration.

use crate::config::GlobalConfig;
use crate::{AppError, Result};

/// One command of the failsafe session, bound to a screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailsafeClient {
    /// Command line to launch.
    pub command: Vec<String>,
    /// Screen the command runs on.
    pub screen: usize,
}

/// Commands to launch when no saved session is usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailsafeSession {
    /// Configured session name.
    pub name: String,
    /// Expanded launch list.
    pub clients: Vec<FailsafeClient>,
}

/// Resolve the failsafe session, replicating per-screen entries.
///
/// # Errors
///
/// Returns `AppError::Failsafe` when no failsafe session is named, the named
/// session is missing or not marked failsafe, or it has no usable commands.
pub fn load_failsafe(config: &GlobalConfig, screens: usize) -> Result<FailsafeSession> {
    let Some(ref name) = config.failsafe.session_name else {
        return Err(AppError::Failsafe("no failsafe session configured".into()));
    };

    let Some(session) = config.sessions.get(name) else {
        return Err(AppError::Failsafe(format!(
            "failsafe session '{name}' is not defined"
        )));
    };

    if !session.is_failsafe {
        return Err(AppError::Failsafe(format!(
            "session '{name}' is not marked as failsafe"
        )));
    }

    let mut clients = Vec::new();
    for entry in session.clients.iter().filter(|c| !c.command.is_empty()) {
        if entry.per_screen {
            for screen in 0..screens.max(1) {
                clients.push(FailsafeClient {
                    command: entry.command.clone(),
                    screen,
                });
            }
        } else {
            clients.push(FailsafeClient {
                command: entry.command.clone(),
                screen: 0,
            });
        }
    }

    if clients.is_empty() {
        return Err(AppError::Failsafe(format!(
            "failsafe session '{name}' has no clients"
        )));
    }

    Ok(FailsafeSession {
        name: name.clone(),
        clients,
    })
}
