//! Application process launcher.
//!
//! Restart commands are spawned detached from the reactor; a watcher task
//! reaps each child and reports its exit so the manager can notice clients
//! that die before registering. Discard and shutdown commands run to
//! completion on the calling thread.

use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::manager::services::Launcher;
use crate::models::properties::PropertyRecord;
use crate::session::store::LaunchId;
use crate::orchestrator::reactor::{ReactorEvent, ReactorSender};
use crate::{AppError, Result};

/// [`Launcher`] backed by real processes.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    display: String,
    events: ReactorSender,
}

impl ProcessLauncher {
    /// Launcher binding per-screen commands to `display`.
    #[must_use]
    pub fn new(display: impl Into<String>, events: ReactorSender) -> Self {
        Self {
            display: display.into(),
            events,
        }
    }

    /// `DISPLAY` value for `screen`, replacing any screen suffix.
    #[must_use]
    pub fn screen_display(&self, screen: usize) -> String {
        screen_display(&self.display, screen)
    }
}

/// Rewrite `display` (e.g. `:0.1`) to address `screen`.
#[must_use]
pub fn screen_display(display: &str, screen: usize) -> String {
    let base = match display.rfind(':') {
        Some(colon) => match display[colon..].find('.') {
            Some(dot) => &display[..colon + dot],
            None => display,
        },
        None => display,
    };
    format!("{base}.{screen}")
}

fn split_command(command: &[String]) -> Result<(&String, &[String])> {
    command
        .split_first()
        .ok_or_else(|| AppError::Spawn("empty command".into()))
}

impl Launcher for ProcessLauncher {
    fn start(&self, record: &PropertyRecord, launch: LaunchId) -> Result<()> {
        let (program, args) = split_command(&record.restart_command)?;

        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null());
        if let Some(ref dir) = record.current_directory {
            cmd.current_dir(dir);
        }
        if !record.environment.is_empty() {
            cmd.env_clear().envs(record.env_pairs());
        }

        let mut child = cmd
            .spawn()
            .map_err(|err| AppError::Spawn(format!("failed to spawn {program}: {err}")))?;

        info!(
            client_id = %record.client_id,
            %launch,
            pid = child.id().unwrap_or(0),
            program = record.program_name(),
            "client launched"
        );

        let events = self.events.clone();
        let client_id = record.client_id.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!(%client_id, %status, "client process exited"),
                Err(err) => warn!(%client_id, %err, "failed to wait for client process"),
            }
            // The reactor may already be gone during teardown.
            let _ = events.send(ReactorEvent::ProcessExited { client_id, launch });
        });

        Ok(())
    }

    fn start_command(&self, command: &[String], screen: Option<usize>) -> Result<()> {
        let (program, args) = split_command(command)?;

        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null());
        if let Some(screen) = screen {
            cmd.env("DISPLAY", self.screen_display(screen));
        }

        let mut child = cmd
            .spawn()
            .map_err(|err| AppError::Spawn(format!("failed to spawn {program}: {err}")))?;
        info!(program = %program, pid = child.id().unwrap_or(0), ?screen, "command launched");

        tokio::spawn(async move {
            if let Err(err) = child.wait().await {
                warn!(%err, "failed to reap command");
            }
        });
        Ok(())
    }

    fn run_sync(&self, command: &[String], record: &PropertyRecord) -> Result<()> {
        let (program, args) = split_command(command)?;

        let mut cmd = std::process::Command::new(program);
        cmd.args(args).stdin(Stdio::null());
        if let Some(ref dir) = record.current_directory {
            cmd.current_dir(dir);
        }
        if !record.environment.is_empty() {
            cmd.env_clear().envs(record.env_pairs());
        }

        let status = cmd
            .status()
            .map_err(|err| AppError::Spawn(format!("failed to run {program}: {err}")))?;
        if status.success() {
            Ok(())
        } else {
            Err(AppError::Spawn(format!("{program} exited with {status}")))
        }
    }
}
