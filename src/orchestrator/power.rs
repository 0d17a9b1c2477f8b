//! Command-driven power backend.

use std::process::{Command, Stdio};

use tracing::{info, info_span};

use crate::config::PowerConfig;
use crate::manager::services::{PowerAction, PowerCapability, PowerControl};
use crate::{AppError, Result};

/// [`PowerControl`] that runs the configured commands.
#[derive(Debug, Clone)]
pub struct SystemPower {
    config: PowerConfig,
}

impl SystemPower {
    /// Backend running the commands in `config`.
    #[must_use]
    pub fn new(config: PowerConfig) -> Self {
        Self { config }
    }

    fn command(&self, action: PowerAction) -> &[String] {
        match action {
            PowerAction::Shutdown => &self.config.shutdown_command,
            PowerAction::Restart => &self.config.restart_command,
            PowerAction::Suspend => &self.config.suspend_command,
            PowerAction::Hibernate => &self.config.hibernate_command,
        }
    }
}

impl PowerControl for SystemPower {
    fn capability(&self, action: PowerAction) -> PowerCapability {
        let authorized = match action {
            PowerAction::Shutdown | PowerAction::Restart => true,
            PowerAction::Suspend | PowerAction::Hibernate => self.config.allow_sleep,
        };
        PowerCapability {
            available: !self.command(action).is_empty(),
            authorized,
        }
    }

    fn try_action(&self, action: PowerAction) -> Result<()> {
        let span = info_span!("power_action", ?action);
        let _guard = span.enter();

        let cap = self.capability(action);
        if !cap.available {
            return Err(AppError::Power(format!("{action:?} is not configured")));
        }
        if !cap.authorized {
            return Err(AppError::Power(format!("{action:?} is not permitted")));
        }

        let Some((program, args)) = self.command(action).split_first() else {
            return Err(AppError::Power(format!("{action:?} is not configured")));
        };
        info!(program = %program, "running power command");
        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .status()
            .map_err(|err| AppError::Power(format!("failed to run {program}: {err}")))?;

        if status.success() {
            Ok(())
        } else {
            Err(AppError::Power(format!("{program} exited with {status}")))
        }
    }
}
