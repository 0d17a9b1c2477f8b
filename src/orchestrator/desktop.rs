//! Headless desktop used when no window manager is queried.

use std::sync::Mutex;

use tracing::debug;

use crate::config::DesktopConfig;
use crate::manager::services::Desktop;
use crate::{AppError, Result};

/// [`Desktop`] with a fixed shape that remembers the active workspaces.
#[derive(Debug)]
pub struct StaticDesktop {
    workspaces: u32,
    active: Mutex<Vec<u32>>,
}

impl StaticDesktop {
    /// Desktop shaped after `config`, every screen on workspace 0.
    #[must_use]
    pub fn new(config: &DesktopConfig) -> Self {
        Self {
            workspaces: u32::try_from(config.workspaces).unwrap_or(u32::MAX),
            active: Mutex::new(vec![0; config.screens]),
        }
    }
}

impl Desktop for StaticDesktop {
    fn screen_count(&self) -> usize {
        self.active.lock().map_or(0, |active| active.len())
    }

    fn active_workspace(&self, screen: usize) -> Option<u32> {
        self.active
            .lock()
            .ok()
            .and_then(|active| active.get(screen).copied())
    }

    fn workspace_count(&self, _screen: usize) -> u32 {
        self.workspaces
    }

    fn activate_workspace(&self, screen: usize, workspace: u32) -> Result<()> {
        if workspace >= self.workspaces {
            return Err(AppError::NotFound(format!("no workspace {workspace}")));
        }
        let mut active = self
            .active
            .lock()
            .map_err(|_| AppError::BadState("desktop state poisoned".into()))?;
        let slot = active
            .get_mut(screen)
            .ok_or_else(|| AppError::NotFound(format!("no screen {screen}")))?;
        *slot = workspace;
        debug!(screen, workspace, "workspace activated");
        Ok(())
    }
}
