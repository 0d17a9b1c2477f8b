//! Headless stand-ins for the logout prompt and session chooser.
//!
//! Without a display to draw on, the logout prompt is either answered from
//! configuration straight away or left pending for the control socket's
//! `answer_logout` command.

use tracing::{error, info};

use crate::config::LogoutConfig;
use crate::manager::services::{ChooserAnswer, Dialogs, LogoutChoice};
use crate::models::protocol::ShutdownType;
use crate::orchestrator::reactor::{ReactorEvent, ReactorSender};
use crate::session::persistence::SessionSummary;

/// [`Dialogs`] driven by configuration and the control socket.
#[derive(Debug, Clone)]
pub struct HeadlessDialogs {
    logout: LogoutConfig,
    preferred_session: String,
    events: ReactorSender,
}

impl HeadlessDialogs {
    /// Prompts answering per `logout`, preferring `preferred_session` in the
    /// chooser.
    #[must_use]
    pub fn new(
        logout: LogoutConfig,
        preferred_session: impl Into<String>,
        events: ReactorSender,
    ) -> Self {
        Self {
            logout,
            preferred_session: preferred_session.into(),
            events,
        }
    }
}

impl Dialogs for HeadlessDialogs {
    fn request_logout(&self, current: ShutdownType, allow_save: bool) {
        if !self.logout.auto_confirm {
            info!(?current, allow_save, "logout awaiting confirmation on the control socket");
            return;
        }

        let choice = LogoutChoice {
            shutdown_type: self.logout.default_action,
            allow_save: allow_save && self.logout.allow_save,
        };
        info!(?choice, "logout confirmed automatically");
        // The answer is handled on the next reactor turn.
        let _ = self.events.send(ReactorEvent::LogoutAnswer(Some(choice)));
    }

    fn choose_session(&self, sessions: &[SessionSummary]) -> ChooserAnswer {
        if sessions.iter().any(|s| s.name == self.preferred_session) {
            return ChooserAnswer::Load(self.preferred_session.clone());
        }
        match sessions.first() {
            Some(latest) => ChooserAnswer::Load(latest.name.clone()),
            None => ChooserAnswer::New(self.preferred_session.clone()),
        }
    }

    fn show_error(&self, message: &str) {
        error!(message, "session error");
    }
}
