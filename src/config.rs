//! Global configuration parsing and validation.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::models::protocol::ShutdownType;
use crate::{AppError, Result};

/// Session name used when none is configured or the configured one is blank.
pub const DEFAULT_SESSION_NAME: &str = "Default";

/// Longest accepted protocol timeout, one day.
pub const MAX_TIMEOUT_SECONDS: u64 = 86_400;

/// Protocol deadlines, in seconds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// How long a client may take to answer a save-yourself.
    #[serde(default = "default_save_seconds")]
    pub save_seconds: u64,
    /// How long shutdown phase 2 waits for clients to close before exiting.
    #[serde(default = "default_die_seconds")]
    pub die_seconds: u64,
    /// How long a launched application has to register.
    #[serde(default = "default_startup_seconds")]
    pub startup_seconds: u64,
    /// How long a restarted client must stay up before its attempts reset.
    #[serde(default = "default_restart_reset_seconds")]
    pub restart_reset_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            save_seconds: default_save_seconds(),
            die_seconds: default_die_seconds(),
            startup_seconds: default_startup_seconds(),
            restart_reset_seconds: default_restart_reset_seconds(),
        }
    }
}

fn default_save_seconds() -> u64 {
    60
}

fn default_die_seconds() -> u64 {
    7
}

fn default_startup_seconds() -> u64 {
    30
}

fn default_restart_reset_seconds() -> u64 {
    300
}

/// Session chooser behaviour.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ChooserConfig {
    /// Always consult the chooser when saved sessions exist.
    #[serde(default)]
    pub always_display: bool,
}

/// Foreign desktop services launched before the session itself.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CompatConfig {
    /// Argument vectors started fire-and-forget at the beginning of startup.
    #[serde(default)]
    pub commands: Vec<Vec<String>>,
}

/// Shape of the headless desktop used when no window manager is queried.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DesktopConfig {
    /// Number of screens on the display.
    #[serde(default = "default_screens")]
    pub screens: usize,
    /// Number of workspaces per screen.
    #[serde(default = "default_workspaces")]
    pub workspaces: usize,
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            screens: default_screens(),
            workspaces: default_workspaces(),
        }
    }
}

fn default_screens() -> usize {
    1
}

fn default_workspaces() -> usize {
    4
}

/// Answers given by the headless logout prompt.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LogoutConfig {
    /// Answer the logout prompt immediately instead of waiting for `confirm`.
    #[serde(default = "default_true")]
    pub auto_confirm: bool,
    /// Shutdown type picked by an automatic answer.
    #[serde(default = "default_logout_action")]
    pub default_action: ShutdownType,
    /// Whether an automatic answer saves the session.
    #[serde(default = "default_true")]
    pub allow_save: bool,
}

impl Default for LogoutConfig {
    fn default() -> Self {
        Self {
            auto_confirm: true,
            default_action: default_logout_action(),
            allow_save: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_logout_action() -> ShutdownType {
    ShutdownType::Logout
}

/// Which configured session acts as the failsafe.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct FailsafeConfig {
    /// Name of the `[sessions.<name>]` table to fall back on.
    pub session_name: Option<String>,
}

impl Default for FailsafeConfig {
    fn default() -> Self {
        Self {
            session_name: Some("Failsafe".into()),
        }
    }
}

/// One application of a configured session.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionClientConfig {
    /// Command line to launch.
    pub command: Vec<String>,
    /// Launch once per screen instead of once on the default screen.
    #[serde(default)]
    pub per_screen: bool,
}

/// A session defined in configuration rather than saved on disk.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Must be set for the session to be usable as a failsafe.
    #[serde(default)]
    pub is_failsafe: bool,
    /// Applications making up the session.
    #[serde(default)]
    pub clients: Vec<SessionClientConfig>,
}

/// Commands used for system power transitions.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PowerConfig {
    /// Power-off command; empty disables shutdown.
    #[serde(default = "default_shutdown_command")]
    pub shutdown_command: Vec<String>,
    /// Reboot command; empty disables restart.
    #[serde(default = "default_restart_command")]
    pub restart_command: Vec<String>,
    /// Suspend command; empty disables suspend.
    #[serde(default = "default_suspend_command")]
    pub suspend_command: Vec<String>,
    /// Hibernate command; empty disables hibernate.
    #[serde(default = "default_hibernate_command")]
    pub hibernate_command: Vec<String>,
    /// Whether this user may suspend or hibernate.
    #[serde(default = "default_true")]
    pub allow_sleep: bool,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            shutdown_command: default_shutdown_command(),
            restart_command: default_restart_command(),
            suspend_command: default_suspend_command(),
            hibernate_command: default_hibernate_command(),
            allow_sleep: true,
        }
    }
}

fn systemctl(verb: &str) -> Vec<String> {
    vec!["systemctl".into(), verb.into()]
}

fn default_shutdown_command() -> Vec<String> {
    systemctl("poweroff")
}

fn default_restart_command() -> Vec<String> {
    systemctl("reboot")
}

fn default_suspend_command() -> Vec<String> {
    systemctl("suspend")
}

fn default_hibernate_command() -> Vec<String> {
    systemctl("hibernate")
}

fn default_session_name() -> String {
    DEFAULT_SESSION_NAME.into()
}

fn default_display() -> String {
    env::var("DISPLAY").unwrap_or_else(|_| ":0".into())
}

fn default_ipc_name() -> String {
    "session-broker".into()
}

fn default_control_ipc_name() -> String {
    "session-broker-ctl".into()
}

fn default_exempt_programs() -> Vec<String> {
    vec!["xterm".into()]
}

fn default_max_restart_attempts() -> u32 {
    5
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Name of the session to load and save.
    #[serde(default = "default_session_name")]
    pub session_name: String,
    /// Directory holding session files; derived from the cache dir if unset.
    #[serde(default)]
    pub session_dir: Option<PathBuf>,
    /// Display identity the session file is keyed on.
    #[serde(default = "default_display")]
    pub display: String,
    /// Local socket name for protocol clients.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Local socket name for control requests.
    #[serde(default = "default_control_ipc_name")]
    pub control_ipc_name: String,
    /// Programs never asked to save (case-insensitive match).
    #[serde(default = "default_exempt_programs")]
    pub exempt_programs: Vec<String>,
    /// Immediate restarts allowed before a client is deferred to next session.
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,
    /// Protocol deadlines.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Session chooser behaviour.
    #[serde(default)]
    pub chooser: ChooserConfig,
    /// Foreign services launched at startup.
    #[serde(default)]
    pub compat: CompatConfig,
    /// Headless desktop shape.
    #[serde(default)]
    pub desktop: DesktopConfig,
    /// Headless logout prompt answers.
    #[serde(default)]
    pub logout: LogoutConfig,
    /// Failsafe session selection.
    #[serde(default)]
    pub failsafe: FailsafeConfig,
    /// Power transition commands.
    #[serde(default)]
    pub power: PowerConfig,
    /// Sessions defined in configuration.
    #[serde(default)]
    pub sessions: HashMap<String, SessionConfig>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            session_name: default_session_name(),
            session_dir: None,
            display: default_display(),
            ipc_name: default_ipc_name(),
            control_ipc_name: default_control_ipc_name(),
            exempt_programs: default_exempt_programs(),
            max_restart_attempts: default_max_restart_attempts(),
            timeouts: TimeoutConfig::default(),
            chooser: ChooserConfig::default(),
            compat: CompatConfig::default(),
            desktop: DesktopConfig::default(),
            logout: LogoutConfig::default(),
            failsafe: FailsafeConfig::default(),
            power: PowerConfig::default(),
            sessions: HashMap::new(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Per-user configuration file consulted when no `--config` is given.
    #[must_use]
    pub fn default_path() -> PathBuf {
        env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
            .unwrap_or_else(env::temp_dir)
            .join("session-broker")
            .join("config.toml")
    }

    /// Directory holding session files.
    ///
    /// Falls back to `$XDG_CACHE_HOME/sessions`, then `$HOME/.cache/sessions`.
    #[must_use]
    pub fn session_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.session_dir {
            return dir.clone();
        }
        let cache = env::var_os("XDG_CACHE_HOME")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache")))
            .unwrap_or_else(env::temp_dir);
        cache.join("sessions")
    }

    /// Session file for the configured display.
    #[must_use]
    pub fn session_file(&self) -> PathBuf {
        self.session_dir()
            .join(format!("session-broker-{}", self.display))
    }

    /// Save-yourself deadline.
    #[must_use]
    pub fn save_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.save_seconds)
    }

    /// Shutdown phase 2 deadline.
    #[must_use]
    pub fn die_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.die_seconds)
    }

    /// Registration deadline for launched applications.
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.startup_seconds)
    }

    /// Uptime after which restart attempts are forgiven.
    #[must_use]
    pub fn restart_reset_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.restart_reset_seconds)
    }

    /// Whether `program` is exempt from save-yourself requests.
    #[must_use]
    pub fn is_exempt(&self, program: &str) -> bool {
        self.exempt_programs
            .iter()
            .any(|exempt| exempt.eq_ignore_ascii_case(program))
    }

    fn validate(&mut self) -> Result<()> {
        if self.session_name.trim().is_empty() {
            warn!("session_name is blank, using {DEFAULT_SESSION_NAME}");
            self.session_name = DEFAULT_SESSION_NAME.into();
        }

        if self.timeouts.save_seconds == 0 || self.timeouts.die_seconds == 0 {
            return Err(AppError::Config(
                "save_seconds and die_seconds must be greater than zero".into(),
            ));
        }

        let timeouts = [
            ("save_seconds", self.timeouts.save_seconds),
            ("die_seconds", self.timeouts.die_seconds),
            ("startup_seconds", self.timeouts.startup_seconds),
            ("restart_reset_seconds", self.timeouts.restart_reset_seconds),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, v)| *v > MAX_TIMEOUT_SECONDS) {
            return Err(AppError::Config(format!(
                "timeouts.{name} must not exceed {MAX_TIMEOUT_SECONDS}"
            )));
        }

        if self.desktop.screens == 0 {
            return Err(AppError::Config("desktop.screens must be at least 1".into()));
        }

        if self.ipc_name.is_empty() || self.control_ipc_name.is_empty() {
            return Err(AppError::Config("ipc names must not be empty".into()));
        }

        if self.ipc_name == self.control_ipc_name {
            return Err(AppError::Config(
                "ipc_name and control_ipc_name must differ".into(),
            ));
        }

        if self.logout.default_action == ShutdownType::Ask {
            return Err(AppError::Config(
                "logout.default_action cannot be \"ask\"".into(),
            ));
        }

        Ok(())
    }
}
