use std::time::Duration;

use session_broker::config::{GlobalConfig, DEFAULT_SESSION_NAME, MAX_TIMEOUT_SECONDS};
use session_broker::models::protocol::ShutdownType;
use session_broker::AppError;

fn sample_toml(dir: &str) -> String {
    format!(
        r#"
session_name = "Work"
session_dir = '{dir}'
display = ":1"
ipc_name = "broker"
control_ipc_name = "broker-ctl"
exempt_programs = ["xterm", "urxvt"]
max_restart_attempts = 3

[timeouts]
save_seconds = 20
die_seconds = 4
startup_seconds = 15
restart_reset_seconds = 120

[chooser]
always_display = true

[compat]
commands = [["gnome-keyring-daemon", "--start"]]

[desktop]
screens = 2
workspaces = 6

[logout]
auto_confirm = false
default_action = "shutdown"
allow_save = false

[power]
suspend_command = []
allow_sleep = false

[sessions.Failsafe]
is_failsafe = true
clients = [{{ command = ["xfwm4"], per_screen = true }}]
"#
    )
}

#[test]
fn parses_full_config() {
    let config = GlobalConfig::from_toml_str(&sample_toml("/tmp/sessions")).expect("valid config");
    assert_eq!(config.session_name, "Work");
    assert_eq!(config.display, ":1");
    assert_eq!(config.max_restart_attempts, 3);
    assert_eq!(config.save_timeout(), Duration::from_secs(20));
    assert_eq!(config.die_timeout(), Duration::from_secs(4));
    assert_eq!(config.startup_timeout(), Duration::from_secs(15));
    assert_eq!(config.restart_reset_timeout(), Duration::from_secs(120));
    assert!(config.chooser.always_display);
    assert_eq!(config.compat.commands.len(), 1);
    assert_eq!(config.desktop.screens, 2);
    assert!(!config.logout.auto_confirm);
    assert_eq!(config.logout.default_action, ShutdownType::Shutdown);
    assert!(config.power.suspend_command.is_empty());
    assert_eq!(config.power.hibernate_command, vec!["systemctl", "hibernate"]);
    assert!(!config.power.allow_sleep);
    assert!(config.sessions["Failsafe"].clients[0].per_screen);
}

#[test]
fn minimal_config_uses_defaults() {
    let config = GlobalConfig::from_toml_str("display = \":0\"\n").expect("valid config");
    assert_eq!(config.session_name, DEFAULT_SESSION_NAME);
    assert_eq!(config.ipc_name, "session-broker");
    assert_eq!(config.control_ipc_name, "session-broker-ctl");
    assert_eq!(config.save_timeout(), Duration::from_secs(60));
    assert_eq!(config.die_timeout(), Duration::from_secs(7));
    assert_eq!(config.max_restart_attempts, 5);
    assert_eq!(config.failsafe.session_name.as_deref(), Some("Failsafe"));
    assert!(config.logout.auto_confirm);
    assert!(config.power.allow_sleep);
}

#[test]
fn session_file_is_keyed_on_display() {
    let config = GlobalConfig::from_toml_str(&sample_toml("/tmp/sessions")).expect("valid config");
    assert_eq!(
        config.session_file(),
        std::path::PathBuf::from("/tmp/sessions/session-broker-:1")
    );
}

#[test]
fn exemptions_ignore_case() {
    let config = GlobalConfig::from_toml_str(&sample_toml("/tmp/s")).expect("valid config");
    assert!(config.is_exempt("XTerm"));
    assert!(config.is_exempt("urxvt"));
    assert!(!config.is_exempt("emacs"));
}

#[test]
fn blank_session_name_falls_back() {
    let config = GlobalConfig::from_toml_str("session_name = \"  \"\n").expect("valid config");
    assert_eq!(config.session_name, DEFAULT_SESSION_NAME);
}

#[test]
fn zero_save_timeout_is_rejected() {
    let err = GlobalConfig::from_toml_str("[timeouts]\nsave_seconds = 0\n").unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn huge_timeout_is_rejected() {
    let err = GlobalConfig::from_toml_str("[timeouts]\nsave_seconds = 9223372036854775807\n")
        .unwrap_err();
    assert!(err.to_string().contains("timeouts.save_seconds"));

    let raw = format!("[timeouts]\nrestart_reset_seconds = {MAX_TIMEOUT_SECONDS}\n");
    assert!(GlobalConfig::from_toml_str(&raw).is_ok());
}

#[test]
fn zero_screens_is_rejected() {
    let err = GlobalConfig::from_toml_str("[desktop]\nscreens = 0\n").unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn identical_ipc_names_are_rejected() {
    let err = GlobalConfig::from_toml_str("ipc_name = \"x\"\ncontrol_ipc_name = \"x\"\n")
        .unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn ask_is_not_a_default_logout_action() {
    let err = GlobalConfig::from_toml_str("[logout]\ndefault_action = \"ask\"\n").unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn malformed_toml_is_a_config_error() {
    let err = GlobalConfig::from_toml_str("session_name = [").unwrap_err();
    assert!(err.to_string().starts_with("config:"));
}

#[test]
fn load_from_missing_path_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = GlobalConfig::load_from_path(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn load_from_path_reads_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, sample_toml(&dir.path().display().to_string())).expect("write");
    let config = GlobalConfig::load_from_path(&path).expect("valid config");
    assert_eq!(config.session_dir(), dir.path());
}
