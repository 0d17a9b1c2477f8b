//! Failsafe session resolution.

use session_broker::config::GlobalConfig;
use session_broker::session::failsafe::load_failsafe;
use session_broker::AppError;

const BASE: &str = r#"
[sessions.Failsafe]
is_failsafe = true
clients = [
    { command = ["xfwm4"], per_screen = true },
    { command = ["xfce4-panel"] },
    { command = [] },
]
"#;

fn config(raw: &str) -> GlobalConfig {
    GlobalConfig::from_toml_str(raw).expect("valid config")
}

#[test]
fn per_screen_entries_are_replicated() {
    let session = load_failsafe(&config(BASE), 3).expect("failsafe");
    assert_eq!(session.name, "Failsafe");
    let screens: Vec<_> = session
        .clients
        .iter()
        .map(|c| (c.command[0].as_str(), c.screen))
        .collect();
    assert_eq!(
        screens,
        vec![
            ("xfwm4", 0),
            ("xfwm4", 1),
            ("xfwm4", 2),
            ("xfce4-panel", 0),
        ]
    );
}

#[test]
fn zero_screens_still_launches_once() {
    let session = load_failsafe(&config(BASE), 0).expect("failsafe");
    assert_eq!(session.clients.len(), 2);
}

#[test]
fn missing_session_is_an_error() {
    let err = load_failsafe(&config("display = \":0\"\n"), 1).unwrap_err();
    assert!(matches!(err, AppError::Failsafe(_)));
}

#[test]
fn unmarked_session_is_refused() {
    let raw = "[sessions.Failsafe]\nclients = [{ command = [\"wm\"] }]\n";
    let err = load_failsafe(&config(raw), 1).unwrap_err();
    assert!(err.to_string().contains("not marked"));
}

#[test]
fn empty_session_is_refused() {
    let raw = "[sessions.Failsafe]\nis_failsafe = true\n";
    assert!(load_failsafe(&config(raw), 1).is_err());
}

#[test]
fn no_failsafe_name_is_refused() {
    let mut config = config(BASE);
    config.failsafe.session_name = None;
    assert!(matches!(
        load_failsafe(&config, 1),
        Err(AppError::Failsafe(_))
    ));
}
