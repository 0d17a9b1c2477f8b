//! Session selection, priority-ordered launch and failsafe fallback.

use std::sync::Arc;

use session_broker::manager::services::{ChooserAnswer, Desktop};
use session_broker::manager::{ControlRequest, LoadOutcome};
use session_broker::models::properties::{PropertyRecord, RestartStyleHint};
use session_broker::models::protocol::{ClientMessage, ConnectionId, ManagerState};
use session_broker::session::persistence::SessionFile;
use session_broker::AppError;

use super::test_helpers::{saved_record, seed_session, test_config, FakePower, Harness};

fn seeded(extra: &str, name: &str, records: &[PropertyRecord], workspaces: &[u32]) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), extra);
    seed_session(&config, name, records, workspaces, 100);
    Harness::in_dir(dir, extra, Arc::new(FakePower::default()))
}

fn reconnect(h: &mut Harness, conn: u64, client_id: &str) {
    h.send(
        conn,
        ClientMessage::Register {
            previous_id: Some(client_id.to_owned()),
            hostname: "host".into(),
        },
    );
}

#[test]
fn saved_session_starts_in_priority_groups() {
    let mut h = seeded(
        "",
        "Default",
        &[
            saved_record("late", "panel", 30),
            saved_record("wm", "wm", 10),
            saved_record("bg", "desktop", 10),
        ],
        &[2],
    );

    assert_eq!(
        h.manager.load().unwrap(),
        LoadOutcome::Session("Default".into())
    );
    assert_eq!(h.manager.records().pending().len(), 3);

    h.manager.startup();
    assert_eq!(h.manager.state(), ManagerState::Startup);
    assert_eq!(h.launcher.started(), vec!["wm", "bg"]);

    reconnect(&mut h, 1, "wm");
    assert_eq!(h.launcher.started().len(), 2);
    reconnect(&mut h, 2, "bg");
    assert_eq!(h.launcher.started(), vec!["wm", "bg", "late"]);
    assert_eq!(h.manager.state(), ManagerState::Startup);
    assert_eq!(h.desktop.active_workspace(0), Some(0));

    reconnect(&mut h, 3, "late");
    assert_eq!(h.manager.state(), ManagerState::Idle);
    assert!(!h.manager.failsafe_mode());
    assert_eq!(h.desktop.active_workspace(0), Some(2));
}

#[test]
fn missing_workspace_is_not_restored() {
    let mut h = seeded("", "Default", &[saved_record("wm", "wm", 10)], &[9]);
    h.manager.load().unwrap();
    h.manager.startup();
    reconnect(&mut h, 1, "wm");
    assert_eq!(h.manager.state(), ManagerState::Idle);
    assert_eq!(h.desktop.active_workspace(0), Some(0));
}

#[test]
fn startup_timeout_moves_on_to_next_group() {
    let mut h = seeded(
        "",
        "Default",
        &[saved_record("wm", "wm", 10), saved_record("panel", "panel", 20)],
        &[],
    );
    h.manager.load().unwrap();
    h.manager.startup();
    assert_eq!(h.launcher.started(), vec!["wm"]);

    h.advance(21);
    assert_eq!(h.launcher.started(), vec!["wm", "panel"]);
    assert_eq!(h.manager.records().len(), 1);

    reconnect(&mut h, 1, "panel");
    assert_eq!(h.manager.state(), ManagerState::Idle);
}

#[test]
fn launch_failure_skips_to_next_group() {
    let mut h = seeded(
        "",
        "Default",
        &[saved_record("wm", "wm", 10), saved_record("panel", "panel", 20)],
        &[],
    );
    h.manager.load().unwrap();
    h.launcher.set_failing(true);
    h.manager.startup();

    assert_eq!(h.manager.state(), ManagerState::Idle);
    assert!(h.manager.records().is_empty());
}

#[test]
fn duplicate_client_ids_load_once() {
    let mut h = seeded(
        "",
        "Default",
        &[saved_record("same", "wm", 10), saved_record("same", "panel", 20)],
        &[],
    );
    h.manager.load().unwrap();
    assert_eq!(h.manager.records().len(), 1);
}

#[test]
fn empty_store_falls_back_to_failsafe() {
    let mut h = Harness::new();
    assert_eq!(
        h.manager.load().unwrap(),
        LoadOutcome::Failsafe("Failsafe".into())
    );
    assert!(h.manager.failsafe_mode());

    h.manager.startup();
    assert_eq!(h.manager.state(), ManagerState::Idle);
    assert_eq!(
        h.launcher.commands(),
        vec![
            (vec!["wm".to_owned()], Some(0)),
            (vec!["panel".to_owned()], Some(0)),
        ]
    );
}

#[test]
fn session_without_records_falls_back_to_failsafe() {
    let mut h = seeded("", "Default", &[], &[0]);
    assert_eq!(
        h.manager.load().unwrap(),
        LoadOutcome::Failsafe("Failsafe".into())
    );
}

#[test]
fn malformed_session_file_is_ignored() {
    let mut h = Harness::new();
    std::fs::create_dir_all(h.dir.path()).unwrap();
    std::fs::write(h.session_file(), "this is [not toml").unwrap();

    assert!(matches!(
        h.manager.load().unwrap(),
        LoadOutcome::Failsafe(_)
    ));
    h.manager.startup();

    // The next save replaces the broken file.
    h.manager
        .handle_control(ControlRequest::Checkpoint { name: None })
        .unwrap();
    h.manager.run_deferred();
    assert!(SessionFile::open(h.session_file()).unwrap().contains("Default"));
}

#[test]
fn missing_failsafe_is_fatal_and_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), "");
    config.failsafe.session_name = Some("Nowhere".into());
    let mut h = Harness::from_config(dir, config, Arc::new(FakePower::default()));

    let err = h.manager.load().unwrap_err();
    assert!(matches!(err, AppError::Failsafe(_)));
    assert_eq!(h.dialogs.errors().len(), 1);
}

#[test]
fn compat_services_start_first() {
    let mut h = Harness::with_config("[compat]\ncommands = [[\"dbus-launch\", \"--sh-syntax\"]]\n");
    h.manager.load().unwrap();
    h.manager.startup();

    let commands = h.launcher.commands();
    assert_eq!(
        commands[0],
        (vec!["dbus-launch".to_owned(), "--sh-syntax".to_owned()], None)
    );
    assert_eq!(commands.len(), 3);
}

#[test]
fn chooser_picks_session_to_load() {
    let dir = tempfile::tempdir().unwrap();
    let extra = "[chooser]\nalways_display = true\n";
    let config = test_config(dir.path(), extra);
    seed_session(&config, "Default", &[saved_record("a", "editor", 50)], &[], 100);
    seed_session(&config, "Work", &[saved_record("b", "ide", 50)], &[], 200);
    let mut h = Harness::in_dir(dir, extra, Arc::new(FakePower::default()));
    *h.dialogs.chooser_answer.lock().unwrap() = Some(ChooserAnswer::Load("Work".into()));

    assert_eq!(h.manager.load().unwrap(), LoadOutcome::Session("Work".into()));
    assert_eq!(h.manager.session_name(), "Work");
    assert_eq!(
        *h.dialogs.offered.lock().unwrap(),
        vec!["Work".to_owned(), "Default".to_owned()]
    );

    h.manager.startup();
    assert_eq!(h.launcher.started(), vec!["b"]);
}

#[test]
fn chooser_logout_ends_login() {
    let extra = "[chooser]\nalways_display = true\n";
    let mut h = seeded(extra, "Default", &[saved_record("a", "editor", 50)], &[]);
    assert_eq!(h.manager.load().unwrap(), LoadOutcome::Logout);
    assert!(h.manager.records().is_empty());
}

#[test]
fn chooser_new_session_uses_failsafe() {
    let extra = "[chooser]\nalways_display = true\n";
    let mut h = seeded(extra, "Default", &[saved_record("a", "editor", 50)], &[]);
    *h.dialogs.chooser_answer.lock().unwrap() = Some(ChooserAnswer::New("Fresh".into()));

    assert_eq!(
        h.manager.load().unwrap(),
        LoadOutcome::Failsafe("Failsafe".into())
    );
    assert_eq!(h.manager.session_name(), "Fresh");
    assert!(h.manager.records().is_empty());
}

#[test]
fn saved_session_is_restored_by_next_login() {
    let mut h = Harness::idle();
    let editor = h.register_app(1, "editor", RestartStyleHint::IfRunning);
    let browser = h.register_app(2, "browser", RestartStyleHint::Anyway);
    h.manager
        .handle_control(ControlRequest::Checkpoint { name: None })
        .unwrap();
    h.manager.run_deferred();
    h.send(1, ClientMessage::SaveYourselfDone { success: true });
    h.send(2, ClientMessage::SaveYourselfDone { success: true });

    let Harness { dir, .. } = h;
    let mut next = Harness::in_dir(dir, "", Arc::new(FakePower::default()));
    assert_eq!(
        next.manager.load().unwrap(),
        LoadOutcome::Session("Default".into())
    );
    next.manager.startup();
    assert_eq!(next.launcher.started(), vec![editor.clone(), browser.clone()]);

    reconnect(&mut next, 1, &editor);
    reconnect(&mut next, 2, &browser);
    assert_eq!(next.manager.state(), ManagerState::Idle);
    assert_eq!(next.manager.client_id(ConnectionId(1)), Some(editor.as_str()));
}
