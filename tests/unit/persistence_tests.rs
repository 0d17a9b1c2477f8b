//! Session file groups, backups and lenient reads.

use session_broker::models::properties::{PropertyRecord, RestartStyleHint};
use session_broker::session::persistence::{backup, backup_path, group_name, SessionFile};
use session_broker::AppError;

const NO_RECORDS: &[PropertyRecord] = &[];

fn full_record() -> PropertyRecord {
    let mut record = PropertyRecord::new("abc123", "local/box");
    record.program = Some("editor".into());
    record.current_directory = Some("/home/me".into());
    record.environment = vec!["LANG=C".into()];
    record.restart_command = vec!["editor".into(), "--session=abc123".into()];
    record.discard_command = vec!["rm".into(), "/tmp/abc123".into()];
    record.shutdown_command = vec!["editor".into(), "--quit".into()];
    record.restart_style_hint = RestartStyleHint::Anyway;
    record.priority = 15;
    record
}

#[test]
fn stored_session_reads_back() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("session");

    let mut file = SessionFile::open(&path).expect("missing file is empty");
    assert!(file.sessions().is_empty());
    file.store("Default", &[full_record()], &[1, 3], 1_700_000_000);
    file.write().expect("write");

    let file = SessionFile::open(&path).expect("open");
    let saved = file.load("Default").expect("stored");
    assert_eq!(saved.records, vec![full_record()]);
    assert_eq!(saved.workspaces, vec![Some(1), Some(3)]);
    assert_eq!(saved.last_access, Some(1_700_000_000));
}

#[test]
fn file_uses_grouped_keys() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("session");
    let mut file = SessionFile::empty(&path);
    file.store("Default", &[full_record()], &[0], 5);
    file.write().expect("write");

    let raw = std::fs::read_to_string(&path).expect("read");
    assert!(raw.contains(&group_name("Default")));
    assert!(raw.contains("Client0_ClientId"));
    assert!(raw.contains("Client0_RestartStyleHint = 1"));
    assert!(raw.contains("Screen0_ActiveWorkspace = 0"));
    assert!(raw.contains("Count = 1"));
}

#[test]
fn storing_one_session_keeps_the_others() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("session");

    let mut file = SessionFile::empty(&path);
    file.store("Work", &[full_record()], &[], 10);
    file.store("Default", NO_RECORDS, &[], 20);
    file.write().expect("write");

    let mut file = SessionFile::open(&path).expect("open");
    file.store("Default", &[full_record()], &[], 30);
    file.write().expect("write");

    let file = SessionFile::open(&path).expect("open");
    assert_eq!(file.load("Work").expect("kept").records.len(), 1);
    let names: Vec<_> = file.sessions().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["Default", "Work"]);
}

#[test]
fn incomplete_entries_are_skipped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("session");
    std::fs::write(
        &path,
        r#"
["Session: Default"]
Count = 3
Client0_ClientId = "ok"
Client0_Hostname = "box"
Client0_Program = "editor"
Client0_RestartCommand = ["editor"]
Client1_ClientId = "no-command"
Client1_Hostname = "box"
Client1_Program = "viewer"
Client2_Hostname = "box"
"#,
    )
    .expect("write");

    let saved = SessionFile::open(&path)
        .expect("open")
        .load("Default")
        .expect("group");
    assert_eq!(saved.records.len(), 1);
    assert_eq!(saved.records[0].client_id, "ok");
    assert_eq!(saved.records[0].priority, 50);
    assert_eq!(saved.records[0].restart_style_hint, RestartStyleHint::IfRunning);
    assert!(saved.workspaces.is_empty());
}

#[test]
fn oversized_count_is_bounded_by_entries() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("session");
    std::fs::write(
        &path,
        r#"
["Session: Default"]
Count = 9223372036854775807
Client0_ClientId = "ok"
Client0_Hostname = "box"
Client0_Program = "editor"
Client0_RestartCommand = ["editor"]
"#,
    )
    .expect("write");

    let saved = SessionFile::open(&path)
        .expect("open")
        .load("Default")
        .expect("group");
    assert_eq!(saved.records.len(), 1);
    assert_eq!(saved.records[0].client_id, "ok");
}

#[test]
fn count_without_entries_loads_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("session");
    std::fs::write(&path, "[\"Session: Default\"]\nCount = 4000000000\n").expect("write");

    let saved = SessionFile::open(&path)
        .expect("open")
        .load("Default")
        .expect("group");
    assert!(saved.records.is_empty());
}

#[test]
fn unknown_group_is_none() {
    let file = SessionFile::empty("/nonexistent/session");
    assert!(file.load("Default").is_none());
    assert!(!file.contains("Default"));
}

#[test]
fn garbage_is_a_session_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("session");
    std::fs::write(&path, "[[[ not toml").expect("write");
    assert!(matches!(SessionFile::open(&path), Err(AppError::Session(_))));
}

#[test]
fn backup_links_current_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("session");

    backup(&path).expect("missing source is fine");
    assert!(!backup_path(&path).exists());

    std::fs::write(&path, "old").expect("write");
    backup(&path).expect("backup");
    std::fs::remove_file(&path).expect("remove");
    std::fs::write(&path, "newer").expect("write");
    assert_eq!(
        std::fs::read_to_string(backup_path(&path)).expect("read"),
        "old"
    );
    backup(&path).expect("backup replaces older");
    assert_eq!(
        std::fs::read_to_string(backup_path(&path)).expect("read"),
        "newer"
    );
}

#[test]
fn rewrite_does_not_touch_backup() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("session");

    let mut file = SessionFile::empty(&path);
    file.store("Default", NO_RECORDS, &[], 1);
    file.write().expect("write");
    backup(&path).expect("backup");

    let mut file = SessionFile::open(&path).expect("open");
    file.store("Default", &[full_record()], &[], 2);
    file.write().expect("write");

    let bak = SessionFile::open(backup_path(&path)).expect("open backup");
    assert_eq!(bak.load("Default").expect("group").last_access, Some(1));
}
