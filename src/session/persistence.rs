//! Grouped key/value session file.
//!
//! The file is a TOML document with one table per saved session, named
//! `Session: <name>`. Each table holds a `Count`, one `Client<N>_*` key set
//! per record, one `Screen<N>_ActiveWorkspace` per screen and `LastAccess`.
//! Tables for other sessions are carried through a rewrite untouched.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use toml::{Table, Value};
use tracing::{debug, warn};

use crate::models::properties::{PropertyRecord, RestartStyleHint, DEFAULT_PRIORITY};
use crate::{AppError, Result};

const GROUP_PREFIX: &str = "Session: ";

/// Table name for session `name`.
#[must_use]
pub fn group_name(name: &str) -> String {
    format!("{GROUP_PREFIX}{name}")
}

/// Path of the backup kept next to `path`.
#[must_use]
pub fn backup_path(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(".bak");
    PathBuf::from(raw)
}

/// Hard-link `path` to its backup, replacing any older backup.
///
/// # Errors
///
/// Returns `AppError::Io` when the link cannot be made. A missing source
/// file is not an error.
pub fn backup(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let bak = backup_path(path);
    match fs::remove_file(&bak) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            return Err(AppError::Io(format!(
                "cannot remove old backup {}: {err}",
                bak.display()
            )))
        }
    }
    fs::hard_link(path, &bak).map_err(|err| {
        AppError::Io(format!("cannot link {} to {}: {err}", path.display(), bak.display()))
    })
}

/// One session read back from the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedSession {
    /// Session name without the group prefix.
    pub name: String,
    /// Records in file order.
    pub records: Vec<PropertyRecord>,
    /// Active workspace per screen, indexed by screen number.
    pub workspaces: Vec<Option<u32>>,
    /// Unix timestamp of the last save.
    pub last_access: Option<i64>,
}

/// Name and age of a stored session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Session name.
    pub name: String,
    /// Unix timestamp of the last save.
    pub last_access: Option<i64>,
}

/// In-memory copy of a session file.
#[derive(Debug, Clone)]
pub struct SessionFile {
    path: PathBuf,
    doc: Table,
}

impl SessionFile {
    /// Read `path`, treating a missing file as empty.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` on read failure or `AppError::Session` when
    /// the content is not valid TOML.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = match fs::read_to_string(&path) {
            Ok(raw) => raw.parse::<Table>().map_err(|err| {
                AppError::Session(format!("cannot parse {}: {err}", path.display()))
            })?,
            Err(err) if err.kind() == ErrorKind::NotFound => Table::new(),
            Err(err) => {
                return Err(AppError::Io(format!(
                    "cannot read {}: {err}",
                    path.display()
                )))
            }
        };
        Ok(Self { path, doc })
    }

    /// Empty document that will be written to `path`.
    #[must_use]
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            doc: Table::new(),
        }
    }

    /// Backing path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored sessions, most recently used first.
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionSummary> {
        let mut out: Vec<SessionSummary> = self
            .doc
            .iter()
            .filter_map(|(key, value)| {
                let name = key.strip_prefix(GROUP_PREFIX)?;
                let table = value.as_table()?;
                Some(SessionSummary {
                    name: name.to_owned(),
                    last_access: table.get("LastAccess").and_then(Value::as_integer),
                })
            })
            .collect();
        out.sort_by(|a, b| b.last_access.cmp(&a.last_access));
        out
    }

    /// Whether a session named `name` is stored.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.doc.contains_key(&group_name(name))
    }

    /// Read session `name`.
    ///
    /// Invalid entries are skipped with a warning. Returns `None` if the
    /// group is absent.
    #[must_use]
    pub fn load(&self, name: &str) -> Option<SavedSession> {
        let table = self.doc.get(&group_name(name))?.as_table()?;
        let declared = table
            .get("Count")
            .and_then(Value::as_integer)
            .and_then(|c| usize::try_from(c).ok())
            .unwrap_or(0);
        // Count is untrusted; no entry exists past the highest Client<N> key.
        let present = table
            .keys()
            .filter_map(|key| {
                let (index, _) = key.strip_prefix("Client")?.split_once('_')?;
                index.parse::<usize>().ok()
            })
            .max()
            .map_or(0, |highest| highest + 1);
        if declared > present {
            warn!(declared, present, "session count exceeds stored entries");
        }
        let count = declared.min(present);

        let mut records = Vec::new();
        for index in 0..count {
            match read_record(table, index) {
                Some(record) if record.is_valid() => records.push(record),
                Some(record) => {
                    warn!(index, client_id = %record.client_id, "skipping incomplete session entry");
                }
                None => warn!(index, "skipping missing session entry"),
            }
        }

        let mut workspaces = Vec::new();
        while let Some(value) = table.get(&format!("Screen{}_ActiveWorkspace", workspaces.len())) {
            workspaces.push(value.as_integer().and_then(|w| u32::try_from(w).ok()));
        }

        debug!(session = name, records = records.len(), "session loaded");
        Some(SavedSession {
            name: name.to_owned(),
            records,
            workspaces,
            last_access: table.get("LastAccess").and_then(Value::as_integer),
        })
    }

    /// Replace session `name` with `records` and `workspaces`.
    pub fn store<'a>(
        &mut self,
        name: &str,
        records: impl IntoIterator<Item = &'a PropertyRecord>,
        workspaces: &[u32],
        last_access: i64,
    ) {
        let mut table = Table::new();
        let mut count: i64 = 0;
        for record in records {
            write_record(&mut table, count, record);
            count += 1;
        }
        table.insert("Count".into(), Value::Integer(count));
        for (screen, workspace) in workspaces.iter().enumerate() {
            table.insert(
                format!("Screen{screen}_ActiveWorkspace"),
                Value::Integer(i64::from(*workspace)),
            );
        }
        table.insert("LastAccess".into(), Value::Integer(last_access));
        self.doc.insert(group_name(name), Value::Table(table));
    }

    /// Write the document back, replacing the file atomically.
    ///
    /// The rename keeps an earlier hard-linked backup intact.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` or `AppError::Session` on failure.
    pub fn write(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string(&self.doc)?;
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn key(index: impl std::fmt::Display, field: &str) -> String {
    format!("Client{index}_{field}")
}

fn get_string(table: &Table, k: &str) -> Option<String> {
    table.get(k).and_then(Value::as_str).map(str::to_owned)
}

fn get_list(table: &Table, k: &str) -> Vec<String> {
    table
        .get(k)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn read_record(table: &Table, index: usize) -> Option<PropertyRecord> {
    let client_id = get_string(table, &key(index, "ClientId"))?;
    let hostname = get_string(table, &key(index, "Hostname")).unwrap_or_default();
    let mut record = PropertyRecord::new(client_id, hostname);
    record.program = get_string(table, &key(index, "Program"));
    record.current_directory = get_string(table, &key(index, "CurrentDirectory"));
    record.environment = get_list(table, &key(index, "Environment"));
    record.restart_command = get_list(table, &key(index, "RestartCommand"));
    record.discard_command = get_list(table, &key(index, "DiscardCommand"));
    record.shutdown_command = get_list(table, &key(index, "ShutdownCommand"));
    record.restart_style_hint = table
        .get(&key(index, "RestartStyleHint"))
        .and_then(Value::as_integer)
        .and_then(RestartStyleHint::from_code)
        .unwrap_or_default();
    record.priority = table
        .get(&key(index, "Priority"))
        .and_then(Value::as_integer)
        .and_then(|p| u8::try_from(p).ok())
        .unwrap_or(DEFAULT_PRIORITY);
    Some(record)
}

fn write_record(table: &mut Table, index: i64, record: &PropertyRecord) {
    let list = |items: &[String]| {
        Value::Array(items.iter().cloned().map(Value::String).collect())
    };

    table.insert(key(index, "ClientId"), Value::String(record.client_id.clone()));
    table.insert(key(index, "Hostname"), Value::String(record.hostname.clone()));
    if let Some(ref program) = record.program {
        table.insert(key(index, "Program"), Value::String(program.clone()));
    }
    if let Some(ref dir) = record.current_directory {
        table.insert(key(index, "CurrentDirectory"), Value::String(dir.clone()));
    }
    if !record.environment.is_empty() {
        table.insert(key(index, "Environment"), list(&record.environment));
    }
    table.insert(key(index, "RestartCommand"), list(&record.restart_command));
    if !record.discard_command.is_empty() {
        table.insert(key(index, "DiscardCommand"), list(&record.discard_command));
    }
    if !record.shutdown_command.is_empty() {
        table.insert(key(index, "ShutdownCommand"), list(&record.shutdown_command));
    }
    table.insert(
        key(index, "RestartStyleHint"),
        Value::Integer(record.restart_style_hint.code()),
    );
    table.insert(
        key(index, "Priority"),
        Value::Integer(i64::from(record.priority)),
    );
}
