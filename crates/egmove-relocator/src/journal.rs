use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::RelocationState;

/// Where egmove keeps its own state: config and the relocation journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn relocations_dir(&self) -> PathBuf {
        self.root.join("relocations")
    }

    pub fn active_marker_path(&self) -> PathBuf {
        self.relocations_dir().join("active")
    }

    pub fn record_path(&self, id: &str) -> PathBuf {
        self.relocations_dir().join(format!("{id}.json"))
    }

    pub fn journal_path(&self, id: &str) -> PathBuf {
        self.relocations_dir().join(format!("{id}.journal"))
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        let dir = self.relocations_dir();
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))
    }
}

/// `%LOCALAPPDATA%\egmove` on Windows, `$HOME/.egmove` elsewhere.
pub fn default_state_root() -> Result<PathBuf> {
    if cfg!(windows) {
        let base = std::env::var_os("LOCALAPPDATA")
            .ok_or_else(|| anyhow!("LOCALAPPDATA is not set; pass --state-dir"))?;
        return Ok(PathBuf::from(base).join("egmove"));
    }
    let home = std::env::var_os("HOME").ok_or_else(|| anyhow!("HOME is not set; pass --state-dir"))?;
    Ok(PathBuf::from(home).join(".egmove"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelocationStatus {
    Planning,
    Applying,
    Committed,
    RolledBack,
    Aborted,
    ManualRecoveryRequired,
    /// An operator confirmed a manual recovery was completed.
    Resolved,
}

impl RelocationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Applying => "applying",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
            Self::Aborted => "aborted",
            Self::ManualRecoveryRequired => "manual_recovery_required",
            Self::Resolved => "resolved",
        }
    }

    /// Whether a leftover active marker pointing at this status may be dropped.
    pub fn allows_stale_marker_cleanup(self) -> bool {
        matches!(
            self,
            Self::Committed | Self::RolledBack | Self::Aborted | Self::Resolved
        )
    }

    /// Statuses an operator may mark resolved: a failed rollback, or a run that
    /// stopped before recording how it ended.
    pub fn needs_operator(self) -> bool {
        matches!(
            self,
            Self::Planning | Self::Applying | Self::ManualRecoveryRequired
        )
    }
}

impl fmt::Display for RelocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelocationRecord {
    pub version: u32,
    pub id: String,
    pub app_id: String,
    pub source: PathBuf,
    pub target: PathBuf,
    pub status: RelocationStatus,
    pub started_at_unix: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub seq: u64,
    pub step: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Writes the record in `planning` state and claims the active marker. Fails,
/// leaving nothing behind, when another relocation already holds the marker.
pub fn begin_relocation(
    layout: &StateLayout,
    app_id: &str,
    source: &Path,
    target: &Path,
    started_at_unix: u64,
) -> Result<RelocationRecord> {
    let record = RelocationRecord {
        version: 1,
        id: format!("rel-{started_at_unix}-{}", std::process::id()),
        app_id: app_id.to_string(),
        source: source.to_path_buf(),
        target: target.to_path_buf(),
        status: RelocationStatus::Planning,
        started_at_unix,
    };

    if layout.record_path(&record.id).exists() {
        return Err(anyhow!("relocation {} is already recorded", record.id));
    }
    write_relocation_record(layout, &record)?;
    if let Err(err) = claim_active_marker(layout, &record.id) {
        let _ = fs::remove_file(layout.record_path(&record.id));
        return Err(err);
    }
    Ok(record)
}

fn claim_active_marker(layout: &StateLayout, id: &str) -> Result<()> {
    let path = layout.active_marker_path();
    let mut file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
    {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            let detail = read_active_relocation(layout)
                .ok()
                .flatten()
                .map(|existing| format!(" (id={existing})"))
                .unwrap_or_default();
            return Err(anyhow!("another relocation is already active{detail}"));
        }
        Err(err) => {
            return Err(err).with_context(|| {
                format!("failed to claim active relocation marker: {}", path.display())
            });
        }
    };

    file.write_all(format!("{id}\n").as_bytes())
        .and_then(|()| file.flush())
        .with_context(|| format!("failed to write active relocation marker: {}", path.display()))
}

pub fn write_relocation_record(layout: &StateLayout, record: &RelocationRecord) -> Result<PathBuf> {
    layout.ensure_base_dirs()?;
    let path = layout.record_path(&record.id);
    let mut raw = serde_json::to_string_pretty(record)
        .with_context(|| format!("failed to serialize relocation record {}", record.id))?;
    raw.push('\n');
    fs::write(&path, raw)
        .with_context(|| format!("failed to write relocation record: {}", path.display()))?;
    Ok(path)
}

pub fn read_relocation_record(layout: &StateLayout, id: &str) -> Result<Option<RelocationRecord>> {
    let path = layout.record_path(id);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| {
                format!("failed to read relocation record: {}", path.display())
            });
        }
    };
    let record = serde_json::from_str(&raw)
        .with_context(|| format!("failed parsing relocation record: {}", path.display()))?;
    Ok(Some(record))
}

pub fn set_relocation_status(
    layout: &StateLayout,
    id: &str,
    status: RelocationStatus,
) -> Result<()> {
    let mut record = read_relocation_record(layout, id)?
        .ok_or_else(|| anyhow!("relocation record not found for '{id}'"))?;
    record.status = status;
    write_relocation_record(layout, &record)?;
    Ok(())
}

pub fn append_journal_entry(layout: &StateLayout, id: &str, entry: &JournalEntry) -> Result<()> {
    layout.ensure_base_dirs()?;
    let path = layout.journal_path(id);
    let mut line = serde_json::to_string(entry)
        .with_context(|| format!("failed to serialize journal entry for {id}"))?;
    line.push('\n');

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open relocation journal: {}", path.display()))?;
    file.write_all(line.as_bytes())
        .and_then(|()| file.flush())
        .with_context(|| format!("failed to append relocation journal: {}", path.display()))
}

pub fn read_journal_entries(layout: &StateLayout, id: &str) -> Result<Vec<JournalEntry>> {
    let path = layout.journal_path(id);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| {
                format!("failed to read relocation journal: {}", path.display())
            });
        }
    };

    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).with_context(|| {
                format!("failed parsing relocation journal line: {}", path.display())
            })
        })
        .collect()
}

pub fn read_active_relocation(layout: &StateLayout) -> Result<Option<String>> {
    let path = layout.active_marker_path();
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| {
                format!("failed to read active relocation marker: {}", path.display())
            });
        }
    };

    let id = raw.trim();
    if id.is_empty() {
        return Ok(None);
    }
    Ok(Some(id.to_string()))
}

pub fn clear_active_relocation(layout: &StateLayout) -> Result<()> {
    let path = layout.active_marker_path();
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| {
            format!("failed to clear active relocation marker: {}", path.display())
        }),
    }
}

/// Refuses to proceed while a relocation is recorded active. Markers left by
/// relocations that reached a settled status are cleared.
pub fn ensure_no_active_relocation(layout: &StateLayout) -> Result<()> {
    let Some(id) = read_active_relocation(layout).map_err(|_| {
        anyhow!(
            "relocation state requires repair (reason=active_marker_unreadable path={})",
            layout.active_marker_path().display()
        )
    })?
    else {
        return Ok(());
    };

    let record = read_relocation_record(layout, &id).map_err(|_| {
        anyhow!(
            "relocation {id} requires repair (reason=record_unreadable path={})",
            layout.record_path(&id).display()
        )
    })?;
    let Some(record) = record else {
        return Err(anyhow!(
            "relocation {id} requires repair (reason=record_missing path={})",
            layout.record_path(&id).display()
        ));
    };

    if record.status.allows_stale_marker_cleanup() {
        return clear_active_relocation(layout);
    }
    if record.status == RelocationStatus::ManualRecoveryRequired {
        return Err(anyhow!(
            "relocation {id} of '{}' requires manual recovery; restore {} and run `egmove recover --resolved {id}`",
            record.app_id,
            record.source.display()
        ));
    }

    let last_state = last_journal_state(layout, &id).unwrap_or_else(|| "none".to_string());
    Err(anyhow!(
        "relocation {id} of '{}' is active or was interrupted (reason=active_status status={} last_state={last_state}); if no egmove process is running, check {} and {} and run `egmove recover --resolved {id}`",
        record.app_id,
        record.status,
        record.source.display(),
        record.target.display()
    ))
}

/// State of the last journal entry, if the journal can be read.
pub fn last_journal_state(layout: &StateLayout, id: &str) -> Option<String> {
    read_journal_entries(layout, id)
        .ok()?
        .pop()
        .map(|entry| entry.state)
}

/// Marks a relocation that needed an operator as resolved and releases the
/// marker. Interrupted runs qualify as well as failed rollbacks.
pub fn resolve_relocation(layout: &StateLayout, id: &str) -> Result<RelocationRecord> {
    let mut record = read_relocation_record(layout, id)?
        .ok_or_else(|| anyhow!("relocation record not found for '{id}'"))?;
    if !record.status.needs_operator() {
        return Err(anyhow!(
            "relocation {id} does not need recovery (status={})",
            record.status
        ));
    }

    record.status = RelocationStatus::Resolved;
    write_relocation_record(layout, &record)?;
    if read_active_relocation(layout)?.as_deref() == Some(id) {
        clear_active_relocation(layout)?;
    }
    Ok(record)
}

pub fn current_unix_timestamp() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system time is before unix epoch")?
        .as_secs())
}

/// Journal handle for one relocation, fed from executor events.
#[derive(Debug)]
pub struct RelocationJournal {
    layout: StateLayout,
    id: String,
    next_seq: u64,
}

impl RelocationJournal {
    /// Begins a relocation record and moves it to `applying`.
    pub fn start(
        layout: &StateLayout,
        app_id: &str,
        source: &Path,
        target: &Path,
    ) -> Result<Self> {
        let record = begin_relocation(layout, app_id, source, target, current_unix_timestamp()?)?;
        set_relocation_status(layout, &record.id, RelocationStatus::Applying)?;
        Ok(Self {
            layout: layout.clone(),
            id: record.id,
            next_seq: 1,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn record_transition(&mut self, state: RelocationState) -> Result<()> {
        self.append("transition", state.as_str(), None)
    }

    pub fn record_warning(&mut self, field: &str, path: &str) -> Result<()> {
        self.append(field, "kept", Some(path.to_string()))
    }

    fn append(&mut self, step: &str, state: &str, path: Option<String>) -> Result<()> {
        let entry = JournalEntry {
            seq: self.next_seq,
            step: step.to_string(),
            state: state.to_string(),
            path,
        };
        append_journal_entry(&self.layout, &self.id, &entry)?;
        self.next_seq += 1;
        Ok(())
    }

    /// Records the final status. The active marker is released unless the
    /// relocation needs manual recovery.
    pub fn finish(self, status: RelocationStatus) -> Result<()> {
        set_relocation_status(&self.layout, &self.id, status)?;
        if status.allows_stale_marker_cleanup() {
            clear_active_relocation(&self.layout)?;
        }
        Ok(())
    }
}
