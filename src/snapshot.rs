// tally-store/src/snapshot.rs

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use std::fmt;
use tracing::{debug, info, warn};

use crate::{
    error::{Result, StoreError},
    markdown,
    model::AppState,
    store::StorageSession,
};

pub const DEFAULT_RETENTION: usize = 20;
const EXT: &str = ".md";
const STAMP_FORMAT: &str = "%Y-%m-%dT%H%M%S%3fZ";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotReason {
    Auto,
    LlmAction,
    UserRequest,
    PreArchive,
    Custom(String),
}

impl SnapshotReason {
    pub fn tag(&self) -> String {
        match self {
            Self::Auto => "auto".into(),
            Self::LlmAction => "llm-action".into(),
            Self::UserRequest => "user-request".into(),
            Self::PreArchive => "pre-archive".into(),
            Self::Custom(s) => {
                let cleaned: String = s
                    .to_ascii_lowercase()
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
                    .collect();
                let cleaned = cleaned.trim_matches('-');
                if cleaned.is_empty() { "custom".into() } else { cleaned.to_string() }
            }
        }
    }

    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "auto" => Self::Auto,
            "llm-action" => Self::LlmAction,
            "user-request" => Self::UserRequest,
            "pre-archive" => Self::PreArchive,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for SnapshotReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.tag()) }
}

/// An immutable copy of the state as written to `history/`.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub file_name: String,
    pub timestamp: DateTime<Utc>,
    pub reason: SnapshotReason,
    pub markdown: String,
    pub state: AppState,
}

/// `2026-10-16T22:18:00.123Z` becomes `2026-10-16T221800123Z`.
pub fn file_name_for(at: DateTime<Utc>, reason: &SnapshotReason) -> String {
    let stamp: String = at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .chars()
        .filter(|c| *c != ':' && *c != '.')
        .collect();
    format!("{stamp}_{}{EXT}", reason.tag())
}

/// Recovers timestamp and reason from a snapshot file name.
pub fn parse_file_name(name: &str) -> Option<(DateTime<Utc>, SnapshotReason)> {
    let (stamp, tag) = name.strip_suffix(EXT)?.split_once('_')?;
    let at = NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).ok()?.and_utc();
    Some((at, SnapshotReason::from_tag(tag)))
}

pub struct SnapshotManager<'a> {
    session: &'a StorageSession,
    retention: usize,
}

impl<'a> SnapshotManager<'a> {
    pub fn new(session: &'a StorageSession) -> Self {
        Self { session, retention: DEFAULT_RETENTION }
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }

    pub fn create(&self, state: &AppState, reason: SnapshotReason) -> Result<String> {
        self.create_at(state, reason, Utc::now())
    }

    /// Writes a snapshot stamped `at`, then prunes history down to the retention count.
    /// Returns the new file name.
    pub fn create_at(&self, state: &AppState, reason: SnapshotReason, at: DateTime<Utc>) -> Result<String> {
        let dir = self.session.layout().history_dir();
        let name = file_name_for(at, &reason);
        let path = dir.join(&name);
        self.session
            .fs()
            .write(&path, &markdown::serialize(state))
            .map_err(|e| StoreError::io("write", &path, e))?;
        info!(file = %name, %reason, "snapshot written");
        self.prune();
        Ok(name)
    }

    fn snapshot_names(&self) -> std::io::Result<Vec<String>> {
        let dir = self.session.layout().history_dir();
        let mut names: Vec<String> = self
            .session
            .fs()
            .list_dir(&dir)?
            .into_iter()
            .filter(|n| n.ends_with(EXT))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Deletes the oldest snapshots beyond the retention count. Failures are logged.
    pub fn prune(&self) {
        let names = match self.snapshot_names() {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "cannot list snapshots for pruning");
                return;
            }
        };
        let excess = names.len().saturating_sub(self.retention);
        let dir = self.session.layout().history_dir();
        for name in &names[..excess] {
            match self.session.fs().remove_file(&dir.join(name)) {
                Ok(()) => debug!(file = %name, "pruned snapshot"),
                Err(e) => warn!(file = %name, error = %e, "could not prune snapshot"),
            }
        }
    }

    /// Snapshot file names, most recent first. Empty if history cannot be read.
    pub fn list(&self) -> Vec<String> {
        match self.snapshot_names() {
            Ok(mut names) => {
                names.reverse();
                names
            }
            Err(e) => {
                debug!(error = %e, "history is unreadable");
                Vec::new()
            }
        }
    }

    /// `None` when the file is missing, unreadable or not named like a snapshot.
    pub fn load(&self, file_name: &str) -> Option<Snapshot> {
        let (timestamp, reason) = parse_file_name(file_name)?;
        let path = self.session.layout().history_dir().join(file_name);
        let markdown = match self.session.fs().read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                debug!(file = %file_name, error = %e, "snapshot not found");
                return None;
            }
        };
        let state = markdown::parse(&markdown);
        Some(Snapshot { file_name: file_name.to_string(), timestamp, reason, markdown, state })
    }

    /// Makes a snapshot's state current again. The state being replaced is kept as an
    /// `auto` snapshot first. `Ok(None)` if the snapshot does not exist.
    pub fn restore(&self, file_name: &str, current: &AppState) -> Result<Option<AppState>> {
        let Some(snapshot) = self.load(file_name) else { return Ok(None) };
        self.create(current, SnapshotReason::Auto)?;
        self.session.save(&snapshot.state)?;
        info!(file = %file_name, "restored snapshot");
        Ok(Some(snapshot.state))
    }
}
