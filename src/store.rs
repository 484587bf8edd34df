// tally-store/src/store.rs

use parking_lot::{Mutex, MutexGuard};
use std::{path::PathBuf, sync::Arc};
use tracing::{debug, info, warn};

use crate::{
    error::{Result, StoreError},
    fs::{FileSystem, OsFs},
    layout::Layout,
    markdown,
    model::AppState,
};

/// Exact text this process last wrote to (or loaded from) `current.md`.
/// Shared by `save` and the change watcher; the lock is held across the file
/// access so a poll can never observe a half-recorded self-write.
#[derive(Clone, Default)]
pub struct SelfWriteMarker(Arc<Mutex<Option<String>>>);

impl SelfWriteMarker {
    pub fn get(&self) -> Option<String> { self.0.lock().clone() }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Option<String>> { self.0.lock() }
}

#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(AppState),
    /// `current.md` does not exist yet.
    Missing,
    /// `current.md` exists but could not be read.
    Unreadable(String),
}

impl LoadOutcome {
    pub fn state(self) -> Option<AppState> {
        match self {
            Self::Loaded(s) => Some(s),
            Self::Missing | Self::Unreadable(_) => None,
        }
    }

    pub fn is_no_state(&self) -> bool { !matches!(self, Self::Loaded(_)) }
}

#[derive(Clone)]
pub struct StorageSession {
    fs: Arc<dyn FileSystem>,
    layout: Layout,
    marker: SelfWriteMarker,
}

impl StorageSession {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self::with_fs(root, Arc::new(OsFs))
    }

    pub fn with_fs(root: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self { fs, layout: Layout::new(root), marker: SelfWriteMarker::default() }
    }

    pub fn layout(&self) -> &Layout { &self.layout }

    pub fn fs(&self) -> &dyn FileSystem { self.fs.as_ref() }

    pub fn marker(&self) -> &SelfWriteMarker { &self.marker }

    /// Creates the root and history directories. Safe to call repeatedly.
    pub fn initialize(&self) -> Result<()> {
        for dir in [self.layout.root().to_path_buf(), self.layout.history_dir()] {
            if self.fs.exists(&dir) { continue; }
            self.fs.create_dir_all(&dir).map_err(|e| StoreError::io("create directory", &dir, e))?;
            info!(dir = %dir.display(), "created storage directory");
        }
        Ok(())
    }

    /// Writes `current.md` unconditionally and records the text as self-written.
    pub fn save(&self, state: &AppState) -> Result<()> {
        let text = markdown::serialize(state);
        let path = self.layout.current();
        let mut marker = self.marker.lock();
        self.fs.write(&path, &text).map_err(|e| StoreError::io("write", &path, e))?;
        debug!(bytes = text.len(), "saved current state");
        *marker = Some(text);
        Ok(())
    }

    /// Raw text of `current.md`, without parsing or touching the marker.
    pub fn read_current_text(&self) -> Result<String> {
        let path = self.layout.current();
        self.fs.read_to_string(&path).map_err(|e| StoreError::io("read", &path, e))
    }

    pub fn load(&self) -> LoadOutcome {
        let path = self.layout.current();
        if !self.fs.exists(&path) {
            debug!(path = %path.display(), "no current state file");
            return LoadOutcome::Missing;
        }
        let mut marker = self.marker.lock();
        match self.fs.read_to_string(&path) {
            Ok(text) => {
                let state = markdown::parse(&text);
                *marker = Some(text);
                LoadOutcome::Loaded(state)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "current state file is unreadable");
                LoadOutcome::Unreadable(e.to_string())
            }
        }
    }
}
