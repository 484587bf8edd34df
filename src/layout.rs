// tally-store/src/layout.rs

use std::path::{Path, PathBuf};

use crate::model::YearMonth;

pub const CURRENT_FILE: &str = "current.md";
pub const HISTORY_DIR: &str = "history";
const ARCHIVE_PREFIX: &str = "archive-";
const ARCHIVE_SUFFIX: &str = ".md";

/// Paths under the application root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

    pub fn root(&self) -> &Path { &self.root }

    pub fn current(&self) -> PathBuf { self.root.join(CURRENT_FILE) }

    pub fn history_dir(&self) -> PathBuf { self.root.join(HISTORY_DIR) }

    pub fn archive(&self, month: YearMonth) -> PathBuf {
        self.root.join(format!("{ARCHIVE_PREFIX}{month}{ARCHIVE_SUFFIX}"))
    }

    /// Month encoded in an archive file name, if `name` is one.
    pub fn archive_month(name: &str) -> Option<YearMonth> {
        name.strip_prefix(ARCHIVE_PREFIX)?
            .strip_suffix(ARCHIVE_SUFFIX)
            .and_then(YearMonth::parse)
    }
}
