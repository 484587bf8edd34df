pub mod model;
pub mod markdown;
pub mod error;
pub mod fs;
pub mod layout;
pub mod store;
pub mod archive;
pub mod snapshot;
pub mod watcher;
pub mod config;

pub use model::{AppState, Habit, Note, Task, YearMonth};
pub use error::StoreError;
pub use fs::{FileSystem, OsFs};
pub use layout::Layout;
pub use store::{LoadOutcome, SelfWriteMarker, StorageSession};
pub use archive::{Archiver, Migration};
pub use snapshot::{Snapshot, SnapshotManager, SnapshotReason};
pub use watcher::{ChangeWatcher, WatchHandle, WatchState};
pub use config::Config;
