// tally-store/src/archive.rs
//
// Monthly migration of completed tasks out of the live tree.

use chrono::{Local, NaiveDate};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::{
    error::{Result, StoreError},
    layout::Layout,
    markdown,
    model::{AppState, Task, YearMonth},
    store::StorageSession,
};

/// Upper bound on the recent-archives window (a century of months).
pub const MAX_RECENT_MONTHS: usize = 1200;

#[derive(Debug)]
pub struct Migration {
    pub state: AppState,
    /// Archived nodes per month, counting nested archived descendants.
    pub archived: BTreeMap<YearMonth, usize>,
}

impl Migration {
    pub fn archived_total(&self) -> usize { self.archived.values().sum() }
}

pub struct Archiver<'a> {
    session: &'a StorageSession,
}

/// Month bucket for `task` if it qualifies for archival before `current`.
fn qualifying_month(task: &Task, current: YearMonth) -> Option<YearMonth> {
    task.completion_month().filter(|m| *m < current)
}

/// Removes qualifying nodes from `tasks`. Non-qualifying children of a removed node
/// take its place in `tasks`, which is the nearest surviving level.
fn prune(tasks: Vec<Task>, current: YearMonth, out: &mut BTreeMap<YearMonth, Vec<Task>>) -> Vec<Task> {
    let mut kept = Vec::with_capacity(tasks.len());
    for mut task in tasks {
        match qualifying_month(&task, current) {
            None => {
                task.children = prune(std::mem::take(&mut task.children), current, out);
                kept.push(task);
            }
            Some(month) => {
                let (block, orphans) = detach(task, month, current, out);
                out.entry(month).or_default().push(block);
                kept.extend(orphans);
            }
        }
    }
    kept
}

/// Splits an archived node into its archive block and the live nodes that must be
/// re-homed. Qualifying children from the same month stay nested in the block;
/// those from other months become blocks of their own month.
fn detach(
    mut task: Task,
    month: YearMonth,
    current: YearMonth,
    out: &mut BTreeMap<YearMonth, Vec<Task>>,
) -> (Task, Vec<Task>) {
    let mut nested = Vec::new();
    let mut orphans = Vec::new();
    for child in std::mem::take(&mut task.children) {
        match qualifying_month(&child, current) {
            Some(m) => {
                let (block, lost) = detach(child, m, current, out);
                if m == month {
                    nested.push(block);
                } else {
                    out.entry(m).or_default().push(block);
                }
                orphans.extend(lost);
            }
            None => orphans.extend(prune(vec![child], current, out)),
        }
    }
    task.children = nested;
    (task, orphans)
}

/// Previous content of a file touched during a run, for rollback.
struct Written {
    path: std::path::PathBuf,
    previous: Option<String>,
}

impl<'a> Archiver<'a> {
    pub fn new(session: &'a StorageSession) -> Self { Self { session } }

    /// Archives relative to today's local date and returns the pruned state, or
    /// `state` unchanged if anything failed.
    pub fn archive(&self, state: AppState) -> AppState {
        self.archive_as_of(state, Local::now().date_naive())
    }

    pub fn archive_as_of(&self, state: AppState, today: NaiveDate) -> AppState {
        match self.migrate(&state, today) {
            Ok(m) => m.state,
            Err(e) => {
                warn!(error = %e, "archival aborted; keeping live state unchanged");
                state
            }
        }
    }

    /// Partitions completed tasks from months before `today`'s month into monthly
    /// archive files. Existing archive files are extended, not replaced. On error,
    /// files written earlier in the run are rolled back and the error is returned.
    pub fn migrate(&self, state: &AppState, today: NaiveDate) -> Result<Migration> {
        let current = YearMonth::of(today);
        let mut buckets = BTreeMap::new();
        let tasks = prune(state.tasks.clone(), current, &mut buckets);
        let pruned = AppState { habits: state.habits.clone(), tasks };
        if buckets.is_empty() {
            return Ok(Migration { state: pruned, archived: BTreeMap::new() });
        }

        // Read every target before writing anything.
        let layout = self.session.layout();
        let fs = self.session.fs();
        let mut plan = Vec::with_capacity(buckets.len());
        for (month, blocks) in &buckets {
            let path = layout.archive(*month);
            let previous = if fs.exists(&path) {
                Some(fs.read_to_string(&path).map_err(|e| StoreError::io("read", &path, e))?)
            } else {
                None
            };
            let mut merged = previous.as_deref().map(markdown::parse).unwrap_or_default().tasks;
            merged.extend(blocks.iter().cloned());
            plan.push((path, previous, markdown::serialize_tasks(&merged)));
        }

        let mut written: Vec<Written> = Vec::new();
        for (path, previous, text) in plan {
            if let Err(e) = fs.write(&path, &text) {
                self.roll_back(&written);
                return Err(StoreError::io("write", &path, e));
            }
            written.push(Written { path, previous });
        }

        let archived: BTreeMap<YearMonth, usize> = buckets
            .iter()
            .map(|(m, blocks)| (*m, blocks.iter().map(Task::subtree_len).sum()))
            .collect();
        let migration = Migration { state: pruned, archived };
        info!(tasks = migration.archived_total(), months = migration.archived.len(), "archived completed tasks");
        Ok(migration)
    }

    fn roll_back(&self, written: &[Written]) {
        let fs = self.session.fs();
        for w in written.iter().rev() {
            let res = match &w.previous {
                Some(text) => fs.write(&w.path, text),
                None => fs.remove_file(&w.path),
            };
            if let Err(e) = res {
                warn!(path = %w.path.display(), error = %e, "could not roll back archive file");
            }
        }
    }

    /// Raw text of the existing archive files among the `months` calendar months
    /// ending with `today`'s month, oldest first. Unreadable months are skipped.
    pub fn recent_archives(&self, months: usize, today: NaiveDate) -> String {
        let layout = self.session.layout();
        let fs = self.session.fs();
        let months = months.min(MAX_RECENT_MONTHS);
        let mut month = YearMonth::of(today);
        let mut window = Vec::with_capacity(months);
        for _ in 0..months {
            window.push(month);
            month = month.previous();
        }

        let mut parts = Vec::new();
        for m in window.into_iter().rev() {
            let path = layout.archive(m);
            if !fs.exists(&path) { continue; }
            match fs.read_to_string(&path) {
                Ok(text) => parts.push(text),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable archive"),
            }
        }
        parts.join("\n")
    }

    /// Months that have an archive file, newest first.
    pub fn archived_months(&self) -> Vec<YearMonth> {
        let root = self.session.layout().root();
        let mut months: Vec<YearMonth> = match self.session.fs().list_dir(root) {
            Ok(names) => names.iter().filter_map(|n| Layout::archive_month(n)).collect(),
            Err(e) => {
                warn!(error = %e, "cannot list archive files");
                Vec::new()
            }
        };
        months.sort_unstable_by(|a, b| b.cmp(a));
        months
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::testing::FaultyFs;
    use crate::model::Habit;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    const TODAY: (i32, u32, u32) = (2026, 10, 16);

    fn today() -> NaiveDate { date(TODAY.0, TODAY.1, TODAY.2) }

    fn session() -> (TempDir, StorageSession) {
        let dir = TempDir::new().unwrap();
        let s = StorageSession::open(dir.path());
        s.initialize().unwrap();
        (dir, s)
    }

    fn archive_tasks(s: &StorageSession, y: i32, m: u32) -> Vec<Task> {
        let path = s.layout().archive(YearMonth::new(y, m).unwrap());
        markdown::parse(&std::fs::read_to_string(path).unwrap()).tasks
    }

    #[test]
    fn partitions_by_completion_month() {
        let (_dir, s) = session();
        let state = AppState {
            habits: vec![Habit::new("exercise", 24.0)],
            tasks: vec![
                Task::new("old").completed_on(date(2026, 8, 20)),
                Task::new("older").completed_on(date(2025, 12, 31)),
                Task::new("this month").completed_on(date(2026, 10, 1)),
                Task::new("open"),
            ],
        };
        let m = Archiver::new(&s).migrate(&state, today()).unwrap();
        let live: Vec<_> = m.state.tasks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(live, ["this month", "open"]);
        assert_eq!(m.state.habits.len(), 1);
        assert_eq!(archive_tasks(&s, 2026, 8)[0].text, "old");
        assert_eq!(archive_tasks(&s, 2025, 12)[0].text, "older");
        assert!(!s.layout().archive(YearMonth::new(2026, 10).unwrap()).exists());
        assert_eq!(m.archived_total(), 2);
    }

    #[test]
    fn keeps_open_ancestors_and_current_siblings() {
        let (_dir, s) = session();
        let parent = Task::new("parent").with_children(vec![
            Task::new("recent").completed_on(date(2026, 10, 3)),
            Task::new("stale").completed_on(date(2026, 9, 28)),
        ]);
        let state = AppState { habits: vec![], tasks: vec![parent] };
        let pruned = Archiver::new(&s).archive_as_of(state, today());
        assert_eq!(pruned.tasks.len(), 1);
        let kids: Vec<_> = pruned.tasks[0].children.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(kids, ["recent"]);
        assert_eq!(archive_tasks(&s, 2026, 9)[0].text, "stale");
    }

    #[test]
    fn non_qualifying_children_move_to_nearest_survivor() {
        let (_dir, s) = session();
        let archived_mid = Task::new("mid")
            .completed_on(date(2026, 7, 1))
            .with_children(vec![
                Task::new("still open"),
                Task::new("same month").completed_on(date(2026, 7, 9)),
                Task::new("other month").completed_on(date(2026, 6, 2)),
            ]);
        let root = Task::new("root").with_children(vec![Task::new("a"), archived_mid, Task::new("z")]);
        let top_archived = Task::new("done project")
            .completed_on(date(2026, 5, 5))
            .with_children(vec![Task::new("follow-up")]);
        let state = AppState { habits: vec![], tasks: vec![root, top_archived] };

        let m = Archiver::new(&s).migrate(&state, today()).unwrap();
        let top: Vec<_> = m.state.tasks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(top, ["root", "follow-up"]);
        let kids: Vec<_> = m.state.tasks[0].children.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(kids, ["a", "still open", "z"]);

        let july = archive_tasks(&s, 2026, 7);
        assert_eq!(july.len(), 1);
        assert_eq!(july[0].text, "mid");
        assert_eq!(july[0].children.len(), 1);
        assert_eq!(july[0].children[0].text, "same month");
        assert_eq!(archive_tasks(&s, 2026, 6)[0].text, "other month");
        assert_eq!(archive_tasks(&s, 2026, 5)[0].text, "done project");
        assert_eq!(m.archived[&YearMonth::new(2026, 7).unwrap()], 2);
    }

    #[test]
    fn repeated_runs_append_to_existing_archive() {
        let (_dir, s) = session();
        let a = Archiver::new(&s);
        let first = AppState { habits: vec![], tasks: vec![Task::new("one").completed_on(date(2026, 9, 1))] };
        a.archive_as_of(first, today());
        let second = AppState { habits: vec![], tasks: vec![Task::new("two").completed_on(date(2026, 9, 2))] };
        a.archive_as_of(second, today());
        let texts: Vec<_> = archive_tasks(&s, 2026, 9).into_iter().map(|t| t.text).collect();
        assert_eq!(texts, ["one", "two"]);
    }

    #[test]
    fn nothing_to_archive_touches_no_files() {
        let (dir, s) = session();
        let state = AppState { habits: vec![], tasks: vec![Task::new("open")] };
        let pruned = Archiver::new(&s).archive_as_of(state.clone(), today());
        assert_eq!(pruned, state);
        let names: Vec<_> = std::fs::read_dir(dir.path()).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(names, ["history"]);
    }

    #[test]
    fn write_failure_returns_original_and_rolls_back() {
        let dir = TempDir::new().unwrap();
        let fs = Arc::new(FaultyFs::failing_on("2026-09"));
        let s = StorageSession::with_fs(dir.path(), fs.clone());
        s.initialize().unwrap();
        let aug = s.layout().archive(YearMonth::new(2026, 8).unwrap());
        std::fs::write(&aug, "# Tasks\n\n## earlier\n- Status: completed (2026-08-01)\n\n").unwrap();
        let before_aug = std::fs::read_to_string(&aug).unwrap();

        let state = AppState {
            habits: vec![],
            tasks: vec![
                Task::new("aug").completed_on(date(2026, 8, 3)),
                Task::new("jul").completed_on(date(2026, 7, 3)),
                Task::new("sep").completed_on(date(2026, 9, 3)),
            ],
        };
        let result = Archiver::new(&s).archive_as_of(state.clone(), today());
        assert_eq!(result, state);
        // july and august were written, then august restored and july removed
        assert_eq!(fs.writes.lock().len(), 3);
        assert_eq!(std::fs::read_to_string(&aug).unwrap(), before_aug);
        assert!(!s.layout().archive(YearMonth::new(2026, 7).unwrap()).exists());

        fs.heal();
        let pruned = Archiver::new(&s).archive_as_of(state, today());
        assert!(pruned.tasks.is_empty());
        assert_eq!(archive_tasks(&s, 2026, 8).len(), 2);
    }

    #[test]
    fn recent_archives_concatenates_existing_months() {
        let (_dir, s) = session();
        let layout = s.layout();
        std::fs::write(layout.archive(YearMonth::new(2026, 10).unwrap()), "OCT\n").unwrap();
        std::fs::write(layout.archive(YearMonth::new(2026, 8).unwrap()), "AUG\n").unwrap();
        std::fs::write(layout.archive(YearMonth::new(2026, 5).unwrap()), "MAY\n").unwrap();
        let a = Archiver::new(&s);
        assert_eq!(a.recent_archives(3, today()), "AUG\n\nOCT\n");
        assert_eq!(a.recent_archives(0, today()), "");
        assert_eq!(a.archived_months().len(), 3);
        assert_eq!(a.archived_months()[0], YearMonth::new(2026, 10).unwrap());
    }

    #[test]
    fn recent_archives_window_is_bounded() {
        let (_dir, s) = session();
        let layout = s.layout();
        std::fs::write(layout.archive(YearMonth::new(2026, 10).unwrap()), "OCT\n").unwrap();
        std::fs::write(layout.archive(YearMonth::new(1926, 11).unwrap()), "OLD\n").unwrap();
        std::fs::write(layout.archive(YearMonth::new(1926, 10).unwrap()), "TOO OLD\n").unwrap();
        assert_eq!(Archiver::new(&s).recent_archives(usize::MAX, today()), "OLD\n\nOCT\n");
    }

    #[cfg(unix)]
    #[test]
    fn recent_archives_skips_unreadable_month() {
        let (_dir, s) = session();
        let layout = s.layout();
        std::fs::create_dir(layout.archive(YearMonth::new(2026, 9).unwrap())).unwrap();
        std::fs::write(layout.archive(YearMonth::new(2026, 10).unwrap()), "OCT\n").unwrap();
        assert_eq!(Archiver::new(&s).recent_archives(2, today()), "OCT\n");
    }
}
