// tally-store/src/model.rs

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Note {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), created_at: Utc::now() }
    }
}

/// A recurring entity. Habits are never archived.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Habit {
    pub id: String,
    pub text: String,
    pub repeat_interval_hours: f64,
    pub total_completions: u64,
    pub last_completed: Option<DateTime<Utc>>,
    pub notes: Vec<Note>,
}

impl Habit {
    pub fn new(text: impl Into<String>, repeat_interval_hours: f64) -> Self {
        Self {
            id: new_id(),
            text: text.into(),
            repeat_interval_hours,
            total_completions: 0,
            last_completed: None,
            notes: Vec::new(),
        }
    }

    /// Records one completion at `at`, clamped so `last_completed` never lies in the future.
    pub fn record_completion(&mut self, at: DateTime<Utc>) {
        let now = Utc::now();
        self.total_completions += 1;
        self.last_completed = Some(if at > now { now } else { at });
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_completed {
            None => true,
            Some(last) => {
                let millis = (self.repeat_interval_hours * 3_600_000.0) as i64;
                now - last >= Duration::milliseconds(millis)
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub text: String,
    pub completed: bool,
    pub completed_at: Option<NaiveDate>,
    pub notes: Vec<Note>,
    pub children: Vec<Task>,
}

impl Task {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            text: text.into(),
            completed: false,
            completed_at: None,
            notes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder used by tests and callers constructing already-finished work.
    pub fn completed_on(mut self, date: NaiveDate) -> Self {
        self.completed = true;
        self.completed_at = Some(date);
        self
    }

    pub fn with_children(mut self, children: Vec<Task>) -> Self {
        self.children = children;
        self
    }

    /// Toggles completion on this node only; ancestors and descendants are untouched.
    pub fn set_completed(&mut self, completed: bool, today: NaiveDate) {
        self.completed = completed;
        self.completed_at = if completed { Some(today) } else { None };
    }

    pub fn completion_month(&self) -> Option<YearMonth> {
        if !self.completed { return None; }
        self.completed_at.map(YearMonth::of)
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(Task::subtree_len).sum::<usize>()
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut Task> {
        if self.id == id { return Some(self); }
        self.children.iter_mut().find_map(|c| c.find_mut(id))
    }

    /// Compares everything except ids, recursively.
    pub fn same_content(&self, other: &Task) -> bool {
        self.text == other.text
            && self.completed == other.completed
            && self.completed_at == other.completed_at
            && self.notes == other.notes
            && self.children.len() == other.children.len()
            && self.children.iter().zip(&other.children).all(|(a, b)| a.same_content(b))
    }
}

#[derive(Default, Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AppState {
    pub habits: Vec<Habit>,
    pub tasks: Vec<Task>,
}

impl AppState {
    pub fn is_empty(&self) -> bool {
        self.habits.is_empty() && self.tasks.is_empty()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.iter().map(Task::subtree_len).sum()
    }

    pub fn find_task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find_map(|t| t.find_mut(id))
    }

    pub fn find_habit_mut(&mut self, id: &str) -> Option<&mut Habit> {
        self.habits.iter_mut().find(|h| h.id == id)
    }

    /// Logical equivalence: ids are ignored since the file format does not carry them.
    pub fn same_content(&self, other: &AppState) -> bool {
        self.habits.len() == other.habits.len()
            && self.habits.iter().zip(&other.habits).all(|(a, b)| {
                a.text == b.text
                    && a.repeat_interval_hours == b.repeat_interval_hours
                    && a.total_completions == b.total_completions
                    && a.last_completed == b.last_completed
                    && a.notes == b.notes
            })
            && self.tasks.len() == other.tasks.len()
            && self.tasks.iter().zip(&other.tasks).all(|(a, b)| a.same_content(b))
    }
}

/// Archival month bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self { year: date.year(), month: date.month() }
    }

    pub fn previous(self) -> Self {
        if self.month == 1 {
            Self { year: self.year - 1, month: 12 }
        } else {
            Self { year: self.year, month: self.month - 1 }
        }
    }

    /// Parses `YYYY-MM`.
    pub fn parse(s: &str) -> Option<Self> {
        let (y, m) = s.split_once('-')?;
        if y.len() != 4 || m.len() != 2 { return None; }
        Self::new(y.parse().ok()?, m.parse().ok()?)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}
