// tally-store/src/markdown.rs
//
// Text codec for the state file. The file is hand-editable, so `parse` never fails:
// lines it does not understand are skipped.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use regex::Regex;
use std::{fmt::Write as _, sync::LazyLock};

use crate::model::{AppState, Habit, Note, Task};

const HABITS_HEADER: &str = "# Habits";
const TASKS_HEADER: &str = "# Tasks";
const SEPARATOR: &str = "---";
const DEFAULT_INTERVAL_HOURS: f64 = 24.0;

static CHECKBOX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([ \t]*)- \[([ xX])\](?: (.*))?$").unwrap());
static NOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\|\s*(?:\[([^\]]*)\])?\s?(.*)$").unwrap());
static DATE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)\s*\((\d{4}-\d{2}-\d{2})\)$").unwrap());
static META: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^- ([A-Za-z][A-Za-z ]*?)\s*:\s*(.*)$").unwrap());

/// Serializes the full state. Identical input always yields identical output.
pub fn serialize(state: &AppState) -> String {
    let mut out = String::new();
    out.push_str(HABITS_HEADER);
    out.push_str("\n\n");
    for habit in &state.habits {
        write_habit(&mut out, habit);
        out.push('\n');
    }
    out.push_str(SEPARATOR);
    out.push_str("\n\n");
    write_task_section(&mut out, &state.tasks);
    out
}

/// Serializes only the Tasks section; this is the archive file grammar.
pub fn serialize_tasks(tasks: &[Task]) -> String {
    let mut out = String::new();
    write_task_section(&mut out, tasks);
    out
}

fn write_task_section(out: &mut String, tasks: &[Task]) {
    out.push_str(TASKS_HEADER);
    out.push_str("\n\n");
    for task in tasks {
        write_top_task(out, task);
        out.push('\n');
    }
}

fn write_habit(out: &mut String, habit: &Habit) {
    write_heading(out, &habit.text);
    let _ = writeln!(out, "- Interval: {}h", habit.repeat_interval_hours);
    let _ = writeln!(out, "- Total Completions: {}", habit.total_completions);
    match habit.last_completed {
        Some(at) => { let _ = writeln!(out, "- Last completed: {}", timestamp(at)); }
        None => out.push_str("- Last completed: never\n"),
    }
    write_notes(out, &habit.notes, "");
}

fn write_top_task(out: &mut String, task: &Task) {
    write_heading(out, &task.text);
    if task.completed {
        match task.completed_at {
            Some(d) => { let _ = writeln!(out, "- Status: completed ({d})"); }
            None => out.push_str("- Status: completed\n"),
        }
    }
    write_notes(out, &task.notes, "");
    for child in &task.children {
        write_subtask(out, child, 0);
    }
}

fn write_heading(out: &mut String, text: &str) {
    let title = one_line(text);
    if title.is_empty() {
        out.push_str("##\n");
    } else {
        let _ = writeln!(out, "## {title}");
    }
}

fn write_subtask(out: &mut String, task: &Task, depth: usize) {
    let indent = "  ".repeat(depth);
    let mark = if task.completed { 'x' } else { ' ' };
    let _ = write!(out, "{indent}- [{mark}] {}", one_line(&task.text));
    if let (true, Some(d)) = (task.completed, task.completed_at) {
        let _ = write!(out, " ({d})");
    }
    out.push('\n');
    write_notes(out, &task.notes, &"  ".repeat(depth + 1));
    for child in &task.children {
        write_subtask(out, child, depth + 1);
    }
}

fn write_notes(out: &mut String, notes: &[Note], indent: &str) {
    for note in notes {
        let _ = writeln!(out, "{indent}| [{}] {}", timestamp(note.created_at), one_line(&note.text));
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Texts are stored one per line: newlines become spaces and surrounding
/// whitespace is dropped, since the parser trims every line it reads.
fn one_line(text: &str) -> String {
    text.split(['\r', '\n']).collect::<Vec<_>>().join(" ").trim().to_string()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Section { Preamble, Habits, Tasks, Unknown }

/// Forward-pass parser state. `path` is the ancestor stack of the current top-level
/// task, expressed as child indices from the top-level node downwards.
struct Parser {
    section: Section,
    habit: Option<Habit>,
    task: Option<Task>,
    path: Vec<usize>,
    state: AppState,
}

impl Parser {
    fn new() -> Self {
        Self { section: Section::Preamble, habit: None, task: None, path: Vec::new(), state: AppState::default() }
    }

    fn flush(&mut self) {
        if let Some(h) = self.habit.take() { self.state.habits.push(h); }
        if let Some(t) = self.task.take() { self.state.tasks.push(t); }
        self.path.clear();
    }

    fn finish(mut self) -> AppState {
        self.flush();
        self.state
    }

    fn line(&mut self, raw: &str) {
        let line = raw.trim_end();
        let trimmed = line.trim_start();
        if trimmed.is_empty() { return; }

        if let Some(title) = trimmed.strip_prefix("# ") {
            self.flush();
            self.section = match title.trim().to_ascii_lowercase().as_str() {
                "habits" => Section::Habits,
                "tasks" => Section::Tasks,
                _ => Section::Unknown,
            };
            return;
        }
        if trimmed == SEPARATOR {
            self.flush();
            return;
        }
        // An empty title serializes as a bare `##`.
        if trimmed == "##" {
            self.heading("");
            return;
        }
        if let Some(title) = trimmed.strip_prefix("## ") {
            self.heading(title.trim());
            return;
        }
        if let Some(caps) = NOTE.captures(trimmed) {
            let stamp = caps.get(1).map(|m| m.as_str());
            let text = caps.get(2).map_or("", |m| m.as_str());
            if let Some(note) = parse_note(stamp, text) { self.attach_note(note); }
            return;
        }
        match self.section {
            Section::Habits => self.habit_line(trimmed),
            Section::Tasks => self.task_line(line, trimmed),
            Section::Preamble | Section::Unknown => {}
        }
    }

    fn heading(&mut self, title: &str) {
        match self.section {
            Section::Habits => {
                self.flush();
                self.habit = Some(Habit::new(title, DEFAULT_INTERVAL_HOURS));
            }
            Section::Tasks => {
                self.flush();
                self.task = Some(Task::new(title));
            }
            Section::Preamble | Section::Unknown => {}
        }
    }

    fn habit_line(&mut self, line: &str) {
        let Some(habit) = self.habit.as_mut() else { return };
        let Some(caps) = META.captures(line) else { return };
        let key = caps[1].to_ascii_lowercase();
        let value = caps[2].trim();
        match key.as_str() {
            "interval" | "repeat" => {
                let hours = value.trim_end_matches("hours").trim_end_matches('h').trim();
                if let Ok(h) = hours.parse::<f64>() {
                    if h.is_finite() && h > 0.0 { habit.repeat_interval_hours = h; }
                }
            }
            // "Streak" is the legacy label for the completion counter.
            "total completions" | "streak" => {
                if let Ok(n) = value.parse() { habit.total_completions = n; }
            }
            "last completed" => {
                habit.last_completed = parse_instant(value);
            }
            _ => {}
        }
    }

    fn task_line(&mut self, line: &str, trimmed: &str) {
        let Some(top) = self.task.as_mut() else { return };

        if let Some(caps) = CHECKBOX.captures(line) {
            let depth = indent_width(&caps[1]) / 2;
            let completed = !caps[2].trim().is_empty();
            let mut child = Task::new(caps.get(3).map_or("", |m| m.as_str()).trim());
            if completed {
                child.completed = true;
                if let Some((text, d)) = split_date_suffix(&child.text) {
                    child.text = text;
                    child.completed_at = Some(d);
                }
            }
            self.path.truncate(depth);
            let parent = node_at(top, &self.path);
            parent.children.push(child);
            self.path.push(parent.children.len() - 1);
            return;
        }

        if !self.path.is_empty() { return; }
        let Some(caps) = META.captures(trimmed) else { return };
        if !caps[1].eq_ignore_ascii_case("status") { return; }
        let value = caps[2].trim();
        let lowered = value.to_ascii_lowercase();
        if lowered.starts_with("completed") || lowered.starts_with("done") {
            top.completed = true;
            top.completed_at = split_date_suffix(value).map(|(_, d)| d);
        }
    }

    fn attach_note(&mut self, note: Note) {
        match self.section {
            Section::Habits => {
                if let Some(h) = self.habit.as_mut() { h.notes.push(note); }
            }
            Section::Tasks => {
                if let Some(top) = self.task.as_mut() { node_at(top, &self.path).notes.push(note); }
            }
            Section::Preamble | Section::Unknown => {}
        }
    }
}

fn node_at<'a>(top: &'a mut Task, path: &[usize]) -> &'a mut Task {
    path.iter().fold(top, |node, &i| &mut node.children[i])
}

/// `"text (YYYY-MM-DD)"` into its text and date.
fn split_date_suffix(s: &str) -> Option<(String, NaiveDate)> {
    let caps = DATE_SUFFIX.captures(s)?;
    let date = NaiveDate::parse_from_str(&caps[2], "%Y-%m-%d").ok()?;
    Some((caps[1].to_string(), date))
}

fn indent_width(ws: &str) -> usize {
    ws.chars().map(|c| if c == '\t' { 2 } else { 1 }).sum()
}

fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    if value.eq_ignore_ascii_case("never") { return None; }
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn parse_note(stamp: Option<&str>, text: &str) -> Option<Note> {
    let created_at = match stamp {
        Some(s) => parse_instant(s.trim())?,
        // Hand-written notes without a stamp are dated at read time.
        None => Utc::now(),
    };
    Some(Note { text: text.trim().to_string(), created_at })
}

/// Parses state text. Never fails; every entity receives a fresh id.
pub fn parse(text: &str) -> AppState {
    let mut parser = Parser::new();
    for line in text.lines() {
        parser.line(line);
    }
    parser.finish()
}

/// Re-serializes `text` and reports whether it is already in canonical form.
pub fn is_canonical(text: &str) -> bool {
    serialize(&parse(text)) == text
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 14, h, min, 5).unwrap()
    }

    fn sample() -> AppState {
        let mut exercise = Habit::new("exercise", 24.0);
        exercise.total_completions = 12;
        exercise.last_completed = Some(at(7, 30));
        exercise.notes.push(Note { text: "knee felt fine".into(), created_at: at(7, 45) });
        let read = Habit::new("read", 1.5);

        let mut flights = Task::new("Book flights").completed_on(date(2026, 8, 5));
        flights.notes.push(Note { text: "aisle seat".into(), created_at: at(9, 0) });
        flights.children.push(Task::new("Compare prices").completed_on(date(2026, 8, 4)));
        flights.children[0].children.push(Task::new("check rail too"));
        let mut trip = Task::new("Plan trip").with_children(vec![flights, Task::new("Pack")]);
        trip.notes.push(Note { text: "budget 900".into(), created_at: at(8, 0) });
        let done = Task::new("File taxes").completed_on(date(2026, 4, 30));

        AppState { habits: vec![exercise, read], tasks: vec![trip, done] }
    }

    #[test]
    fn serializes_expected_layout() {
        let text = serialize(&sample());
        let expected = "\
# Habits

## exercise
- Interval: 24h
- Total Completions: 12
- Last completed: 2026-09-14T07:30:05Z
| [2026-09-14T07:45:05Z] knee felt fine

## read
- Interval: 1.5h
- Total Completions: 0
- Last completed: never

---

# Tasks

## Plan trip
| [2026-09-14T08:00:05Z] budget 900
- [x] Book flights (2026-08-05)
  | [2026-09-14T09:00:05Z] aisle seat
  - [x] Compare prices (2026-08-04)
    - [ ] check rail too
- [ ] Pack

## File taxes
- Status: completed (2026-04-30)

";
        assert_eq!(text, expected);
    }

    #[test]
    fn parse_inverts_serialize() {
        let state = sample();
        let parsed = parse(&serialize(&state));
        assert!(parsed.same_content(&state), "{parsed:#?}");
    }

    #[test]
    fn reserialization_is_byte_identical() {
        let once = serialize(&sample());
        assert_eq!(serialize(&parse(&once)), once);
        assert!(is_canonical(&once));
    }

    #[test]
    fn empty_state_round_trips() {
        let text = serialize(&AppState::default());
        assert_eq!(text, "# Habits\n\n---\n\n# Tasks\n\n");
        let parsed = parse(&text);
        assert!(parsed.is_empty());
    }

    #[test]
    fn parse_assigns_fresh_ids() {
        let text = serialize(&sample());
        let a = parse(&text);
        let b = parse(&text);
        assert_ne!(a.tasks[0].id, b.tasks[0].id);
        assert_ne!(a.habits[0].id, b.habits[0].id);
    }

    #[test]
    fn tolerates_hand_edits() {
        let text = "\
random preamble
# Habits
## walk
- Streak: 7
- Repeat: 12 hours
- Last completed: 2026-09-01
- Mood: great
garbage line
| a note without stamp

# Tasks
- [x] orphan checkbox before any heading
## Groceries
- Status: done
- [X] milk (2026-09-02)
      - [ ] over-indented
	- [ ] tab indented
| [not a date] dropped note
## Errands
- Status: pending
";
        let s = parse(text);
        assert_eq!(s.habits.len(), 1);
        let walk = &s.habits[0];
        assert_eq!(walk.total_completions, 7);
        assert_eq!(walk.repeat_interval_hours, 12.0);
        assert_eq!(walk.last_completed, Some(Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap()));
        assert_eq!(walk.notes.len(), 1);
        assert_eq!(walk.notes[0].text, "a note without stamp");

        assert_eq!(s.tasks.len(), 2);
        let groceries = &s.tasks[0];
        assert!(groceries.completed);
        assert_eq!(groceries.completed_at, None);
        assert_eq!(groceries.children.len(), 1);
        let milk = &groceries.children[0];
        assert_eq!(milk.text, "milk");
        assert_eq!(milk.completed_at, Some(date(2026, 9, 2)));
        // depth 3 clamps to directly under "milk"; the tab line is depth 1
        assert_eq!(milk.children.len(), 2);
        assert_eq!(milk.children[0].text, "over-indented");
        assert_eq!(milk.children[1].text, "tab indented");
        assert!(milk.children[1].notes.is_empty());
        assert!(!s.tasks[1].completed);
    }

    #[test]
    fn unchecked_date_suffix_stays_in_text() {
        let s = parse("# Tasks\n## Trip\n- [ ] leave (2026-01-01)\n");
        let child = &s.tasks[0].children[0];
        assert_eq!(child.text, "leave (2026-01-01)");
        assert_eq!(child.completed_at, None);
    }

    #[test]
    fn multiline_text_is_flattened() {
        let mut state = AppState::default();
        state.tasks.push(Task::new("first\nsecond "));
        let text = serialize(&state);
        assert!(text.contains("## first second\n"));
        assert_eq!(serialize(&parse(&text)), text);
    }

    #[test]
    fn notes_attach_to_most_specific_entity() {
        let text = "\
# Tasks
## Top
| [2026-09-14T07:30:05Z] top note
- [ ] child
  | [2026-09-14T07:31:05Z] child note
  - [ ] grandchild
    | [2026-09-14T07:32:05Z] grandchild note
- [ ] second child
";
        let s = parse(text);
        let top = &s.tasks[0];
        assert_eq!(top.notes[0].text, "top note");
        assert_eq!(top.children[0].notes[0].text, "child note");
        assert_eq!(top.children[0].children[0].notes[0].text, "grandchild note");
        assert!(top.children[1].notes.is_empty());
    }

    #[test]
    fn empty_titles_keep_their_own_entity() {
        let mut walk = Habit::new("walk", 24.0);
        walk.total_completions = 5;
        let mut untitled = Habit::new("", 2.0);
        untitled.total_completions = 99;
        let groceries = Task::new("Groceries").with_children(vec![Task::new("milk")]);
        let blank = Task::new("   ").with_children(vec![Task::new("child of untitled")]);
        let state = AppState { habits: vec![walk, untitled], tasks: vec![groceries, blank] };

        let text = serialize(&state);
        assert!(text.contains("\n##\n- Interval: 2h\n"));
        let parsed = parse(&text);
        assert_eq!(parsed.habits.len(), 2);
        assert_eq!(parsed.habits[0].repeat_interval_hours, 24.0);
        assert_eq!(parsed.habits[0].total_completions, 5);
        assert_eq!(parsed.habits[1].text, "");
        assert_eq!(parsed.habits[1].total_completions, 99);
        assert_eq!(parsed.tasks.len(), 2);
        assert_eq!(parsed.tasks[0].children.len(), 1);
        assert_eq!(parsed.tasks[1].text, "");
        assert_eq!(parsed.tasks[1].children[0].text, "child of untitled");
        assert_eq!(serialize(&parsed), text);
    }

    #[test]
    fn surrounding_whitespace_is_normalized_once() {
        let mut task = Task::new("  padded title \t");
        task.notes.push(Note { text: " spaced note ".into(), created_at: at(6, 0) });
        task.children.push(Task::new(" inner "));
        let state = AppState { habits: vec![Habit::new("\nlead", 8.0)], tasks: vec![task] };

        let text = serialize(&state);
        let parsed = parse(&text);
        assert_eq!(parsed.habits[0].text, "lead");
        assert_eq!(parsed.tasks[0].text, "padded title");
        assert_eq!(parsed.tasks[0].notes[0].text, "spaced note");
        assert_eq!(parsed.tasks[0].children[0].text, "inner");
        assert_eq!(serialize(&parsed), text);
    }

    #[test]
    fn archive_grammar_has_only_tasks() {
        let text = serialize_tasks(&sample().tasks);
        assert!(text.starts_with("# Tasks\n\n## Plan trip\n"));
        assert!(!text.contains("# Habits"));
        let s = parse(&text);
        assert!(s.habits.is_empty());
        assert_eq!(s.tasks.len(), 2);
    }
}
