// tally-store/src/watcher.rs
//
// Detects edits made to `current.md` by other processes. Every tick compares the
// file's text with the session's self-write marker, so this process's own saves
// and loads never come back as change events.

use notify::{recommended_watcher, Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::{io::ErrorKind, sync::Arc, time::Duration};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, trace, warn};

use crate::{markdown, model::AppState, store::StorageSession};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchState { Idle, Polling }

pub struct ChangeWatcher {
    session: StorageSession,
    period: Duration,
    fs_events: bool,
}

impl ChangeWatcher {
    pub fn new(session: StorageSession) -> Self {
        Self { session, period: DEFAULT_POLL_INTERVAL, fs_events: false }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period.max(Duration::from_millis(10));
        self
    }

    /// Also wake up on OS file notifications; the periodic tick stays as fallback.
    pub fn with_fs_events(mut self, enabled: bool) -> Self {
        self.fs_events = enabled;
        self
    }

    /// One tick. Returns the parsed state if the file differs from the last text
    /// this process wrote, loaded or already reported; the marker then moves to it.
    pub fn poll_once(&self) -> Option<AppState> {
        let path = self.session.layout().current();
        let mut marker = self.session.marker().lock();
        let text = match self.session.fs().read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "watched file is missing");
                return None;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "watcher read failed");
                return None;
            }
        };
        if marker.as_deref() == Some(text.as_str()) {
            trace!("no external change");
            return None;
        }
        let state = markdown::parse(&text);
        *marker = Some(text);
        debug!("external change detected");
        Some(state)
    }

    /// Idle -> Polling. Must be called inside a tokio runtime. Each tick and
    /// `on_change` run on the blocking pool, never on a runtime worker;
    /// `on_change` must not cancel its own handle.
    pub fn start<F>(self, on_change: F) -> WatchHandle
    where
        F: FnMut(AppState) + Send + 'static,
    {
        let active = Arc::new(Mutex::new(true));
        let (wake_tx, mut wake_rx) = mpsc::unbounded_channel::<()>();
        let events = if self.fs_events {
            match self.watch_events(wake_tx) {
                Ok(w) => Some(w),
                Err(e) => {
                    warn!(error = %e, "file notifications unavailable; polling only");
                    None
                }
            }
        } else {
            None
        };

        let gate = active.clone();
        let period = self.period;
        let watcher = Arc::new(self);
        let on_change = Arc::new(Mutex::new(on_change));
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    Some(()) = wake_rx.recv() => {}
                }
                let (gate, watcher, on_change) = (gate.clone(), watcher.clone(), on_change.clone());
                let tick = tokio::task::spawn_blocking(move || {
                    let alive = gate.lock();
                    if !*alive { return false; }
                    if let Some(state) = watcher.poll_once() {
                        let mut callback = on_change.lock();
                        (*callback)(state);
                    }
                    true
                });
                match tick.await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        warn!(error = %e, "watcher tick failed; stopping");
                        break;
                    }
                }
            }
        });

        WatchHandle { active, task: Some(task), events }
    }

    fn watch_events(&self, wake: mpsc::UnboundedSender<()>) -> notify::Result<RecommendedWatcher> {
        let target = self.session.layout().current();
        let name = target.file_name().map(|n| n.to_os_string());
        let mut watcher = recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(event) = res else { return };
            if event.paths.iter().any(|p| p.file_name() == name.as_deref()) {
                let _ = wake.send(());
            }
        })?;
        watcher.watch(self.session.layout().root(), RecursiveMode::NonRecursive)?;
        Ok(watcher)
    }
}

/// Running watcher. Dropping it cancels.
pub struct WatchHandle {
    active: Arc<Mutex<bool>>,
    task: Option<JoinHandle<()>>,
    events: Option<RecommendedWatcher>,
}

impl WatchHandle {
    pub fn state(&self) -> WatchState {
        if *self.active.lock() { WatchState::Polling } else { WatchState::Idle }
    }

    /// Polling -> Idle. Waits for a callback already in progress; once this returns
    /// no further callback fires. Idempotent.
    pub fn cancel(&mut self) {
        *self.active.lock() = false;
        if let Some(task) = self.task.take() { task.abort(); }
        self.events = None;
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) { self.cancel(); }
}
