// tally-store/src/main.rs

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};

use tally_store::{
    config::PartialConfig, markdown, Archiver, ChangeWatcher, Config, LoadOutcome, SnapshotManager,
    SnapshotReason, StorageSession,
};

#[derive(Parser)]
#[command(name = "tally", version, about = "Habit and task tracker storage")]
struct Args {
    /// Config file layered over the user config
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Application root (overrides config and TALLY_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Create the storage directories and an empty state file if none exists
    Init,
    /// Print the current state
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Move tasks completed before this month into monthly archive files
    Archive,
    /// Snapshot management
    Snapshot {
        #[command(subcommand)]
        cmd: SnapshotCmd,
    },
    /// Print the raw text of recent monthly archives
    Recent {
        #[arg(long)]
        months: Option<usize>,
    },
    /// Report external edits to the state file until interrupted
    Watch,
    /// Verify the state file is in canonical form
    Check,
}

#[derive(Subcommand)]
enum SnapshotCmd {
    /// Snapshot the current state; reason is auto | llm-action | user-request | <tag>
    Create {
        #[arg(default_value = "user-request")]
        reason: String,
    },
    List,
    Show { file: String },
    Restore { file: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut cfg = Config::load(args.config.as_deref())?;
    if args.root.is_some() {
        let mut patch = PartialConfig::default();
        patch.storage.root = args.root.clone();
        cfg.apply_runtime_overlay(&patch);
    }
    let root = cfg.resolve_root()?;
    let session = StorageSession::open(&root);
    session.initialize().with_context(|| format!("initialize {}", root.display()))?;

    match args.cmd {
        Cmd::Init => init(&session),
        Cmd::Show { json } => show(&session, json),
        Cmd::Archive => archive(&session, &cfg),
        Cmd::Snapshot { cmd } => snapshot(&session, &cfg, cmd),
        Cmd::Recent { months } => {
            let n = months.unwrap_or(cfg.archive.recent_months);
            print!("{}", Archiver::new(&session).recent_archives(n, Local::now().date_naive()));
            Ok(())
        }
        Cmd::Watch => watch(session, &cfg).await,
        Cmd::Check => check(&session),
    }
}

fn load_existing(session: &StorageSession) -> Result<tally_store::AppState> {
    match session.load() {
        LoadOutcome::Loaded(state) => Ok(state),
        LoadOutcome::Missing => bail!("no state yet; run `tally init`"),
        LoadOutcome::Unreadable(e) => bail!("state file is unreadable: {e}"),
    }
}

fn init(session: &StorageSession) -> Result<()> {
    match session.load() {
        LoadOutcome::Missing => {
            session.save(&Default::default())?;
            info!(path = %session.layout().current().display(), "created empty state");
        }
        LoadOutcome::Loaded(_) => info!("state already present"),
        LoadOutcome::Unreadable(e) => bail!("state file is unreadable: {e}"),
    }
    Ok(())
}

fn show(session: &StorageSession, json: bool) -> Result<()> {
    let state = load_existing(session)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        print!("{}", markdown::serialize(&state));
    }
    Ok(())
}

fn archive(session: &StorageSession, cfg: &Config) -> Result<()> {
    let state = load_existing(session)?;
    let snapshots = SnapshotManager::new(session).with_retention(cfg.snapshots.retention);
    if let Err(e) = snapshots.create(&state, SnapshotReason::PreArchive) {
        warn!(error = %e, "pre-archive snapshot failed");
    }
    match Archiver::new(session).migrate(&state, Local::now().date_naive()) {
        Ok(m) if m.archived.is_empty() => println!("nothing to archive"),
        Ok(m) => {
            session.save(&m.state)?;
            for (month, n) in &m.archived {
                println!("{month}: {n} task(s)");
            }
        }
        Err(e) => warn!(error = %e, "archival failed; state left unchanged"),
    }
    Ok(())
}

fn snapshot(session: &StorageSession, cfg: &Config, cmd: SnapshotCmd) -> Result<()> {
    let mgr = SnapshotManager::new(session).with_retention(cfg.snapshots.retention);
    match cmd {
        SnapshotCmd::Create { reason } => {
            let state = load_existing(session)?;
            let name = mgr.create(&state, SnapshotReason::from_tag(&reason))?;
            println!("{name}");
        }
        SnapshotCmd::List => {
            for name in mgr.list() { println!("{name}"); }
        }
        SnapshotCmd::Show { file } => {
            let snap = mgr.load(&file).with_context(|| format!("snapshot {file} not found"))?;
            println!("# {} ({})", snap.timestamp.to_rfc3339(), snap.reason);
            print!("{}", snap.markdown);
        }
        SnapshotCmd::Restore { file } => {
            let current = load_existing(session)?;
            if mgr.restore(&file, &current)?.is_none() { bail!("snapshot {file} not found"); }
            println!("restored {file}");
        }
    }
    Ok(())
}

async fn watch(session: StorageSession, cfg: &Config) -> Result<()> {
    if let LoadOutcome::Unreadable(e) = session.load() {
        warn!(error = %e, "starting watcher on unreadable state file");
    }
    let mut handle = ChangeWatcher::new(session)
        .with_period(cfg.watcher.poll_interval())
        .with_fs_events(cfg.watcher.fs_events)
        .start(|state| {
            println!("external change: {} habit(s), {} task(s)", state.habits.len(), state.task_count());
        });
    info!("watching; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    handle.cancel();
    Ok(())
}

fn check(session: &StorageSession) -> Result<()> {
    let path = session.layout().current();
    let text = session.read_current_text()?;
    if markdown::is_canonical(&text) {
        println!("ok");
        Ok(())
    } else {
        bail!("{} is not in canonical form; the next save will rewrite it", path.display())
    }
}
