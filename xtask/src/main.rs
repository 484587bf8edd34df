use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{fs, path::PathBuf};
use tally_store::markdown;

#[derive(Parser)]
#[command(name = "xtask", about = "tally-store workspace tasks")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Check that a state or archive file survives parse -> serialize unchanged
    Roundtrip { file: PathBuf },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Roundtrip { file } => roundtrip(&file),
    }
}

fn roundtrip(path: &PathBuf) -> Result<()> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let state = markdown::parse(&text);
    // archive files carry only the Tasks section
    let again = if text.contains("# Habits") {
        markdown::serialize(&state)
    } else {
        markdown::serialize_tasks(&state.tasks)
    };
    if again == text {
        println!("OK: {}", path.display());
        return Ok(());
    }
    eprintln!("Not canonical: {}", path.display());
    let first = text.lines().zip(again.lines()).position(|(a, b)| a != b);
    match first {
        Some(i) => {
            eprintln!("- line {}:", i + 1);
            eprintln!("  file:      {}", text.lines().nth(i).unwrap_or_default());
            eprintln!("  canonical: {}", again.lines().nth(i).unwrap_or_default());
        }
        None => eprintln!("- differs in length ({} vs {} lines)", text.lines().count(), again.lines().count()),
    }
    std::process::exit(1);
}
