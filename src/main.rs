mod tui;

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use termtabs::config::{self, Config};
use termtabs::orchestrator::{Geometry, Location, active_tab};
use termtabs::store::{Store, TabStore};
use termtabs::transport::{HostTransport, Transport};

/// Upper bound on waiting for the host to close a session from the CLI.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(
    name = "termtabs",
    version = env!("TERMTABS_VERSION"),
    about = "Tabbed terminal sessions per working directory"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the terminal for a directory (default)
    Attach {
        /// Working directory (default: current directory)
        dir: Option<String>,
    },
    /// Initialize termtabs config directory
    Init,
    /// List the tabs of a directory
    Tabs {
        /// Working directory (default: current directory)
        dir: Option<String>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a tab to a directory and make it active
    NewTab {
        /// Working directory (default: current directory)
        dir: Option<String>,
    },
    /// Close a tab and the session bound to it
    CloseTab {
        /// Tab id
        tab: String,
        /// Working directory (default: current directory)
        #[arg(short, long)]
        dir: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    config::ensure_dirs()?;
    let cfg = config::load()?;
    init_logging(&cfg)?;

    match cli.command.unwrap_or(Commands::Attach { dir: None }) {
        Commands::Attach { dir } => run_attach(&cfg, dir.as_deref()),
        Commands::Init => {
            println!("termtabs initialized at ~/.termtabs/");
            Ok(())
        }
        Commands::Tabs { dir, json } => {
            let directory = resolve_dir(dir.as_deref())?;
            let store = open_store()?;
            print_tabs(&store, &directory, cfg.tabs_enabled, json)
        }
        Commands::NewTab { dir } => {
            let directory = resolve_dir(dir.as_deref())?;
            let mut store = open_store()?;
            let tab_id = store.create_tab(&directory)?;
            println!("Created tab {tab_id} in {directory}");
            Ok(())
        }
        Commands::CloseTab { tab, dir } => {
            let directory = resolve_dir(dir.as_deref())?;
            let mut store = open_store()?;
            let session = store.close_tab(&directory, &tab)?;
            println!("Closed tab {tab}");
            if let Some(session_id) = session {
                let transport = HostTransport::new(cfg.host.socket_path()?);
                match transport.close(&session_id).wait(CLOSE_TIMEOUT) {
                    Some(Ok(())) => println!("Closed session {session_id}"),
                    Some(Err(e)) => {
                        eprintln!("Warning: session {session_id} left running: {e:#}");
                    }
                    None => eprintln!("Warning: no reply while closing session {session_id}"),
                }
            }
            Ok(())
        }
    }
}

/// Log to a file; the terminal belongs to the TUI.
fn init_logging(cfg: &Config) -> Result<()> {
    let path = config::log_path()?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    tracing_subscriber::fmt()
        .with_writer(Arc::new(file))
        .with_max_level(cfg.tracing_level())
        .with_ansi(false)
        .init();
    Ok(())
}

fn open_store() -> Result<Store> {
    let mut store = Store::open()?;
    store.hydrate()?;
    Ok(store)
}

fn resolve_dir(dir: Option<&str>) -> Result<String> {
    let path = dir.map_or_else(std::env::current_dir, |d| Ok(PathBuf::from(d)))?;
    let abs = std::fs::canonicalize(&path)
        .with_context(|| format!("invalid directory: {}", path.display()))?;
    abs.to_str()
        .map(str::to_string)
        .context("path contains invalid UTF-8")
}

fn run_attach(cfg: &Config, dir: Option<&str>) -> Result<()> {
    let directory = resolve_dir(dir)?;
    let store = open_store()?;
    let hydrated = store.hydrated_session_ids();
    let transport = HostTransport::new(cfg.host.socket_path()?);
    tracing::info!(
        "attaching to {directory} ({} persisted sessions)",
        hydrated.len()
    );

    let geometry = Geometry {
        cols: cfg.terminal.cols,
        rows: cfg.terminal.rows,
    };
    tui::run(
        store,
        transport,
        hydrated,
        Location::Directory(directory),
        cfg.tabs_enabled,
        geometry,
    )
}

#[derive(Serialize)]
struct TabListing<'a> {
    id: &'a str,
    label: &'a str,
    session_id: Option<&'a str>,
    active: bool,
}

fn print_tabs(store: &Store, directory: &str, tabs_enabled: bool, json: bool) -> Result<()> {
    let Some(state) = store.directory_state(directory) else {
        if json {
            println!("[]");
        } else {
            println!("No tabs for {directory}. Use `termtabs new-tab` to add one.");
        }
        return Ok(());
    };
    let active_id = active_tab(state, tabs_enabled).map(|t| t.id.as_str());
    let listing: Vec<TabListing> = state
        .tabs
        .iter()
        .map(|t| TabListing {
            id: &t.id,
            label: &t.label,
            session_id: t.session_id.as_deref(),
            active: Some(t.id.as_str()) == active_id,
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }
    if listing.is_empty() {
        println!("No tabs for {directory}. Use `termtabs new-tab` to add one.");
    }
    for t in &listing {
        println!(
            "{} {}  {}  [{}]",
            if t.active { "▸" } else { " " },
            t.label,
            t.id,
            t.session_id.unwrap_or("no session"),
        );
    }
    Ok(())
}
