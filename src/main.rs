// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Tandem workspace server and CLI.
//!
//! `tandem serve` hosts the working copies for a workspace. The other
//! subcommands inspect running sessions or talk to one from the shell.

#![allow(clippy::print_stdout, reason = "CLI tool needs to output to stdout")]
#![allow(clippy::print_stderr, reason = "CLI tool needs to output to stderr")]

use anyhow::{Context, Result, anyhow};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tandem_sync::cli::{self, ColorConfig, ColumnWidths};
use tandem_sync::client::{ChangeTransmitter, SocketTransmitter};
use tandem_sync::config::Config;
use tandem_sync::engine::{ClientManager, ConfiguredEngine, LspEngine, NullEngine};
use tandem_sync::protocol::{
    ChangeTarget, Delta, EditorChanges, FileOperation, FileOperationKind, OffsetEncoding,
};
use tandem_sync::server::{
    ChangeTracker, EndpointServer, ProjectRegistry, WorkingCopyStorage, WorkingCopyStore,
};
use tandem_sync::session::{self, Session, SessionEvent, SessionInfo};

/// Command-line arguments for Tandem.
#[derive(Parser, Debug)]
#[command(name = "tandem")]
#[command(about = "Streams editor changes into server-side working copies")]
#[command(version = env!("TANDEM_VERSION"))]
struct Args {
    /// The subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

/// Subcommands supported by Tandem.
#[derive(Subcommand, Debug)]
enum Command {
    /// Host working copies for a workspace (default if no subcommand given).
    Serve {
        /// Workspace root. Defaults to the current directory.
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Language servers in "lang:command" format (e.g., "rust:rust-analyzer").
        /// Can be specified multiple times. These override/append to the config file.
        #[arg(short, long = "server")]
        servers: Vec<String>,
    },

    /// List active Tandem sessions.
    List,

    /// Monitor events from a session.
    Monitor {
        /// Session ID or row number (use 'tandem list' to see available sessions).
        id: String,

        /// Show raw JSON output.
        #[arg(long)]
        raw: bool,

        /// Disable colored output.
        #[arg(long)]
        nocolor: bool,

        /// Filter events by regex pattern.
        #[arg(long, short)]
        filter: Option<String>,
    },

    /// Show status of a session.
    Status {
        /// Session ID or row number.
        id: String,
    },

    /// Send a tracking event for a file to a running session.
    Track {
        /// Lifecycle transition to send.
        #[arg(value_enum)]
        action: TrackAction,

        /// The file (the new path for `move`).
        path: PathBuf,

        /// Previous path, required for `move`.
        #[arg(long)]
        old_path: Option<PathBuf>,

        /// Session ID or row number. Defaults to the session whose workspace
        /// contains the file.
        #[arg(long)]
        session: Option<String>,
    },

    /// Send the file's on-disk content as a full snapshot.
    Push {
        /// The file to push.
        path: PathBuf,

        /// Session ID or row number. Defaults to the session whose workspace
        /// contains the file.
        #[arg(long)]
        session: Option<String>,
    },
}

/// Tracking transitions accepted by `tandem track`.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum TrackAction {
    /// An editor opened the file.
    Start,
    /// The editor closed the file.
    Stop,
    /// Ignore deltas until resumed.
    Suspend,
    /// Accept deltas again.
    Resume,
    /// The file was renamed.
    Move,
    /// The file was deleted.
    Delete,
}

impl From<TrackAction> for FileOperationKind {
    fn from(action: TrackAction) -> Self {
        match action {
            TrackAction::Start => Self::Start,
            TrackAction::Stop => Self::Stop,
            TrackAction::Suspend => Self::Suspend,
            TrackAction::Resume => Self::Resume,
            TrackAction::Move => Self::Move,
            TrackAction::Delete => Self::Delete,
        }
    }
}

/// Entry point for the Tandem binary.
///
/// # Errors
///
/// Returns an error if the subcommand fails.
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        None => run_server(args.config, None, Vec::new()).await,
        Some(Command::Serve { root, servers }) => run_server(args.config, root, servers).await,
        Some(Command::List) => run_list(),
        Some(Command::Monitor {
            id,
            raw,
            nocolor,
            filter,
        }) => run_monitor(&id, raw, nocolor, filter.as_deref()),
        Some(Command::Status { id }) => run_status(&id),
        Some(Command::Track {
            action,
            path,
            old_path,
            session,
        }) => run_track(action, &path, old_path.as_deref(), session.as_deref()).await,
        Some(Command::Push { path, session }) => run_push(&path, session.as_deref()).await,
    }
}

/// Runs the workspace server until interrupted.
///
/// # Errors
///
/// Returns an error if configuration is invalid or the socket cannot be bound.
async fn run_server(
    config_path: Option<PathBuf>,
    root: Option<PathBuf>,
    servers: Vec<String>,
) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tandem=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load(config_path)?;
    for spec in servers {
        config.add_server_spec(&spec)?;
    }
    let encoding = config.encoding()?;

    let root = root
        .unwrap_or_else(|| PathBuf::from("."))
        .canonicalize()
        .context("Failed to resolve workspace root")?;
    let workspace_display = root.to_string_lossy().into_owned();

    let registry = Arc::new(match &config.projects {
        Some(projects) => ProjectRegistry::with_projects(root.clone(), projects)?,
        None => ProjectRegistry::new(root.clone()),
    });

    let mut session = Session::create(&workspace_display, Some(encoding.as_str()))?;
    if let Some(projects) = &config.projects {
        session.record_projects(projects)?;
    }
    let broadcaster = session.broadcaster();

    info!("Starting tandem workspace server");
    info!("Session ID: {}", session.info.id);
    info!("Workspace root: {}", workspace_display);
    info!("Offset encoding: {}", encoding.as_str());

    let storage = WorkingCopyStorage::new(registry.clone(), config.metadata_dir.clone());
    let store = Arc::new(WorkingCopyStore::new(
        registry,
        storage,
        config.store_settings()?,
    ));

    let engine = if config.server.is_empty() {
        info!("No language servers configured, reconcile results will be empty");
        ConfiguredEngine::Null(NullEngine)
    } else {
        let languages: Vec<&str> = config.server.keys().map(String::as_str).collect();
        info!("Language servers: {}", languages.join(", "));
        let manager = ClientManager::new(config.server.clone(), root, broadcaster.clone());
        ConfiguredEngine::Lsp(LspEngine::new(
            manager,
            encoding,
            config.reconcile_timeout(),
        ))
    };
    let engine = Arc::new(engine);

    let tracker = Arc::new(ChangeTracker::new(store, engine.clone(), broadcaster.clone()));
    let endpoint_handle =
        EndpointServer::new(tracker, broadcaster).start(&session.socket_path())?;
    session.set_socket_active();

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    endpoint_handle.abort();
    let _ = endpoint_handle.await;

    info!("Shutting down language servers");
    engine.shutdown().await;

    // Session cleanup happens automatically via Drop
    Ok(())
}

/// Sends one tracking event to a running session.
///
/// # Errors
///
/// Returns an error if no session can be found or the path is outside its
/// workspace.
async fn run_track(
    action: TrackAction,
    path: &Path,
    old_path: Option<&Path>,
    session_id: Option<&str>,
) -> Result<()> {
    let path = std::path::absolute(path)?;
    let session = session_for(&path, session_id)?;
    let registry = registry_for(&session)?;

    let kind = FileOperationKind::from(action);
    let old_path = match (kind, old_path) {
        (FileOperationKind::Move, Some(old)) => {
            Some(registry.workspace_path(&std::path::absolute(old)?)?)
        }
        (FileOperationKind::Move, None) => anyhow::bail!("move requires --old-path"),
        _ => None,
    };

    let operation = FileOperation {
        kind,
        path: registry.workspace_path(&path)?,
        old_path,
    };

    let transmitter = SocketTransmitter::new(session::socket_path_for(&session.id));
    transmitter.transmit_operation(&operation);
    transmitter.close().await;

    println!("{} {} -> {}", kind.as_str(), operation.path, session.id);
    Ok(())
}

/// Sends the file's current disk content as a `REPLACE_ALL` snapshot.
///
/// # Errors
///
/// Returns an error if the file cannot be read, no session can be found, or
/// the file does not belong to a project.
async fn run_push(path: &Path, session_id: Option<&str>) -> Result<()> {
    let path = std::path::absolute(path)?;
    let text = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let session = session_for(&path, session_id)?;
    let registry = registry_for(&session)?;
    let file_location = registry.workspace_path(&path)?;
    let project_path = registry.resolve_project(&file_location)?;

    let encoding = session
        .offset_encoding
        .as_deref()
        .and_then(OffsetEncoding::from_name)
        .unwrap_or_default();

    let target = ChangeTarget {
        owner_id: file_location.clone(),
        project_path,
        file_location,
    };
    let changes = EditorChanges::encode(&Delta::ReplaceAll { text }, &target, encoding, None);

    let transmitter = SocketTransmitter::new(session::socket_path_for(&session.id));
    transmitter.transmit(changes);
    transmitter.close().await;

    println!("pushed {} -> {}", target.file_location, session.id);
    Ok(())
}

/// Resolves paths the way the session's server does.
fn registry_for(session: &SessionInfo) -> Result<ProjectRegistry> {
    let root = PathBuf::from(&session.workspace);
    Ok(match &session.projects {
        Some(projects) => ProjectRegistry::with_projects(root, projects)?,
        None => ProjectRegistry::new(root),
    })
}

/// Picks the session named on the command line, or the one whose workspace
/// contains `path`.
fn session_for(path: &Path, session_id: Option<&str>) -> Result<SessionInfo> {
    if let Some(id) = session_id {
        return resolve_session_id(id);
    }
    let lookup = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    session::find_session_for_path(&lookup)?
        .ok_or_else(|| anyhow!("No running session contains {}", path.display()))
}

/// Runs the session list command.
///
/// # Errors
///
/// Returns an error if listing sessions fails.
fn run_list() -> Result<()> {
    let sessions = session::list_sessions()?;

    if sessions.is_empty() {
        println!("No active Tandem sessions");
        return Ok(());
    }

    let term_width = cli::terminal_width();
    let widths = ColumnWidths::calculate(term_width);

    println!(
        "{:>width_num$} {:<width_id$} {:<width_pid$} {:<width_ws$} {:<width_enc$} STARTED",
        "#",
        "ID",
        "PID",
        "WORKSPACE",
        "ENCODING",
        width_num = widths.row_num,
        width_id = widths.id,
        width_pid = widths.pid,
        width_ws = widths.workspace,
        width_enc = widths.encoding,
    );
    println!("{}", "-".repeat(term_width.min(120)));

    for (idx, s) in sessions.iter().enumerate() {
        let id = cli::truncate(&s.id, widths.id);
        let workspace = cli::truncate(&s.workspace, widths.workspace);
        let encoding = s.offset_encoding.as_deref().unwrap_or("-");

        println!(
            "{:>width_num$} {:<width_id$} {:<width_pid$} {:<width_ws$} {:<width_enc$} {}",
            idx + 1,
            id,
            s.pid,
            workspace,
            encoding,
            cli::format_duration_ago(s.started_at),
            width_num = widths.row_num,
            width_id = widths.id,
            width_pid = widths.pid,
            width_ws = widths.workspace,
            width_enc = widths.encoding,
        );
    }

    Ok(())
}

/// Resolve a session ID from either a row number or ID prefix
fn resolve_session_id(id: &str) -> Result<SessionInfo> {
    if let Ok(row_num) = id.parse::<usize>()
        && row_num > 0
    {
        let sessions = session::list_sessions()?;
        if let Some(s) = sessions.get(row_num - 1) {
            return Ok(s.clone());
        }
        // Session IDs are hex and may be all digits
        if let Ok(session) = find_session(id) {
            return Ok(session);
        }
        anyhow::bail!("Row number {} out of range (1-{})", row_num, sessions.len());
    }

    find_session(id)
}

/// Find session by ID or prefix
fn find_session(id: &str) -> Result<SessionInfo> {
    if let Some(s) = session::get_session(id)? {
        return Ok(s);
    }

    let sessions = session::list_sessions()?;
    let matches: Vec<_> = sessions.iter().filter(|s| s.id.starts_with(id)).collect();

    match matches.as_slice() {
        [] => anyhow::bail!("No session found matching '{id}'"),
        [only] => Ok((*only).clone()),
        _ => {
            eprintln!("Multiple sessions match '{id}':");
            for s in matches {
                eprintln!("  {}", s.id);
            }
            anyhow::bail!("Please specify a more complete session ID")
        }
    }
}

/// Runs the monitor command.
///
/// # Errors
///
/// Returns an error if the session cannot be found or monitoring fails.
fn run_monitor(id: &str, raw: bool, nocolor: bool, filter: Option<&str>) -> Result<()> {
    let session = resolve_session_id(id)?;
    let full_id = session.id;

    let colors = ColorConfig::new(nocolor);
    let term_width = cli::terminal_width();

    let filter_regex = filter
        .map(Regex::new)
        .transpose()
        .map_err(|e| anyhow!("Invalid filter regex: {e}"))?;

    println!("Monitoring session {full_id} (Ctrl+C to stop)\n");

    let mut reader = session::tail_events(&full_id)?;

    while let Some(event) = reader.next_event()? {
        if let Some(re) = &filter_regex {
            let event_str = serde_json::to_string(&event.kind).unwrap_or_default();
            if !re.is_match(&event_str) {
                continue;
            }
        }

        if raw {
            print_event_raw(&event);
        } else {
            println!("{}", cli::format_event(&event, &colors, term_width));
        }
    }

    println!("\nSession ended");
    Ok(())
}

/// Runs the status command.
///
/// # Errors
///
/// Returns an error if the session cannot be found.
fn run_status(id: &str) -> Result<()> {
    let session = resolve_session_id(id)?;
    let stats = session::session_stats(&session.id)?;

    println!("Session: {}", session.id);
    println!("PID: {}", session.pid);
    println!("Workspace: {}", session.workspace);
    println!(
        "Started: {} ({})",
        session
            .started_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S"),
        cli::format_duration_ago(session.started_at)
    );
    if let Some(encoding) = &session.offset_encoding {
        println!("Offset encoding: {encoding}");
    }

    println!(
        "Deltas: {} applied, {} rejected; {} reconcile results",
        stats.applied, stats.rejected, stats.reconciled
    );
    if !stats.languages.is_empty() {
        println!("Language servers: {}", stats.languages.join(", "));
    }

    println!("\nTracked files ({}):", stats.tracked_files.len());
    for file in &stats.tracked_files {
        println!("  {file}");
    }

    println!("\nRecent events:");
    let colors = ColorConfig::new(true);
    let term_width = cli::terminal_width();
    let events: Vec<_> = session::monitor_events(&session.id)?.collect();
    for event in events.iter().rev().take(10).rev() {
        println!("{}", cli::format_event(event, &colors, term_width));
    }

    Ok(())
}

/// Print an event in raw JSON format
fn print_event_raw(event: &SessionEvent) {
    let time = event.timestamp.with_timezone(&Local).format("%H:%M:%S");
    let json = serde_json::to_string_pretty(&event.kind).unwrap_or_default();
    println!("[{time}] {json}");
}
