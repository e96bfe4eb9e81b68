// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Session management for observability.
//!
//! Each `tandem serve` process creates a session that can be discovered and
//! monitored from other terminals via `tandem list` and `tandem monitor`.
//! The session directory also hosts the endpoint socket editors connect to.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// File name of the endpoint socket inside a session directory.
pub const SOCKET_NAME: &str = "sync.sock";

/// Session metadata stored in info.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Unique session ID.
    pub id: String,
    /// Process ID of the `serve` instance.
    pub pid: u32,
    /// Path to the workspace root.
    pub workspace: String,
    /// When the session started.
    pub started_at: DateTime<Utc>,
    /// Offset unit the endpoint expects.
    #[serde(default)]
    pub offset_encoding: Option<String>,
    /// Explicit project list, when the server was configured with one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projects: Option<Vec<String>>,
}

/// An event that can be broadcast to listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// The specific event data.
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Types of session events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// An editor endpoint connected.
    EndpointConnected {
        /// Connection identifier.
        endpoint: String,
    },
    /// An editor endpoint went away.
    EndpointDisconnected {
        /// Connection identifier.
        endpoint: String,
    },
    /// A file tracking operation was processed.
    Tracking {
        /// Workspace path of the file.
        path: String,
        /// Operation name (`start`, `stop`, ...).
        operation: String,
        /// Previous path of a moved file.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_path: Option<String>,
    },
    /// A delta was applied to a working copy.
    DeltaApplied {
        /// Workspace path of the file.
        path: String,
        /// Delta kind on the wire.
        kind: String,
        /// Sequence number, when the client sent one.
        seq: Option<u64>,
        /// Content length after the delta, in bytes.
        length: usize,
    },
    /// A delta was held back waiting for a missing predecessor.
    DeltaBuffered {
        /// Workspace path of the file.
        path: String,
        /// Sequence number of the held delta.
        seq: u64,
    },
    /// A delta or tracking operation was rejected.
    Rejected {
        /// Workspace path of the file, when known.
        path: Option<String>,
        /// Error kind.
        error: String,
        /// Human-readable reason.
        reason: String,
    },
    /// Reconciliation produced a result.
    Reconciled {
        /// Workspace path of the file.
        path: String,
        /// Owner the result was sent to.
        owner: String,
        /// Number of problems reported.
        problems: usize,
        /// Number of highlighted positions reported.
        highlights: usize,
        /// How long the engine took in milliseconds.
        duration_ms: u64,
    },
    /// Reconciliation failed; the working copy is unaffected.
    ReconcileFailed {
        /// Workspace path of the file.
        path: String,
        /// Failure reason.
        reason: String,
    },
    /// Language server state changed.
    ServerState {
        /// The language ID of the server.
        language: String,
        /// The new state.
        state: String,
    },
    /// Session started.
    Started,
    /// Session ending.
    Shutdown,
}

/// Returns the base directory for session data.
pub fn sessions_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("tandem")
        .join("sessions")
}

/// Path of a session's endpoint socket.
#[must_use]
pub fn socket_path_for(id: &str) -> PathBuf {
    SessionPaths::for_id(id).socket()
}

/// Files inside one session directory.
#[derive(Debug, Clone)]
struct SessionPaths {
    dir: PathBuf,
}

impl SessionPaths {
    fn for_id(id: &str) -> Self {
        Self {
            dir: sessions_dir().join(id),
        }
    }

    fn info(&self) -> PathBuf {
        self.dir.join("info.json")
    }

    fn events(&self) -> PathBuf {
        self.dir.join("events.jsonl")
    }

    fn socket(&self) -> PathBuf {
        self.dir.join(SOCKET_NAME)
    }

    /// Reads `info.json`. A session whose process is gone is removed and
    /// reported as absent.
    fn load_live(&self) -> Result<Option<SessionInfo>> {
        let info_path = self.info();
        if !info_path.exists() {
            return Ok(None);
        }

        let file = File::open(&info_path)
            .with_context(|| format!("Failed to open {}", info_path.display()))?;
        let info: SessionInfo = serde_json::from_reader(file)
            .with_context(|| format!("Failed to parse {}", info_path.display()))?;

        if is_process_alive(info.pid) {
            return Ok(Some(info));
        }

        warn!("Cleaning up dead session {} (pid {})", info.id, info.pid);
        let _ = fs::remove_dir_all(&self.dir);
        Ok(None)
    }

    fn open_events(&self, id: &str) -> Result<File> {
        let path = self.events();
        if !path.exists() {
            anyhow::bail!("Session not found: {id}");
        }
        File::open(&path).with_context(|| format!("Failed to open {}", path.display()))
    }
}

/// Append-only JSONL event log shared by a session and its broadcasters.
#[derive(Clone)]
struct EventLog {
    file: Arc<Mutex<File>>,
}

impl EventLog {
    fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open event log {}", path.display()))?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Appends one timestamped event. Write failures are dropped; the log is
    /// best effort.
    fn append(&self, kind: EventKind) {
        let event = SessionEvent {
            timestamp: Utc::now(),
            kind,
        };
        let Ok(line) = serde_json::to_string(&event) else {
            return;
        };
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{line}").and_then(|()| file.flush());
        }
    }
}

/// An active session that broadcasts events.
pub struct Session {
    /// Metadata about the session.
    pub info: SessionInfo,
    paths: SessionPaths,
    log: EventLog,
    socket_active: bool,
}

impl Session {
    /// Create a new session.
    ///
    /// # Errors
    ///
    /// Returns an error if the session directory, `info.json` or the event
    /// log cannot be created.
    pub fn create(workspace: &str, offset_encoding: Option<&str>) -> Result<Self> {
        let id = Self::generate_id();
        let paths = SessionPaths::for_id(&id);

        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("Failed to create session dir: {}", paths.dir.display()))?;

        let info = SessionInfo {
            id,
            pid: std::process::id(),
            workspace: workspace.to_string(),
            started_at: Utc::now(),
            offset_encoding: offset_encoding.map(str::to_string),
            projects: None,
        };
        write_info(&paths, &info)?;

        let log = EventLog::create(&paths.events())?;
        log.append(EventKind::Started);

        Ok(Self {
            info,
            paths,
            log,
            socket_active: false,
        })
    }

    /// Short id from the clock, the pid and a per-process counter.
    fn generate_id() -> String {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::time::{SystemTime, UNIX_EPOCH};

        static CREATED: AtomicU32 = AtomicU32::new(0);

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis());
        let stamp = u32::try_from(millis % u128::from(u32::MAX)).unwrap_or(0);
        let serial = CREATED.fetch_add(1, Ordering::Relaxed);

        format!("{stamp:x}{:x}{serial:x}", std::process::id())
    }

    /// Records the project list the server resolves paths against, so
    /// clients addressing this session resolve the same way.
    ///
    /// # Errors
    ///
    /// Returns an error if `info.json` cannot be rewritten.
    pub fn record_projects(&mut self, projects: &[String]) -> Result<()> {
        self.info.projects = Some(projects.to_vec());
        write_info(&self.paths, &self.info)
    }

    /// Session directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.paths.dir
    }

    /// Returns the path to the endpoint socket for this session.
    #[must_use]
    pub fn socket_path(&self) -> PathBuf {
        self.paths.socket()
    }

    /// Records that the endpoint socket has been bound, so it will be
    /// cleaned up on drop.
    pub const fn set_socket_active(&mut self) {
        self.socket_active = true;
    }

    /// Broadcast an event to listeners.
    pub fn broadcast(&self, kind: EventKind) {
        self.log.append(kind);
    }

    /// Get a broadcaster that can be cloned and shared.
    #[must_use]
    pub fn broadcaster(&self) -> EventBroadcaster {
        EventBroadcaster {
            log: Some(self.log.clone()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.log.append(EventKind::Shutdown);

        if self.socket_active {
            let _ = fs::remove_file(self.paths.socket());
        }
        if let Err(e) = fs::remove_dir_all(&self.paths.dir) {
            warn!("Failed to clean up session directory: {}", e);
        }
    }
}

fn write_info(paths: &SessionPaths, info: &SessionInfo) -> Result<()> {
    let path = paths.info();
    let file =
        File::create(&path).with_context(|| format!("Failed to write {}", path.display()))?;
    serde_json::to_writer_pretty(file, info)?;
    Ok(())
}

/// Cloneable broadcaster for sharing across components.
#[derive(Clone, Default)]
pub struct EventBroadcaster {
    log: Option<EventLog>,
}

impl EventBroadcaster {
    /// Broadcast an event.
    pub fn send(&self, kind: EventKind) {
        if let Some(log) = &self.log {
            log.append(kind);
        }
    }

    /// A broadcaster that discards everything (for library use and tests).
    #[must_use]
    pub fn noop() -> Self {
        Self::default()
    }
}

/// List all live sessions, most recent first. Dead ones are cleaned up.
///
/// # Errors
///
/// Returns an error if the sessions directory cannot be read.
pub fn list_sessions() -> Result<Vec<SessionInfo>> {
    let base = sessions_dir();
    if !base.exists() {
        return Ok(Vec::new());
    }

    let mut sessions = Vec::new();
    for entry in fs::read_dir(&base)? {
        let paths = SessionPaths { dir: entry?.path() };
        match paths.load_live() {
            Ok(Some(info)) => sessions.push(info),
            Ok(None) => {}
            Err(e) => debug!("Skipping {}: {e:#}", paths.dir.display()),
        }
    }

    sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    Ok(sessions)
}

/// Get a live session by its full ID.
///
/// # Errors
///
/// Returns an error if the session info file exists but cannot be read or parsed.
pub fn get_session(id: &str) -> Result<Option<SessionInfo>> {
    SessionPaths::for_id(id).load_live()
}

/// Finds the most recent live session whose workspace contains `path`.
///
/// # Errors
///
/// Returns an error if the sessions directory cannot be read.
pub fn find_session_for_path(path: &Path) -> Result<Option<SessionInfo>> {
    Ok(list_sessions()?
        .into_iter()
        .filter(|s| path.starts_with(&s.workspace))
        .max_by_key(|s| s.workspace.len()))
}

/// Every event recorded so far. Unparseable lines are skipped.
///
/// # Errors
///
/// Returns an error if the session does not exist or the events file cannot be opened.
pub fn monitor_events(id: &str) -> Result<impl Iterator<Item = SessionEvent>> {
    let file = SessionPaths::for_id(id).open_events(id)?;
    Ok(BufReader::new(file)
        .lines()
        .map_while(Result::ok)
        .filter_map(|line| serde_json::from_str::<SessionEvent>(&line).ok()))
}

/// Replays a session's event log, then follows it as it grows.
///
/// # Errors
///
/// Returns an error if the session does not exist or the events file cannot be opened.
pub fn tail_events(id: &str) -> Result<TailReader> {
    let paths = SessionPaths::for_id(id);
    let file = paths.open_events(id)?;

    Ok(TailReader {
        path: paths.events(),
        reader: BufReader::new(file),
        offset: 0,
    })
}

/// Follows an event log as it grows.
pub struct TailReader {
    path: PathBuf,
    reader: BufReader<File>,
    offset: u64,
}

impl TailReader {
    /// Blocks until the next event arrives. Returns `None` once the session
    /// directory is gone.
    ///
    /// # Errors
    ///
    /// Returns an error if reading from the file fails.
    pub fn next_event(&mut self) -> Result<Option<SessionEvent>> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = self.reader.read_line(&mut line)?;
            if read > 0 && line.ends_with('\n') {
                self.offset += u64::try_from(read).unwrap_or_default();
                if let Ok(event) = serde_json::from_str::<SessionEvent>(line.trim()) {
                    return Ok(Some(event));
                }
                continue;
            }

            // Partial line: rewind and wait for the writer to finish it
            self.reader.seek(SeekFrom::Start(self.offset))?;

            let Ok(metadata) = fs::metadata(&self.path) else {
                return Ok(None);
            };
            if metadata.len() < self.offset {
                self.reader = BufReader::new(File::open(&self.path)?);
                self.offset = 0;
                continue;
            }

            std::thread::sleep(std::time::Duration::from_millis(100));
        }
    }
}

/// Counts of what a session has done so far, for `tandem status`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionStats {
    /// Files currently tracked (started and not stopped).
    pub tracked_files: Vec<String>,
    /// Deltas applied.
    pub applied: usize,
    /// Operations rejected.
    pub rejected: usize,
    /// Reconcile results sent.
    pub reconciled: usize,
    /// Languages with a live server.
    pub languages: Vec<String>,
}

/// Replays a session's events into [`SessionStats`].
///
/// # Errors
///
/// Returns an error if the events file exists but cannot be read.
pub fn session_stats(id: &str) -> Result<SessionStats> {
    use std::collections::{BTreeMap, BTreeSet};

    let events_path = SessionPaths::for_id(id).events();
    if !events_path.exists() {
        return Ok(SessionStats::default());
    }

    let reader = BufReader::new(File::open(&events_path)?);
    let mut stats = SessionStats::default();
    let mut tracked = BTreeSet::new();
    let mut servers: BTreeMap<String, String> = BTreeMap::new();

    for line in reader.lines().map_while(Result::ok) {
        let Ok(event) = serde_json::from_str::<SessionEvent>(&line) else {
            continue;
        };
        match event.kind {
            EventKind::Tracking {
                path,
                operation,
                old_path,
            } => match operation.as_str() {
                "start" => {
                    tracked.insert(path);
                }
                "stop" | "delete" => {
                    tracked.remove(&path);
                }
                "move" => {
                    if let Some(old) = old_path
                        && tracked.remove(&old)
                    {
                        tracked.insert(path);
                    }
                }
                _ => {}
            },
            EventKind::DeltaApplied { .. } => stats.applied += 1,
            EventKind::Rejected { .. } => stats.rejected += 1,
            EventKind::Reconciled { .. } => stats.reconciled += 1,
            EventKind::ServerState { language, state } => {
                if state == "dead" {
                    servers.remove(&language);
                } else {
                    servers.insert(language, state);
                }
            }
            _ => {}
        }
    }

    stats.tracked_files = tracked.into_iter().collect();
    stats.languages = servers.into_keys().collect();
    Ok(stats)
}

/// Check if a process is still running.
fn is_process_alive(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new("/proc").join(pid.to_string()).exists()
    }

    #[cfg(all(unix, not(target_os = "linux")))]
    {
        std::process::Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}
