/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! CLI utilities for terminal output formatting and colors.

use chrono::{DateTime, Local, Utc};
use crossterm::tty::IsTty;
use std::io::stdout;

use crate::session::{EventKind, SessionEvent};

/// Configuration for color output
#[derive(Debug, Clone)]
pub struct ColorConfig {
    /// Whether ANSI colors are emitted.
    pub enabled: bool,
}

impl ColorConfig {
    /// Create a new `ColorConfig`, auto-detecting TTY unless nocolor is true
    #[must_use]
    pub fn new(nocolor: bool) -> Self {
        Self {
            enabled: !nocolor && stdout().is_tty(),
        }
    }

    fn paint(&self, code: u8, s: &str) -> String {
        if self.enabled {
            format!("\x1b[{code}m{s}\x1b[0m")
        } else {
            s.to_string()
        }
    }

    /// Green (applied deltas)
    #[must_use]
    pub fn green(&self, s: &str) -> String {
        self.paint(32, s)
    }

    /// Blue (reconcile results)
    #[must_use]
    pub fn blue(&self, s: &str) -> String {
        self.paint(34, s)
    }

    /// Red (rejections and failures)
    #[must_use]
    pub fn red(&self, s: &str) -> String {
        self.paint(31, s)
    }

    /// Yellow (buffered deltas)
    #[must_use]
    pub fn yellow(&self, s: &str) -> String {
        self.paint(33, s)
    }

    /// Cyan (language names)
    #[must_use]
    pub fn cyan(&self, s: &str) -> String {
        self.paint(36, s)
    }

    /// Dim text
    #[must_use]
    pub fn dim(&self, s: &str) -> String {
        self.paint(2, s)
    }
}

/// Get the terminal width, defaulting to 80 if unable to detect
#[must_use]
pub fn terminal_width() -> usize {
    crossterm::terminal::size().map_or(80, |(w, _)| usize::from(w))
}

/// Truncate a string to `max_len` characters, adding "..." if truncated
#[must_use]
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return ".".repeat(max_len);
    }
    let kept: String = s.chars().take(max_len - 3).collect();
    format!("{kept}...")
}

/// Column widths for `tandem list`
#[derive(Debug)]
pub struct ColumnWidths {
    /// Row number.
    pub row_num: usize,
    /// Session ID.
    pub id: usize,
    /// Process ID.
    pub pid: usize,
    /// Workspace root.
    pub workspace: usize,
    /// Offset encoding.
    pub encoding: usize,
}

impl ColumnWidths {
    /// Calculate column widths based on terminal width.
    /// Columns: # | ID | PID | WORKSPACE | ENCODING | STARTED
    #[must_use]
    pub fn calculate(term_width: usize) -> Self {
        let row_num = 3;
        let id = 14;
        let pid = 8;
        let encoding = 8;
        let started = 12;
        let min_workspace = 20;

        // Five single-space separators
        let fixed = row_num + id + pid + encoding + started + 5;

        Self {
            row_num,
            id,
            pid,
            workspace: term_width.saturating_sub(fixed).max(min_workspace),
            encoding,
        }
    }
}

/// Format a timestamp as "Xm ago" or similar
#[must_use]
pub fn format_duration_ago(timestamp: DateTime<Utc>) -> String {
    let duration = Utc::now().signed_duration_since(timestamp);

    if duration.num_hours() > 0 {
        format!(
            "{}h {}m ago",
            duration.num_hours(),
            duration.num_minutes() % 60
        )
    } else if duration.num_minutes() > 0 {
        format!("{}m ago", duration.num_minutes())
    } else {
        format!("{}s ago", duration.num_seconds())
    }
}

/// One human-readable line for an event.
#[must_use]
pub fn format_event(event: &SessionEvent, colors: &ColorConfig, term_width: usize) -> String {
    let time = event.timestamp.with_timezone(&Local).format("%H:%M:%S");
    let time_str = colors.dim(&format!("[{time}]"));

    let body = match &event.kind {
        EventKind::Started => "Session started".to_string(),
        EventKind::Shutdown => "Session shutting down".to_string(),
        EventKind::EndpointConnected { endpoint } => format!("{endpoint} connected"),
        EventKind::EndpointDisconnected { endpoint } => format!("{endpoint} disconnected"),
        EventKind::Tracking {
            path,
            operation,
            old_path: Some(old),
        } => format!("{operation:<8} {old} -> {path}"),
        EventKind::Tracking {
            path,
            operation,
            old_path: None,
        } => format!("{operation:<8} {path}"),
        EventKind::DeltaApplied {
            path,
            kind,
            seq,
            length,
        } => {
            let seq = seq.map_or_else(String::new, |s| format!(" #{s}"));
            format!(
                "{} {path}{seq} ({length} bytes)",
                colors.green(&format!("{kind:<11}"))
            )
        }
        EventKind::DeltaBuffered { path, seq } => {
            format!("{} {path} #{seq}", colors.yellow("BUFFERED   "))
        }
        EventKind::Rejected {
            path,
            error,
            reason,
        } => format!(
            "{} {} {}",
            colors.red(&format!("REJECTED {error}")),
            path.as_deref().unwrap_or("-"),
            colors.dim(reason)
        ),
        EventKind::Reconciled {
            path,
            owner,
            problems,
            highlights,
            duration_ms,
        } => format!(
            "{} {path} -> {owner}: {problems} problems, {highlights} highlights ({duration_ms}ms)",
            colors.blue("RECONCILED")
        ),
        EventKind::ReconcileFailed { path, reason } => format!(
            "{} {path}: {}",
            colors.red("RECONCILE FAILED"),
            colors.dim(reason)
        ),
        EventKind::ServerState { language, state } => {
            format!("{} server {state}", colors.cyan(language))
        }
    };

    let prefix_width = 11;
    format!(
        "{time_str} {}",
        truncate(&body, term_width.saturating_sub(prefix_width).max(20))
    )
}
