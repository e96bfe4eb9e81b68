// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

use std::collections::HashMap;

/// Lifecycle state of a tracked file. A stopped file has no session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
    /// Deltas are applied and reconciled.
    Started,
    /// Deltas are ignored until resumed.
    Suspended,
}

/// Per-file tracking session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTrackingSession {
    /// Workspace path of the file.
    pub path: String,
    /// Current state.
    pub state: TrackingState,
}

/// All live tracking sessions, keyed by workspace path.
#[derive(Debug, Default)]
pub struct TrackingTable {
    sessions: HashMap<String, FileTrackingSession>,
}

impl TrackingTable {
    /// Starts (or restarts) tracking. A suspended session becomes started.
    pub fn start(&mut self, path: &str) {
        self.sessions.insert(
            path.to_string(),
            FileTrackingSession {
                path: path.to_string(),
                state: TrackingState::Started,
            },
        );
    }

    /// Ends tracking. Returns whether a session existed.
    pub fn stop(&mut self, path: &str) -> bool {
        self.sessions.remove(path).is_some()
    }

    /// Suspends a session. Returns whether one existed.
    pub fn suspend(&mut self, path: &str) -> bool {
        self.set_state(path, TrackingState::Suspended)
    }

    /// Resumes a session. Returns whether one existed.
    pub fn resume(&mut self, path: &str) -> bool {
        self.set_state(path, TrackingState::Started)
    }

    /// Moves a session to a new path, keeping its state. Returns whether one
    /// existed.
    pub fn rename(&mut self, old: &str, new: &str) -> bool {
        let Some(mut session) = self.sessions.remove(old) else {
            return false;
        };
        session.path = new.to_string();
        self.sessions.insert(new.to_string(), session);
        true
    }

    /// Drops every session under `prefix` (inclusive).
    pub fn remove_under(&mut self, prefix: &str) {
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        self.sessions
            .retain(|path, _| path != prefix && !path.starts_with(&dir));
    }

    /// State of a session, `None` when the file is not tracked.
    #[must_use]
    pub fn state(&self, path: &str) -> Option<TrackingState> {
        self.sessions.get(path).map(|s| s.state)
    }

    /// Whether deltas for `path` may be applied. Untracked files accept
    /// deltas; their working copy is created lazily.
    #[must_use]
    pub fn accepts_deltas(&self, path: &str) -> bool {
        self.state(path) != Some(TrackingState::Suspended)
    }

    /// Tracked paths, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.sessions.keys().cloned().collect();
        paths.sort();
        paths
    }

    fn set_state(&mut self, path: &str, state: TrackingState) -> bool {
        self.sessions.get_mut(path).is_some_and(|session| {
            session.state = state;
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let mut table = TrackingTable::default();
        table.start("/p/a.rs");
        assert_eq!(table.state("/p/a.rs"), Some(TrackingState::Started));

        assert!(table.suspend("/p/a.rs"));
        assert!(!table.accepts_deltas("/p/a.rs"));

        assert!(table.resume("/p/a.rs"));
        assert!(table.accepts_deltas("/p/a.rs"));

        assert!(table.rename("/p/a.rs", "/p/b.rs"));
        assert_eq!(table.state("/p/a.rs"), None);
        assert_eq!(table.paths(), vec!["/p/b.rs".to_string()]);

        assert!(table.stop("/p/b.rs"));
        assert!(!table.stop("/p/b.rs"));
        assert!(table.paths().is_empty());
    }

    #[test]
    fn test_untracked_accepts_and_unknown_ops_are_noops() {
        let mut table = TrackingTable::default();
        assert!(table.accepts_deltas("/p/x.rs"));
        assert!(!table.suspend("/p/x.rs"));
        assert!(!table.rename("/p/x.rs", "/p/y.rs"));
        assert_eq!(table.state("/p/x.rs"), None);
    }

    #[test]
    fn test_suspend_survives_rename() {
        let mut table = TrackingTable::default();
        table.start("/p/a.rs");
        table.suspend("/p/a.rs");
        table.rename("/p/a.rs", "/p/b.rs");
        assert_eq!(table.state("/p/b.rs"), Some(TrackingState::Suspended));
    }

    #[test]
    fn test_remove_under_project() {
        let mut table = TrackingTable::default();
        table.start("/p/a.rs");
        table.start("/p/src/b.rs");
        table.start("/pq/c.rs");
        table.remove_under("/p");
        assert_eq!(table.paths(), vec!["/pq/c.rs".to_string()]);
    }
}
