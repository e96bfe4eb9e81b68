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

//! Language server lifecycle state.

use lsp_types::{NumberOrString, ProgressParams, ProgressParamsValue, WorkDoneProgress};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::session::{EventBroadcaster, EventKind};

/// Overall server readiness state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    /// Spawned, handshake not finished.
    Initializing,
    /// Reporting work-done progress.
    Indexing,
    /// Accepting documents.
    Ready,
    /// Connection lost.
    Dead,
}

impl ServerState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Initializing,
            1 => Self::Indexing,
            2 => Self::Ready,
            _ => Self::Dead,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Initializing => 0,
            Self::Indexing => 1,
            Self::Ready => 2,
            Self::Dead => 3,
        }
    }

    /// Lowercase name, as written to the event log.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Indexing => "indexing",
            Self::Ready => "ready",
            Self::Dead => "dead",
        }
    }
}

/// Server state shared between a client and its reader task. Every
/// transition is written to the session event log.
#[derive(Clone)]
pub struct SharedState {
    language: String,
    value: Arc<AtomicU8>,
    broadcaster: EventBroadcaster,
}

impl SharedState {
    /// Starts in [`ServerState::Initializing`].
    #[must_use]
    pub fn new(language: &str, broadcaster: EventBroadcaster) -> Self {
        let state = Self {
            language: language.to_string(),
            value: Arc::new(AtomicU8::new(ServerState::Initializing.as_u8())),
            broadcaster,
        };
        state.announce(ServerState::Initializing);
        state
    }

    /// Current state.
    #[must_use]
    pub fn get(&self) -> ServerState {
        ServerState::from_u8(self.value.load(Ordering::SeqCst))
    }

    /// Moves to `next`. `Dead` is final.
    pub fn set(&self, next: ServerState) {
        let previous = self
            .value
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current != ServerState::Dead.as_u8() && current != next.as_u8())
                    .then_some(next.as_u8())
            });
        if previous.is_ok() {
            self.announce(next);
        }
    }

    fn announce(&self, state: ServerState) {
        self.broadcaster.send(EventKind::ServerState {
            language: self.language.clone(),
            state: state.as_str().to_string(),
        });
    }
}

/// Tracks `$/progress` tokens to tell indexing from idle.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    active: HashSet<NumberOrString>,
}

impl ProgressTracker {
    /// Applies a progress notification. Returns whether the server is busy
    /// afterwards.
    pub fn update(&mut self, params: &ProgressParams) -> bool {
        let ProgressParamsValue::WorkDone(progress) = &params.value;
        match progress {
            WorkDoneProgress::Begin(_) | WorkDoneProgress::Report(_) => {
                self.active.insert(params.token.clone());
            }
            WorkDoneProgress::End(_) => {
                self.active.remove(&params.token);
            }
        }
        self.is_busy()
    }

    /// Whether any progress is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        !self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::{WorkDoneProgressBegin, WorkDoneProgressEnd};

    fn progress(token: &str, value: WorkDoneProgress) -> ProgressParams {
        ProgressParams {
            token: NumberOrString::String(token.to_string()),
            value: ProgressParamsValue::WorkDone(value),
        }
    }

    fn begin(title: &str) -> WorkDoneProgress {
        WorkDoneProgress::Begin(WorkDoneProgressBegin {
            title: title.to_string(),
            cancellable: None,
            message: None,
            percentage: None,
        })
    }

    #[test]
    fn test_progress_tokens() {
        let mut tracker = ProgressTracker::default();
        assert!(tracker.update(&progress("index", begin("Indexing"))));
        assert!(tracker.update(&progress("check", begin("Checking"))));
        assert!(tracker.update(&progress(
            "index",
            WorkDoneProgress::End(WorkDoneProgressEnd { message: None })
        )));
        assert!(!tracker.update(&progress(
            "check",
            WorkDoneProgress::End(WorkDoneProgressEnd { message: None })
        )));
    }

    #[test]
    fn test_dead_is_final() {
        let state = SharedState::new("rust", EventBroadcaster::noop());
        assert_eq!(state.get(), ServerState::Initializing);
        state.set(ServerState::Ready);
        assert_eq!(state.get(), ServerState::Ready);
        state.set(ServerState::Dead);
        state.set(ServerState::Ready);
        assert_eq!(state.get(), ServerState::Dead);
    }
}
