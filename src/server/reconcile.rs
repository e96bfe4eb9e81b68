// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Reconciliation: running an engine over working-copy snapshots and
//! routing the results back to the owning endpoint.
//!
//! Every file gets its own worker task. Jobs for one file run strictly in
//! submission order and never overlap; different files reconcile in
//! parallel. Workers only see snapshots, so no working-copy lock is held
//! while an engine runs.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::protocol::{HighlightedPosition, Problem, ReconcileStateChanged};
use crate::session::{EventBroadcaster, EventKind};

/// One diagnostic produced by an engine, in wire offset units.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Diagnostic {
    /// Human-readable message.
    pub message: String,
    /// Error severity.
    pub is_error: bool,
    /// Warning severity.
    pub is_warning: bool,
    /// Start offset, inclusive.
    pub start_offset: usize,
    /// End offset, exclusive.
    pub end_offset: usize,
    /// 1-based line of `start_offset`.
    pub line_number: usize,
    /// Engine-specific code, if any.
    pub code: Option<String>,
}

impl Diagnostic {
    /// Converts to the wire form. `sourceEnd` on the wire is inclusive.
    #[must_use]
    pub fn to_problem(&self, file: &str) -> Problem {
        Problem {
            message: self.message.clone(),
            id: self
                .code
                .as_deref()
                .and_then(|c| c.parse().ok())
                .unwrap_or_default(),
            error: self.is_error,
            warning: self.is_warning,
            source_start: self.start_offset,
            source_end: self.end_offset.saturating_sub(1).max(self.start_offset),
            source_line_number: self.line_number,
            originating_file_name: file.to_string(),
            arguments: self.code.iter().cloned().collect(),
        }
    }
}

/// Input to one reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileRequest {
    /// Workspace path of the owning project.
    pub project_path: String,
    /// Workspace path of the file.
    pub file_path: String,
    /// Real filesystem path of the file.
    pub real_path: std::path::PathBuf,
    /// Full working-copy content.
    pub content: String,
}

/// Result of one reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReconcileOutcome {
    /// Problems found in the content.
    pub diagnostics: Vec<Diagnostic>,
    /// Highlighted ranges.
    pub highlights: Vec<HighlightedPosition>,
}

/// Analyzes full-text snapshots.
///
/// Never called concurrently for the same file.
pub trait ReconciliationEngine: Send + Sync + 'static {
    /// Analyzes `request.content`.
    fn reconcile(
        &self,
        request: &ReconcileRequest,
    ) -> impl Future<Output = anyhow::Result<ReconcileOutcome>> + Send;

    /// Forgets everything about `file_path`.
    fn release(&self, file_path: &str) -> impl Future<Output = ()> + Send;
}

/// Where reconcile results for one endpoint go.
pub type ResultSink = mpsc::UnboundedSender<ReconcileStateChanged>;

enum Job {
    Reconcile {
        request: ReconcileRequest,
        owner_id: String,
        sink: ResultSink,
    },
    Release,
}

/// Schedules reconcile passes on per-file workers.
pub struct Reconciler<E> {
    engine: Arc<E>,
    broadcaster: EventBroadcaster,
    workers: WorkerTable,
}

type WorkerMap = HashMap<String, mpsc::UnboundedSender<Job>>;
type WorkerTable = Arc<Mutex<WorkerMap>>;

impl<E: ReconciliationEngine> Reconciler<E> {
    /// Creates a reconciler over `engine`.
    pub fn new(engine: Arc<E>, broadcaster: EventBroadcaster) -> Self {
        Self {
            engine,
            broadcaster,
            workers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The engine results come from.
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Queues a reconcile of `request`, answering to `owner_id` on `sink`.
    pub fn submit(&self, request: ReconcileRequest, owner_id: String, sink: ResultSink) {
        let path = request.file_path.clone();
        self.dispatch(
            &path,
            Job::Reconcile {
                request,
                owner_id,
                sink,
            },
        );
    }

    /// Tells the engine to forget `file_path` once its queued passes finish.
    ///
    /// The release runs on the file's worker, so passes submitted afterwards
    /// wait for it.
    pub fn release(&self, file_path: &str) {
        self.dispatch(file_path, Job::Release);
    }

    fn dispatch(&self, path: &str, job: Job) {
        let Ok(mut workers) = self.workers.lock() else {
            warn!("Reconciler worker table poisoned, dropping job for {}", path);
            return;
        };

        let job = match workers.get(path) {
            Some(tx) => match tx.send(job) {
                Ok(()) => return,
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(job);
        workers.insert(path.to_string(), tx.clone());
        drop(workers);

        debug!("Starting reconcile worker for {}", path);
        tokio::spawn(run_worker(
            path.to_string(),
            self.engine.clone(),
            self.broadcaster.clone(),
            Arc::downgrade(&self.workers),
            (tx.downgrade(), rx),
        ));
    }
}

/// Runs one file's jobs in order. After a release with nothing queued behind
/// it, the worker unregisters itself and exits.
async fn run_worker<E: ReconciliationEngine>(
    path: String,
    engine: Arc<E>,
    broadcaster: EventBroadcaster,
    workers: Weak<Mutex<WorkerMap>>,
    (own, mut rx): (mpsc::WeakUnboundedSender<Job>, mpsc::UnboundedReceiver<Job>),
) {
    while let Some(job) = rx.recv().await {
        match job {
            Job::Reconcile {
                request,
                owner_id,
                sink,
            } => run_pass(engine.as_ref(), &broadcaster, &request, owner_id, &sink).await,
            Job::Release => {
                engine.release(&path).await;
                debug!("Released {}", path);

                // Jobs are only queued under the table lock
                let Some(workers) = workers.upgrade() else {
                    break;
                };
                let Ok(mut table) = workers.lock() else {
                    break;
                };
                if rx.is_empty() {
                    let registered = own.upgrade();
                    if table
                        .get(&path)
                        .zip(registered.as_ref())
                        .is_some_and(|(current, mine)| current.same_channel(mine))
                    {
                        table.remove(&path);
                    }
                    break;
                }
            }
        }
    }
    trace!("Reconcile worker for {} finished", path);
}

async fn run_pass<E: ReconciliationEngine>(
    engine: &E,
    broadcaster: &EventBroadcaster,
    request: &ReconcileRequest,
    owner_id: String,
    sink: &ResultSink,
) {
    let started = Instant::now();
    let outcome = match engine.reconcile(request).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("Reconcile of {} failed: {:#}", request.file_path, e);
            broadcaster.send(EventKind::ReconcileFailed {
                path: request.file_path.clone(),
                reason: format!("{e:#}"),
            });
            return;
        }
    };

    let result = ReconcileStateChanged {
        working_copy_owner_id: owner_id,
        problems: outcome
            .diagnostics
            .iter()
            .map(|d| d.to_problem(&request.file_path))
            .collect(),
        highlighted_positions: outcome.highlights,
    };

    broadcaster.send(EventKind::Reconciled {
        path: request.file_path.clone(),
        owner: result.working_copy_owner_id.clone(),
        problems: result.problems.len(),
        highlights: result.highlighted_positions.len(),
        duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    });

    if sink.send(result).is_err() {
        debug!("Endpoint for {} went away before its result", request.file_path);
    }
}
