// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::trace;

use super::autosave::AutoSaveController;
use super::editor::{DocumentChange, EditorDocument, PreferenceStore};
use super::transmitter::ChangeTransmitter;

/// Events an editor feeds to a running [`AutoSaveTask`].
#[derive(Debug, Clone)]
pub enum EditorEvent {
    /// The document was edited.
    Changed(DocumentChange),
    /// Autosave switched on.
    Activate,
    /// Autosave switched off.
    Deactivate,
    /// The workspace suspended tracking of the file.
    TrackingSuspended,
    /// The workspace resumed tracking of the file.
    TrackingResumed,
    /// Focus moved; `true` when this editor became the active part.
    ActivePartChanged(bool),
    /// Editor preferences changed.
    SettingsChanged,
    /// Flush immediately.
    Save,
}

/// Handle to a running controller task.
#[derive(Clone)]
pub struct AutoSaveHandle {
    tx: mpsc::UnboundedSender<EditorEvent>,
}

impl AutoSaveHandle {
    /// Delivers an event. Returns `false` once the task has stopped.
    pub fn send(&self, event: EditorEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Runs one controller on its own task.
///
/// Events and timer expiry are handled one at a time, so a flush never
/// overlaps another flush or an edit.
pub struct AutoSaveTask;

impl AutoSaveTask {
    /// Spawns the task. It stops when every handle is dropped and returns
    /// the controller.
    pub fn spawn<D, P, T>(
        controller: AutoSaveController<D, P, T>,
    ) -> (AutoSaveHandle, JoinHandle<AutoSaveController<D, P, T>>)
    where
        D: EditorDocument + 'static,
        P: PreferenceStore + 'static,
        T: ChangeTransmitter + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(Self::run(controller, rx));
        (AutoSaveHandle { tx }, handle)
    }

    async fn run<D, P, T>(
        mut controller: AutoSaveController<D, P, T>,
        mut rx: mpsc::UnboundedReceiver<EditorEvent>,
    ) -> AutoSaveController<D, P, T>
    where
        D: EditorDocument,
        P: PreferenceStore,
        T: ChangeTransmitter,
    {
        loop {
            let deadline = controller.deadline();
            // Placeholder far in the future; the branch is disabled when unarmed.
            let wake = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    Self::dispatch(&mut controller, event, Instant::now());
                }
                () = sleep_until(wake), if deadline.is_some() => {
                    trace!("Debounce timer fired for {}", controller.document().location());
                    controller.tick(Instant::now());
                }
            }
        }
        controller
    }

    fn dispatch<D, P, T>(controller: &mut AutoSaveController<D, P, T>, event: EditorEvent, now: Instant)
    where
        D: EditorDocument,
        P: PreferenceStore,
        T: ChangeTransmitter,
    {
        match event {
            EditorEvent::Changed(change) => controller.on_document_change(&change, now),
            EditorEvent::Activate => controller.activate(now),
            EditorEvent::Deactivate => controller.deactivate(),
            EditorEvent::TrackingSuspended => controller.on_tracking_suspended(),
            EditorEvent::TrackingResumed => controller.on_tracking_resumed(now),
            EditorEvent::ActivePartChanged(active) => controller.on_active_part_changed(active),
            EditorEvent::SettingsChanged => controller.on_settings_changed(now),
            EditorEvent::Save => controller.save(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::AutoSaveSettings;
    use crate::protocol::{DeltaKind, EditorChanges, OffsetEncoding};

    struct StaticDoc;

    impl EditorDocument for StaticDoc {
        fn location(&self) -> String {
            "/p/a.txt".to_string()
        }
        fn contents(&self) -> String {
            "snapshot".to_string()
        }
        fn is_dirty(&self) -> bool {
            false
        }
        fn save(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        fn project(&self) -> Option<String> {
            Some("/p".to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_flushes_after_quiet_period() -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<EditorChanges>();
        let controller = AutoSaveController::install(
            StaticDoc,
            None::<bool>,
            tx,
            AutoSaveSettings {
                delay: Duration::from_millis(1000),
                encoding: OffsetEncoding::Utf16,
                owner_id: None,
            },
            Instant::now(),
        );
        let (handle, join) = AutoSaveTask::spawn(controller);

        for i in 0..3 {
            assert!(handle.send(EditorEvent::Changed(DocumentChange::insert("/p/a.txt", i, "x"))));
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(800)).await;
        let mut kinds = Vec::new();
        while let Ok(change) = rx.try_recv() {
            kinds.push(change.kind);
        }
        assert_eq!(kinds, vec![DeltaKind::Insert; 3]);

        drop(handle);
        let controller = join.await?;
        assert_eq!(controller.pending(), 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_resume_snapshot() -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<EditorChanges>();
        let controller = AutoSaveController::install(
            StaticDoc,
            None::<bool>,
            tx,
            AutoSaveSettings::default(),
            Instant::now(),
        );
        let (handle, join) = AutoSaveTask::spawn(controller);

        handle.send(EditorEvent::TrackingSuspended);
        handle.send(EditorEvent::TrackingResumed);
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let change = rx.try_recv()?;
        assert_eq!(change.kind, DeltaKind::ReplaceAll);
        assert_eq!(change.text.as_deref(), Some("snapshot"));

        drop(handle);
        join.await?;
        Ok(())
    }
}
