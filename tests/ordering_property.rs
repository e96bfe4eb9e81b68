// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Property tests for delta ordering: a working copy fed the editor's deltas
//! ends up with the editor's text no matter how delivery is shuffled.

use proptest::prelude::{Just, Strategy, any, prop_assert, prop_assert_eq, proptest};
use proptest::collection::vec;
use proptest::strategy::ValueTree;
use proptest::test_runner::TestRunner;

use tandem_sync::error::SyncError;
use tandem_sync::protocol::{Delta, OffsetEncoding};
use tandem_sync::server::{WorkingCopy, WorkingCopyKey};

/// An abstract edit, resolved against the current text when recorded.
#[derive(Debug, Clone)]
enum Edit {
    Insert { at: usize, text: String },
    Remove { at: usize, len: usize },
}

fn edit() -> impl Strategy<Value = Edit> {
    (any::<bool>(), any::<usize>(), "[a-z ]{1,4}", 1usize..4).prop_map(
        |(insert, at, text, len)| {
            if insert {
                Edit::Insert { at, text }
            } else {
                Edit::Remove { at, len }
            }
        },
    )
}

/// Replays `edits` on `initial` like an editor would, recording one delta
/// per edit and returning the final text.
fn record(initial: &str, edits: &[Edit]) -> (Vec<Delta>, String) {
    let mut text = initial.to_string();
    let mut deltas = Vec::new();

    for edit in edits {
        let delta = match edit {
            Edit::Remove { at, len } if !text.is_empty() => {
                let start = at % text.len();
                let len = (*len).min(text.len() - start);
                Delta::remove(start, len)
            }
            Edit::Remove { .. } => Delta::insert(0, "x"),
            Edit::Insert { at, text: inserted } => {
                Delta::insert(at % (text.len() + 1), inserted.clone())
            }
        };
        // ASCII only, so UTF-16 offsets are byte offsets
        if delta.apply(&mut text, OffsetEncoding::Utf16).is_ok() {
            deltas.push(delta);
        }
    }

    (deltas, text)
}

fn working_copy(content: &str) -> WorkingCopy {
    WorkingCopy::new(
        WorkingCopyKey {
            project_path: "/proj".to_string(),
            file_path: "/proj/a.txt".to_string(),
        },
        content.to_string(),
    )
}

fn scenario() -> impl Strategy<Value = (String, Vec<Delta>, String, Vec<usize>)> {
    scenario_of(1..24)
}

fn scenario_of(
    edits: std::ops::Range<usize>,
) -> impl Strategy<Value = (String, Vec<Delta>, String, Vec<usize>)> {
    ("[a-z]{0,12}", vec(edit(), edits)).prop_flat_map(|(initial, edits)| {
        let (deltas, expected) = record(&initial, &edits);
        let order: Vec<usize> = (0..deltas.len()).collect();
        (
            Just(initial),
            Just(deltas),
            Just(expected),
            Just(order).prop_shuffle(),
        )
    })
}

proptest! {
    #[test]
    fn in_order_application_reproduces_editor_text(
        (initial, deltas, expected, _order) in scenario()
    ) {
        let mut wc = working_copy(&initial);
        for delta in &deltas {
            let applied = wc.apply(delta, None, OffsetEncoding::Utf16, 64);
            prop_assert!(applied.is_ok());
        }
        prop_assert_eq!(wc.content(), expected.as_str());
    }

    #[test]
    fn sequenced_deltas_converge_under_any_arrival_order(
        (initial, deltas, expected, order) in scenario()
    ) {
        let mut wc = working_copy(&initial);

        // The first delta fixes the sequence baseline
        let first = wc.apply(&deltas[0], Some(1), OffsetEncoding::Utf16, 64);
        prop_assert!(first.is_ok());

        for &idx in order.iter().filter(|&&idx| idx != 0) {
            let seq = u64::try_from(idx + 1).unwrap_or(u64::MAX);
            let applied = wc.apply(&deltas[idx], Some(seq), OffsetEncoding::Utf16, 64);
            prop_assert!(applied.is_ok());
        }

        prop_assert_eq!(wc.content(), expected.as_str());
        prop_assert_eq!(wc.pending_len(), 0);
        prop_assert_eq!(wc.last_applied_seq(), u64::try_from(deltas.len()).ok());
    }

    #[test]
    fn redelivered_deltas_are_rejected_as_stale(
        (initial, deltas, expected, _order) in scenario()
    ) {
        let mut wc = working_copy(&initial);
        for (idx, delta) in deltas.iter().enumerate() {
            let seq = u64::try_from(idx + 1).unwrap_or(u64::MAX);
            prop_assert!(wc.apply(delta, Some(seq), OffsetEncoding::Utf16, 64).is_ok());
            let again = wc.apply(delta, Some(seq), OffsetEncoding::Utf16, 64);
            prop_assert!(
                matches!(again, Err(SyncError::StaleDelta { .. })),
                "expected a stale rejection"
            );
        }
        prop_assert_eq!(wc.content(), expected.as_str());
    }
}

#[test]
fn unsequenced_out_of_order_application_diverges() -> anyhow::Result<()> {
    let deltas = [Delta::insert(5, " world"), Delta::remove(0, 6)];

    let mut in_order = working_copy("hello");
    for delta in &deltas {
        in_order.apply(delta, None, OffsetEncoding::Utf16, 64)?;
    }
    assert_eq!(in_order.content(), "world");

    let mut reversed = working_copy("hello");
    let outcome: Vec<_> = deltas
        .iter()
        .rev()
        .map(|delta| reversed.apply(delta, None, OffsetEncoding::Utf16, 64))
        .collect();
    assert!(outcome.iter().any(Result::is_err) || reversed.content() != "world");
    Ok(())
}

#[test]
fn unsequenced_shuffled_application_usually_diverges() -> anyhow::Result<()> {
    let strategy = scenario_of(6..24);
    let mut runner = TestRunner::deterministic();
    let mut shuffled = 0;
    let mut diverged = 0;

    for _ in 0..200 {
        let (initial, deltas, expected, order) = strategy
            .new_tree(&mut runner)
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .current();
        if order.iter().enumerate().all(|(pos, &idx)| pos == idx) {
            continue;
        }
        shuffled += 1;

        let mut wc = working_copy(&initial);
        let failed = order
            .iter()
            .map(|&idx| wc.apply(&deltas[idx], None, OffsetEncoding::Utf16, 64))
            .fold(false, |failed, applied| failed || applied.is_err());
        if failed || wc.content() != expected {
            diverged += 1;
        }
    }

    assert!(shuffled > 150, "only {shuffled} shuffled scenarios");
    assert!(
        diverged * 4 >= shuffled * 3,
        "{diverged} of {shuffled} shuffled runs matched the editor"
    );
    Ok(())
}
