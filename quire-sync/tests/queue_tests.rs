mod common;

use common::make_note;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use quire_sync::{ChangeOperation, ChangeQueue, ChangeRecord};
use quire_types::NoteId;

fn ids(queue: &ChangeQueue) -> Vec<NoteId> {
    queue.note_ids().copied().collect()
}

// ── Enqueue & coalescing ─────────────────────────────────────────

#[test]
fn new_queue_is_empty() {
    let queue = ChangeQueue::new();
    assert!(queue.is_empty());
    assert_eq!(queue.len(), 0);
}

#[test]
fn second_change_replaces_first() {
    let mut queue = ChangeQueue::new();
    let mut note = make_note("A");
    queue.push(ChangeRecord::from_note(&note, ChangeOperation::Update));
    note.title = "A2".into();
    queue.push(ChangeRecord::from_note(&note, ChangeOperation::Update));

    assert_eq!(queue.len(), 1);
    let record = queue.get(&note.id).unwrap();
    assert_eq!(record.payload.as_ref().unwrap().title, "A2");
}

#[test]
fn update_after_create_stays_create() {
    let mut queue = ChangeQueue::new();
    let note = make_note("A");
    queue.enqueue(note.id, ChangeOperation::Create, Some(note.clone()), 0);
    queue.enqueue(note.id, ChangeOperation::Update, Some(note.clone()), 0);

    assert_eq!(queue.get(&note.id).unwrap().operation, ChangeOperation::Create);
}

#[test]
fn delete_after_create_is_a_delete() {
    let mut queue = ChangeQueue::new();
    let note = make_note("A");
    queue.enqueue(note.id, ChangeOperation::Create, Some(note.clone()), 0);
    queue.enqueue(note.id, ChangeOperation::Delete, Some(note.clone()), 0);

    let record = queue.get(&note.id).unwrap();
    assert_eq!(record.operation, ChangeOperation::Delete);
    assert!(record.payload.is_none());
}

#[test]
fn replacement_keeps_original_position() {
    let mut queue = ChangeQueue::new();
    let a = make_note("A");
    let b = make_note("B");
    queue.push(ChangeRecord::from_note(&a, ChangeOperation::Create));
    queue.push(ChangeRecord::from_note(&b, ChangeOperation::Create));
    queue.push(ChangeRecord::from_note(&a, ChangeOperation::Update));

    assert_eq!(ids(&queue), vec![a.id, b.id]);
}

// ── Drain ────────────────────────────────────────────────────────

#[test]
fn drain_returns_queue_order_and_empties() {
    let mut queue = ChangeQueue::new();
    let notes: Vec<_> = (0..3).map(|i| make_note(&format!("N{i}"))).collect();
    for note in &notes {
        queue.push(ChangeRecord::from_note(note, ChangeOperation::Create));
    }

    let drained: Vec<_> = queue.drain().into_iter().map(|r| r.note_id).collect();

    assert_eq!(drained, notes.iter().map(|n| n.id).collect::<Vec<_>>());
    assert!(queue.is_empty());
    assert!(queue.drain().is_empty());
}

// ── Requeue ──────────────────────────────────────────────────────

#[test]
fn requeue_puts_failed_entries_first() {
    let mut queue = ChangeQueue::new();
    let a = make_note("A");
    let b = make_note("B");
    queue.push(ChangeRecord::from_note(&a, ChangeOperation::Create));
    let failed = queue.drain();
    queue.push(ChangeRecord::from_note(&b, ChangeOperation::Create));

    let reinserted = queue.requeue_failed(failed);

    assert_eq!(reinserted, 1);
    assert_eq!(ids(&queue), vec![a.id, b.id]);
}

#[test]
fn requeue_skips_notes_edited_since() {
    let mut queue = ChangeQueue::new();
    let mut a = make_note("A");
    queue.push(ChangeRecord::from_note(&a, ChangeOperation::Create));
    let failed = queue.drain();
    a.title = "A, newer".into();
    queue.push(ChangeRecord::from_note(&a, ChangeOperation::Update));

    let reinserted = queue.requeue_failed(failed);

    assert_eq!(reinserted, 0);
    assert_eq!(queue.len(), 1);
    assert!(queue.contains(&a.id));
    assert_eq!(
        queue.get(&a.id).unwrap().payload.as_ref().unwrap().title,
        "A, newer"
    );
}

#[test]
fn unsent_create_survives_requeue_behind_newer_update() {
    let mut queue = ChangeQueue::new();
    let mut a = make_note("A");
    queue.push(ChangeRecord::from_note(&a, ChangeOperation::Create));
    let failed = queue.drain();
    a.title = "A, newer".into();
    queue.push(ChangeRecord::from_note(&a, ChangeOperation::Update));

    queue.requeue_failed(failed);

    let entry = queue.get(&a.id).unwrap();
    assert_eq!(entry.operation, ChangeOperation::Create);
    assert_eq!(entry.payload.as_ref().unwrap().title, "A, newer");
}

#[test]
fn requeued_update_leaves_newer_delete_alone() {
    let mut queue = ChangeQueue::new();
    let a = make_note("A");
    queue.push(ChangeRecord::from_note(&a, ChangeOperation::Update));
    let failed = queue.drain();
    queue.push(ChangeRecord::from_note(&a, ChangeOperation::Delete));

    queue.requeue_failed(failed);

    assert_eq!(queue.get(&a.id).unwrap().operation, ChangeOperation::Delete);
}

// ── Properties ───────────────────────────────────────────────────

proptest! {
    /// Whatever the edit sequence, each note appears at most once and in
    /// first-seen order.
    #[test]
    fn one_entry_per_note(picks in prop::collection::vec(0usize..6, 1..40)) {
        let notes: Vec<_> = (0..6).map(|i| make_note(&format!("N{i}"))).collect();
        let mut queue = ChangeQueue::new();
        let mut first_seen = Vec::new();

        for pick in picks {
            let note = &notes[pick];
            if !first_seen.contains(&note.id) {
                first_seen.push(note.id);
            }
            queue.push(ChangeRecord::from_note(note, ChangeOperation::Update));
        }

        prop_assert_eq!(queue.len(), first_seen.len());
        let drained: Vec<_> = queue.drain().into_iter().map(|r| r.note_id).collect();
        prop_assert_eq!(drained, first_seen);
    }
}
