//! Pending local mutations, coalesced per note.
//!
//! Only a note's final state matters for convergence, so queuing a second
//! change for a note that has not been pushed yet replaces the first. Batch
//! order is the order in which notes first entered the queue.

use crate::protocol::{ChangeOperation, ChangeRecord};
use quire_types::{Note, NoteId};
use std::collections::HashMap;
use tracing::debug;

/// Ordered, deduplicating map from note to its latest pending change.
#[derive(Debug, Clone, Default)]
pub struct ChangeQueue {
    entries: HashMap<NoteId, ChangeRecord>,
    /// Insertion order; holds exactly the keys of `entries`.
    order: Vec<NoteId>,
}

impl ChangeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a change, replacing any pending entry for the same note.
    pub fn enqueue(
        &mut self,
        note_id: NoteId,
        operation: ChangeOperation,
        payload: Option<Note>,
        version: u64,
    ) {
        self.push(ChangeRecord::new(note_id, operation, payload, version));
    }

    /// Queues a prebuilt record with the same replacement rule as
    /// [`ChangeQueue::enqueue`].
    ///
    /// An update replacing a pending create stays a create: the server has
    /// never seen the note.
    pub fn push(&mut self, mut record: ChangeRecord) {
        match self.entries.get(&record.note_id) {
            Some(existing) => {
                if existing.operation == ChangeOperation::Create
                    && record.operation == ChangeOperation::Update
                {
                    record.operation = ChangeOperation::Create;
                }
                debug!("Coalesced pending change for note {}", record.note_id);
            }
            None => self.order.push(record.note_id),
        }
        self.entries.insert(record.note_id, record);
    }

    /// Removes and returns every pending entry in queue order.
    pub fn drain(&mut self) -> Vec<ChangeRecord> {
        let order = std::mem::take(&mut self.order);
        let mut entries = std::mem::take(&mut self.entries);
        order
            .into_iter()
            .filter_map(|id| entries.remove(&id))
            .collect()
    }

    /// Puts back entries whose push failed, ahead of anything queued since.
    ///
    /// An entry is dropped if the note was queued again meanwhile: the newer
    /// local edit wins over the stale one. A dropped create turns the newer
    /// update into a create. Returns how many were reinserted.
    pub fn requeue_failed(&mut self, entries: Vec<ChangeRecord>) -> usize {
        let mut order = Vec::with_capacity(entries.len() + self.order.len());
        for record in entries {
            if let Some(newer) = self.entries.get_mut(&record.note_id) {
                if record.operation == ChangeOperation::Create
                    && newer.operation == ChangeOperation::Update
                {
                    newer.operation = ChangeOperation::Create;
                }
                debug!("Dropping stale requeue for note {}", record.note_id);
                continue;
            }
            order.push(record.note_id);
            self.entries.insert(record.note_id, record);
        }
        let reinserted = order.len();
        order.append(&mut self.order);
        self.order = order;
        reinserted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, note_id: &NoteId) -> bool {
        self.entries.contains_key(note_id)
    }

    pub fn get(&self, note_id: &NoteId) -> Option<&ChangeRecord> {
        self.entries.get(note_id)
    }

    /// Pending note ids in queue order.
    pub fn note_ids(&self) -> impl Iterator<Item = &NoteId> {
        self.order.iter()
    }
}
