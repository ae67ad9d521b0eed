//! Conflict detection and the record of detected conflicts.
//!
//! Detection is conservative: a remote change for a note that still has a
//! local change queued or in flight is always a conflict, even when a finer
//! causal check might have found the two compatible.
//!
//! Conflicts are only recorded here. Resolving them (picking a side, merging)
//! is the host's job.

use crate::protocol::{ChangeOperation, RemoteChange};
use chrono::{DateTime, Utc};
use quire_types::{Note, NoteId};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What to do with an incoming remote change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Safe to write to the local store.
    Apply,
    /// Local and remote diverged; record and leave local state alone.
    Conflict,
}

/// Classifies remote changes against local pending state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictDetector;

impl ConflictDetector {
    pub fn new() -> Self {
        Self
    }

    /// `local_pending_version` is the version the local pending change was
    /// queued at, or `None` if nothing is pending for the note this cycle.
    pub fn classify(
        &self,
        local_pending_version: Option<u64>,
        remote: &RemoteChange,
    ) -> Classification {
        match local_pending_version {
            None => Classification::Apply,
            Some(local_version) => {
                debug!(
                    "Note {} has a pending local change (v{}) and a remote change (v{})",
                    remote.note_id, local_version, remote.version
                );
                Classification::Conflict
            }
        }
    }
}

/// Which phase of the cycle found the conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSource {
    /// The server refused our pushed change.
    Push,
    /// A pulled change overlapped a pending local change.
    Pull,
}

/// A recorded divergence awaiting external resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub note_id: NoteId,
    pub local_version: u64,
    pub remote_version: u64,
    /// Local copy when the conflict was found; `None` if deleted locally.
    pub local_snapshot: Option<Note>,
    /// Remote copy; `None` if deleted remotely or not sent by the server.
    pub remote_snapshot: Option<Note>,
    pub remote_operation: Option<ChangeOperation>,
    pub source: ConflictSource,
    pub detected_at: DateTime<Utc>,
}

/// Unresolved conflicts, in detection order.
#[derive(Debug, Clone, Default)]
pub struct ConflictLog {
    conflicts: Vec<Conflict>,
}

impl ConflictLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, conflict: Conflict) {
        self.conflicts.push(conflict);
    }

    /// Folds a pulled remote change into the most recent conflict for the
    /// same note. Returns false if there is none.
    pub fn enrich_from_remote(&mut self, change: &RemoteChange) -> bool {
        let Some(existing) = self
            .conflicts
            .iter_mut()
            .rev()
            .find(|c| c.note_id == change.note_id)
        else {
            return false;
        };
        if change.version >= existing.remote_version || existing.remote_snapshot.is_none() {
            existing.remote_version = change.version;
            existing.remote_snapshot = change.note.clone();
            existing.remote_operation = Some(change.operation);
        }
        true
    }

    /// Whether a conflict against remote `version` of the note is already
    /// recorded.
    pub fn contains(&self, note_id: &NoteId, version: u64) -> bool {
        self.conflicts
            .iter()
            .any(|c| c.note_id == *note_id && c.remote_version == version)
    }

    /// Removes and returns every conflict for `note_id`, oldest first.
    pub fn take(&mut self, note_id: &NoteId) -> Vec<Conflict> {
        let (taken, kept): (Vec<Conflict>, Vec<Conflict>) = std::mem::take(&mut self.conflicts)
            .into_iter()
            .partition(|c| c.note_id == *note_id);
        self.conflicts = kept;
        taken
    }

    pub fn clear(&mut self) {
        self.conflicts.clear();
    }

    pub fn all(&self) -> &[Conflict] {
        &self.conflicts
    }

    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }
}
