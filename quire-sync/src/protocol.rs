//! Messages exchanged with the sync server.
//!
//! The engine speaks a simple cursor-based request/response model:
//! 1. Local changes are pushed as one batch per cycle
//! 2. Remote changes are pulled page by page since a sequence cursor
//!
//! The wire encoding is the transport's business; these types only fix the
//! shape (and a camelCase serde form for JSON transports).

use chrono::{DateTime, Utc};
use quire_types::{DeviceId, Note, NoteId};
use serde::{Deserialize, Serialize};

/// The kind of mutation a change carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Create,
    Update,
    Delete,
}

impl ChangeOperation {
    pub fn is_delete(self) -> bool {
        matches!(self, Self::Delete)
    }
}

/// A pending local mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub note_id: NoteId,
    pub operation: ChangeOperation,
    /// Full snapshot for create/update; `None` for delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Note>,
    pub version_at_queue_time: u64,
}

impl ChangeRecord {
    /// Creates a record. Any payload passed with a delete is discarded.
    pub fn new(
        note_id: NoteId,
        operation: ChangeOperation,
        payload: Option<Note>,
        version: u64,
    ) -> Self {
        let payload = if operation.is_delete() { None } else { payload };
        Self {
            note_id,
            operation,
            payload,
            version_at_queue_time: version,
        }
    }

    /// Captures `note` as it is now.
    pub fn from_note(note: &Note, operation: ChangeOperation) -> Self {
        Self::new(note.id, operation, Some(note.clone()), note.version())
    }
}

// ── Push ─────────────────────────────────────────────────────────

/// A batch of local changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub device_id: DeviceId,
    pub changes: Vec<ChangeRecord>,
}

/// Server verdict on a pushed batch, per entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PushResponse {
    pub accepted: Vec<AcceptedChange>,
    pub conflicts: Vec<PushConflict>,
    pub errors: Vec<PushEntryError>,
}

/// A pushed change the server took.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedChange {
    pub note_id: NoteId,
    pub server_version: u64,
    pub server_sequence: u64,
}

/// A pushed change the server refused because its copy moved on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushConflict {
    pub note_id: NoteId,
    pub server_version: u64,
    /// The server's current copy, when it chose to send one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_note: Option<Note>,
}

/// A pushed change the server failed to process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEntryError {
    pub note_id: NoteId,
    pub message: String,
}

// ── Pull ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    /// Return changes with a sequence strictly greater than this.
    pub since_sequence: u64,
}

/// One page of remote changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub changes: Vec<RemoteChange>,
    pub has_more: bool,
    /// Highest sequence covered by this page.
    pub latest_sequence: u64,
    pub server_time: String,
}

/// A change made on another replica, as recorded by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteChange {
    pub note_id: NoteId,
    pub operation: ChangeOperation,
    pub version: u64,
    pub server_sequence: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<Note>,
    pub timestamp: DateTime<Utc>,
}

impl RemoteChange {
    /// Content digest of the carried snapshot; `None` for deletes.
    pub fn content_hash(&self) -> Option<String> {
        self.note.as_ref().map(Note::content_hash)
    }
}

// ── Status ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub ok: bool,
    pub server_time: String,
}
