//! Note snapshots and per-note sync bookkeeping.

use crate::NoteId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A full snapshot of a note as stored locally and exchanged with the server.
///
/// `body` is the editor's document, kept as opaque JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: NoteId,
    pub title: String,
    pub body: serde_json::Value,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    /// Absent until the note has been prepared for sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncMetadata>,
}

impl Note {
    /// Creates a new, never-synced note.
    pub fn new(title: impl Into<String>, body: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: NoteId::new(),
            title: title.into(),
            body,
            tags: Vec::new(),
            created_at: now,
            modified_at: now,
            sync: None,
        }
    }

    /// Adds tags to the note.
    #[must_use]
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the sync bookkeeping.
    #[must_use]
    pub fn with_sync(mut self, sync: SyncMetadata) -> Self {
        self.sync = Some(sync);
        self
    }

    /// Bumps `modified_at` after a local edit.
    pub fn touch(&mut self) {
        self.modified_at = Utc::now();
    }

    /// The recorded sync version, or 0 for a note that was never synced.
    pub fn version(&self) -> u64 {
        self.sync.as_ref().map_or(0, |s| s.version)
    }

    /// Digest of the note's current content.
    pub fn content_hash(&self) -> String {
        content_hash(&self.title, &self.body, &self.tags)
    }

    /// True if the content differs from what the sync metadata last recorded.
    /// A note without metadata always counts as locally edited.
    pub fn has_unsynced_content(&self) -> bool {
        match &self.sync {
            Some(meta) => meta.content_hash != self.content_hash(),
            None => true,
        }
    }
}

/// Sync bookkeeping embedded in each note.
///
/// Two replicas with equal `version` must have equal `content_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    /// Incremented on every accepted local or remote mutation.
    pub version: u64,
    pub content_hash: String,
    /// Server sequence of the last exchange that touched this note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_sequence: Option<u64>,
}

impl SyncMetadata {
    /// Bookkeeping for `note` at `version`, hashing its current content.
    pub fn for_note(note: &Note, version: u64) -> Self {
        Self {
            version,
            content_hash: note.content_hash(),
            server_sequence: None,
        }
    }

    #[must_use]
    pub fn with_server_sequence(mut self, sequence: u64) -> Self {
        self.server_sequence = Some(sequence);
        self
    }
}

#[derive(Serialize)]
struct HashedContent<'a> {
    title: &'a str,
    body: &'a serde_json::Value,
    tags: &'a [String],
}

/// Lowercase hex SHA-256 of the note's serialized content.
///
/// Timestamps and sync metadata are excluded. JSON object keys serialize in
/// sorted order, so equal content always yields equal digests.
pub fn content_hash(title: &str, body: &serde_json::Value, tags: &[String]) -> String {
    let content = HashedContent { title, body, tags };
    // Serializing borrowed strings and a Value cannot fail.
    let bytes = serde_json::to_vec(&content).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}
