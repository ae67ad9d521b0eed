//! Preparing notes for sync.

use quire_types::{Note, SyncMetadata};

/// Attaches initial sync bookkeeping (`version` 0, current content hash) to a
/// note that has none. Notes that already carry metadata are returned as is.
///
/// Call this for a newly created note before its first `queue_change`.
pub fn add_sync_metadata(note: Note) -> Note {
    if note.sync.is_some() {
        return note;
    }
    let meta = SyncMetadata::for_note(&note, 0);
    note.with_sync(meta)
}
