//! Local persistence seam.
//!
//! The host application owns the on-disk note store; the engine only reaches
//! it through [`LocalStore`]. Implementations:
//! - [`memory::InMemoryStore`] - for tests and embedders without persistence
//! - the host's own store (database, markdown files, ...)

use crate::config::SyncConfig;
use crate::error::SyncResult;
use async_trait::async_trait;
use quire_types::{Note, NoteId};

/// Callbacks the engine uses to apply remote state locally.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Upserts a note.
    async fn save_note(&self, note: &Note) -> SyncResult<()>;

    /// Removes a note. Deleting a missing note is not an error.
    async fn delete_note(&self, note_id: &NoteId) -> SyncResult<()>;

    /// Reads the current local copy, if any.
    async fn read_note(&self, note_id: &NoteId) -> SyncResult<Option<Note>>;

    /// Persists the config after the engine advanced its cursor.
    async fn save_config(&self, _config: &SyncConfig) -> SyncResult<()> {
        Ok(())
    }
}

/// In-memory note store.
pub mod memory {
    use super::*;
    use crate::error::SyncError;
    use std::collections::{HashMap, HashSet};
    use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

    #[derive(Default)]
    struct Inner {
        notes: HashMap<NoteId, Note>,
        saved: Vec<NoteId>,
        deleted: Vec<NoteId>,
        failing: HashSet<NoteId>,
        config: Option<SyncConfig>,
    }

    /// A `HashMap`-backed [`LocalStore`] that also records which callbacks
    /// ran, and can be told to fail for particular notes.
    #[derive(Default)]
    pub struct InMemoryStore {
        inner: RwLock<Inner>,
    }

    impl InMemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        fn read(&self) -> RwLockReadGuard<'_, Inner> {
            self.inner.read().unwrap_or_else(|e| e.into_inner())
        }

        fn write(&self) -> RwLockWriteGuard<'_, Inner> {
            self.inner.write().unwrap_or_else(|e| e.into_inner())
        }

        /// Seeds a note without recording a save.
        pub fn insert(&self, note: Note) {
            self.write().notes.insert(note.id, note);
        }

        pub fn get(&self, note_id: &NoteId) -> Option<Note> {
            self.read().notes.get(note_id).cloned()
        }

        pub fn len(&self) -> usize {
            self.read().notes.len()
        }

        pub fn is_empty(&self) -> bool {
            self.read().notes.is_empty()
        }

        /// Ids passed to `save_note`, in call order.
        pub fn saved(&self) -> Vec<NoteId> {
            self.read().saved.clone()
        }

        /// Ids passed to `delete_note`, in call order.
        pub fn deleted(&self) -> Vec<NoteId> {
            self.read().deleted.clone()
        }

        /// The last config handed to `save_config`.
        pub fn saved_config(&self) -> Option<SyncConfig> {
            self.read().config.clone()
        }

        /// Makes save/delete fail for `note_id` until [`InMemoryStore::heal`].
        pub fn fail_on(&self, note_id: NoteId) {
            self.write().failing.insert(note_id);
        }

        pub fn heal(&self, note_id: &NoteId) {
            self.write().failing.remove(note_id);
        }
    }

    #[async_trait]
    impl LocalStore for InMemoryStore {
        async fn save_note(&self, note: &Note) -> SyncResult<()> {
            let mut inner = self.write();
            inner.saved.push(note.id);
            if inner.failing.contains(&note.id) {
                return Err(SyncError::Storage(format!("cannot save note {}", note.id)));
            }
            inner.notes.insert(note.id, note.clone());
            Ok(())
        }

        async fn delete_note(&self, note_id: &NoteId) -> SyncResult<()> {
            let mut inner = self.write();
            inner.deleted.push(*note_id);
            if inner.failing.contains(note_id) {
                return Err(SyncError::Storage(format!("cannot delete note {note_id}")));
            }
            inner.notes.remove(note_id);
            Ok(())
        }

        async fn read_note(&self, note_id: &NoteId) -> SyncResult<Option<Note>> {
            Ok(self.get(note_id))
        }

        async fn save_config(&self, config: &SyncConfig) -> SyncResult<()> {
            self.write().config = Some(config.clone());
            Ok(())
        }
    }
}
