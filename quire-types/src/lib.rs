//! Core type definitions for Quire.
//!
//! This crate defines the plugin-agnostic types shared by the sync engine and
//! the host application:
//! - Note and device identifiers (UUID v7)
//! - The note snapshot exchanged between replicas
//! - Per-note sync bookkeeping and content hashing
//!
//! The editor's node model is opaque here: a note body is carried as a JSON
//! document and only ever hashed or copied, never interpreted.

mod ids;
mod note;

pub use ids::{DeviceId, NoteId};
pub use note::{content_hash, Note, SyncMetadata};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),
}
