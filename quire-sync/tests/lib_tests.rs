use quire_sync::{add_sync_metadata, SyncError, SyncReport};
use quire_types::{Note, SyncMetadata};
use serde_json::json;

// ── Errors ───────────────────────────────────────────────────────

#[test]
fn gate_errors_have_fixed_messages() {
    assert_eq!(SyncError::Offline.to_string(), "Offline");
    assert_eq!(SyncError::Disabled.to_string(), "Sync disabled");
}

#[test]
fn retryable_errors() {
    assert!(SyncError::Offline.is_retryable());
    assert!(SyncError::Timeout.is_retryable());
    assert!(SyncError::Network("x".into()).is_retryable());
    assert!(!SyncError::Disabled.is_retryable());
    assert!(!SyncError::Protocol("x".into()).is_retryable());
    assert!(!SyncError::Storage("x".into()).is_retryable());
}

#[test]
fn serde_errors_convert() {
    let err: SyncError = serde_json::from_str::<u64>("nope").unwrap_err().into();
    assert!(matches!(err, SyncError::Serialization(_)));
}

// ── Metadata ─────────────────────────────────────────────────────

#[test]
fn metadata_is_added_once() {
    let note = add_sync_metadata(Note::new("A", json!({"text": "a"})));
    let meta = note.sync.clone().unwrap();
    assert_eq!(meta.version, 0);
    assert_eq!(meta.content_hash, note.content_hash());
    assert!(meta.server_sequence.is_none());
    assert!(!note.has_unsynced_content());
}

#[test]
fn existing_metadata_is_kept() {
    let note = Note::new("A", json!({}));
    let meta = SyncMetadata::for_note(&note, 7).with_server_sequence(3);
    let note = add_sync_metadata(note.with_sync(meta.clone()));
    assert_eq!(note.sync, Some(meta));
}

// ── Report ───────────────────────────────────────────────────────

#[test]
fn empty_report_is_clean() {
    let report = SyncReport::default();
    assert!(report.is_clean());
    assert_eq!(report.pushed + report.pulled + report.conflicts, 0);

    let failed = SyncReport {
        errors: vec!["Offline".into()],
        ..Default::default()
    };
    assert!(!failed.is_clean());
}
