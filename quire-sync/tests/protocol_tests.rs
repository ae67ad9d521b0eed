mod common;

use common::{make_note, remote_delete, remote_save, synced_note};
use pretty_assertions::assert_eq;
use quire_sync::{ChangeOperation, ChangeRecord, PushResponse};

#[test]
fn record_from_note_captures_version() {
    let note = synced_note("A", 4);
    let record = ChangeRecord::from_note(&note, ChangeOperation::Update);

    assert_eq!(record.note_id, note.id);
    assert_eq!(record.version_at_queue_time, 4);
    assert_eq!(record.payload, Some(note));
}

#[test]
fn delete_record_drops_payload() {
    let note = make_note("A");
    let record = ChangeRecord::from_note(&note, ChangeOperation::Delete);
    assert!(record.payload.is_none());
    assert!(record.operation.is_delete());
}

#[test]
fn operation_serializes_lowercase() {
    assert_eq!(
        serde_json::to_value(ChangeOperation::Create).unwrap(),
        "create"
    );
    let op: ChangeOperation = serde_json::from_str("\"delete\"").unwrap();
    assert_eq!(op, ChangeOperation::Delete);
}

#[test]
fn record_json_shape() {
    let note = make_note("A");
    let json = serde_json::to_value(ChangeRecord::from_note(&note, ChangeOperation::Delete)).unwrap();

    assert_eq!(json["operation"], "delete");
    assert_eq!(json["versionAtQueueTime"], 0);
    assert!(json.get("payload").is_none());
}

#[test]
fn push_response_fields_default_to_empty() {
    let response: PushResponse = serde_json::from_str("{}").unwrap();
    assert_eq!(response, PushResponse::default());
}

#[test]
fn remote_change_hash() {
    let note = make_note("A");
    assert_eq!(
        remote_save(&note, 1, 1).content_hash(),
        Some(note.content_hash())
    );
    assert_eq!(remote_delete(note.id, 2, 2).content_hash(), None);
}
