//! Shared fixtures for sync tests.

#![allow(dead_code)]

use chrono::Utc;
use quire_sync::{
    ChangeOperation, InMemoryStore, ManualNetworkMonitor, MockTransport, RemoteChange,
    SyncConfig, SyncEngine, SyncStatus, Subscription,
};
use quire_types::{DeviceId, Note, NoteId, SyncMetadata};
use serde_json::json;
use std::sync::{Arc, Mutex};

/// Routes engine logs to the test output. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An engine wired to in-memory doubles.
pub struct Harness {
    pub engine: SyncEngine,
    pub transport: Arc<MockTransport>,
    pub network: Arc<ManualNetworkMonitor>,
    pub store: Arc<InMemoryStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn offline() -> Self {
        let harness = Self::new();
        harness.network.set_online(false);
        harness
    }

    pub fn with_config(config: SyncConfig) -> Self {
        init_tracing();
        let transport = Arc::new(MockTransport::new());
        let network = Arc::new(ManualNetworkMonitor::new(true));
        let store = Arc::new(InMemoryStore::new());
        let engine = SyncEngine::new(
            config,
            transport.clone(),
            network.clone(),
            store.clone(),
        );
        Self {
            engine,
            transport,
            network,
            store,
        }
    }

    /// Saves `note` locally and queues it, the way a host reacts to an edit.
    pub fn edit(&self, note: &Note, operation: ChangeOperation) {
        self.store.insert(note.clone());
        self.engine.queue_change(note, operation);
    }

    /// Collects every status the engine emits from now on.
    pub fn record_statuses(&self) -> (Arc<Mutex<Vec<SyncStatus>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = self
            .engine
            .on_status_change(move |status| sink.lock().unwrap().push(status.clone()));
        (seen, subscription)
    }
}

pub fn test_config() -> SyncConfig {
    SyncConfig::new("https://sync.test", DeviceId::new())
}

pub fn make_note(title: &str) -> Note {
    Note::new(title, json!({"type": "doc", "content": [{"text": title}]}))
}

/// A note that has been synced before, at `version`.
pub fn synced_note(title: &str, version: u64) -> Note {
    let note = make_note(title);
    let meta = SyncMetadata::for_note(&note, version);
    note.with_sync(meta)
}

/// A remote create/update carrying `note` at `version`.
pub fn remote_save(note: &Note, version: u64, sequence: u64) -> RemoteChange {
    RemoteChange {
        note_id: note.id,
        operation: ChangeOperation::Update,
        version,
        server_sequence: sequence,
        note: Some(note.clone()),
        timestamp: Utc::now(),
    }
}

pub fn remote_delete(note_id: NoteId, version: u64, sequence: u64) -> RemoteChange {
    RemoteChange {
        note_id,
        operation: ChangeOperation::Delete,
        version,
        server_sequence: sequence,
        note: None,
        timestamp: Utc::now(),
    }
}
