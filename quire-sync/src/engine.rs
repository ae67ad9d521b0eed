//! Sync engine: drives push/pull cycles between the local store and the
//! server.
//!
//! One cycle:
//! 1. Bail out (no network calls) when disabled or offline
//! 2. Push: drain the change queue and send it as one batch
//! 3. Pull: retry changes whose local write failed earlier, then fetch remote
//!    changes since the cursor, page by page, applying or recording each as a
//!    conflict
//! 4. Report counts and collected errors
//!
//! Cycles are serialized: overlapping `trigger_sync` calls wait for the
//! in-flight cycle and then run their own.

use crate::config::SyncConfig;
use crate::conflict::{Classification, Conflict, ConflictDetector, ConflictLog, ConflictSource};
use crate::error::{SyncError, SyncResult};
use crate::metadata;
use crate::network::{ConnectivityEvent, NetworkMonitor};
use crate::protocol::{
    AcceptedChange, ChangeOperation, ChangeRecord, PullRequest, PushRequest, PushResponse,
    RemoteChange, ServerStatus,
};
use crate::queue::ChangeQueue;
use crate::status::{StatusBus, Subscription, SyncState, SyncStatus};
use crate::store::LocalStore;
use crate::transport::SyncTransport;
use chrono::Utc;
use quire_types::{Note, NoteId, SyncMetadata};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Outcome of one sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Local changes the server accepted.
    pub pushed: usize,
    /// Remote changes written to the local store.
    pub pulled: usize,
    /// Conflicts recorded during the cycle.
    pub conflicts: usize,
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// The sync engine for one vault.
///
/// Cheap to clone; clones share the same queue, status and cycle lock.
#[derive(Clone)]
pub struct SyncEngine {
    shared: Arc<Shared>,
}

struct Shared {
    config: Mutex<SyncConfig>,
    transport: Arc<dyn SyncTransport>,
    network: Arc<dyn NetworkMonitor>,
    store: Arc<dyn LocalStore>,
    detector: ConflictDetector,
    queue: Mutex<ChangeQueue>,
    conflicts: Mutex<ConflictLog>,
    /// Pulled changes whose local write failed, newest per note. Retried at
    /// the start of every pull phase.
    deferred: Mutex<HashMap<NoteId, RemoteChange>>,
    /// `pending_changes` is filled from the queue on every snapshot.
    status: Mutex<SyncStatus>,
    bus: Arc<StatusBus>,
    /// Held for the duration of a cycle.
    cycle: tokio::sync::Mutex<()>,
    lifecycle: Mutex<Lifecycle>,
}

#[derive(Default)]
struct Lifecycle {
    shutdown: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Per-cycle bookkeeping shared by the push and pull phases.
#[derive(Default)]
struct Cycle {
    /// Everything drained for this cycle's push, accepted or not.
    in_flight: HashMap<NoteId, ChangeRecord>,
    accepted: HashMap<NoteId, AcceptedChange>,
    /// Accepted pushes whose local metadata still has to be written.
    acknowledged: Vec<(ChangeRecord, AcceptedChange)>,
    /// Notes that already produced a conflict this cycle.
    conflicted: HashSet<NoteId>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl SyncEngine {
    /// Creates an engine. Nothing runs until [`SyncEngine::initialize`] or
    /// [`SyncEngine::trigger_sync`] is called.
    pub fn new(
        config: SyncConfig,
        transport: Arc<dyn SyncTransport>,
        network: Arc<dyn NetworkMonitor>,
        store: Arc<dyn LocalStore>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config: Mutex::new(config),
                transport,
                network,
                store,
                detector: ConflictDetector::new(),
                queue: Mutex::new(ChangeQueue::new()),
                conflicts: Mutex::new(ConflictLog::new()),
                deferred: Mutex::new(HashMap::new()),
                status: Mutex::new(SyncStatus::default()),
                bus: Arc::new(StatusBus::new()),
                cycle: tokio::sync::Mutex::new(()),
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Subscribes to connectivity changes (an offline → online transition
    /// triggers a cycle) and starts the periodic timer if configured.
    ///
    /// Must be called from within a tokio runtime. Calling it twice is a no-op.
    pub fn initialize(&self) {
        let mut lifecycle = lock(&self.shared.lifecycle);
        if lifecycle.shutdown.is_some() {
            debug!("Sync engine already initialized");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let weak = Arc::downgrade(&self.shared);
        let events = self.shared.network.subscribe();
        lifecycle.tasks.push(tokio::spawn(listen_connectivity(
            weak.clone(),
            events,
            shutdown_rx.clone(),
        )));

        let interval_ms = self.shared.config().sync_interval_ms;
        if interval_ms > 0 {
            lifecycle.tasks.push(tokio::spawn(run_periodic(
                weak,
                Duration::from_millis(interval_ms),
                shutdown_rx,
            )));
        }
        lifecycle.shutdown = Some(shutdown_tx);
        drop(lifecycle);

        if !self.shared.network.is_online() {
            self.shared.set_state(SyncState::Offline);
        }
        info!(
            "Sync engine initialized for device {} (interval: {} ms, online: {})",
            self.shared.config().device_id.short(),
            interval_ms,
            self.shared.network.is_online()
        );
    }

    /// Stops background tasks, waits for any in-flight cycle to finish, then
    /// drops all status listeners. Queued changes are kept.
    pub async fn shutdown(&self) {
        let (shutdown_tx, tasks) = {
            let mut lifecycle = lock(&self.shared.lifecycle);
            (lifecycle.shutdown.take(), std::mem::take(&mut lifecycle.tasks))
        };
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(true);
        }
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Sync background task ended abnormally: {}", e);
            }
        }

        let _cycle = self.shared.cycle.lock().await;
        self.shared.bus.clear();
        info!("Sync engine shut down");
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.shared.lifecycle).shutdown.is_some()
    }

    // ── Local changes ────────────────────────────────────────────

    /// Queues a local mutation of `note` for the next cycle. Safe to call at
    /// any time, including while a cycle is running; such changes wait for
    /// the next cycle.
    pub fn queue_change(&self, note: &Note, operation: ChangeOperation) {
        self.queue_record(ChangeRecord::from_note(note, operation));
    }

    /// Queues deletion of a note the caller no longer holds a copy of.
    pub fn queue_delete(&self, note_id: NoteId, version: u64) {
        self.queue_record(ChangeRecord::new(note_id, ChangeOperation::Delete, None, version));
    }

    fn queue_record(&self, record: ChangeRecord) {
        debug!("Queued {:?} for note {}", record.operation, record.note_id);
        lock(&self.shared.queue).push(record);
        self.shared.emit_status();
    }

    pub fn pending_changes(&self) -> usize {
        lock(&self.shared.queue).len()
    }

    /// Attaches initial sync metadata to a new note. Does not touch engine state.
    pub fn add_sync_metadata(&self, note: Note) -> Note {
        metadata::add_sync_metadata(note)
    }

    // ── Sync ─────────────────────────────────────────────────────

    /// Runs one full cycle and reports what happened. Never fails: errors are
    /// collected in [`SyncReport::errors`].
    pub async fn trigger_sync(&self) -> SyncReport {
        let _cycle = self.shared.cycle.lock().await;
        self.shared.run_cycle().await
    }

    /// Probes the server.
    pub async fn check_server(&self) -> SyncResult<ServerStatus> {
        let shared = &self.shared;
        shared.call(shared.transport.check_status()).await
    }

    // ── Status ───────────────────────────────────────────────────

    pub fn get_status(&self) -> SyncStatus {
        self.shared.status_snapshot()
    }

    /// Calls `listener` with a fresh snapshot on every status change until
    /// the returned subscription is dropped.
    pub fn on_status_change(
        &self,
        listener: impl Fn(&SyncStatus) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.bus.subscribe(listener)
    }

    // ── Conflicts ────────────────────────────────────────────────

    /// Every unresolved conflict, oldest first.
    pub fn get_conflicts(&self) -> Vec<Conflict> {
        lock(&self.shared.conflicts).all().to_vec()
    }

    /// Forgets the conflicts recorded for `note_id` once the host has
    /// resolved them, returning them.
    pub fn resolve_conflict(&self, note_id: &NoteId) -> Vec<Conflict> {
        let resolved = lock(&self.shared.conflicts).take(note_id);
        if !resolved.is_empty() {
            info!("Resolved {} conflict(s) for note {}", resolved.len(), note_id);
        }
        resolved
    }

    pub fn clear_conflicts(&self) {
        lock(&self.shared.conflicts).clear();
    }

    /// Number of pulled changes still waiting for a successful local write.
    pub fn deferred_changes(&self) -> usize {
        lock(&self.shared.deferred).len()
    }

    // ── Config ───────────────────────────────────────────────────

    /// Snapshot of the current config, including the sync cursor.
    pub fn config(&self) -> SyncConfig {
        self.shared.config()
    }

    /// Turns sync on or off. Enabling stamps `enabled_at`.
    pub fn set_enabled(&self, enabled: bool) {
        let mut config = lock(&self.shared.config);
        if config.enabled == enabled {
            return;
        }
        config.enabled = enabled;
        if enabled {
            config.enabled_at = Some(Utc::now());
        }
        info!("Sync {}", if enabled { "enabled" } else { "disabled" });
    }
}

impl Shared {
    fn config(&self) -> SyncConfig {
        lock(&self.config).clone()
    }

    // ── Status ───────────────────────────────────────────────────

    fn status_snapshot(&self) -> SyncStatus {
        let mut snapshot = lock(&self.status).clone();
        snapshot.pending_changes = lock(&self.queue).len();
        snapshot
    }

    fn emit_status(&self) {
        let snapshot = self.status_snapshot();
        self.bus.emit(&snapshot);
    }

    fn update_status(&self, update: impl FnOnce(&mut SyncStatus)) {
        update(&mut lock(&self.status));
        self.emit_status();
    }

    fn set_state(&self, state: SyncState) {
        self.update_status(|status| status.state = state);
    }

    /// Moves a resting engine to `offline`. A running cycle is left alone.
    fn mark_offline(&self) {
        let changed = {
            let mut status = lock(&self.status);
            if status.state == SyncState::Syncing || status.state == SyncState::Offline {
                false
            } else {
                status.state = SyncState::Offline;
                true
            }
        };
        if changed {
            self.emit_status();
        }
    }

    // ── Transport ────────────────────────────────────────────────

    /// Awaits a transport call under the configured timeout.
    async fn call<T>(&self, request: impl Future<Output = SyncResult<T>>) -> SyncResult<T> {
        let timeout_ms = self.config().request_timeout_ms;
        if timeout_ms == 0 {
            return request.await;
        }
        match tokio::time::timeout(Duration::from_millis(timeout_ms), request).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout),
        }
    }

    // ── Cycle ────────────────────────────────────────────────────

    /// One cycle. The caller must hold the cycle lock.
    async fn run_cycle(&self) -> SyncReport {
        let mut report = SyncReport::default();

        if !self.config().enabled {
            debug!("Sync skipped: disabled");
            report.errors.push(SyncError::Disabled.to_string());
            return report;
        }
        if !self.network.is_online() {
            info!("Sync skipped: offline");
            let message = SyncError::Offline.to_string();
            report.errors.push(message.clone());
            self.update_status(|status| {
                status.state = SyncState::Offline;
                status.last_error = Some(message);
            });
            return report;
        }

        self.set_state(SyncState::Syncing);
        info!("Sync cycle started");

        let mut cycle = Cycle::default();
        let push_ok = self.push_phase(&mut cycle, &mut report).await;
        let pull_ok = self.pull_phase(&mut cycle, &mut report).await;
        self.record_acceptances(&cycle, &mut report).await;

        let all_failed = !pull_ok && push_ok != Some(true);
        let last_error = report.errors.last().cloned();
        self.update_status(|status| {
            status.state = if all_failed {
                SyncState::Error
            } else {
                SyncState::Idle
            };
            status.last_error = last_error;
            if pull_ok {
                status.last_sync_at = Some(Utc::now());
            }
        });

        info!(
            "Sync cycle finished: pushed={}, pulled={}, conflicts={}, errors={}",
            report.pushed,
            report.pulled,
            report.conflicts,
            report.errors.len()
        );
        report
    }

    // ── Push ─────────────────────────────────────────────────────

    /// Returns `None` when there was nothing to push, otherwise whether the
    /// push call itself succeeded.
    async fn push_phase(&self, cycle: &mut Cycle, report: &mut SyncReport) -> Option<bool> {
        let batch = lock(&self.queue).drain();
        if batch.is_empty() {
            debug!("Nothing to push");
            return None;
        }

        cycle.in_flight = batch
            .iter()
            .map(|record| (record.note_id, record.clone()))
            .collect();

        info!("Pushing {} change(s)", batch.len());
        let request = PushRequest {
            device_id: self.config().device_id,
            changes: batch.clone(),
        };

        match self.call(self.transport.push(request)).await {
            Ok(response) => {
                self.handle_push_response(batch, response, cycle, report).await;
                Some(true)
            }
            Err(e) => {
                warn!("Push failed, requeueing {} change(s): {}", batch.len(), e);
                lock(&self.queue).requeue_failed(batch);
                report.errors.push(e.to_string());
                Some(false)
            }
        }
    }

    async fn handle_push_response(
        &self,
        batch: Vec<ChangeRecord>,
        response: PushResponse,
        cycle: &mut Cycle,
        report: &mut SyncReport,
    ) {
        let mut pending: HashMap<NoteId, ChangeRecord> = batch
            .iter()
            .map(|record| (record.note_id, record.clone()))
            .collect();

        for accepted in response.accepted {
            let Some(record) = pending.remove(&accepted.note_id) else {
                warn!("Server accepted note {} which was not pushed", accepted.note_id);
                continue;
            };
            report.pushed += 1;
            cycle.accepted.insert(accepted.note_id, accepted.clone());
            cycle.acknowledged.push((record, accepted));
        }

        for conflict in response.conflicts {
            let Some(record) = pending.remove(&conflict.note_id) else {
                warn!("Server reported a conflict for note {} which was not pushed", conflict.note_id);
                continue;
            };
            info!(
                "Push conflict for note {} (local v{}, server v{})",
                record.note_id, record.version_at_queue_time, conflict.server_version
            );
            let local_snapshot = self.local_snapshot(&record).await;
            lock(&self.conflicts).record(Conflict {
                note_id: record.note_id,
                local_version: record.version_at_queue_time,
                remote_version: conflict.server_version,
                local_snapshot,
                remote_snapshot: conflict.server_note,
                remote_operation: None,
                source: ConflictSource::Push,
                detected_at: Utc::now(),
            });
            cycle.conflicted.insert(record.note_id);
            report.conflicts += 1;
        }

        let mut rejected = HashSet::new();
        for error in response.errors {
            if pending.contains_key(&error.note_id) {
                warn!("Server rejected note {}: {}", error.note_id, error.message);
                report.errors.push(format!("note {}: {}", error.note_id, error.message));
                rejected.insert(error.note_id);
            }
        }

        // Rejected entries, and any the server did not mention, go back in
        // their original order.
        let retry: Vec<ChangeRecord> = batch
            .into_iter()
            .filter(|record| pending.contains_key(&record.note_id))
            .collect();
        for record in retry.iter().filter(|r| !rejected.contains(&r.note_id)) {
            let missing = SyncError::Protocol(format!(
                "server did not acknowledge note {}",
                record.note_id
            ));
            warn!("{}", missing);
            report.errors.push(missing.to_string());
        }
        if !retry.is_empty() {
            let requeued = lock(&self.queue).requeue_failed(retry);
            debug!("Requeued {} change(s) after push", requeued);
        }
    }

    /// Writes server-assigned versions for this cycle's accepted pushes.
    /// Notes that ended up in conflict are left untouched.
    async fn record_acceptances(&self, cycle: &Cycle, report: &mut SyncReport) {
        for (record, accepted) in &cycle.acknowledged {
            if cycle.conflicted.contains(&record.note_id) {
                continue;
            }
            if let Err(e) = self.record_acceptance(record, accepted).await {
                warn!("Failed to record sync metadata for note {}: {}", record.note_id, e);
                report.errors.push(format!("note {}: {}", record.note_id, e));
            }
        }
    }

    /// Writes the server-assigned version into the local copy of a pushed note.
    async fn record_acceptance(
        &self,
        record: &ChangeRecord,
        accepted: &AcceptedChange,
    ) -> SyncResult<()> {
        let Some(pushed) = &record.payload else {
            return Ok(());
        };
        let Some(mut local) = self.store.read_note(&record.note_id).await? else {
            debug!("Note {} was deleted locally after being pushed", record.note_id);
            return Ok(());
        };
        local.sync = Some(SyncMetadata {
            version: accepted.server_version,
            content_hash: pushed.content_hash(),
            server_sequence: Some(accepted.server_sequence),
        });
        self.store.save_note(&local).await
    }

    /// Best available local copy for a conflict record.
    async fn local_snapshot(&self, record: &ChangeRecord) -> Option<Note> {
        match self.store.read_note(&record.note_id).await {
            Ok(Some(note)) => Some(note),
            Ok(None) => record.payload.clone(),
            Err(e) => {
                warn!("Could not read note {} for conflict snapshot: {}", record.note_id, e);
                record.payload.clone()
            }
        }
    }

    // ── Pull ─────────────────────────────────────────────────────

    /// Returns whether at least one page was fetched.
    async fn pull_phase(&self, cycle: &mut Cycle, report: &mut SyncReport) -> bool {
        self.retry_deferred(cycle, report).await;

        let max_pages = self.config().max_pull_pages.max(1);
        let mut fetched = 0u32;

        loop {
            let cursor = self.config().last_sync_sequence;
            let request = PullRequest {
                since_sequence: cursor,
            };
            let page = match self.call(self.transport.pull(request)).await {
                Ok(page) => page,
                Err(e) => {
                    warn!("Pull since {} failed: {}", cursor, e);
                    report.errors.push(e.to_string());
                    return fetched > 0;
                }
            };
            fetched += 1;
            debug!(
                "Pulled {} change(s) since {} (latest {}, more: {})",
                page.changes.len(),
                cursor,
                page.latest_sequence,
                page.has_more
            );

            for change in &page.changes {
                self.apply_change(change, cycle, report).await;
            }
            self.advance_cursor(page.latest_sequence, report).await;

            if !page.has_more {
                break;
            }
            if page.latest_sequence <= cursor {
                let stalled = SyncError::Protocol(format!(
                    "pull page after {cursor} claims more changes but did not advance"
                ));
                warn!("{}", stalled);
                report.errors.push(stalled.to_string());
                break;
            }
            if fetched >= max_pages {
                info!("Pulled {} page(s); deferring the rest to the next cycle", fetched);
                break;
            }
        }
        true
    }

    /// Re-applies changes whose local write failed in an earlier cycle.
    /// Those that fail again stay deferred and are reported again.
    async fn retry_deferred(&self, cycle: &mut Cycle, report: &mut SyncReport) {
        let mut deferred: Vec<RemoteChange> = lock(&self.deferred)
            .drain()
            .map(|(_, change)| change)
            .collect();
        if deferred.is_empty() {
            return;
        }
        deferred.sort_by_key(|change| change.server_sequence);
        info!("Retrying {} deferred remote change(s)", deferred.len());
        for change in &deferred {
            self.apply_change(change, cycle, report).await;
        }
    }

    /// Applies one remote change or records it as a conflict. A failed local
    /// write defers the change to the next pull.
    async fn apply_change(
        &self,
        change: &RemoteChange,
        cycle: &mut Cycle,
        report: &mut SyncReport,
    ) {
        let note_id = change.note_id;

        if let Some(accepted) = cycle.accepted.get(&note_id) {
            if change.server_sequence == accepted.server_sequence
                || change.version <= accepted.server_version
            {
                debug!("Skipping echo of our own change to note {}", note_id);
                self.settle_deferred(change);
                return;
            }
        }

        let pending_version = match cycle.in_flight.get(&note_id) {
            Some(record) => Some(record.version_at_queue_time),
            None => {
                let queue = lock(&self.queue);
                queue.get(&note_id).map(|record| record.version_at_queue_time)
            }
        };

        match self.detector.classify(pending_version, change) {
            Classification::Apply => match self.apply_remote(change).await {
                Ok(applied) => {
                    if applied {
                        report.pulled += 1;
                    } else {
                        debug!("Note {} already at v{}", note_id, change.version);
                    }
                    self.settle_deferred(change);
                }
                Err(e) => {
                    warn!("Failed to apply remote change to note {}: {}", note_id, e);
                    report.errors.push(format!("note {}: {}", note_id, e));
                    if matches!(e, SyncError::Storage(_)) {
                        self.defer(change);
                    }
                }
            },
            Classification::Conflict => {
                if self.record_pull_conflict(change, pending_version, cycle).await {
                    report.conflicts += 1;
                }
                self.settle_deferred(change);
            }
        }
    }

    /// Keeps `change` for retry unless a newer change to the note is
    /// already deferred.
    fn defer(&self, change: &RemoteChange) {
        let mut deferred = lock(&self.deferred);
        let newest = deferred
            .get(&change.note_id)
            .is_none_or(|held| held.version <= change.version);
        if newest {
            debug!("Deferring remote v{} of note {}", change.version, change.note_id);
            deferred.insert(change.note_id, change.clone());
        }
    }

    /// Drops a deferred change that `change` supersedes.
    fn settle_deferred(&self, change: &RemoteChange) {
        let mut deferred = lock(&self.deferred);
        let superseded = deferred
            .get(&change.note_id)
            .is_some_and(|held| held.version <= change.version);
        if superseded {
            deferred.remove(&change.note_id);
        }
    }

    /// Returns whether a new conflict was recorded.
    async fn record_pull_conflict(
        &self,
        change: &RemoteChange,
        pending_version: Option<u64>,
        cycle: &mut Cycle,
    ) -> bool {
        let note_id = change.note_id;
        if cycle.conflicted.contains(&note_id) {
            lock(&self.conflicts).enrich_from_remote(change);
            return false;
        }
        let already_recorded = lock(&self.conflicts).contains(&note_id, change.version);
        if already_recorded {
            debug!("Conflict for note {} at v{} already recorded", note_id, change.version);
            return false;
        }

        let local_snapshot = match self.store.read_note(&note_id).await {
            Ok(Some(note)) => Some(note),
            Ok(None) | Err(_) => self.pending_payload(&note_id, cycle),
        };
        info!(
            "Conflict on note {}: local change pending (v{}), remote v{}",
            note_id,
            pending_version.unwrap_or_default(),
            change.version
        );
        lock(&self.conflicts).record(Conflict {
            note_id,
            local_version: pending_version.unwrap_or_default(),
            remote_version: change.version,
            local_snapshot,
            remote_snapshot: change.note.clone(),
            remote_operation: Some(change.operation),
            source: ConflictSource::Pull,
            detected_at: Utc::now(),
        });
        cycle.conflicted.insert(note_id);
        true
    }

    fn pending_payload(&self, note_id: &NoteId, cycle: &Cycle) -> Option<Note> {
        let queued = lock(&self.queue)
            .get(note_id)
            .and_then(|record| record.payload.clone());
        queued.or_else(|| {
            cycle
                .in_flight
                .get(note_id)
                .and_then(|record| record.payload.clone())
        })
    }

    /// Writes a remote change to the local store. Returns `false` if the
    /// local copy already reflects it.
    async fn apply_remote(&self, change: &RemoteChange) -> SyncResult<bool> {
        let local = self.store.read_note(&change.note_id).await?;
        let local_meta = local.as_ref().and_then(|note| note.sync.as_ref());

        match change.operation {
            ChangeOperation::Delete => {
                if local_meta.is_some_and(|meta| meta.version > change.version) {
                    return Ok(false);
                }
                self.store.delete_note(&change.note_id).await?;
                debug!("Deleted note {} (remote v{})", change.note_id, change.version);
                Ok(true)
            }
            ChangeOperation::Create | ChangeOperation::Update => {
                let Some(remote) = &change.note else {
                    return Err(SyncError::Protocol(format!(
                        "remote {:?} of note {} carries no snapshot",
                        change.operation, change.note_id
                    )));
                };
                let content_hash = remote.content_hash();
                if let Some(meta) = local_meta {
                    let stale = meta.version > change.version
                        || (meta.version == change.version && meta.content_hash == content_hash);
                    if stale {
                        return Ok(false);
                    }
                }

                let mut note = remote.clone();
                note.id = change.note_id;
                note.sync = Some(SyncMetadata {
                    version: change.version,
                    content_hash,
                    server_sequence: Some(change.server_sequence),
                });
                self.store.save_note(&note).await?;
                debug!("Saved note {} at remote v{}", change.note_id, change.version);
                Ok(true)
            }
        }
    }

    /// Moves the cursor forward (never back) and persists the config.
    async fn advance_cursor(&self, target: u64, report: &mut SyncReport) {
        let snapshot = {
            let mut config = lock(&self.config);
            if target <= config.last_sync_sequence {
                return;
            }
            config.last_sync_sequence = target;
            config.clone()
        };
        debug!("Sync cursor advanced to {}", target);
        if let Err(e) = self.store.save_config(&snapshot).await {
            warn!("Failed to persist sync config: {}", e);
            report.errors.push(e.to_string());
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────

async fn listen_connectivity(
    shared: Weak<Shared>,
    mut events: mpsc::UnboundedReceiver<ConnectivityEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let Some(shared) = shared.upgrade() else {
            break;
        };

        match event {
            ConnectivityEvent::WentOnline => {
                if !shared.config().enabled {
                    continue;
                }
                info!("Back online; starting sync");
                let _cycle = shared.cycle.lock().await;
                shared.run_cycle().await;
            }
            ConnectivityEvent::WentOffline => shared.mark_offline(),
        }
    }
    debug!("Connectivity listener stopped");
}

async fn run_periodic(
    shared: Weak<Shared>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        let Some(shared) = shared.upgrade() else {
            break;
        };
        if !shared.config().enabled || !shared.network.is_online() {
            continue;
        }
        debug!("Periodic sync");
        let _cycle = shared.cycle.lock().await;
        shared.run_cycle().await;
    }
    debug!("Periodic sync stopped");
}
