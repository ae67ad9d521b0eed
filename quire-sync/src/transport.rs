//! Transport layer abstraction.
//!
//! Defines the trait the engine uses to reach the sync server, so the engine
//! works with any wire protocol (HTTP, WebSocket, in-process test double).

use crate::error::SyncResult;
use crate::protocol::{PullRequest, PullResponse, PushRequest, PushResponse, ServerStatus};
use async_trait::async_trait;

/// The remote end of sync.
///
/// Returning `Err` means the call as a whole was rejected (unreachable
/// server, timeout, auth failure). The engine treats that as retryable and
/// requeues the batch; per-entry outcomes belong in the `Ok` response.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Sends a batch of local changes.
    async fn push(&self, request: PushRequest) -> SyncResult<PushResponse>;

    /// Fetches one page of remote changes after `request.since_sequence`.
    async fn pull(&self, request: PullRequest) -> SyncResult<PullResponse>;

    /// Cheap reachability probe.
    async fn check_status(&self) -> SyncResult<ServerStatus>;
}

/// A scriptable in-memory transport for testing.
pub mod mock {
    use super::*;
    use crate::error::SyncError;
    use crate::protocol::{
        AcceptedChange, PushConflict, PushEntryError, RemoteChange,
    };
    use quire_types::{Note, NoteId};
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Mutex, MutexGuard};
    use std::time::Duration;

    #[derive(Default)]
    struct MockState {
        pushes: Vec<PushRequest>,
        pulls: Vec<PullRequest>,
        status_checks: usize,
        next_sequence: u64,
        push_failure: Option<String>,
        pull_failure: Option<String>,
        reachable: bool,
        conflicts: HashMap<NoteId, (u64, Option<Note>)>,
        entry_errors: HashMap<NoteId, String>,
        pages: VecDeque<PullResponse>,
        log: Vec<RemoteChange>,
        page_size: usize,
        push_delay: Option<Duration>,
    }

    impl MockState {
        fn page_from_log(&self, since: u64) -> PullResponse {
            let newer: Vec<&RemoteChange> = self
                .log
                .iter()
                .filter(|c| c.server_sequence > since)
                .collect();
            let changes: Vec<RemoteChange> =
                newer.iter().take(self.page_size).map(|c| (*c).clone()).collect();
            PullResponse {
                has_more: newer.len() > changes.len(),
                latest_sequence: changes.last().map_or(since, |c| c.server_sequence),
                changes,
                server_time: chrono::Utc::now().to_rfc3339(),
            }
        }
    }

    /// Accepts every pushed change unless told otherwise, and serves pull
    /// pages from a script. Once the script runs out, pulls are answered
    /// from the published change log, filtered by the request cursor.
    ///
    /// Accepted changes get `server_version = version_at_queue_time + 1` and
    /// consecutive server sequences starting at 1 (see
    /// [`MockTransport::set_next_sequence`]).
    pub struct MockTransport {
        state: Mutex<MockState>,
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                state: Mutex::new(MockState {
                    next_sequence: 1,
                    reachable: true,
                    page_size: 100,
                    ..Default::default()
                }),
            }
        }

        fn state(&self) -> MutexGuard<'_, MockState> {
            self.state.lock().unwrap_or_else(|e| e.into_inner())
        }

        /// Number of push calls received (including failed ones).
        pub fn push_count(&self) -> usize {
            self.state().pushes.len()
        }

        /// Number of pull calls received (including failed ones).
        pub fn pull_count(&self) -> usize {
            self.state().pulls.len()
        }

        pub fn status_check_count(&self) -> usize {
            self.state().status_checks
        }

        /// Every push request received, in order.
        pub fn pushed(&self) -> Vec<PushRequest> {
            self.state().pushes.clone()
        }

        /// Every pull request received, in order.
        pub fn pulled(&self) -> Vec<PullRequest> {
            self.state().pulls.clone()
        }

        /// Sequence number the next accepted change will receive.
        pub fn set_next_sequence(&self, sequence: u64) {
            self.state().next_sequence = sequence;
        }

        /// Makes every push reject with `message` until cleared with `None`.
        pub fn fail_pushes(&self, message: Option<&str>) {
            self.state().push_failure = message.map(str::to_string);
        }

        /// Makes every pull reject with `message` until cleared with `None`.
        pub fn fail_pulls(&self, message: Option<&str>) {
            self.state().pull_failure = message.map(str::to_string);
        }

        /// Controls the outcome of `check_status`.
        pub fn set_reachable(&self, reachable: bool) {
            self.state().reachable = reachable;
        }

        /// Reports pushes of `note_id` as conflicting with the given server copy.
        pub fn conflict_on(&self, note_id: NoteId, server_version: u64, server_note: Option<Note>) {
            self.state()
                .conflicts
                .insert(note_id, (server_version, server_note));
        }

        /// Reports pushes of `note_id` as a per-entry server error.
        pub fn entry_error_on(&self, note_id: NoteId, message: &str) {
            self.state()
                .entry_errors
                .insert(note_id, message.to_string());
        }

        /// Delays every push, to hold a cycle in flight.
        pub fn set_push_delay(&self, delay: Duration) {
            self.state().push_delay = Some(delay);
        }

        /// Queues a pull page. `latest_sequence` is the highest sequence in
        /// `changes`, or the requester's cursor for an empty page.
        pub fn queue_pull_page(&self, changes: Vec<RemoteChange>, has_more: bool) {
            let latest_sequence = changes.iter().map(|c| c.server_sequence).max().unwrap_or(0);
            self.queue_pull_response(PullResponse {
                changes,
                has_more,
                latest_sequence,
                server_time: chrono::Utc::now().to_rfc3339(),
            });
        }

        /// Appends changes to the server log served once scripted pages run out.
        pub fn publish(&self, changes: Vec<RemoteChange>) {
            let mut state = self.state();
            state.log.extend(changes);
            state.log.sort_by_key(|c| c.server_sequence);
        }

        /// Maximum number of log entries per pull page.
        pub fn set_page_size(&self, page_size: usize) {
            self.state().page_size = page_size.max(1);
        }

        /// Queues a fully specified pull page.
        pub fn queue_pull_response(&self, response: PullResponse) {
            self.state().pages.push_back(response);
        }

        fn answer_push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
            let mut guard = self.state();
            let state = &mut *guard;
            state.pushes.push(request.clone());
            if let Some(message) = &state.push_failure {
                return Err(SyncError::Network(message.clone()));
            }

            let mut response = PushResponse::default();
            for change in &request.changes {
                if let Some((server_version, server_note)) = state.conflicts.get(&change.note_id) {
                    response.conflicts.push(PushConflict {
                        note_id: change.note_id,
                        server_version: *server_version,
                        server_note: server_note.clone(),
                    });
                } else if let Some(message) = state.entry_errors.get(&change.note_id) {
                    response.errors.push(PushEntryError {
                        note_id: change.note_id,
                        message: message.clone(),
                    });
                } else {
                    let server_sequence = state.next_sequence;
                    state.next_sequence += 1;
                    response.accepted.push(AcceptedChange {
                        note_id: change.note_id,
                        server_version: change.version_at_queue_time + 1,
                        server_sequence,
                    });
                }
            }
            Ok(response)
        }
    }

    #[async_trait]
    impl SyncTransport for MockTransport {
        async fn push(&self, request: PushRequest) -> SyncResult<PushResponse> {
            let delay = self.state().push_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.answer_push(&request)
        }

        async fn pull(&self, request: PullRequest) -> SyncResult<PullResponse> {
            let mut state = self.state();
            state.pulls.push(request);
            if let Some(message) = &state.pull_failure {
                return Err(SyncError::Network(message.clone()));
            }
            let mut page = match state.pages.pop_front() {
                Some(page) => page,
                None => state.page_from_log(request.since_sequence),
            };
            page.latest_sequence = page.latest_sequence.max(request.since_sequence);
            Ok(page)
        }

        async fn check_status(&self) -> SyncResult<ServerStatus> {
            let mut state = self.state();
            state.status_checks += 1;
            if !state.reachable {
                return Err(SyncError::Network("server unreachable".into()));
            }
            Ok(ServerStatus {
                ok: true,
                server_time: chrono::Utc::now().to_rfc3339(),
            })
        }
    }
}
