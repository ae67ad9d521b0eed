//! Engine status and the subscription interface that broadcasts it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Where the engine is in its cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Between cycles.
    #[default]
    Idle,
    Syncing,
    /// The last cycle found no connectivity.
    Offline,
    /// Every phase of the last cycle failed.
    Error,
}

/// Snapshot broadcast to status listeners.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    /// Size of the change queue.
    pub pending_changes: usize,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

type Listener = Arc<dyn Fn(&SyncStatus) + Send + Sync>;

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Hold this value to keep receiving status updates; drop it to stop.
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct Subscription {
    bus: Weak<StatusBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

/// Publishes status snapshots to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
#[derive(Default)]
pub struct StatusBus {
    listeners: RwLock<Vec<(usize, Listener)>>,
    next_id: AtomicUsize,
}

impl StatusBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener`. Returns a `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(&SyncStatus) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(listener)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(i, _)| *i != id);
    }

    /// Drops every listener; outstanding `Subscription`s become no-ops.
    pub fn clear(&self) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Calls every listener with `status`.
    pub fn emit(&self, status: &SyncStatus) {
        // Snapshot the list so a listener may subscribe or unsubscribe.
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in listeners {
            listener(status);
        }
    }
}
