//! Connectivity tracking.
//!
//! A [`NetworkMonitor`] reports whether the server is reachable and emits one
//! [`ConnectivityEvent`] per transition. Suppressing flapping is the
//! monitor's job; the engine trusts every event it receives.
//!
//! Implementations:
//! - [`ManualNetworkMonitor`] - driven by the host (OS connectivity callbacks)
//! - [`ReachabilityMonitor`] - probes the server through the transport

use crate::transport::SyncTransport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// A connectivity transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectivityEvent {
    WentOnline,
    WentOffline,
}

impl ConnectivityEvent {
    /// The connectivity after the transition.
    pub fn is_online(self) -> bool {
        matches!(self, Self::WentOnline)
    }
}

/// Source of connectivity state for the engine.
pub trait NetworkMonitor: Send + Sync {
    fn is_online(&self) -> bool;

    /// Returns a receiver for all subsequent transitions.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectivityEvent>;
}

/// Connectivity set explicitly by the host.
pub struct ManualNetworkMonitor {
    online: AtomicBool,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ConnectivityEvent>>>,
}

impl ManualNetworkMonitor {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Records the current connectivity. Emits an event only if it differs
    /// from the previous value; returns whether it did.
    pub fn set_online(&self, online: bool) -> bool {
        // Held across the swap so subscribers see transitions in order.
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        if self.online.swap(online, Ordering::SeqCst) == online {
            return false;
        }

        let event = if online {
            ConnectivityEvent::WentOnline
        } else {
            ConnectivityEvent::WentOffline
        };
        info!("Connectivity changed: {:?}", event);
        subscribers.retain(|tx| tx.send(event).is_ok());
        true
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}

impl Default for ManualNetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkMonitor for ManualNetworkMonitor {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectivityEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }
}

/// Configuration for [`ReachabilityMonitor`] probing.
#[derive(Debug, Clone)]
pub struct ReachabilityConfig {
    /// Time between probes.
    pub probe_interval: Duration,
    /// A probe taking longer than this counts as unreachable.
    pub probe_timeout: Duration,
    /// Consecutive disagreeing probes needed before the state flips.
    pub threshold: u32,
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(15),
            probe_timeout: Duration::from_secs(5),
            threshold: 2,
        }
    }
}

/// Derives connectivity from periodic `check_status` probes.
pub struct ReachabilityMonitor {
    state: Arc<ManualNetworkMonitor>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReachabilityMonitor {
    pub fn new(initially_online: bool) -> Self {
        Self {
            state: Arc::new(ManualNetworkMonitor::new(initially_online)),
            task: Mutex::new(None),
        }
    }

    /// Starts probing `transport`, replacing any earlier probe loop.
    /// Must be called from within a tokio runtime.
    pub fn start(&self, transport: Arc<dyn SyncTransport>, config: ReachabilityConfig) {
        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            let threshold = config.threshold.max(1);
            let mut ticker = tokio::time::interval(config.probe_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut streak = 0u32;

            loop {
                ticker.tick().await;
                let reachable = probe(transport.as_ref(), config.probe_timeout).await;
                if reachable == state.is_online() {
                    streak = 0;
                    continue;
                }
                streak += 1;
                debug!("Probe disagrees with current state ({}/{})", streak, threshold);
                if streak >= threshold {
                    state.set_online(reachable);
                    streak = 0;
                }
            }
        });

        if let Some(previous) = self.lock_task().replace(handle) {
            previous.abort();
        }
    }

    /// Stops probing. Connectivity stays at its last value.
    pub fn stop(&self) {
        if let Some(handle) = self.lock_task().take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_task()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn lock_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ReachabilityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl NetworkMonitor for ReachabilityMonitor {
    fn is_online(&self) -> bool {
        self.state.is_online()
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectivityEvent> {
        self.state.subscribe()
    }
}

/// One reachability probe: reachable iff the server answers `ok` in time.
pub async fn probe(transport: &dyn SyncTransport, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, transport.check_status()).await {
        Ok(Ok(status)) => status.ok,
        Ok(Err(e)) => {
            debug!("Reachability probe failed: {}", e);
            false
        }
        Err(_) => {
            debug!("Reachability probe timed out");
            false
        }
    }
}
