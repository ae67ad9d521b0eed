use pretty_assertions::assert_eq;
use quire_sync::network::probe;
use quire_sync::{
    ConnectivityEvent, ManualNetworkMonitor, MockTransport, NetworkMonitor, ReachabilityConfig,
    ReachabilityMonitor,
};
use std::sync::Arc;
use std::time::Duration;

fn fast_probes() -> ReachabilityConfig {
    ReachabilityConfig {
        probe_interval: Duration::from_secs(1),
        probe_timeout: Duration::from_millis(200),
        threshold: 2,
    }
}

// ── Manual monitor ───────────────────────────────────────────────

#[test]
fn manual_monitor_defaults_online() {
    assert!(ManualNetworkMonitor::default().is_online());
    assert!(!ManualNetworkMonitor::new(false).is_online());
}

#[tokio::test]
async fn manual_monitor_emits_only_transitions() {
    let monitor = ManualNetworkMonitor::new(true);
    let mut events = monitor.subscribe();

    assert!(!monitor.set_online(true));
    assert!(monitor.set_online(false));
    assert!(!monitor.set_online(false));
    assert!(monitor.set_online(true));

    assert_eq!(events.recv().await, Some(ConnectivityEvent::WentOffline));
    assert_eq!(events.recv().await, Some(ConnectivityEvent::WentOnline));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn every_subscriber_sees_the_event() {
    let monitor = ManualNetworkMonitor::new(false);
    let mut first = monitor.subscribe();
    let mut second = monitor.subscribe();

    monitor.set_online(true);

    assert_eq!(first.recv().await, Some(ConnectivityEvent::WentOnline));
    assert_eq!(second.recv().await, Some(ConnectivityEvent::WentOnline));
}

#[test]
fn dropped_subscribers_are_pruned() {
    let monitor = ManualNetworkMonitor::new(true);
    let kept = monitor.subscribe();
    drop(monitor.subscribe());

    assert_eq!(monitor.subscriber_count(), 1);
    drop(kept);
    monitor.set_online(false);
    assert_eq!(monitor.subscriber_count(), 0);
}

#[test]
fn event_reports_resulting_state() {
    assert!(ConnectivityEvent::WentOnline.is_online());
    assert!(!ConnectivityEvent::WentOffline.is_online());
}

// ── Probing ──────────────────────────────────────────────────────

#[tokio::test]
async fn probe_follows_server_status() {
    let transport = MockTransport::new();
    assert!(probe(&transport, Duration::from_secs(1)).await);

    transport.set_reachable(false);
    assert!(!probe(&transport, Duration::from_secs(1)).await);
}

#[tokio::test(start_paused = true)]
async fn reachability_flips_after_threshold() {
    let transport = Arc::new(MockTransport::new());
    let monitor = ReachabilityMonitor::new(true);
    let mut events = monitor.subscribe();
    transport.set_reachable(false);

    monitor.start(transport.clone(), fast_probes());
    assert!(monitor.is_running());

    // First probe fires immediately; one failure is not enough.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(monitor.is_online());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!monitor.is_online());
    assert_eq!(events.recv().await, Some(ConnectivityEvent::WentOffline));

    transport.set_reachable(true);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(monitor.is_online());
    assert_eq!(events.recv().await, Some(ConnectivityEvent::WentOnline));

    monitor.stop();
    assert!(!monitor.is_running());
}

#[tokio::test(start_paused = true)]
async fn single_failed_probe_does_not_flip() {
    let transport = Arc::new(MockTransport::new());
    let monitor = ReachabilityMonitor::new(true);
    monitor.start(transport.clone(), fast_probes());

    tokio::time::sleep(Duration::from_millis(500)).await;
    transport.set_reachable(false);
    tokio::time::sleep(Duration::from_secs(1)).await;
    transport.set_reachable(true);
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert!(monitor.is_online());
    assert!(transport.status_check_count() >= 4);
}

#[tokio::test(start_paused = true)]
async fn stopped_monitor_keeps_last_state() {
    let transport = Arc::new(MockTransport::new());
    let monitor = ReachabilityMonitor::new(false);
    monitor.start(transport.clone(), fast_probes());
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(monitor.is_online());

    monitor.stop();
    transport.set_reachable(false);
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(monitor.is_online());
}
