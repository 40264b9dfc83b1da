// Scheduler tests run on tokio's paused clock, so intervals elapse instantly
// and deterministically.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hdhr_core::{
    Clock, DeviceEvent, DeviceId, DeviceInfo, DeviceKind, Discoverer, Error, Poller, PollerConfig,
    StatusFetcher,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

// ── Fakes ───────────────────────────────────────────────────────────

struct ScriptedDiscoverer {
    rounds: Mutex<VecDeque<Result<Vec<DeviceInfo>, Error>>>,
}

impl ScriptedDiscoverer {
    fn new(rounds: Vec<Result<Vec<DeviceInfo>, Error>>) -> Arc<Self> {
        Arc::new(Self {
            rounds: Mutex::new(rounds.into()),
        })
    }
}

#[async_trait]
impl Discoverer for ScriptedDiscoverer {
    async fn discover(&self) -> Result<Vec<DeviceInfo>, Error> {
        self.rounds
            .lock()
            .expect("rounds lock")
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

struct ScriptedFetcher {
    responses: Mutex<VecDeque<Result<Value, Error>>>,
    fallback: Result<Value, Error>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedFetcher {
    fn new(responses: Vec<Result<Value, Error>>, fallback: Result<Value, Error>) -> Arc<Self> {
        Self::with_delay(responses, fallback, Duration::ZERO)
    }

    fn with_delay(
        responses: Vec<Result<Value, Error>>,
        fallback: Result<Value, Error>,
        delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            fallback,
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusFetcher for ScriptedFetcher {
    async fn fetch(&self, _device: &DeviceInfo) -> Result<Value, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let next = self.responses.lock().expect("responses lock").pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn device() -> DeviceInfo {
    DeviceInfo {
        id: DeviceId::new("1040ABCD"),
        kind: DeviceKind::Tuner,
        address: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)),
        base_url: "http://192.168.1.20".to_string(),
        tuner_count: Some(2),
    }
}

fn numbered_device(n: u8) -> DeviceInfo {
    DeviceInfo {
        id: DeviceId::new(format!("1040AB{n:02X}")),
        address: IpAddr::V4(Ipv4Addr::new(192, 168, 1, n)),
        base_url: format!("http://192.168.1.{n}"),
        ..device()
    }
}

fn document(frequency: u64) -> Result<Value, Error> {
    Ok(json!({
        "Tuners": [
            { "Resource": 0, "Frequency": frequency },
            { "Resource": 1 }
        ],
        "Recordings": []
    }))
}

fn refused() -> Result<Value, Error> {
    Err(Error::FetchFailed("connection refused".to_string()))
}

fn config() -> PollerConfig {
    PollerConfig {
        poll_interval: Duration::from_secs(1),
        discovery_interval: Duration::from_secs(30),
        failure_threshold: 3,
        fetch_timeout: Duration::from_millis(500),
        discovery_timeout: Duration::from_secs(5),
        shutdown_grace: Duration::from_secs(1),
    }
}

fn start(
    config: PollerConfig,
    discoverer: Arc<ScriptedDiscoverer>,
    fetcher: Arc<ScriptedFetcher>,
) -> (mpsc::Receiver<DeviceEvent>, CancellationToken, JoinHandle<()>) {
    let poller = Poller::new(config, discoverer, fetcher).expect("valid config");
    let (tx, rx) = mpsc::channel(16);
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(poller.run(tx, shutdown.clone()));
    (rx, shutdown, handle)
}

async fn next_event(rx: &mut mpsc::Receiver<DeviceEvent>) -> DeviceEvent {
    timeout(Duration::from_secs(120), rx.recv())
        .await
        .expect("event before timeout")
        .expect("poller still running")
}

async fn assert_quiet(rx: &mut mpsc::Receiver<DeviceEvent>, period: Duration) {
    if let Ok(event) = timeout(period, rx.recv()).await {
        panic!("expected no event, got {event:?}");
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_updates_only_on_state_change() {
    let discoverer = ScriptedDiscoverer::new(vec![Ok(vec![device()])]);
    let fetcher = ScriptedFetcher::new(
        vec![document(195_000_000), document(195_000_000), document(201_000_000)],
        document(201_000_000),
    );
    let (mut rx, shutdown, handle) = start(config(), discoverer, fetcher);

    assert!(matches!(next_event(&mut rx).await, DeviceEvent::DeviceDiscovered { .. }));

    match next_event(&mut rx).await {
        DeviceEvent::DeviceUpdated { snapshot, .. } => {
            assert_eq!(snapshot.tuners[0].frequency(), 195_000_000);
        }
        other => panic!("expected update, got {other:?}"),
    }
    match next_event(&mut rx).await {
        DeviceEvent::DeviceUpdated { device_id, snapshot } => {
            assert_eq!(device_id, DeviceId::new("1040ABCD"));
            assert_eq!(snapshot.tuners[0].frequency(), 201_000_000);
            assert_eq!(snapshot.active_tuners(), 1);
        }
        other => panic!("expected update, got {other:?}"),
    }
    assert_quiet(&mut rx, Duration::from_secs(10)).await;

    shutdown.cancel();
    handle.await.expect("poller task");
}

#[tokio::test(start_paused = true)]
async fn test_lost_once_and_back_only_after_rediscovery() {
    let discoverer = ScriptedDiscoverer::new(vec![Ok(vec![device()]), Ok(vec![device()])]);
    let fetcher = ScriptedFetcher::new(Vec::new(), refused());
    let (mut rx, shutdown, handle) = start(config(), discoverer, Arc::clone(&fetcher));

    assert!(matches!(next_event(&mut rx).await, DeviceEvent::DeviceDiscovered { .. }));
    assert_eq!(
        next_event(&mut rx).await,
        DeviceEvent::DeviceLost {
            device_id: DeviceId::new("1040ABCD")
        }
    );
    assert_quiet(&mut rx, Duration::from_secs(20)).await;
    assert_eq!(fetcher.calls(), 3, "lost device must not be polled");

    match next_event(&mut rx).await {
        DeviceEvent::DeviceDiscovered { device } => assert_eq!(device.id, DeviceId::new("1040ABCD")),
        other => panic!("expected rediscovery, got {other:?}"),
    }
    assert!(matches!(next_event(&mut rx).await, DeviceEvent::DeviceLost { .. }));
    assert_eq!(fetcher.calls(), 6);

    shutdown.cancel();
    handle.await.expect("poller task");
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_keeps_last_snapshot() {
    let discoverer = ScriptedDiscoverer::new(vec![Ok(vec![device()])]);
    let fetcher = ScriptedFetcher::new(
        vec![document(195_000_000), refused(), refused(), document(195_000_000)],
        document(195_000_000),
    );
    let (mut rx, shutdown, handle) = start(config(), discoverer, fetcher);

    assert!(matches!(next_event(&mut rx).await, DeviceEvent::DeviceDiscovered { .. }));
    assert!(matches!(next_event(&mut rx).await, DeviceEvent::DeviceUpdated { .. }));
    assert_quiet(&mut rx, Duration::from_secs(10)).await;

    shutdown.cancel();
    handle.await.expect("poller task");
}

#[tokio::test(start_paused = true)]
async fn test_known_device_is_not_rediscovered() {
    let discoverer = ScriptedDiscoverer::new(vec![
        Ok(vec![device()]),
        Ok(vec![device()]),
        Ok(vec![device()]),
    ]);
    let fetcher = ScriptedFetcher::new(Vec::new(), document(0));
    let (mut rx, shutdown, handle) = start(config(), discoverer, fetcher);

    assert!(matches!(next_event(&mut rx).await, DeviceEvent::DeviceDiscovered { .. }));
    assert!(matches!(next_event(&mut rx).await, DeviceEvent::DeviceUpdated { .. }));
    assert_quiet(&mut rx, Duration::from_secs(75)).await;

    shutdown.cancel();
    handle.await.expect("poller task");
}

#[tokio::test(start_paused = true)]
async fn test_discovery_failure_is_retried_next_cycle() {
    let discoverer = ScriptedDiscoverer::new(vec![
        Err(Error::DiscoveryUnavailable("network is unreachable".to_string())),
        Ok(vec![device()]),
    ]);
    let fetcher = ScriptedFetcher::new(Vec::new(), document(0));
    let (mut rx, shutdown, handle) = start(config(), discoverer, fetcher);

    let started = tokio::time::Instant::now();
    assert!(matches!(next_event(&mut rx).await, DeviceEvent::DeviceDiscovered { .. }));
    assert!(started.elapsed() >= Duration::from_secs(30));

    shutdown.cancel();
    handle.await.expect("poller task");
}

#[tokio::test(start_paused = true)]
async fn test_slow_device_is_never_polled_concurrently() {
    let discoverer = ScriptedDiscoverer::new(vec![Ok(vec![device()])]);
    let fetcher = ScriptedFetcher::with_delay(Vec::new(), document(0), Duration::from_millis(2500));
    let config = PollerConfig {
        fetch_timeout: Duration::from_secs(5),
        ..config()
    };
    let (mut rx, shutdown, handle) = start(config, discoverer, Arc::clone(&fetcher));

    assert!(matches!(next_event(&mut rx).await, DeviceEvent::DeviceDiscovered { .. }));
    assert!(matches!(next_event(&mut rx).await, DeviceEvent::DeviceUpdated { .. }));
    assert_quiet(&mut rx, Duration::from_secs(10)).await;

    assert_eq!(fetcher.max_in_flight.load(Ordering::SeqCst), 1);
    assert!(fetcher.calls() <= 7, "skipped ticks must not queue: {}", fetcher.calls());

    shutdown.cancel();
    handle.await.expect("poller task");
}

#[tokio::test(start_paused = true)]
async fn test_snapshots_are_stamped_by_injected_clock() {
    let stamp = Utc.with_ymd_and_hms(2024, 3, 1, 20, 0, 0).unwrap();
    let discoverer = ScriptedDiscoverer::new(vec![Ok(vec![device()])]);
    let fetcher = ScriptedFetcher::new(Vec::new(), document(195_000_000));
    let poller = Poller::new(config(), discoverer, fetcher)
        .expect("valid config")
        .with_clock(Arc::new(FixedClock(stamp)));
    let (tx, mut rx) = mpsc::channel(16);
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(poller.run(tx, shutdown.clone()));

    assert!(matches!(next_event(&mut rx).await, DeviceEvent::DeviceDiscovered { .. }));
    match next_event(&mut rx).await {
        DeviceEvent::DeviceUpdated { snapshot, .. } => assert_eq!(snapshot.ts, stamp),
        other => panic!("expected update, got {other:?}"),
    }

    shutdown.cancel();
    handle.await.expect("poller task");
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_and_closes_event_stream() {
    let discoverer = ScriptedDiscoverer::new(vec![Ok(vec![device()])]);
    let fetcher = ScriptedFetcher::new(Vec::new(), document(0));
    let (mut rx, shutdown, handle) = start(config(), discoverer, fetcher);

    assert!(matches!(next_event(&mut rx).await, DeviceEvent::DeviceDiscovered { .. }));
    shutdown.cancel();

    timeout(Duration::from_secs(5), handle)
        .await
        .expect("poller stops within grace")
        .expect("poller task");
    while rx.recv().await.is_some() {}
}

#[tokio::test(start_paused = true)]
async fn test_no_poll_starts_when_shutdown_meets_a_due_tick() {
    let discoverer = ScriptedDiscoverer::new(vec![Ok(vec![device()])]);
    let fetcher = ScriptedFetcher::new(Vec::new(), document(195_000_000));
    let (mut rx, shutdown, handle) = start(config(), discoverer, Arc::clone(&fetcher));

    assert!(matches!(next_event(&mut rx).await, DeviceEvent::DeviceDiscovered { .. }));
    assert!(matches!(next_event(&mut rx).await, DeviceEvent::DeviceUpdated { .. }));
    let polled = fetcher.calls();

    // Wake exactly when the next poll tick is due.
    tokio::time::sleep(Duration::from_secs(2)).await;
    let polled_before_cancel = fetcher.calls();
    shutdown.cancel();
    handle.await.expect("poller task");

    assert!(polled_before_cancel >= polled);
    assert_eq!(fetcher.calls(), polled_before_cancel);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_aborts_fetch_still_running_after_grace() {
    let config = PollerConfig {
        fetch_timeout: Duration::from_secs(60),
        ..config()
    };
    let discoverer = ScriptedDiscoverer::new(vec![Ok(vec![device()])]);
    let fetcher = ScriptedFetcher::with_delay(Vec::new(), document(0), Duration::from_secs(30));
    let (mut rx, shutdown, handle) = start(config.clone(), discoverer, Arc::clone(&fetcher));

    assert!(matches!(next_event(&mut rx).await, DeviceEvent::DeviceDiscovered { .. }));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fetcher.in_flight(), 1, "first poll should be running");

    let cancelled_at = Instant::now();
    shutdown.cancel();
    timeout(Duration::from_secs(10), handle)
        .await
        .expect("poller stops once the grace period ends")
        .expect("poller task");

    assert!(cancelled_at.elapsed() <= config.shutdown_grace + Duration::from_millis(100));
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(fetcher.in_flight(), 1, "slow fetch was aborted, not completed");
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_returns_while_consumer_stops_reading() {
    let discoverer = ScriptedDiscoverer::new(vec![Ok((1..=4).map(numbered_device).collect())]);
    let fetcher = ScriptedFetcher::new(Vec::new(), document(195_000_000));
    let poller = Poller::new(config(), discoverer, fetcher).expect("valid config");
    let (tx, rx) = mpsc::channel(1);
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(poller.run(tx, shutdown.clone()));

    tokio::time::sleep(Duration::from_secs(3)).await;
    shutdown.cancel();

    timeout(Duration::from_secs(60), handle)
        .await
        .expect("poller returns even though the event channel is full")
        .expect("poller task");
    assert_eq!(rx.len(), 1);
}

#[test]
fn test_non_positive_interval_fails_to_start() {
    let config = PollerConfig {
        poll_interval: Duration::ZERO,
        ..config()
    };
    let discoverer = ScriptedDiscoverer::new(Vec::new());
    let fetcher = ScriptedFetcher::new(Vec::new(), document(0));

    let result = Poller::new(config, discoverer, fetcher);

    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}
