use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::PollerConfig;
use crate::discovery::{DeviceId, DeviceInfo, Discoverer};
use crate::error::Error;
use crate::event::DeviceEvent;
use crate::fetch::StatusFetcher;
use crate::snapshot::DeviceSnapshot;

const EVENT_CHANNEL_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Fetching,
    Updated,
    Unchanged,
    FetchFailed,
}

/// Poll bookkeeping for one device: the last good snapshot and the run of
/// consecutive failures.
#[derive(Debug)]
pub struct DeviceTracker {
    device: DeviceInfo,
    failure_threshold: u32,
    state: PollState,
    last_outcome: Option<PollState>,
    current: Option<DeviceSnapshot>,
    failures_in_row: u32,
    polls_ok: u64,
    polls_err: u64,
    lost: bool,
}

impl DeviceTracker {
    pub fn new(device: DeviceInfo, failure_threshold: u32) -> Self {
        Self {
            device,
            failure_threshold,
            state: PollState::Idle,
            last_outcome: None,
            current: None,
            failures_in_row: 0,
            polls_ok: 0,
            polls_err: 0,
            lost: false,
        }
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    /// `Idle` or `Fetching`; see [`last_outcome`](Self::last_outcome) for how
    /// the previous poll ended.
    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn last_outcome(&self) -> Option<PollState> {
        self.last_outcome
    }

    /// Last good snapshot. Survives failed polls.
    pub fn current(&self) -> Option<&DeviceSnapshot> {
        self.current.as_ref()
    }

    pub fn failures_in_row(&self) -> u32 {
        self.failures_in_row
    }

    pub fn is_lost(&self) -> bool {
        self.lost
    }

    /// Starts a poll. Returns false while a poll is already in flight or once
    /// the device is lost.
    pub fn begin(&mut self) -> bool {
        if self.lost || self.state == PollState::Fetching {
            return false;
        }
        self.state = PollState::Fetching;
        true
    }

    pub fn complete(&mut self, result: Result<DeviceSnapshot, Error>) -> Option<DeviceEvent> {
        self.state = PollState::Idle;

        match result {
            Ok(snapshot) => {
                self.polls_ok += 1;
                self.failures_in_row = 0;

                let changed = self
                    .current
                    .as_ref()
                    .map_or(true, |previous| !previous.same_state(&snapshot));

                if !changed {
                    self.last_outcome = Some(PollState::Unchanged);
                    self.current = Some(snapshot);
                    return None;
                }

                debug!(
                    device_id = %self.device.id,
                    tuners = snapshot.tuners.len(),
                    active = snapshot.active_tuners(),
                    recordings = snapshot.recordings.len(),
                    "device state changed"
                );
                self.last_outcome = Some(PollState::Updated);
                self.current = Some(snapshot.clone());
                Some(DeviceEvent::DeviceUpdated {
                    device_id: self.device.id.clone(),
                    snapshot,
                })
            }
            Err(err) => {
                self.polls_err += 1;
                self.failures_in_row += 1;
                self.last_outcome = Some(PollState::FetchFailed);
                warn!(
                    device_id = %self.device.id,
                    failures = self.failures_in_row,
                    threshold = self.failure_threshold,
                    error = %err,
                    "status poll failed"
                );

                if self.lost || self.failures_in_row < self.failure_threshold {
                    return None;
                }

                self.lost = true;
                info!(
                    device_id = %self.device.id,
                    polls_ok = self.polls_ok,
                    polls_err = self.polls_err,
                    "device lost"
                );
                Some(DeviceEvent::DeviceLost {
                    device_id: self.device.id.clone(),
                })
            }
        }
    }
}

/// Fetches and parses one status document. Every failure, including a
/// document too broken to read, comes back as [`Error::FetchFailed`].
pub async fn fetch_snapshot(
    fetcher: &dyn StatusFetcher,
    clock: &dyn Clock,
    device: &DeviceInfo,
    fetch_timeout: Duration,
) -> Result<DeviceSnapshot, Error> {
    let document = timeout(fetch_timeout, fetcher.fetch(device))
        .await
        .map_err(|_| {
            Error::FetchFailed(format!("timed out after {}ms", fetch_timeout.as_millis()))
        })??;

    DeviceSnapshot::from_document(&document, device.kind, clock.now())
        .map_err(|err| Error::FetchFailed(format!("unusable status document: {err}")))
}

/// Discovery plus per-device status polling.
///
/// One task runs discovery on its own interval, one task per device polls
/// its status, and the task driving [`run`](Self::run) owns the device set.
pub struct Poller {
    config: PollerConfig,
    discoverer: Arc<dyn Discoverer>,
    fetcher: Arc<dyn StatusFetcher>,
    clock: Arc<dyn Clock>,
}

impl Poller {
    pub fn new(
        config: PollerConfig,
        discoverer: Arc<dyn Discoverer>,
        fetcher: Arc<dyn StatusFetcher>,
    ) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            config,
            discoverer,
            fetcher,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Runs until `shutdown` is cancelled or `events` is closed.
    ///
    /// On the way out in-flight polls get `shutdown_grace` to finish before
    /// their tasks are aborted.
    pub async fn run(self, events: mpsc::Sender<DeviceEvent>, shutdown: CancellationToken) {
        let cancel = shutdown.child_token();
        let (found_tx, mut found_rx) = mpsc::channel::<Vec<DeviceInfo>>(1);
        let (device_tx, mut device_rx) = mpsc::channel::<DeviceEvent>(EVENT_CHANNEL_SIZE);

        let discovery = tokio::spawn(discovery_loop(
            Arc::clone(&self.discoverer),
            self.config.clone(),
            found_tx,
            cancel.clone(),
        ));
        let mut devices: HashMap<DeviceId, JoinHandle<()>> = HashMap::new();

        info!(
            poll_interval_ms = %self.config.poll_interval.as_millis(),
            discovery_interval_ms = %self.config.discovery_interval.as_millis(),
            failure_threshold = self.config.failure_threshold,
            "poller started"
        );

        loop {
            let delivered = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(event) = device_rx.recv() => {
                    if let DeviceEvent::DeviceLost { device_id } = &event {
                        devices.remove(device_id);
                    }
                    forward(&events, event, &cancel).await
                }
                Some(found) = found_rx.recv() => {
                    let mut delivered = true;
                    for device in found {
                        if devices.contains_key(&device.id) {
                            continue;
                        }
                        info!(
                            device_id = %device.id,
                            kind = ?device.kind,
                            base_url = %device.base_url,
                            "device discovered"
                        );
                        let handle = tokio::spawn(poll_device(
                            device.clone(),
                            Arc::clone(&self.fetcher),
                            Arc::clone(&self.clock),
                            self.config.clone(),
                            device_tx.clone(),
                            cancel.clone(),
                        ));
                        devices.insert(device.id.clone(), handle);
                        if !forward(&events, DeviceEvent::DeviceDiscovered { device }, &cancel).await {
                            delivered = false;
                            break;
                        }
                    }
                    delivered
                }
            };

            if !delivered {
                debug!("event receiver dropped or shutdown requested; stopping poller");
                break;
            }
        }

        cancel.cancel();
        drop(device_rx);
        drop(found_rx);

        let deadline = Instant::now() + self.config.shutdown_grace;
        for mut handle in std::iter::once(discovery).chain(devices.into_values()) {
            if timeout_at(deadline, &mut handle).await.is_err() {
                warn!("task still busy after shutdown grace; aborting");
                handle.abort();
            }
        }

        info!("poller stopped");
    }
}

async fn discovery_loop(
    discoverer: Arc<dyn Discoverer>,
    config: PollerConfig,
    found: mpsc::Sender<Vec<DeviceInfo>>,
    cancel: CancellationToken,
) {
    let mut ticker = interval(config.discovery_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = timeout(config.discovery_timeout, discoverer.discover()) => result,
        };

        match result {
            Ok(Ok(devices)) => {
                debug!(count = devices.len(), "discovery cycle complete");
                if found.send(devices).await.is_err() {
                    break;
                }
            }
            Ok(Err(err)) => warn!(error = %err, "discovery failed; retrying next cycle"),
            Err(_) => warn!(
                timeout_ms = %config.discovery_timeout.as_millis(),
                "discovery timed out; retrying next cycle"
            ),
        }
    }
}

async fn poll_device(
    device: DeviceInfo,
    fetcher: Arc<dyn StatusFetcher>,
    clock: Arc<dyn Clock>,
    config: PollerConfig,
    events: mpsc::Sender<DeviceEvent>,
    cancel: CancellationToken,
) {
    let mut tracker = DeviceTracker::new(device, config.failure_threshold);
    let mut ticker = interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if !tracker.begin() {
            continue;
        }

        let result = fetch_snapshot(
            fetcher.as_ref(),
            clock.as_ref(),
            tracker.device(),
            config.fetch_timeout,
        )
        .await;

        let Some(event) = tracker.complete(result) else {
            continue;
        };
        let lost = matches!(event, DeviceEvent::DeviceLost { .. });
        if !forward(&events, event, &cancel).await || lost {
            break;
        }
    }

    debug!(device_id = %tracker.device().id, "device poll task finished");
}

/// Sends `event` unless shutdown wins the race. False when the event was not
/// delivered.
async fn forward(
    events: &mpsc::Sender<DeviceEvent>,
    event: DeviceEvent,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = events.send(event) => sent.is_ok(),
    }
}
