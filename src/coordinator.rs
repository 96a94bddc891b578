//! Sync Coordinator
//!
//! Owns the local record collections on one device and keeps them converged
//! with the companion device.
//!
//! ## Flow
//!
//! ```text
//!  publish ──▶ store ──▶ observers
//!     │
//!     └──▶ push: live (retry w/ backoff) ──▶ durable fallback (once)
//!
//!  peer ──▶ session dispatcher ──▶ inbox ──▶ coordinator task
//!                                             ├─ sync_records: LWW merge
//!                                             ├─ request_full_state: reply
//!                                             └─ ping / pong
//! ```

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::{DeviceRole, SyncConfig};
use crate::connectivity::{
    ActivationState, Channel, ConnectivitySession, ConnectivityStatus, IntoBody, Payload,
    PayloadBody, PeerLink, SCHEMA_VERSION,
};
use crate::error::{Result, SyncError};
use crate::merge::{merge_into, DeviceId, MergeReport};
use crate::models::{
    builtin_programs, Collection, RecordSyncState, SyncRecord, TrainingProgram, TrainingSession,
};
use crate::monitor::{HealthMonitor, SyncLogEntry, TransferStats};
use crate::preferences::PreferenceStore;
use crate::store::{SharedRecordStore, StorageLocation};

/// Shortest period any background timer runs at
const MIN_TICK: Duration = Duration::from_millis(100);

struct Inbound {
    channel: Channel,
    payload: Payload,
}

/// Background task, aborted when dropped
pub struct PeriodicTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    fn spawn<F>(name: &'static str, future: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        log::debug!("Starting {} task", name);
        Self {
            name,
            handle: tokio::spawn(future),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Keeps the coordinator's background tasks alive. Dropping it stops them.
pub struct SyncHandle {
    tasks: Vec<PeriodicTask>,
}

impl SyncHandle {
    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|t| !t.is_finished())
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    pub fn stop(self) {
        log::debug!("Stopping {} sync task(s)", self.tasks.len());
    }
}

/// Snapshot for the diagnostics view
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub device_id: DeviceId,
    pub role: DeviceRole,
    pub connectivity: ConnectivityStatus,
    pub stats: TransferStats,
    pub storage: String,
    pub storage_shared: bool,
    pub program_count: usize,
    pub session_count: usize,
    pub log: Vec<SyncLogEntry>,
}

impl std::fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let c = &self.connectivity;
        writeln!(f, "Device:      {} ({})", self.device_id, self.role)?;
        writeln!(f, "Session:     {}", c.activation_state)?;
        writeln!(
            f,
            "Peer:        paired={} installed={} reachable={}",
            c.is_paired, c.is_companion_installed, c.is_reachable
        )?;
        writeln!(f, "Health:      {:.0}%", c.health_score * 100.0)?;
        match self.stats.last_sync {
            Some(at) => writeln!(f, "Last sync:   {}", at.format("%Y-%m-%d %H:%M:%S UTC"))?,
            None => writeln!(f, "Last sync:   never")?,
        }
        writeln!(
            f,
            "Transfers:   {} ok, {} failed ({} in a row)",
            self.stats.successful, self.stats.failed, self.stats.consecutive_failures
        )?;
        writeln!(f, "Outbox:      {} queued", c.outbox_depth)?;
        writeln!(f, "Storage:     {}", self.storage)?;
        write!(
            f,
            "Records:     {} programs, {} sessions",
            self.program_count, self.session_count
        )
    }
}

pub struct SyncCoordinator<L: PeerLink> {
    device_id: DeviceId,
    config: SyncConfig,
    store: SharedRecordStore,
    preferences: PreferenceStore,
    session: Arc<ConnectivitySession<L>>,
    monitor: Arc<HealthMonitor>,
    programs: watch::Sender<Vec<TrainingProgram>>,
    sessions: watch::Sender<Vec<TrainingSession>>,
    record_states: RwLock<HashMap<String, RecordSyncState>>,
    last_stamp: Mutex<DateTime<Utc>>,
    inbox: mpsc::UnboundedSender<Inbound>,
    inbox_rx: Mutex<Option<mpsc::UnboundedReceiver<Inbound>>>,
    started: AtomicBool,
}

impl<L: PeerLink> SyncCoordinator<L> {
    /// Open the store, load the device id and wrap `link` in a session.
    ///
    /// An empty store is seeded with the built-in programs.
    pub fn new(config: SyncConfig, link: L) -> Result<Arc<Self>> {
        let monitor = Arc::new(HealthMonitor::new(&config.monitor));
        let store = SharedRecordStore::open(&config.storage, monitor.clone())?;

        std::fs::create_dir_all(&config.storage.local_dir)?;
        let device_id = DeviceId::load_or_create(&config.storage.device_id_path());
        let session = Arc::new(ConnectivitySession::new(
            link,
            &config.storage.local_dir,
            monitor.clone(),
        ));

        if !store.collection_path(Collection::Programs).exists() {
            let seeds = builtin_programs();
            store.save(&seeds)?;
            monitor.info(format!("Seeded {} built-in programs", seeds.len()));
        }

        let preferences = PreferenceStore::open(store.root());
        let (programs, _) = watch::channel(store.load::<TrainingProgram>());
        let (sessions, _) = watch::channel(store.load::<TrainingSession>());
        let (inbox, inbox_rx) = mpsc::unbounded_channel();

        log::info!(
            "Sync coordinator ready: device {} ({}), storage {}",
            device_id,
            config.role,
            store.location()
        );

        Ok(Arc::new(Self {
            device_id,
            config,
            store,
            preferences,
            session,
            monitor,
            programs,
            sessions,
            record_states: RwLock::new(HashMap::new()),
            last_stamp: Mutex::new(DateTime::<Utc>::default()),
            inbox,
            inbox_rx: Mutex::new(Some(inbox_rx)),
            started: AtomicBool::new(false),
        }))
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<ConnectivitySession<L>> {
        &self.session
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    /// Preferences kept in the same directory as the collections
    pub fn preferences(&self) -> &PreferenceStore {
        &self.preferences
    }

    pub fn storage_location(&self) -> &StorageLocation {
        self.store.location()
    }

    /// Activate the session and spawn the inbox, status, pull and ping tasks
    pub fn start(self: &Arc<Self>) -> SyncHandle {
        if self.started.swap(true, Ordering::SeqCst) {
            log::warn!("Sync coordinator already started");
            return SyncHandle { tasks: Vec::new() };
        }

        // handlers go in before activation so no early frame is dropped
        for channel in [Channel::Live, Channel::Durable] {
            let inbox = self.inbox.clone();
            let forward = move |payload: Payload| {
                if inbox.send(Inbound { channel, payload }).is_err() {
                    log::debug!("Coordinator inbox closed; dropping {} payload", channel);
                }
            };
            match channel {
                Channel::Live => self.session.on_receive_live(forward),
                Channel::Durable => self.session.on_receive_durable(forward),
            }
        }

        let mut tasks = Vec::new();
        if let Some(mut inbox_rx) = self.inbox_rx.lock().take() {
            let this = Arc::clone(self);
            tasks.push(PeriodicTask::spawn("inbox", async move {
                while let Some(Inbound { channel, payload }) = inbox_rx.recv().await {
                    this.handle_payload(channel, payload);
                }
            }));
        }

        if self.session.activate() == ActivationState::NotActivated {
            return SyncHandle { tasks };
        }

        let this = Arc::clone(self);
        tasks.push(PeriodicTask::spawn("status", async move {
            let mut was_reachable = false;
            let mut ticker = ticker(this.config.connectivity.status_poll_interval());
            loop {
                ticker.tick().await;
                let status = this.session.current_status().await;
                if status.is_reachable && !was_reachable {
                    this.monitor.info("Peer is reachable");
                    this.session.flush_outbox().await;
                } else if !status.is_reachable && was_reachable {
                    this.monitor.warn("Peer is no longer reachable");
                } else if status.is_reachable && status.outbox_depth > 0 {
                    this.session.flush_outbox().await;
                }
                was_reachable = status.is_reachable;
            }
        }));

        let this = Arc::clone(self);
        tasks.push(PeriodicTask::spawn("pull", async move {
            let mut ticker = ticker(this.config.connectivity.pull_interval());
            loop {
                ticker.tick().await;
                this.pull_from_peer().await;
            }
        }));

        let this = Arc::clone(self);
        tasks.push(PeriodicTask::spawn("ping", async move {
            let mut ticker = ticker(this.config.connectivity.ping_interval());
            // skip the immediate first tick; the pull already probes the peer
            ticker.tick().await;
            loop {
                ticker.tick().await;
                this.ping_peer().await;
            }
        }));

        SyncHandle { tasks }
    }

    /// Next stamp: now, but strictly after `floor` and after anything this
    /// coordinator stamped before.
    fn next_stamp(&self, floor: DateTime<Utc>) -> DateTime<Utc> {
        let tick = chrono::Duration::microseconds(1);
        let mut last = self.last_stamp.lock();
        let stamp = Utc::now().max(floor.max(*last) + tick);
        *last = stamp;
        stamp
    }

    /// Stamp, store and push a locally created or edited record.
    ///
    /// Returns once the store write completes; the push runs in the
    /// background. Must be called from within a tokio runtime.
    pub fn publish<T: IntoBody>(self: &Arc<Self>, mut record: T) -> Result<T> {
        // stamp under the store's writer lock so a concurrent publish of the
        // same id cannot slip an older stamp in after ours
        let stamp = self.store.modify::<T, _, _>(|records| {
            let existing = records.iter_mut().find(|r| r.id() == record.id());
            let mut floor = record.last_modified();
            if let Some(stored) = existing.as_deref() {
                floor = floor.max(stored.last_modified());
            }
            let stamp = self.next_stamp(floor);
            record.set_last_modified(stamp);
            match existing {
                Some(slot) => *slot = record.clone(),
                None => records.push(record.clone()),
            }
            stamp
        })?;

        let id = record.id().to_string();
        self.set_state(&id, RecordSyncState::LocalOnly);
        self.notify(T::COLLECTION);
        log::debug!("Saved {} record {} at {}", T::COLLECTION, id, stamp);

        let body = if T::PUSH_FULL_COLLECTION {
            T::into_body(self.store.load::<T>())
        } else {
            T::into_body(vec![record.clone()])
        };

        self.set_state(&id, RecordSyncState::PendingPush);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.push(body, vec![id]).await;
        });

        Ok(record)
    }

    /// Live send with backoff, then exactly one durable hand-off.
    ///
    /// Returns true if the live channel took it.
    async fn push(&self, body: PayloadBody, ids: Vec<String>) -> bool {
        let label = body.label();
        let payload = Payload::new(self.device_id.clone(), body);
        let retry = &self.config.retry;
        let max_attempts = retry.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.session.send_live(payload.clone()).await {
                Ok(()) => {
                    self.monitor.record_success();
                    for id in &ids {
                        self.set_state(id, RecordSyncState::Pushed);
                    }
                    self.monitor.info(format!("Sent {} to peer", label));
                    return true;
                }
                Err(e) if e.is_unavailable() => {
                    self.monitor
                        .info(format!("{}; queueing {} for later", e, label));
                    break;
                }
                Err(e) => {
                    self.monitor.record_failure(&e.to_string());
                    if attempt >= max_attempts {
                        self.monitor.warn(format!(
                            "Live send of {} failed after {} attempts: {}",
                            label, attempt, e
                        ));
                        break;
                    }
                    let delay = retry.backoff(attempt);
                    self.monitor.warn(format!(
                        "Live send of {} failed (attempt {}/{}): {}; retrying in {:?}",
                        label, attempt, max_attempts, e, delay
                    ));
                    tokio::time::sleep(delay).await;
                }
            }
        }

        if let Err(e) = self.session.send_durable(payload) {
            self.monitor
                .error(format!("Failed to queue {} for durable delivery: {}", label, e));
        }
        false
    }

    /// Merge records received from the peer into the local collection
    pub fn on_peer_data<T: SyncRecord>(&self, incoming: Vec<T>) -> Result<MergeReport> {
        let received = incoming.len();
        let report = self
            .store
            .modify::<T, _, _>(|local| merge_into(local, incoming))?;

        for id in &report.inserted {
            self.set_state(id, RecordSyncState::ReceivedFromPeer);
        }
        for id in &report.updated {
            self.set_state(id, RecordSyncState::Merged);
        }
        for id in &report.stale {
            log::debug!("{}", SyncError::StaleWrite { id: id.clone() });
        }
        if report.changed() {
            self.notify(T::COLLECTION);
        }

        self.monitor.info(format!(
            "Received {} {} from peer: {}",
            received,
            T::COLLECTION,
            report
        ));
        Ok(report)
    }

    fn handle_payload(self: &Arc<Self>, channel: Channel, payload: Payload) {
        if !payload.is_supported() {
            let err = SyncError::UnsupportedSchema {
                found: payload.schema_version,
                supported: SCHEMA_VERSION,
            };
            self.monitor.warn(format!(
                "Dropping {} from {}: {}",
                payload.body.label(),
                payload.origin,
                err
            ));
            return;
        }

        log::debug!(
            "Handling {} from {} over {} channel",
            payload.body.label(),
            payload.origin,
            channel
        );

        match payload.body {
            PayloadBody::SyncRecords {
                training_programs,
                training_sessions,
            } => {
                let mut stored = true;
                if let Some(programs) = training_programs {
                    stored &= self.merge_logged(programs);
                }
                if let Some(sessions) = training_sessions {
                    stored &= self.merge_logged(sessions);
                }
                if stored {
                    self.monitor.record_success();
                }
            }
            PayloadBody::RequestFullState => {
                let body = PayloadBody::SyncRecords {
                    training_programs: Some(self.programs()),
                    training_sessions: Some(self.sessions()),
                };
                self.monitor.info("Peer requested full state");
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    this.push(body, Vec::new()).await;
                });
            }
            PayloadBody::Ping => {
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    let pong = Payload::new(this.device_id.clone(), PayloadBody::Pong);
                    if let Err(e) = this.session.send_live(pong).await {
                        log::debug!("Could not answer ping: {}", e);
                    }
                });
            }
            PayloadBody::Pong => {
                self.monitor.record_success();
                log::debug!("Peer {} is alive", payload.origin);
            }
        }
    }

    /// False when the merge could not be written; counted as a failed transfer
    fn merge_logged<T: SyncRecord>(&self, incoming: Vec<T>) -> bool {
        match self.on_peer_data(incoming) {
            Ok(_) => true,
            Err(e) => {
                let message = format!("Failed to store {} from peer: {}", T::COLLECTION, e);
                self.monitor.record_failure(&message);
                self.monitor.error(message);
                false
            }
        }
    }

    /// Ask the peer for its full state. No-op returning false when the peer
    /// cannot be reached; nothing is scheduled for later.
    pub async fn pull_from_peer(&self) -> bool {
        let request = Payload::new(self.device_id.clone(), PayloadBody::RequestFullState);
        match self.session.send_live(request).await {
            Ok(()) => {
                log::debug!("Requested full state from peer");
                true
            }
            Err(e) if e.is_unavailable() => {
                log::debug!("Skipping pull: {}", e);
                false
            }
            Err(e) => {
                self.monitor.record_failure(&e.to_string());
                self.monitor.warn(format!("Pull request failed: {}", e));
                false
            }
        }
    }

    /// Liveness probe; the answer arrives as a pong
    pub async fn ping_peer(&self) -> bool {
        let ping = Payload::new(self.device_id.clone(), PayloadBody::Ping);
        match self.session.send_live(ping).await {
            Ok(()) => true,
            Err(e) => {
                if !e.is_unavailable() {
                    self.monitor.record_failure(&e.to_string());
                }
                log::debug!("Ping not sent: {}", e);
                false
            }
        }
    }

    /// Delete every local session record
    pub fn purge_sessions(&self) -> Result<usize> {
        let removed = self.store.purge::<TrainingSession>()?;
        self.notify(Collection::Sessions);
        self.monitor
            .warn(format!("Purged {} session(s) from local storage", removed));
        Ok(removed)
    }

    pub fn programs(&self) -> Vec<TrainingProgram> {
        self.store.load()
    }

    pub fn sessions(&self) -> Vec<TrainingSession> {
        self.store.load()
    }

    pub fn subscribe_programs(&self) -> watch::Receiver<Vec<TrainingProgram>> {
        self.programs.subscribe()
    }

    pub fn subscribe_sessions(&self) -> watch::Receiver<Vec<TrainingSession>> {
        self.sessions.subscribe()
    }

    pub fn record_state(&self, id: &str) -> Option<RecordSyncState> {
        self.record_states.read().get(id).copied()
    }

    fn set_state(&self, id: &str, state: RecordSyncState) {
        self.record_states.write().insert(id.to_string(), state);
    }

    fn notify(&self, collection: Collection) {
        match collection {
            Collection::Programs => {
                self.programs.send_replace(self.store.load());
            }
            Collection::Sessions => {
                self.sessions.send_replace(self.store.load());
            }
        }
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        let connectivity = self.session.current_status().await;
        let location = self.store.location();
        let program_count = self.programs.borrow().len();
        let session_count = self.sessions.borrow().len();

        Diagnostics {
            device_id: self.device_id.clone(),
            role: self.config.role,
            connectivity,
            stats: self.monitor.stats(),
            storage: location.to_string(),
            storage_shared: location.is_shared(),
            program_count,
            session_count,
            log: self.monitor.entries(),
        }
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period.max(MIN_TICK));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
