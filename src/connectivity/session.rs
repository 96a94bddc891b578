use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::outbox::Outbox;
use super::payload::{Channel, Frame, Payload};
use super::PeerLink;
use crate::error::{Result, SyncError};
use crate::monitor::HealthMonitor;

/// Callback invoked for each inbound payload
pub type PayloadHandler = Box<dyn Fn(Payload) + Send + Sync>;

/// Durable ids remembered for de-duplication
const SEEN_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationState {
    /// Not yet activated, or the platform has no peer connectivity
    NotActivated,
    Activated,
}

impl std::fmt::Display for ActivationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivationState::NotActivated => f.write_str("not activated"),
            ActivationState::Activated => f.write_str("activated"),
        }
    }
}

/// Point-in-time view of the peer channel
#[derive(Debug, Clone, Serialize)]
pub struct ConnectivityStatus {
    pub activation_state: ActivationState,
    pub is_paired: bool,
    pub is_reachable: bool,
    pub is_companion_installed: bool,
    pub health_score: f64,
    pub outbox_depth: usize,
}

#[derive(Default)]
struct SeenIds {
    order: VecDeque<Uuid>,
    set: HashSet<Uuid>,
}

impl SeenIds {
    /// Returns false if `id` was already seen
    fn insert(&mut self, id: Uuid) -> bool {
        if !self.set.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > SEEN_CAPACITY {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
        true
    }
}

#[derive(Default)]
struct Handlers {
    live: RwLock<Vec<PayloadHandler>>,
    durable: RwLock<Vec<PayloadHandler>>,
    seen: Mutex<SeenIds>,
}

impl Handlers {
    fn dispatch(&self, frame: Frame) {
        let Frame { channel, payload } = frame;
        match channel {
            Channel::Live => {
                for handler in self.live.read().iter() {
                    handler(payload.clone());
                }
            }
            Channel::Durable => {
                if !self.seen.lock().insert(payload.id) {
                    log::debug!("Ignoring redelivered durable payload {}", payload.id);
                    return;
                }
                for handler in self.durable.read().iter() {
                    handler(payload.clone());
                }
            }
        }
    }
}

/// Session over one [`PeerLink`]: live sends, a persisted durable outbox and
/// inbound dispatch to registered handlers.
pub struct ConnectivitySession<L: PeerLink> {
    link: Arc<L>,
    state: RwLock<ActivationState>,
    outbox: Outbox,
    flush_lock: tokio::sync::Mutex<()>,
    handlers: Arc<Handlers>,
    monitor: Arc<HealthMonitor>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    durable_enqueued: AtomicU64,
}

impl<L: PeerLink> ConnectivitySession<L> {
    /// The outbox is kept in `outbox_dir`
    pub fn new(link: L, outbox_dir: &Path, monitor: Arc<HealthMonitor>) -> Self {
        Self {
            link: Arc::new(link),
            state: RwLock::new(ActivationState::NotActivated),
            outbox: Outbox::open(outbox_dir),
            flush_lock: tokio::sync::Mutex::new(()),
            handlers: Arc::new(Handlers::default()),
            monitor,
            dispatcher: Mutex::new(None),
            durable_enqueued: AtomicU64::new(0),
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn activation_state(&self) -> ActivationState {
        *self.state.read()
    }

    fn is_activated(&self) -> bool {
        self.activation_state() == ActivationState::Activated
    }

    /// Activate the session. Idempotent.
    ///
    /// Must be called from within a tokio runtime.
    pub fn activate(self: &Arc<Self>) -> ActivationState {
        if !self.link.is_supported() {
            self.monitor
                .warn("Peer connectivity is not supported on this device");
            return ActivationState::NotActivated;
        }

        {
            let mut state = self.state.write();
            if *state == ActivationState::Activated {
                return ActivationState::Activated;
            }
            *state = ActivationState::Activated;
        }

        if let Some(mut inbound) = self.link.take_inbound() {
            let handlers = self.handlers.clone();
            let task = tokio::spawn(async move {
                while let Some(frame) = inbound.recv().await {
                    handlers.dispatch(frame);
                }
                log::debug!("Inbound peer channel closed");
            });
            *self.dispatcher.lock() = Some(task);
        }

        self.monitor.info("Connectivity session activated");
        self.spawn_flush();
        ActivationState::Activated
    }

    pub fn on_receive_live<F>(&self, handler: F)
    where
        F: Fn(Payload) + Send + Sync + 'static,
    {
        self.handlers.live.write().push(Box::new(handler));
    }

    pub fn on_receive_durable<F>(&self, handler: F)
    where
        F: Fn(Payload) + Send + Sync + 'static,
    {
        self.handlers.durable.write().push(Box::new(handler));
    }

    /// Send over the live channel. Fails fast when the peer is away.
    pub async fn send_live(&self, payload: Payload) -> Result<()> {
        if !self.is_activated() {
            return Err(SyncError::NotActivated);
        }
        if !self.link.state().await.reachable {
            return Err(SyncError::NotReachable);
        }

        self.link
            .deliver(Frame {
                channel: Channel::Live,
                payload,
            })
            .await
    }

    /// Queue for eventual delivery. `Ok` means persisted in the outbox.
    pub fn send_durable(self: &Arc<Self>, payload: Payload) -> Result<()> {
        let label = payload.body.label();
        self.outbox.enqueue(payload)?;
        self.durable_enqueued.fetch_add(1, Ordering::SeqCst);
        log::debug!(
            "Queued {} for durable delivery ({} pending)",
            label,
            self.outbox.len()
        );

        if self.is_activated() {
            self.spawn_flush();
        }
        Ok(())
    }

    fn spawn_flush(self: &Arc<Self>) {
        if self.outbox.is_empty() {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.flush_outbox().await;
        });
    }

    /// Deliver queued payloads in order while the peer accepts them.
    ///
    /// Returns the number delivered. Concurrent calls run one at a time.
    pub async fn flush_outbox(&self) -> usize {
        let _guard = self.flush_lock.lock().await;
        if !self.is_activated() {
            return 0;
        }

        let mut delivered = 0;
        while let Some(payload) = self.outbox.front() {
            if !self.link.state().await.reachable {
                break;
            }

            let id = payload.id;
            let frame = Frame {
                channel: Channel::Durable,
                payload,
            };
            match self.link.deliver(frame).await {
                Ok(()) => {
                    self.monitor.record_success();
                    delivered += 1;
                    if let Err(e) = self.outbox.acknowledge(id) {
                        self.monitor
                            .error(format!("Failed to persist outbox acknowledgement: {}", e));
                        break;
                    }
                }
                Err(e) => {
                    self.monitor.record_failure(&e.to_string());
                    log::debug!("Outbox flush stopped: {}", e);
                    break;
                }
            }
        }

        if delivered > 0 {
            self.monitor
                .info(format!("Delivered {} queued transfer(s)", delivered));
        }
        delivered
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    /// Payloads ever accepted by `send_durable` in this process
    pub fn durable_enqueued(&self) -> u64 {
        self.durable_enqueued.load(Ordering::SeqCst)
    }

    pub async fn current_status(&self) -> ConnectivityStatus {
        let link = self.link.state().await;
        ConnectivityStatus {
            activation_state: self.activation_state(),
            is_paired: link.paired,
            is_reachable: link.reachable,
            is_companion_installed: link.companion_installed,
            health_score: self.monitor.health_score(),
            outbox_depth: self.outbox.len(),
        }
    }
}

impl<L: PeerLink> Drop for ConnectivitySession<L> {
    fn drop(&mut self) {
        if let Some(task) = self.dispatcher.lock().take() {
            task.abort();
        }
    }
}
