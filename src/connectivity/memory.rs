//! In-process link joining two sessions directly.
//!
//! Both ends share one [`LinkState`], so toggling reachability on either end
//! affects the pair. Transport failures can be injected per end.

use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::payload::Frame;
use super::{LinkState, PeerLink};
use crate::error::{Result, SyncError};

pub struct MemoryLink {
    supported: bool,
    state: Arc<RwLock<LinkState>>,
    outgoing: Option<mpsc::UnboundedSender<Frame>>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
    fail_next: AtomicU32,
    delivered: AtomicU64,
}

impl MemoryLink {
    /// Two connected ends, paired, installed and reachable
    pub fn pair() -> (MemoryLink, MemoryLink) {
        let state = Arc::new(RwLock::new(LinkState {
            paired: true,
            companion_installed: true,
            reachable: true,
        }));
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        let a = MemoryLink {
            supported: true,
            state: state.clone(),
            outgoing: Some(b_tx),
            inbound: Mutex::new(Some(a_rx)),
            fail_next: AtomicU32::new(0),
            delivered: AtomicU64::new(0),
        };
        let b = MemoryLink {
            supported: true,
            state,
            outgoing: Some(a_tx),
            inbound: Mutex::new(Some(b_rx)),
            fail_next: AtomicU32::new(0),
            delivered: AtomicU64::new(0),
        };
        (a, b)
    }

    /// A platform without peer connectivity
    pub fn unsupported() -> MemoryLink {
        MemoryLink {
            supported: false,
            state: Arc::new(RwLock::new(LinkState::default())),
            outgoing: None,
            inbound: Mutex::new(None),
            fail_next: AtomicU32::new(0),
            delivered: AtomicU64::new(0),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.write().reachable = reachable;
    }

    pub fn set_paired(&self, paired: bool) {
        self.state.write().paired = paired;
    }

    pub fn set_companion_installed(&self, installed: bool) {
        self.state.write().companion_installed = installed;
    }

    /// Make the next `n` deliveries from this end fail in transit
    pub fn fail_next_sends(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Frames this end handed to the peer
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }

    fn try_deliver(&self, frame: Frame) -> Result<()> {
        if !self.state.read().reachable {
            return Err(SyncError::NotReachable);
        }

        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SyncError::TransportFailure("injected failure".into()));
        }

        let tx = self.outgoing.as_ref().ok_or(SyncError::NotReachable)?;
        tx.send(frame)
            .map_err(|_| SyncError::TransportFailure("peer end dropped".into()))?;
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl PeerLink for MemoryLink {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn state(&self) -> impl Future<Output = LinkState> + Send {
        let state = *self.state.read();
        async move { state }
    }

    fn deliver(&self, frame: Frame) -> impl Future<Output = Result<()>> + Send {
        let result = self.try_deliver(frame);
        async move { result }
    }

    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<Frame>> {
        self.inbound.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::payload::{Channel, Payload, PayloadBody};
    use crate::merge::DeviceId;

    fn ping() -> Frame {
        Frame {
            channel: Channel::Live,
            payload: Payload::new(DeviceId::new(), PayloadBody::Ping),
        }
    }

    #[tokio::test]
    async fn test_pair_delivers_to_other_end() {
        let (a, b) = MemoryLink::pair();
        let mut rx = b.take_inbound().unwrap();
        assert!(b.take_inbound().is_none());

        a.deliver(ping()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().payload.body, PayloadBody::Ping);
        assert_eq!(a.delivered(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_and_injected_failures() {
        let (a, _b) = MemoryLink::pair();

        a.set_reachable(false);
        assert!(matches!(a.deliver(ping()).await, Err(SyncError::NotReachable)));

        a.set_reachable(true);
        a.fail_next_sends(1);
        assert!(matches!(
            a.deliver(ping()).await,
            Err(SyncError::TransportFailure(_))
        ));
        assert!(a.deliver(ping()).await.is_ok());
    }

    #[tokio::test]
    async fn test_state_is_shared() {
        let (a, b) = MemoryLink::pair();
        b.set_paired(false);
        assert!(!a.state().await.paired);
    }

    #[test]
    fn test_unsupported_link() {
        let link = MemoryLink::unsupported();
        assert!(!link.is_supported());
        assert!(link.take_inbound().is_none());
    }
}
