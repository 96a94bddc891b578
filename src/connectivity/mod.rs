//! Connectivity Session
//!
//! Wraps the peer channel between the phone and the watch process.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │             ConnectivitySession                │
//! │  send_live ────────────┐                       │
//! │  send_durable ─▶ Outbox ─▶ flush ─┐            │
//! │                        ▼          ▼            │
//! │                 ┌─────────────────────┐        │
//! │                 │  PeerLink (memory,  │◀──────▶ peer
//! │                 │  tcp)               │        │
//! │                 └──────────┬──────────┘        │
//! │   dispatcher ◀─── inbound ─┘                   │
//! │     ├─▶ live handlers                          │
//! │     └─▶ durable handlers                       │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Frames are FIFO within a channel; the two channels are not ordered
//! relative to each other.

pub mod codec;
pub mod memory;
pub mod outbox;
pub mod payload;
pub mod session;
pub mod tcp;

use std::future::Future;
use tokio::sync::mpsc;

use crate::error::Result;

pub use memory::MemoryLink;
pub use outbox::Outbox;
pub use payload::{Channel, Frame, IntoBody, Payload, PayloadBody, SCHEMA_VERSION};
pub use session::{ActivationState, ConnectivitySession, ConnectivityStatus};
pub use tcp::TcpLink;

/// Liveness facts about the companion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkState {
    pub paired: bool,
    pub companion_installed: bool,
    pub reachable: bool,
}

/// A transport able to move frames to the companion process
pub trait PeerLink: Send + Sync + 'static {
    /// Capability probe; an unsupported link never activates
    fn is_supported(&self) -> bool;

    /// Sample pairing, installation and reachability
    fn state(&self) -> impl Future<Output = LinkState> + Send;

    /// Hand one frame to the peer.
    ///
    /// Fails with `NotReachable` when no connection can be made and with
    /// `TransportFailure` when the frame was not acknowledged.
    fn deliver(&self, frame: Frame) -> impl Future<Output = Result<()>> + Send;

    /// Frames arriving from the peer. Can only be taken once.
    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<Frame>>;
}
