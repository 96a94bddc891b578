//! TCP link between two processes on a network.
//!
//! Each delivery opens a short-lived connection, writes one length-prefixed
//! frame and waits for the one-byte acknowledgement. The listener side
//! accepts any number of frames per connection.

use parking_lot::Mutex;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::codec::{read_frame, write_frame, ACK};
use super::payload::Frame;
use super::{LinkState, PeerLink};
use crate::error::{Result, SyncError};

pub struct TcpLink {
    local_addr: SocketAddr,
    peer: Option<SocketAddr>,
    timeout: Duration,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
    /// Companion has acknowledged at least one frame
    handshaken: Arc<AtomicBool>,
    accept_task: JoinHandle<()>,
}

impl TcpLink {
    /// Bind the listener and start accepting frames
    pub async fn bind(listen: SocketAddr, peer: Option<SocketAddr>, timeout: Duration) -> Result<Self> {
        let listener = TcpListener::bind(listen).await?;
        let local_addr = listener.local_addr()?;
        log::info!("Peer link listening on {}", local_addr);

        let (tx, rx) = mpsc::unbounded_channel();
        let accept_task = tokio::spawn(accept_loop(listener, tx));

        Ok(Self {
            local_addr,
            peer,
            timeout,
            inbound: Mutex::new(Some(rx)),
            handshaken: Arc::new(AtomicBool::new(false)),
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    async fn connect(peer: Option<SocketAddr>, timeout: Duration) -> Result<TcpStream> {
        let addr = peer.ok_or(SyncError::NotReachable)?;
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => {
                log::debug!("Connect to {} failed: {}", addr, e);
                Err(SyncError::NotReachable)
            }
            Err(_) => Err(SyncError::NotReachable),
        }
    }

    async fn send_frame(
        peer: Option<SocketAddr>,
        timeout: Duration,
        frame: Frame,
    ) -> Result<()> {
        let mut stream = Self::connect(peer, timeout).await?;

        let exchange = async {
            write_frame(&mut stream, &frame).await?;
            let mut ack = [0u8; 1];
            stream.read_exact(&mut ack).await?;
            if ack[0] != ACK {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "unexpected acknowledgement byte",
                ));
            }
            Ok::<(), std::io::Error>(())
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SyncError::TransportFailure(e.to_string())),
            Err(_) => Err(SyncError::TransportFailure("timed out waiting for ack".into())),
        }
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener, tx: mpsc::UnboundedSender<Frame>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                log::trace!("Accepted peer connection from {}", addr);
                tokio::spawn(read_connection(stream, tx.clone()));
            }
            Err(e) => {
                log::warn!("Accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn read_connection(mut stream: TcpStream, tx: mpsc::UnboundedSender<Frame>) {
    loop {
        match read_frame::<Frame, _>(&mut stream).await {
            Ok(Some(frame)) => {
                if tx.send(frame).is_err() {
                    break;
                }
                if stream.write_all(&[ACK]).await.is_err() {
                    break;
                }
            }
            // probe connections close without sending anything
            Ok(None) => break,
            Err(e) => {
                log::warn!("Dropping malformed peer frame: {}", e);
                break;
            }
        }
    }
}

impl PeerLink for TcpLink {
    fn is_supported(&self) -> bool {
        true
    }

    fn state(&self) -> impl Future<Output = LinkState> + Send {
        let peer = self.peer;
        let timeout = self.timeout;
        let handshaken = self.handshaken.clone();
        async move {
            let reachable = Self::connect(peer, timeout).await.is_ok();
            LinkState {
                paired: peer.is_some(),
                companion_installed: reachable || handshaken.load(Ordering::Relaxed),
                reachable,
            }
        }
    }

    fn deliver(&self, frame: Frame) -> impl Future<Output = Result<()>> + Send {
        let peer = self.peer;
        let timeout = self.timeout;
        let handshaken = self.handshaken.clone();
        async move {
            Self::send_frame(peer, timeout, frame).await?;
            handshaken.store(true, Ordering::Relaxed);
            Ok(())
        }
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

    fn any_port() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[tokio::test]
    async fn test_frames_cross_tcp() {
        let receiver = TcpLink::bind(any_port(), None, Duration::from_secs(2))
            .await
            .unwrap();
        let sender = TcpLink::bind(any_port(), Some(receiver.local_addr()), Duration::from_secs(2))
            .await
            .unwrap();
        let mut inbound = receiver.take_inbound().unwrap();

        let state = sender.state().await;
        assert!(state.paired && state.reachable);

        let frame = Frame {
            channel: Channel::Durable,
            payload: Payload::new(DeviceId::new(), PayloadBody::RequestFullState),
        };
        sender.deliver(frame.clone()).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(2), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, frame);
    }

    #[tokio::test]
    async fn test_unpaired_link_is_unreachable() {
        let link = TcpLink::bind(any_port(), None, Duration::from_millis(200))
            .await
            .unwrap();
        let state = link.state().await;
        assert!(!state.paired);
        assert!(!state.reachable);

        let frame = Frame {
            channel: Channel::Live,
            payload: Payload::new(DeviceId::new(), PayloadBody::Ping),
        };
        assert!(matches!(link.deliver(frame).await, Err(SyncError::NotReachable)));
    }

    #[tokio::test]
    async fn test_closed_peer_is_unreachable() {
        let peer_addr = {
            let gone = TcpLink::bind(any_port(), None, Duration::from_millis(200))
                .await
                .unwrap();
            gone.local_addr()
        };
        // the listener task is aborted on drop; give it a moment to release the port
        tokio::time::sleep(Duration::from_millis(50)).await;

        let link = TcpLink::bind(any_port(), Some(peer_addr), Duration::from_millis(200))
            .await
            .unwrap();
        assert!(!link.state().await.reachable);
    }
}
