//! In-memory transport.
//!
//! [`pair`] returns the server-side halves of a connection together with a
//! [`MemoryPeer`] that plays the remote client. Used by session tests and by
//! in-process publishers that want a socket-shaped connection.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::traits::{FrameSink, FrameSource, Incoming, TransportError};

/// What the remote peer observes on its side of the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A frame written by the server.
    Frame(Bytes),
    /// A ping written by the server.
    Ping,
    /// The server closed the connection.
    Closed,
}

/// Create a connected in-memory pair.
#[must_use]
pub fn pair() -> (MemoryPeer, MemorySink, MemorySource) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    (
        MemoryPeer {
            inbound: Some(inbound_tx),
            outbound: outbound_rx,
        },
        MemorySink {
            outbound: outbound_tx,
            closed: false,
        },
        MemorySource { inbound: inbound_rx },
    )
}

/// The remote end of an in-memory connection.
pub struct MemoryPeer {
    inbound: Option<mpsc::UnboundedSender<Result<Incoming, TransportError>>>,
    outbound: mpsc::UnboundedReceiver<PeerEvent>,
}

impl MemoryPeer {
    fn push(&self, item: Result<Incoming, TransportError>) -> Result<(), TransportError> {
        self.inbound
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?
            .send(item)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Send a frame to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if either side has gone away.
    pub fn send(&self, frame: impl Into<Bytes>) -> Result<(), TransportError> {
        self.push(Ok(Incoming::Frame(frame.into())))
    }

    /// Send a keepalive to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if either side has gone away.
    pub fn heartbeat(&self) -> Result<(), TransportError> {
        self.push(Ok(Incoming::Heartbeat))
    }

    /// Make the server's next read fail.
    ///
    /// # Errors
    ///
    /// Returns an error if either side has gone away.
    pub fn fail(&self, reason: impl Into<String>) -> Result<(), TransportError> {
        self.push(Err(TransportError::ReceiveFailed(reason.into())))
    }

    /// Hang up: the server reads an orderly close.
    pub fn disconnect(&mut self) {
        self.inbound = None;
    }

    /// Stop reading, so that further server writes fail.
    pub fn stop_reading(&mut self) {
        self.outbound.close();
    }

    /// Wait for the next thing the server wrote.
    ///
    /// Returns `None` once the server side has been dropped.
    pub async fn next_event(&mut self) -> Option<PeerEvent> {
        self.outbound.recv().await
    }

    /// Take whatever the server has written so far without waiting.
    pub fn try_next_event(&mut self) -> Option<PeerEvent> {
        self.outbound.try_recv().ok()
    }
}

/// Read half of an in-memory connection.
pub struct MemorySource {
    inbound: mpsc::UnboundedReceiver<Result<Incoming, TransportError>>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Result<Option<Incoming>, TransportError> {
        self.inbound.recv().await.transpose()
    }
}

/// Write half of an in-memory connection.
pub struct MemorySink {
    outbound: mpsc::UnboundedSender<PeerEvent>,
    closed: bool,
}

impl MemorySink {
    fn emit(&self, event: PeerEvent) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbound
            .send(event)
            .map_err(|_| TransportError::SendFailed("peer stopped reading".into()))
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        self.emit(PeerEvent::Frame(frame))
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.emit(PeerEvent::Ping)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        // The peer may already be gone; closing is still complete.
        let _ = self.outbound.send(PeerEvent::Closed);
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_peer_to_server() {
        let (mut peer, _sink, mut source) = pair();

        peer.send(&b"hello"[..]).unwrap();
        peer.heartbeat().unwrap();
        peer.fail("boom").unwrap();
        peer.disconnect();

        assert_eq!(
            source.recv().await.unwrap(),
            Some(Incoming::Frame(Bytes::from_static(b"hello")))
        );
        assert_eq!(source.recv().await.unwrap(), Some(Incoming::Heartbeat));
        assert!(matches!(
            source.recv().await,
            Err(TransportError::ReceiveFailed(_))
        ));
        assert_eq!(source.recv().await.unwrap(), None);
        assert!(peer.send(&b"late"[..]).is_err());
    }

    #[tokio::test]
    async fn test_server_to_peer() {
        let (mut peer, mut sink, _source) = pair();

        sink.send(Bytes::from_static(b"frame")).await.unwrap();
        sink.ping().await.unwrap();
        sink.close().await.unwrap();
        sink.close().await.unwrap();

        assert_eq!(
            peer.next_event().await,
            Some(PeerEvent::Frame(Bytes::from_static(b"frame")))
        );
        assert_eq!(peer.next_event().await, Some(PeerEvent::Ping));
        assert_eq!(peer.next_event().await, Some(PeerEvent::Closed));
        assert_eq!(peer.try_next_event(), None);
        assert!(matches!(
            sink.send(Bytes::new()).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_write_fails_after_peer_stops_reading() {
        let (mut peer, mut sink, _source) = pair();
        peer.stop_reading();

        assert!(matches!(
            sink.send(Bytes::from_static(b"x")).await,
            Err(TransportError::SendFailed(_))
        ));
    }
}
