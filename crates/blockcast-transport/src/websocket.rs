//! WebSocket transport implementation.
//!
//! Wraps the two halves of an upgraded axum [`WebSocket`].

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use blockcast_protocol::Encoding;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, trace, warn};

use crate::traits::{FrameSink, FrameSource, Incoming, TransportError};

/// Split an upgraded socket into sink and source halves.
///
/// Outgoing frames are sent as text when `encoding` is textual and as
/// binary otherwise.
#[must_use]
pub fn split(socket: WebSocket, encoding: Encoding) -> (WebSocketSink, WebSocketSource) {
    let (sink, stream) = socket.split();
    (
        WebSocketSink {
            sink,
            encoding,
            closed: false,
        },
        WebSocketSource { stream },
    )
}

/// Read half of a WebSocket connection.
pub struct WebSocketSource {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn recv(&mut self) -> Result<Option<Incoming>, TransportError> {
        match self.stream.next().await {
            Some(Ok(Message::Text(text))) => Ok(Some(Incoming::Frame(Bytes::from(text)))),
            Some(Ok(Message::Binary(data))) => Ok(Some(Incoming::Frame(Bytes::from(data)))),
            // Pings are answered by the WebSocket layer itself.
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                trace!("Heartbeat received");
                Ok(Some(Incoming::Heartbeat))
            }
            Some(Ok(Message::Close(_))) => {
                debug!("Received close frame");
                Ok(None)
            }
            Some(Err(e)) => {
                warn!(error = %e, "WebSocket error");
                Err(TransportError::ReceiveFailed(e.to_string()))
            }
            None => {
                debug!("WebSocket stream ended");
                Ok(None)
            }
        }
    }
}

/// Write half of a WebSocket connection.
pub struct WebSocketSink {
    sink: SplitSink<WebSocket, Message>,
    encoding: Encoding,
    closed: bool,
}

impl WebSocketSink {
    fn to_message(&self, frame: Bytes) -> Result<Message, TransportError> {
        if self.encoding.is_binary() {
            return Ok(Message::Binary(frame.to_vec()));
        }
        String::from_utf8(frame.to_vec())
            .map(Message::Text)
            .map_err(|e| TransportError::Other(format!("Text frame is not UTF-8: {}", e)))
    }
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        let message = self.to_message(frame)?;
        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        self.sink
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(()); // Already closed
        }
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {}", e)))
    }
}
