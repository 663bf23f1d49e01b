//! # blockcast-transport
//!
//! Connection abstraction for the Blockcast collaboration hub.
//!
//! A connection is split into a [`FrameSource`] (read half) and a
//! [`FrameSink`] (write half) so that a session can drive its inbound and
//! outbound loops independently:
//!
//! - **WebSocket** - axum upgrade, used by the server
//! - **Memory** - channel-backed pair for tests and in-process peers
//!
//! ```rust,ignore
//! use blockcast_transport::{FrameSource, Incoming};
//!
//! async fn drain(mut source: impl FrameSource) {
//!     while let Ok(Some(Incoming::Frame(bytes))) = source.recv().await {
//!         // Decode and publish
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{FrameSink, FrameSource, Incoming, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketSink, WebSocketSource};
