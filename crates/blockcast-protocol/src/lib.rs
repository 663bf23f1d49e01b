//! # blockcast-protocol
//!
//! Wire envelope for the Blockcast collaboration hub.
//!
//! Every frame exchanged between an editor client and the hub is a flat
//! [`Message`]:
//!
//! ```text
//! {"project_id": "...", "type": "edit", "user_id": "...", "data": {...}, "timestamp": 1700000000}
//! ```
//!
//! `data` is opaque to the hub. Frames are JSON text by default; MessagePack
//! binary frames can be selected with [`Encoding::MessagePack`].
//!
//! ## Example
//!
//! ```rust
//! use blockcast_protocol::{codec, Encoding, Message};
//! use serde_json::json;
//!
//! let message = Message::new("proj1", "edit", "u1", json!({"x": 1}));
//!
//! let encoded = codec::encode(&message, Encoding::Json).unwrap();
//! let decoded = codec::decode(&encoded, Encoding::Json).unwrap();
//! assert_eq!(message, decoded);
//! ```

pub mod codec;
pub mod envelope;

pub use codec::{decode, encode, Encoding, FrameCodec, ProtocolError};
pub use envelope::{message_type, now_millis, Message, ProjectId};
