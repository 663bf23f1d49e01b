//! # blockcast-core
//!
//! The real-time collaboration hub.
//!
//! Clients editing the same project are grouped in a registry owned by a
//! single actor task, the [`Hub`]. Connections register and unregister
//! through a [`HubHandle`]; any publisher may broadcast through it.
//!
//! - **Hub** - actor serialising membership changes and fan-out
//! - **Registry** - project id to connected clients
//! - **Client** - the hub's handle on one connection's outbound queue
//! - **Stats** - counters published by the hub for health and metrics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  register / unregister  ┌─────────────┐
//! │   Session   │────────────────────────▶│     Hub     │
//! │             │        broadcast        │             │
//! └─────────────┘                         └─────────────┘
//!        ▲                                       │
//!        │ outbound queue                        ▼
//!        │                                ┌─────────────┐
//!        └────────────────────────────────│  Registry   │
//!                                         └─────────────┘
//! ```

pub mod client;
pub mod hub;
pub mod project;
pub mod registry;
pub mod stats;

pub use blockcast_protocol::{Message, ProjectId};
pub use client::{ClientHandle, ClientId, ClientInfo, OutboundQueue};
pub use hub::{Hub, HubConfig, HubError, HubHandle};
pub use project::{validate_project_id, MAX_PROJECT_ID_LENGTH};
pub use registry::Registry;
pub use stats::{HubStats, ProjectStats, StatsSnapshot};
