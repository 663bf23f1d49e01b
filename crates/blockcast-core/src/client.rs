//! Client handles.
//!
//! A client is one live connection bound to one project. Its outbound queue
//! is split in two: the connection keeps the receiving half and drains it
//! onto the network, the hub keeps the [`ClientHandle`] holding the only
//! sending half. Dropping the handle closes the queue, so the queue can only
//! ever be closed once.

use blockcast_protocol::ProjectId;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Receiving half of a client's outbound queue.
pub type OutboundQueue = mpsc::Receiver<Bytes>;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique client identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    /// Allocate the next identifier.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric value.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Identity of a connected client. Immutable for the connection's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    /// Client identifier.
    pub id: ClientId,
    /// Project the connection is bound to.
    pub project_id: ProjectId,
    /// User behind the connection.
    pub user_id: String,
}

/// Result of offering a frame to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Frame queued.
    Queued,
    /// Queue at capacity; the consumer is too slow.
    Full,
    /// Receiving half already dropped.
    Gone,
}

/// The hub's reference to a client.
///
/// Deliberately not `Clone`: there is exactly one sender per queue.
#[derive(Debug)]
pub struct ClientHandle {
    info: ClientInfo,
    queue: mpsc::Sender<Bytes>,
}

impl ClientHandle {
    /// Create a client and its outbound queue.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(
        project_id: impl Into<ProjectId>,
        user_id: impl Into<String>,
        capacity: usize,
    ) -> (Self, OutboundQueue) {
        let (queue, rx) = mpsc::channel(capacity.max(1));
        let info = ClientInfo {
            id: ClientId::next(),
            project_id: project_id.into(),
            user_id: user_id.into(),
        };
        (Self { info, queue }, rx)
    }

    /// A second handle sharing `other`'s identity, for exercising duplicate
    /// registration.
    #[cfg(test)]
    pub(crate) fn impersonate(other: &ClientHandle, capacity: usize) -> (Self, OutboundQueue) {
        let (queue, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                info: other.info.clone(),
                queue,
            },
            rx,
        )
    }

    /// Client identity.
    #[must_use]
    pub fn info(&self) -> &ClientInfo {
        &self.info
    }

    /// Client identifier.
    #[must_use]
    pub fn id(&self) -> ClientId {
        self.info.id
    }

    /// Project the client belongs to.
    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.info.project_id
    }

    /// User behind the client.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.info.user_id
    }

    /// Offer a frame without waiting.
    pub fn try_deliver(&self, frame: Bytes) -> Delivery {
        match self.queue.try_send(frame) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Gone,
        }
    }
}
