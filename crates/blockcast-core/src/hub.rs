//! The collaboration hub.
//!
//! The hub is a single actor task that owns the [`Registry`]. It is reached
//! only through a [`HubHandle`], which feeds three queues (register,
//! unregister, broadcast). Events are applied one at a time, so registry
//! mutation needs no lock and every client of a project sees that project's
//! broadcasts in the same order.
//!
//! Backpressure: fan-out never waits on a client. A client whose outbound
//! queue is full is evicted and its queue closed; the other recipients are
//! unaffected.

use crate::client::{ClientHandle, ClientId, ClientInfo, OutboundQueue};
use crate::registry::{EvictionReason, Registry};
use crate::stats::HubStats;
use blockcast_protocol::codec::MAX_FRAME_SIZE;
use blockcast_protocol::{Encoding, FrameCodec, Message};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub actor has stopped.
    #[error("Hub is not running")]
    Closed,
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of each of the hub's three input queues.
    pub event_capacity: usize,
    /// Capacity of each client's outbound queue.
    pub client_queue_capacity: usize,
    /// Wire encoding used for broadcasts.
    pub encoding: Encoding,
    /// Largest encoded message the hub will broadcast.
    pub max_frame_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            event_capacity: 1024,
            client_queue_capacity: 256,
            encoding: Encoding::Json,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

struct Register {
    client: ClientHandle,
    ack: oneshot::Sender<()>,
}

struct Unregister {
    client: ClientInfo,
    ack: oneshot::Sender<()>,
}

struct Broadcast {
    message: Message,
    origin: Option<ClientId>,
}

/// The hub actor. Create with [`Hub::new`] and drive with [`Hub::run`].
pub struct Hub {
    register_rx: mpsc::Receiver<Register>,
    unregister_rx: mpsc::Receiver<Unregister>,
    broadcast_rx: mpsc::Receiver<Broadcast>,
    registry: Registry,
    codec: FrameCodec,
    stats: Arc<HubStats>,
}

/// Cloneable entry point to a running hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<Register>,
    unregister_tx: mpsc::Sender<Unregister>,
    broadcast_tx: mpsc::Sender<Broadcast>,
    stats: Arc<HubStats>,
    client_queue_capacity: usize,
}

impl Hub {
    /// Create a hub and its handle.
    #[must_use]
    pub fn new(config: HubConfig) -> (Self, HubHandle) {
        let capacity = config.event_capacity.max(1);
        let (register_tx, register_rx) = mpsc::channel(capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(capacity);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(capacity);
        let stats = Arc::new(HubStats::new());

        let hub = Self {
            register_rx,
            unregister_rx,
            broadcast_rx,
            registry: Registry::new(),
            codec: FrameCodec::new(config.encoding).with_max_frame_size(config.max_frame_size),
            stats: Arc::clone(&stats),
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
            stats,
            client_queue_capacity: config.client_queue_capacity,
        };
        (hub, handle)
    }

    /// Run the actor loop.
    ///
    /// Returns once every [`HubHandle`] has been dropped. Clients still
    /// registered at that point have their queues closed.
    pub async fn run(mut self) {
        info!(encoding = ?self.codec.encoding(), "Hub started");

        loop {
            tokio::select! {
                Some(Register { client, ack }) = self.register_rx.recv() => {
                    self.on_register(client);
                    // The caller may have stopped waiting.
                    let _ = ack.send(());
                }
                Some(Unregister { client, ack }) = self.unregister_rx.recv() => {
                    self.on_unregister(&client);
                    let _ = ack.send(());
                }
                Some(Broadcast { message, origin }) = self.broadcast_rx.recv() => {
                    self.on_broadcast(&message, origin);
                }
                else => break,
            }
        }

        let remaining = self.registry.drain();
        self.stats.clear_projects();
        info!(clients = remaining.len(), "Hub stopped");
    }

    fn on_register(&mut self, client: ClientHandle) {
        let id = client.id();
        let project_id = client.project_id().to_string();

        match self.registry.insert(client) {
            Ok(count) => {
                self.stats.set_client_count(&project_id, count);
                debug!(project = %project_id, client = %id, total = count, "Client registered");
            }
            Err(_duplicate) => {
                warn!(project = %project_id, client = %id, "Client registered twice, keeping the first");
            }
        }
    }

    fn on_unregister(&mut self, client: &ClientInfo) {
        // Dropping the handle closes the client's queue.
        let Some(_handle) = self.registry.remove(&client.project_id, client.id) else {
            trace!(project = %client.project_id, client = %client.id, "Client already unregistered");
            return;
        };

        let remaining = self.registry.client_count(&client.project_id);
        self.stats.set_client_count(&client.project_id, remaining);
        debug!(
            project = %client.project_id,
            client = %client.id,
            remaining,
            "Client unregistered"
        );
    }

    fn on_broadcast(&mut self, message: &Message, origin: Option<ClientId>) {
        let project_id = message.project_id.as_str();
        if !self.registry.contains_project(project_id) {
            trace!(project = %project_id, "Broadcast to project without clients");
            return;
        }

        let frame = match self.codec.encode(message) {
            Ok(frame) => frame,
            Err(e) => {
                error!(project = %project_id, kind = %message.kind, error = %e, "Failed to encode message, broadcast dropped");
                self.stats.record_encode_failure();
                return;
            }
        };

        let outcome = self.registry.fan_out(project_id, &frame, origin);
        let mut slow = 0;
        for eviction in &outcome.evicted {
            let client = &eviction.client;
            match eviction.reason {
                EvictionReason::SlowConsumer => {
                    slow += 1;
                    warn!(project = %project_id, client = %client.id(), user = %client.user_id(), "Outbound queue full, evicting client");
                }
                EvictionReason::Disconnected => {
                    debug!(project = %project_id, client = %client.id(), "Dropping client with closed queue");
                }
            }
        }

        self.stats.record_broadcast(outcome.delivered, slow);
        self.stats
            .set_client_count(project_id, self.registry.client_count(project_id));
        trace!(project = %project_id, kind = %message.kind, recipients = outcome.delivered, "Broadcast");
    }
}

impl HubHandle {
    /// Create a client bound to `project_id` with the configured queue size.
    ///
    /// The client is not registered until passed to [`HubHandle::register`].
    #[must_use]
    pub fn new_client(
        &self,
        project_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> (ClientHandle, OutboundQueue) {
        ClientHandle::new(project_id, user_id, self.client_queue_capacity)
    }

    /// Register a client. Resolves once the hub has applied it.
    ///
    /// Returns the client's identity, needed to unregister it.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has stopped.
    pub async fn register(&self, client: ClientHandle) -> Result<ClientInfo, HubError> {
        let info = client.info().clone();
        let (ack, done) = oneshot::channel();
        self.register_tx
            .send(Register { client, ack })
            .await
            .map_err(|_| HubError::Closed)?;
        done.await.map_err(|_| HubError::Closed)?;
        Ok(info)
    }

    /// Unregister a client and close its queue. Resolves once applied.
    ///
    /// Unregistering a client that is no longer registered is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has stopped.
    pub async fn unregister(&self, client: &ClientInfo) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        self.unregister_tx
            .send(Unregister {
                client: client.clone(),
                ack,
            })
            .await
            .map_err(|_| HubError::Closed)?;
        done.await.map_err(|_| HubError::Closed)
    }

    /// Publish a message to every client of `message.project_id`.
    ///
    /// Resolves once the message is queued for the hub, not when it has
    /// been delivered.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has stopped.
    pub async fn broadcast_message(&self, message: Message) -> Result<(), HubError> {
        self.send_broadcast(message, None).await
    }

    /// Publish a message on behalf of a client; that client is skipped.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub has stopped.
    pub async fn broadcast_from(&self, origin: ClientId, message: Message) -> Result<(), HubError> {
        self.send_broadcast(message, Some(origin)).await
    }

    async fn send_broadcast(&self, message: Message, origin: Option<ClientId>) -> Result<(), HubError> {
        self.broadcast_tx
            .send(Broadcast { message, origin })
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Live hub statistics.
    #[must_use]
    pub fn stats(&self) -> &Arc<HubStats> {
        &self.stats
    }
}
