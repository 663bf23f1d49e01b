//! Client sessions.
//!
//! A session bridges one connection to the hub. It registers a client, then
//! runs two loops side by side:
//!
//! - **inbound**: reads frames, stamps them with the connection's project
//!   and user, and broadcasts them to the rest of the project;
//! - **outbound**: drains the client's queue onto the connection and sends
//!   pings.
//!
//! Whichever loop stops first cancels the other. The client is then
//! unregistered once and the connection closed.

use crate::config::Config;
use crate::metrics;
use blockcast_core::{ClientInfo, HubHandle, Message, OutboundQueue};
use blockcast_protocol::FrameCodec;
use blockcast_transport::{FrameSink, FrameSource, Incoming};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::{interval_at, timeout, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Per-connection settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Codec for inbound frames.
    pub codec: FrameCodec,
    /// Ping interval.
    pub heartbeat_interval: Duration,
    /// Inbound silence tolerated before the session ends.
    pub heartbeat_timeout: Duration,
    /// Broadcast `join` and `leave` for this connection's user.
    pub presence_events: bool,
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        Self {
            codec: FrameCodec::new(config.hub.encoding)
                .with_max_frame_size(config.limits.max_message_size),
            heartbeat_interval: config.heartbeat_interval(),
            heartbeat_timeout: config.heartbeat_timeout(),
            presence_events: config.hub.presence_events,
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionEnd {
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("read failed: {0}")]
    ReadFailed(String),
    #[error("undecodable frame: {0}")]
    DecodeFailed(String),
    #[error("no inbound traffic within the heartbeat timeout")]
    HeartbeatTimeout,
    #[error("outbound queue closed")]
    QueueClosed,
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("hub stopped")]
    HubStopped,
}

/// Run a session for a connection to `project_id` until it ends.
pub async fn run<S, K>(
    hub: HubHandle,
    config: SessionConfig,
    project_id: String,
    user_id: String,
    mut source: S,
    mut sink: K,
) -> SessionEnd
where
    S: FrameSource,
    K: FrameSink,
{
    let (client, queue) = hub.new_client(project_id, user_id);
    let info = match hub.register(client).await {
        Ok(info) => info,
        Err(e) => {
            warn!(error = %e, "Could not register client");
            let _ = sink.close().await;
            return SessionEnd::HubStopped;
        }
    };
    debug!(project = %info.project_id, client = %info.id, user = %info.user_id, "Session started");

    if config.presence_events {
        let join = Message::join(info.project_id.as_str(), info.user_id.as_str());
        if let Err(e) = hub.broadcast_from(info.id, join).await {
            warn!(client = %info.id, error = %e, "Could not announce join");
        }
    }

    let end = tokio::select! {
        end = inbound(&hub, &config, &info, &mut source) => end,
        end = outbound(&config, queue, &mut sink) => end,
    };

    if let Err(e) = hub.unregister(&info).await {
        warn!(client = %info.id, error = %e, "Could not unregister client");
    }
    if config.presence_events && end != SessionEnd::HubStopped {
        let leave = Message::leave(info.project_id.as_str(), info.user_id.as_str());
        if let Err(e) = hub.broadcast_message(leave).await {
            warn!(client = %info.id, error = %e, "Could not announce leave");
        }
    }
    if let Err(e) = sink.close().await {
        trace!(client = %info.id, error = %e, "Close failed");
    }

    debug!(project = %info.project_id, client = %info.id, reason = %end, "Session ended");
    end
}

async fn inbound<S: FrameSource>(
    hub: &HubHandle,
    config: &SessionConfig,
    info: &ClientInfo,
    source: &mut S,
) -> SessionEnd {
    loop {
        let Ok(next) = timeout(config.heartbeat_timeout, source.recv()).await else {
            metrics::record_error("heartbeat_timeout");
            return SessionEnd::HeartbeatTimeout;
        };

        match next {
            Ok(Some(Incoming::Frame(data))) => {
                let start = Instant::now();
                metrics::record_message(data.len(), "inbound");

                let message = match config.codec.decode(&data) {
                    Ok(message) => message.with_identity(&info.project_id, &info.user_id),
                    Err(e) => {
                        warn!(client = %info.id, error = %e, "Undecodable frame");
                        metrics::record_error("decode");
                        return SessionEnd::DecodeFailed(e.to_string());
                    }
                };
                trace!(client = %info.id, kind = %message.kind, "Inbound message");

                if hub.broadcast_from(info.id, message).await.is_err() {
                    return SessionEnd::HubStopped;
                }
                metrics::record_latency(start.elapsed().as_secs_f64());
            }
            Ok(Some(Incoming::Heartbeat)) => {
                trace!(client = %info.id, "Heartbeat");
            }
            Ok(None) => return SessionEnd::PeerClosed,
            Err(e) => {
                metrics::record_error("read");
                return SessionEnd::ReadFailed(e.to_string());
            }
        }
    }
}

async fn outbound<K: FrameSink>(
    config: &SessionConfig,
    mut queue: OutboundQueue,
    sink: &mut K,
) -> SessionEnd {
    let period = config.heartbeat_interval;
    let mut heartbeat = interval_at(tokio::time::Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = queue.recv() => {
                let Some(frame) = frame else {
                    return SessionEnd::QueueClosed;
                };
                let len = frame.len();
                if let Err(e) = sink.send(frame).await {
                    metrics::record_error("write");
                    return SessionEnd::WriteFailed(e.to_string());
                }
                metrics::record_message(len, "outbound");
            }
            _ = heartbeat.tick() => {
                if let Err(e) = sink.ping().await {
                    metrics::record_error("write");
                    return SessionEnd::WriteFailed(e.to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockcast_core::{ClientHandle, Hub, HubConfig};
    use blockcast_protocol::{decode, message_type, Encoding};
    use blockcast_transport::memory::{self, MemoryPeer, PeerEvent};
    use bytes::Bytes;
    use serde_json::json;
    use tokio::task::JoinHandle;

    const WAIT: Duration = Duration::from_secs(5);

    fn test_config() -> SessionConfig {
        SessionConfig {
            codec: FrameCodec::new(Encoding::Json),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            presence_events: false,
        }
    }

    fn start_hub() -> HubHandle {
        let (hub, handle) = Hub::new(HubConfig::default());
        tokio::spawn(hub.run());
        handle
    }

    fn connect(
        hub: &HubHandle,
        config: &SessionConfig,
        project: &str,
        user: &str,
    ) -> (MemoryPeer, JoinHandle<SessionEnd>) {
        let (peer, sink, source) = memory::pair();
        let task = tokio::spawn(run(
            hub.clone(),
            config.clone(),
            project.to_string(),
            user.to_string(),
            source,
            sink,
        ));
        (peer, task)
    }

    async fn wait_for_clients(hub: &HubHandle, project: &str, count: usize) {
        timeout(WAIT, async {
            while hub.stats().client_count(project) != count {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("client count not reached");
    }

    async fn next_message(peer: &mut MemoryPeer) -> Message {
        match timeout(WAIT, peer.next_event()).await.unwrap() {
            Some(PeerEvent::Frame(frame)) => decode(&frame, Encoding::Json).unwrap(),
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    async fn wait_closed(peer: &mut MemoryPeer) {
        loop {
            match timeout(WAIT, peer.next_event()).await.unwrap() {
                Some(PeerEvent::Closed) => return,
                Some(_) => continue,
                None => panic!("sink dropped without close"),
            }
        }
    }

    #[tokio::test]
    async fn test_inbound_is_stamped_and_not_echoed() {
        let hub = start_hub();
        let config = test_config();
        let (mut alice, _a) = connect(&hub, &config, "proj1", "alice");
        let (mut bob, _b) = connect(&hub, &config, "proj1", "bob");
        wait_for_clients(&hub, "proj1", 2).await;

        bob.send(r#"{"type":"edit","project_id":"other","user_id":"mallory","data":{"block":1}}"#)
            .unwrap();

        let received = next_message(&mut alice).await;
        assert_eq!(received.project_id, "proj1");
        assert_eq!(received.user_id, "bob");
        assert_eq!(received.kind, message_type::EDIT);
        assert_eq!(received.data, json!({"block": 1}));
        assert!(received.timestamp > 0);

        let marker = Message::new("proj1", "marker", "server", json!(null));
        hub.broadcast_message(marker).await.unwrap();
        assert_eq!(next_message(&mut bob).await.kind, "marker");
    }

    #[tokio::test]
    async fn test_client_timestamp_is_kept() {
        let hub = start_hub();
        let config = test_config();
        let (mut alice, _a) = connect(&hub, &config, "proj1", "alice");
        let (bob, _b) = connect(&hub, &config, "proj1", "bob");
        wait_for_clients(&hub, "proj1", 2).await;

        bob.send(r#"{"type":"cursor","timestamp":42}"#).unwrap();
        let received = next_message(&mut alice).await;
        assert_eq!(received.timestamp, 42);
        assert_eq!(received.data, json!(null));
    }

    #[tokio::test]
    async fn test_other_projects_not_reached() {
        let hub = start_hub();
        let config = test_config();
        let (mut alice, _a) = connect(&hub, &config, "proj1", "alice");
        let (carol, _c) = connect(&hub, &config, "proj2", "carol");
        wait_for_clients(&hub, "proj1", 1).await;
        wait_for_clients(&hub, "proj2", 1).await;

        carol.send(r#"{"type":"update"}"#).unwrap();
        let marker = Message::new("proj1", "marker", "server", json!(null));
        hub.broadcast_message(marker).await.unwrap();

        assert_eq!(next_message(&mut alice).await.kind, "marker");
    }

    #[tokio::test]
    async fn test_decode_error_unregisters() {
        let hub = start_hub();
        let (mut alice, task) = connect(&hub, &test_config(), "proj1", "alice");
        wait_for_clients(&hub, "proj1", 1).await;

        alice.send("not json").unwrap();

        let end = timeout(WAIT, task).await.unwrap().unwrap();
        assert!(matches!(end, SessionEnd::DecodeFailed(_)));
        assert!(!hub.stats().has_project("proj1"));
        wait_closed(&mut alice).await;
    }

    #[tokio::test]
    async fn test_missing_type_is_a_decode_error() {
        let hub = start_hub();
        let (alice, task) = connect(&hub, &test_config(), "proj1", "alice");
        wait_for_clients(&hub, "proj1", 1).await;

        alice.send(r#"{"data":{}}"#).unwrap();

        let end = timeout(WAIT, task).await.unwrap().unwrap();
        assert!(matches!(end, SessionEnd::DecodeFailed(_)));
    }

    #[tokio::test]
    async fn test_peer_close_unregisters() {
        let hub = start_hub();
        let (mut alice, task) = connect(&hub, &test_config(), "proj1", "alice");
        wait_for_clients(&hub, "proj1", 1).await;

        alice.disconnect();

        let end = timeout(WAIT, task).await.unwrap().unwrap();
        assert_eq!(end, SessionEnd::PeerClosed);
        assert!(!hub.stats().has_project("proj1"));
        wait_closed(&mut alice).await;
    }

    #[tokio::test]
    async fn test_read_failure_ends_session() {
        let hub = start_hub();
        let (alice, task) = connect(&hub, &test_config(), "proj1", "alice");
        wait_for_clients(&hub, "proj1", 1).await;

        alice.fail("reset by peer").unwrap();

        let end = timeout(WAIT, task).await.unwrap().unwrap();
        assert!(matches!(end, SessionEnd::ReadFailed(_)));
        assert!(!hub.stats().has_project("proj1"));
    }

    #[tokio::test]
    async fn test_write_failure_unregisters() {
        let hub = start_hub();
        let config = test_config();
        let (mut alice, alice_task) = connect(&hub, &config, "proj1", "alice");
        let (bob, _b) = connect(&hub, &config, "proj1", "bob");
        wait_for_clients(&hub, "proj1", 2).await;

        alice.stop_reading();
        bob.send(r#"{"type":"edit"}"#).unwrap();

        let end = timeout(WAIT, alice_task).await.unwrap().unwrap();
        assert!(matches!(end, SessionEnd::WriteFailed(_)));
        wait_for_clients(&hub, "proj1", 1).await;
    }

    #[tokio::test]
    async fn test_outbound_ends_when_queue_closes() {
        let (client, queue) = ClientHandle::new("proj1", "alice", 4);
        client.try_deliver(Bytes::from_static(b"last"));
        drop(client);

        let (mut peer, mut sink, _source) = memory::pair();
        let end = outbound(&test_config(), queue, &mut sink).await;

        assert_eq!(end, SessionEnd::QueueClosed);
        assert_eq!(
            peer.next_event().await,
            Some(PeerEvent::Frame(Bytes::from_static(b"last")))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_timeout() {
        let hub = start_hub();
        let config = SessionConfig {
            heartbeat_interval: Duration::from_millis(10),
            heartbeat_timeout: Duration::from_millis(35),
            ..test_config()
        };
        let (mut alice, task) = connect(&hub, &config, "proj1", "alice");

        let end = timeout(WAIT, task).await.unwrap().unwrap();
        assert_eq!(end, SessionEnd::HeartbeatTimeout);
        assert_eq!(alice.next_event().await, Some(PeerEvent::Ping));
        wait_closed(&mut alice).await;
        assert!(!hub.stats().has_project("proj1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_keep_session_alive() {
        let hub = start_hub();
        let config = SessionConfig {
            heartbeat_interval: Duration::from_millis(10),
            heartbeat_timeout: Duration::from_millis(35),
            ..test_config()
        };
        let (alice, task) = connect(&hub, &config, "proj1", "alice");

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            alice.heartbeat().unwrap();
        }
        assert!(!task.is_finished());
        assert_eq!(hub.stats().client_count("proj1"), 1);
    }

    #[tokio::test]
    async fn test_presence_events() {
        let hub = start_hub();
        let config = SessionConfig {
            presence_events: true,
            ..test_config()
        };
        let (mut alice, _a) = connect(&hub, &config, "proj1", "alice");
        wait_for_clients(&hub, "proj1", 1).await;

        let (mut bob, bob_task) = connect(&hub, &config, "proj1", "bob");
        let join = next_message(&mut alice).await;
        assert_eq!(join.kind, message_type::JOIN);
        assert_eq!(join.user_id, "bob");
        assert_eq!(join.data, json!({"userId": "bob"}));

        bob.disconnect();
        assert_eq!(timeout(WAIT, bob_task).await.unwrap().unwrap(), SessionEnd::PeerClosed);

        let leave = next_message(&mut alice).await;
        assert_eq!(leave.kind, message_type::LEAVE);
        assert_eq!(leave.user_id, "bob");
        wait_closed(&mut bob).await;
    }

    #[tokio::test]
    async fn test_session_closes_when_hub_is_gone() {
        let (hub, handle) = Hub::new(HubConfig::default());
        let hub_task = tokio::spawn(hub.run());
        let config = SessionConfig {
            presence_events: true,
            ..test_config()
        };
        let (mut alice, task) = connect(&handle, &config, "proj1", "alice");
        wait_for_clients(&handle, "proj1", 1).await;

        // Dropping the hub closes every client queue; unregister and leave
        // then fail and are only logged.
        hub_task.abort();
        assert!(hub_task.await.unwrap_err().is_cancelled());

        let end = timeout(WAIT, task).await.unwrap().unwrap();
        assert_eq!(end, SessionEnd::QueueClosed);
        assert!(handle.broadcast_message(Message::leave("proj1", "alice")).await.is_err());
        wait_closed(&mut alice).await;
    }

    #[tokio::test]
    async fn test_session_config_from_config() {
        let mut config = Config::default();
        config.limits.max_message_size = 512;
        config.hub.presence_events = false;

        let session = SessionConfig::from(&config);
        assert_eq!(session.codec.max_frame_size(), 512);
        assert_eq!(session.heartbeat_timeout, Duration::from_secs(60));
        assert!(!session.presence_events);
    }
}
