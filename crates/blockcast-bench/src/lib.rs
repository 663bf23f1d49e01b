//! Shared fixtures for Blockcast benchmarks.

use blockcast_core::{
    ClientHandle, Hub, HubConfig, HubError, HubHandle, Message, OutboundQueue, Registry,
};
use serde_json::json;

/// An `edit` message whose content field is `payload_len` bytes long.
#[must_use]
pub fn edit_message(project_id: &str, payload_len: usize) -> Message {
    Message::new(
        project_id,
        "edit",
        "bench-user",
        json!({ "blockId": "b-1", "content": "x".repeat(payload_len) }),
    )
}

/// Register `clients` clients of `project_id` directly in a registry.
pub fn populate(
    registry: &mut Registry,
    project_id: &str,
    clients: usize,
    capacity: usize,
) -> Vec<OutboundQueue> {
    (0..clients)
        .filter_map(|i| {
            let (client, queue) = ClientHandle::new(project_id, format!("user-{i}"), capacity);
            registry.insert(client).ok().map(|_| queue)
        })
        .collect()
}

/// Empty every queue without waiting, returning the number of frames taken.
pub fn drain(queues: &mut [OutboundQueue]) -> usize {
    let mut frames = 0;
    for queue in queues {
        while queue.try_recv().is_ok() {
            frames += 1;
        }
    }
    frames
}

/// Start a hub and register `clients` clients of `project_id` with it.
///
/// # Errors
///
/// Returns [`HubError::Closed`] if the hub stops while clients are
/// registered.
pub async fn connected_hub(
    config: HubConfig,
    project_id: &str,
    clients: usize,
) -> Result<(HubHandle, Vec<OutboundQueue>), HubError> {
    let (hub, handle) = Hub::new(config);
    tokio::spawn(hub.run());

    let mut queues = Vec::with_capacity(clients);
    for i in 0..clients {
        let (client, queue) = handle.new_client(project_id, format!("user-{i}"));
        handle.register(client).await?;
        queues.push(queue);
    }
    Ok((handle, queues))
}
