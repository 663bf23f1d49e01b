//! Project registry.
//!
//! Maps each project to the clients currently connected to it. Owned and
//! mutated by the hub actor only, so it needs no locking.
//!
//! Invariants:
//! - a client appears in exactly one project set while registered;
//! - a project with no clients has no entry.

use crate::client::{ClientHandle, ClientId, Delivery};
use blockcast_protocol::ProjectId;
use bytes::Bytes;
use std::collections::HashMap;

/// Why a client was dropped during fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Outbound queue was full.
    SlowConsumer,
    /// Outbound queue had no receiver left.
    Disconnected,
}

/// A client removed during fan-out. Dropping it closes its queue.
#[derive(Debug)]
pub struct Eviction {
    pub client: ClientHandle,
    pub reason: EvictionReason,
}

/// Outcome of a fan-out.
#[derive(Debug, Default)]
pub struct FanOut {
    /// Clients the frame was queued for.
    pub delivered: usize,
    /// Clients removed from the registry.
    pub evicted: Vec<Eviction>,
}

/// Registry of connected clients, keyed by project.
#[derive(Debug, Default)]
pub struct Registry {
    projects: HashMap<ProjectId, HashMap<ClientId, ClientHandle>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client to its project's set, creating the set if absent.
    ///
    /// Returns the project's new client count. Registering the same client
    /// twice is a bug: debug builds panic, release builds keep the existing
    /// entry and hand the duplicate back.
    pub fn insert(&mut self, client: ClientHandle) -> Result<usize, ClientHandle> {
        let clients = self
            .projects
            .entry(client.project_id().to_string())
            .or_default();

        debug_assert!(
            !clients.contains_key(&client.id()),
            "{} registered twice",
            client.id()
        );
        if clients.contains_key(&client.id()) {
            return Err(client);
        }
        clients.insert(client.id(), client);
        Ok(clients.len())
    }

    /// Remove a client, deleting the project entry if it becomes empty.
    ///
    /// Returns the removed handle; `None` if the client was not registered.
    pub fn remove(&mut self, project_id: &str, id: ClientId) -> Option<ClientHandle> {
        let clients = self.projects.get_mut(project_id)?;
        let removed = clients.remove(&id);
        if clients.is_empty() {
            self.projects.remove(project_id);
        }
        removed
    }

    /// Offer `frame` to every client of `project_id` except `skip`.
    ///
    /// Clients whose queue is full or closed are removed and returned in
    /// [`FanOut::evicted`]. Never waits on a client.
    pub fn fan_out(&mut self, project_id: &str, frame: &Bytes, skip: Option<ClientId>) -> FanOut {
        let mut outcome = FanOut::default();
        let Some(clients) = self.projects.get_mut(project_id) else {
            return outcome;
        };

        let mut dropped = Vec::new();
        for (id, client) in clients.iter() {
            if Some(*id) == skip {
                continue;
            }
            match client.try_deliver(frame.clone()) {
                Delivery::Queued => outcome.delivered += 1,
                Delivery::Full => dropped.push((*id, EvictionReason::SlowConsumer)),
                Delivery::Gone => dropped.push((*id, EvictionReason::Disconnected)),
            }
        }

        for (id, reason) in dropped {
            if let Some(client) = clients.remove(&id) {
                outcome.evicted.push(Eviction { client, reason });
            }
        }
        if clients.is_empty() {
            self.projects.remove(project_id);
        }

        outcome
    }

    /// Whether a project has an entry.
    #[must_use]
    pub fn contains_project(&self, project_id: &str) -> bool {
        self.projects.contains_key(project_id)
    }

    /// Whether a client is registered under a project.
    #[must_use]
    pub fn contains(&self, project_id: &str, id: ClientId) -> bool {
        self.projects
            .get(project_id)
            .is_some_and(|clients| clients.contains_key(&id))
    }

    /// Number of clients registered under a project.
    #[must_use]
    pub fn client_count(&self, project_id: &str) -> usize {
        self.projects.get(project_id).map_or(0, HashMap::len)
    }

    /// Number of projects with at least one client.
    #[must_use]
    pub fn project_count(&self) -> usize {
        self.projects.len()
    }

    /// Total number of registered clients.
    #[must_use]
    pub fn total_clients(&self) -> usize {
        self.projects.values().map(HashMap::len).sum()
    }

    /// Whether no client is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    /// Remove every client, returning their handles.
    pub fn drain(&mut self) -> Vec<ClientHandle> {
        self.projects
            .drain()
            .flat_map(|(_, clients)| clients.into_values())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    fn frame(data: &'static str) -> Bytes {
        Bytes::from_static(data.as_bytes())
    }

    #[test]
    fn test_insert_and_remove() {
        let mut registry = Registry::new();
        let (a, _qa) = ClientHandle::new("p1", "alice", 8);
        let (b, _qb) = ClientHandle::new("p1", "bob", 8);
        let (a_id, b_id) = (a.id(), b.id());

        assert_eq!(registry.insert(a).unwrap(), 1);
        assert_eq!(registry.insert(b).unwrap(), 2);
        assert!(registry.contains("p1", a_id));
        assert_eq!(registry.client_count("p1"), 2);

        assert!(registry.remove("p1", a_id).is_some());
        assert!(registry.contains_project("p1"));

        assert!(registry.remove("p1", b_id).is_some());
        assert!(!registry.contains_project("p1"));
        assert!(registry.is_empty());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "registered twice")]
    fn test_duplicate_insert_panics_in_debug() {
        let mut registry = Registry::new();
        let (a, _qa) = ClientHandle::new("p1", "alice", 8);
        let (twin, _qt) = ClientHandle::impersonate(&a, 8);
        registry.insert(a).unwrap();
        let _ = registry.insert(twin);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_duplicate_insert_keeps_first() {
        let mut registry = Registry::new();
        let (a, mut qa) = ClientHandle::new("p1", "alice", 8);
        let (twin, _qt) = ClientHandle::impersonate(&a, 8);
        registry.insert(a).unwrap();

        let rejected = registry.insert(twin).unwrap_err();
        drop(rejected);
        assert_eq!(registry.client_count("p1"), 1);
        registry.fan_out("p1", &frame("m"), None);
        assert_eq!(qa.try_recv().unwrap(), frame("m"));
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut registry = Registry::new();
        let (a, _qa) = ClientHandle::new("p1", "alice", 8);
        let a_id = a.id();
        registry.insert(a).unwrap();

        assert!(registry.remove("p1", a_id).is_some());
        assert!(registry.remove("p1", a_id).is_none());
        assert!(registry.remove("nope", a_id).is_none());
        assert_eq!(registry.project_count(), 0);
    }

    #[test]
    fn test_fan_out_scoped_to_project() {
        let mut registry = Registry::new();
        let (a, mut qa) = ClientHandle::new("p1", "alice", 8);
        let (b, mut qb) = ClientHandle::new("p1", "bob", 8);
        let (c, mut qc) = ClientHandle::new("p2", "carol", 8);
        registry.insert(a).unwrap();
        registry.insert(b).unwrap();
        registry.insert(c).unwrap();

        let outcome = registry.fan_out("p1", &frame("m"), None);
        assert_eq!(outcome.delivered, 2);
        assert!(outcome.evicted.is_empty());

        assert_eq!(qa.try_recv().unwrap(), frame("m"));
        assert_eq!(qb.try_recv().unwrap(), frame("m"));
        assert_eq!(qc.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_fan_out_skips_origin() {
        let mut registry = Registry::new();
        let (a, mut qa) = ClientHandle::new("p1", "alice", 8);
        let (b, mut qb) = ClientHandle::new("p1", "bob", 8);
        let a_id = a.id();
        registry.insert(a).unwrap();
        registry.insert(b).unwrap();

        let outcome = registry.fan_out("p1", &frame("m"), Some(a_id));
        assert_eq!(outcome.delivered, 1);
        assert_eq!(qa.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(qb.try_recv().unwrap(), frame("m"));
    }

    #[test]
    fn test_fan_out_to_empty_project() {
        let mut registry = Registry::new();
        let outcome = registry.fan_out("ghost", &frame("m"), None);
        assert_eq!(outcome.delivered, 0);
        assert!(outcome.evicted.is_empty());
        assert!(!registry.contains_project("ghost"));
    }

    #[test]
    fn test_fan_out_evicts_full_queue() {
        let mut registry = Registry::new();
        let (slow, mut slow_q) = ClientHandle::new("p1", "slow", 1);
        let (fast, mut fast_q) = ClientHandle::new("p1", "fast", 8);
        let slow_id = slow.id();
        registry.insert(slow).unwrap();
        registry.insert(fast).unwrap();

        registry.fan_out("p1", &frame("1"), None);
        let outcome = registry.fan_out("p1", &frame("2"), None);

        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.evicted.len(), 1);
        assert_eq!(outcome.evicted[0].client.id(), slow_id);
        assert_eq!(outcome.evicted[0].reason, EvictionReason::SlowConsumer);
        assert!(!registry.contains("p1", slow_id));

        drop(outcome);
        assert_eq!(slow_q.try_recv().unwrap(), frame("1"));
        assert_eq!(slow_q.try_recv(), Err(TryRecvError::Disconnected));
        assert_eq!(fast_q.try_recv().unwrap(), frame("1"));
        assert_eq!(fast_q.try_recv().unwrap(), frame("2"));
    }

    #[test]
    fn test_fan_out_removes_gone_client_and_empty_project() {
        let mut registry = Registry::new();
        let (a, qa) = ClientHandle::new("p1", "alice", 8);
        registry.insert(a).unwrap();
        drop(qa);

        let outcome = registry.fan_out("p1", &frame("m"), None);
        assert_eq!(outcome.evicted.len(), 1);
        assert_eq!(outcome.evicted[0].reason, EvictionReason::Disconnected);
        assert!(!registry.contains_project("p1"));
    }

    #[test]
    fn test_drain_closes_everything() {
        let mut registry = Registry::new();
        let (a, mut qa) = ClientHandle::new("p1", "alice", 8);
        let (b, mut qb) = ClientHandle::new("p2", "bob", 8);
        registry.insert(a).unwrap();
        registry.insert(b).unwrap();

        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());

        drop(drained);
        assert_eq!(qa.try_recv(), Err(TryRecvError::Disconnected));
        assert_eq!(qb.try_recv(), Err(TryRecvError::Disconnected));
    }
}
