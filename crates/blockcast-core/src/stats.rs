//! Hub statistics.
//!
//! Written by the hub actor only; read concurrently by health checks and
//! the metrics reporter.

use blockcast_protocol::ProjectId;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters published by the hub.
#[derive(Debug, Default)]
pub struct HubStats {
    /// Client count per project. Projects without clients are absent.
    projects: DashMap<ProjectId, usize>,
    broadcasts: AtomicU64,
    frames_delivered: AtomicU64,
    evictions: AtomicU64,
    encode_failures: AtomicU64,
}

/// Per-project entry of a [`StatsSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectStats {
    pub project_id: ProjectId,
    pub client_count: usize,
}

/// Point-in-time copy of [`HubStats`].
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub projects: Vec<ProjectStats>,
    pub clients: usize,
    pub broadcasts: u64,
    pub frames_delivered: u64,
    pub evictions: u64,
    pub encode_failures: u64,
}

impl HubStats {
    /// Create empty statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_client_count(&self, project_id: &str, count: usize) {
        if count == 0 {
            self.projects.remove(project_id);
        } else {
            self.projects.insert(project_id.to_string(), count);
        }
    }

    pub(crate) fn clear_projects(&self) {
        self.projects.clear();
    }

    pub(crate) fn record_broadcast(&self, delivered: usize, evicted: usize) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.frames_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_encode_failure(&self) {
        self.encode_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of projects with at least one client.
    #[must_use]
    pub fn project_count(&self) -> usize {
        self.projects.len()
    }

    /// Number of clients registered under a project.
    #[must_use]
    pub fn client_count(&self, project_id: &str) -> usize {
        self.projects.get(project_id).map_or(0, |count| *count)
    }

    /// Whether a project currently has an entry.
    #[must_use]
    pub fn has_project(&self, project_id: &str) -> bool {
        self.projects.contains_key(project_id)
    }

    /// Total number of registered clients.
    #[must_use]
    pub fn total_clients(&self) -> usize {
        self.projects.iter().map(|entry| *entry.value()).sum()
    }

    /// Broadcasts fanned out so far.
    #[must_use]
    pub fn broadcasts(&self) -> u64 {
        self.broadcasts.load(Ordering::Relaxed)
    }

    /// Frames queued to clients so far.
    #[must_use]
    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Ordering::Relaxed)
    }

    /// Clients evicted during fan-out so far.
    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Broadcasts abandoned because the message could not be encoded.
    #[must_use]
    pub fn encode_failures(&self) -> u64 {
        self.encode_failures.load(Ordering::Relaxed)
    }

    /// Take a snapshot, projects sorted by id.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut projects: Vec<ProjectStats> = self
            .projects
            .iter()
            .map(|entry| ProjectStats {
                project_id: entry.key().clone(),
                client_count: *entry.value(),
            })
            .collect();
        projects.sort_by(|a, b| a.project_id.cmp(&b.project_id));

        StatsSnapshot {
            clients: projects.iter().map(|p| p.client_count).sum(),
            projects,
            broadcasts: self.broadcasts(),
            frames_delivered: self.frames_delivered(),
            evictions: self.evictions(),
            encode_failures: self.encode_failures(),
        }
    }
}
