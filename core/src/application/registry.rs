// Copyright (c) 2026 Guidepost AI
// SPDX-License-Identifier: AGPL-3.0

// Capability Registry - Health-Aware Worker Selection
//
// Tracks worker instances, their capability sets, and live health. State
// is sharded per worker id (dashmap); health updates for one worker are
// linearizable while unrelated workers proceed independently. There is no
// global registry mutex.

use crate::domain::capability::Capability;
use crate::domain::worker::{HealthState, Worker, WorkerDescriptor, WorkerId};
use crate::infrastructure::config::HeartbeatConfig;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown worker {0}")]
    UnknownWorker(WorkerId),
}

struct WorkerEntry {
    handle: Arc<dyn Worker>,
    name: String,
    capabilities: HashSet<Capability>,
    health: HealthState,
    registered_at: DateTime<Utc>,
    last_heartbeat: Instant,
    last_heartbeat_at: DateTime<Utc>,
    /// Recency of the last dispatch to this worker; `None` means never.
    /// Used for least-recently-used tie-breaking among equal health.
    last_dispatched: Option<Instant>,
}

impl WorkerEntry {
    fn descriptor(&self, id: WorkerId) -> WorkerDescriptor {
        WorkerDescriptor {
            id,
            name: self.name.clone(),
            capabilities: self.capabilities.clone(),
            health: self.health,
            last_heartbeat: self.last_heartbeat_at,
            registered_at: self.registered_at,
        }
    }
}

pub struct CapabilityRegistry {
    workers: DashMap<WorkerId, WorkerEntry>,
    index: DashMap<Capability, Vec<WorkerId>>,
    heartbeat: HeartbeatConfig,
}

impl CapabilityRegistry {
    pub fn new(heartbeat: HeartbeatConfig) -> Self {
        Self {
            workers: DashMap::new(),
            index: DashMap::new(),
            heartbeat,
        }
    }

    /// Register a worker instance. Its capability set is read once here
    /// and indexed; routing never re-asks the worker.
    pub fn register(&self, name: impl Into<String>, worker: Arc<dyn Worker>) -> WorkerDescriptor {
        let id = WorkerId::new();
        let name = name.into();
        let capabilities = worker.capabilities();
        let now = Utc::now();

        info!(
            "Registering worker '{}' ({}) with {} capabilities",
            name,
            id,
            capabilities.len()
        );

        for capability in &capabilities {
            self.index
                .entry(capability.clone())
                .or_default()
                .push(id);
        }

        let entry = WorkerEntry {
            handle: worker,
            name,
            capabilities,
            health: HealthState::Healthy,
            registered_at: now,
            last_heartbeat: Instant::now(),
            last_heartbeat_at: now,
            last_dispatched: None,
        };
        let descriptor = entry.descriptor(id);
        self.workers.insert(id, entry);
        descriptor
    }

    pub fn deregister(&self, id: &WorkerId) -> bool {
        match self.workers.remove(id) {
            Some((_, entry)) => {
                for capability in &entry.capabilities {
                    if let Some(mut ids) = self.index.get_mut(capability) {
                        ids.retain(|candidate| candidate != id);
                    }
                }
                info!("Deregistered worker '{}' ({})", entry.name, id);
                true
            }
            None => false,
        }
    }

    /// Apply a heartbeat. The health signal is evidence from the worker
    /// itself; the registry records it as-is and refreshes staleness.
    pub fn heartbeat(&self, id: &WorkerId, signal: HealthState) -> Result<(), RegistryError> {
        let mut entry = self
            .workers
            .get_mut(id)
            .ok_or(RegistryError::UnknownWorker(*id))?;
        entry.health = signal;
        entry.last_heartbeat = Instant::now();
        entry.last_heartbeat_at = Utc::now();
        debug!("Heartbeat from {}: {:?}", id, signal);
        Ok(())
    }

    /// Healthy candidates before degraded ones; unhealthy workers are
    /// excluded entirely. Ties break least-recently-dispatched to spread
    /// load.
    pub fn candidates_for(&self, capability: &Capability) -> Vec<WorkerDescriptor> {
        let ids: Vec<WorkerId> = match self.index.get(capability) {
            Some(ids) => ids.clone(),
            None => return Vec::new(),
        };

        let mut candidates: Vec<(HealthState, Option<Instant>, WorkerDescriptor)> = Vec::new();
        for id in ids {
            if let Some(entry) = self.workers.get(&id) {
                if entry.health.is_dispatchable() {
                    candidates.push((entry.health, entry.last_dispatched, entry.descriptor(id)));
                }
            }
        }

        candidates.sort_by(|a, b| a.0.rank().cmp(&b.0.rank()).then(a.1.cmp(&b.1)));
        candidates
            .into_iter()
            .map(|(_, _, descriptor)| descriptor)
            .collect()
    }

    /// Record that a dispatch went to this worker, for LRU tie-breaking.
    pub fn mark_dispatched(&self, id: &WorkerId) {
        if let Some(mut entry) = self.workers.get_mut(id) {
            entry.last_dispatched = Some(Instant::now());
        }
    }

    /// Soft demotion after a timeout or worker error: healthy workers drop
    /// to degraded. Unhealthy stays unhealthy; only heartbeat evidence
    /// promotes.
    pub fn mark_degraded(&self, id: &WorkerId) {
        if let Some(mut entry) = self.workers.get_mut(id) {
            if entry.health == HealthState::Healthy {
                warn!("Demoting worker '{}' ({}) to degraded", entry.name, id);
                entry.health = HealthState::Degraded;
            }
        }
    }

    /// Mark workers silent beyond the configured window as unhealthy.
    /// They stay registered so a later heartbeat can recover them.
    pub fn sweep_stale(&self) -> usize {
        self.sweep_stale_at(Instant::now())
    }

    pub(crate) fn sweep_stale_at(&self, now: Instant) -> usize {
        let window = self.heartbeat.stale_window();
        let mut flipped = 0;
        for mut entry in self.workers.iter_mut() {
            if entry.health != HealthState::Unhealthy
                && now.saturating_duration_since(entry.last_heartbeat) >= window
            {
                warn!(
                    "Worker '{}' missed heartbeats for {:?}, marking unhealthy",
                    entry.name, window
                );
                entry.health = HealthState::Unhealthy;
                flipped += 1;
            }
        }
        flipped
    }

    pub fn worker_handle(&self, id: &WorkerId) -> Option<Arc<dyn Worker>> {
        self.workers.get(id).map(|entry| Arc::clone(&entry.handle))
    }

    pub fn descriptor(&self, id: &WorkerId) -> Option<WorkerDescriptor> {
        self.workers.get(id).map(|entry| entry.descriptor(*id))
    }

    pub fn workers(&self) -> Vec<WorkerDescriptor> {
        let mut descriptors: Vec<WorkerDescriptor> = self
            .workers
            .iter()
            .map(|entry| entry.descriptor(*entry.key()))
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
