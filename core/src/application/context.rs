// Copyright (c) 2026 Guidepost AI
// SPDX-License-Identifier: AGPL-3.0

// Context Manager - Session-Scoped Shared State
//
// Key/value state partitioned by session id; no key is visible across
// sessions. Concurrent writers to the same key within a session race
// last-write-wins, which is acceptable because keys carry
// worker-contributed hints, not authoritative state.
//
// A background sweep bounds memory growth independently of explicit
// cleanup: entries past their TTL and sessions idle beyond the configured
// maximum are reaped.
//
// While any persistence-class breaker is not closed the store is
// read-only: writes fail with `ContextUnavailable`, reads of already
// cached entries keep being served.

use crate::domain::errors::DispatchError;
use crate::domain::session::SessionId;
use crate::infrastructure::breaker::BreakerBank;
use crate::infrastructure::config::ContextConfig;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

struct ContextEntry {
    value: serde_json::Value,
    expires_at: Instant,
}

struct SessionState {
    entries: HashMap<String, ContextEntry>,
    last_access: Instant,
}

pub struct ContextManager {
    sessions: DashMap<SessionId, SessionState>,
    bank: Arc<BreakerBank>,
    config: ContextConfig,
}

impl ContextManager {
    pub fn new(bank: Arc<BreakerBank>, config: ContextConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            bank,
            config,
        }
    }

    /// Write a value for this session. `ttl` defaults to the configured
    /// TTL. Rejected while the persistent store is degraded.
    pub fn put(
        &self,
        session: SessionId,
        key: impl Into<String>,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<(), DispatchError> {
        if !self.bank.persistence_writable() {
            return Err(DispatchError::ContextUnavailable(
                "persistent store degraded, context writes rejected".to_string(),
            ));
        }
        let now = Instant::now();
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let mut state = self.sessions.entry(session).or_insert_with(|| SessionState {
            entries: HashMap::new(),
            last_access: now,
        });
        state.last_access = now;
        state.entries.insert(
            key.into(),
            ContextEntry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    /// Read a value previously written under the same session id. Expired
    /// entries are treated as absent. Reads keep working in degraded mode.
    pub fn get(&self, session: SessionId, key: &str) -> Option<serde_json::Value> {
        let now = Instant::now();
        let mut state = self.sessions.get_mut(&session)?;
        state.last_access = now;
        match state.entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                state.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Drop all state for a session. Idempotent; calling it again, or
    /// after expiry has already reaped the session, is a no-op.
    pub fn invalidate(&self, session: SessionId) {
        if self.sessions.remove(&session).is_some() {
            debug!("Invalidated context session {}", session);
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// One sweep pass: purge expired entries, then reap idle sessions.
    pub fn sweep(&self) -> SweepStats {
        self.sweep_at(Instant::now())
    }

    pub(crate) fn sweep_at(&self, now: Instant) -> SweepStats {
        let mut stats = SweepStats::default();
        let idle_max = self.config.idle_max;
        self.sessions.retain(|_, state| {
            let before = state.entries.len();
            state.entries.retain(|_, entry| entry.expires_at > now);
            stats.entries_removed += before - state.entries.len();

            let keep = now.saturating_duration_since(state.last_access) < idle_max;
            if !keep {
                stats.sessions_removed += 1;
            }
            keep
        });
        if stats.entries_removed > 0 || stats.sessions_removed > 0 {
            debug!(
                "Context sweep removed {} entries, {} idle sessions",
                stats.entries_removed, stats.sessions_removed
            );
        }
        stats
    }

    /// Spawn the background sweep task. Runs until the process exits or
    /// the handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        let interval = manager.config.sweep_interval;
        info!("Starting context sweeper (interval {:?})", interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                manager.sweep();
            }
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub entries_removed: usize,
    pub sessions_removed: usize,
}
