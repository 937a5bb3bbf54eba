// Copyright (c) 2026 Guidepost AI
// SPDX-License-Identifier: AGPL-3.0

// Circuit Breaker Bank - Per-Dependency Resilience
//
// One breaker per named external dependency, independent of worker
// identity. All timeout/trip/reset policy lives here; the router consults
// the bank and never duplicates breaker logic per worker.
//
// State machine:
//   CLOSED    calls pass; failures increment a consecutive counter
//   OPEN      calls short-circuit to fallback; no attempt reaches the
//             dependency until the reset timeout elapses
//   HALF_OPEN exactly one trial call is admitted; success closes the
//             breaker, failure re-opens it with a doubled (bounded) timeout

use crate::domain::capability::Capability;
use crate::domain::dependency::{BreakerState, DependencyClass};
use crate::domain::events::BreakerTransition;
use crate::domain::request::RequestId;
use crate::infrastructure::config::DependencyConfig;
use crate::infrastructure::event_bus::EventBus;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Outcome of asking a breaker whether a call may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Call may proceed. `trial` marks the single half-open probe.
    Allowed { trial: bool },
    /// Breaker is open; short-circuit to the fallback without any attempt.
    Rejected,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Instant,
    current_reset: Duration,
    trial_in_flight: bool,
}

pub struct CircuitBreaker {
    name: String,
    class: DependencyClass,
    failure_threshold: u32,
    base_reset: Duration,
    max_reset: Duration,
    inner: Mutex<BreakerInner>,
}

/// A state change to publish; `None` when a call left the state alone.
type Transition = Option<(BreakerState, BreakerState)>;

impl CircuitBreaker {
    pub fn new(
        name: String,
        class: DependencyClass,
        failure_threshold: u32,
        reset_timeout: Duration,
        max_reset_timeout: Duration,
    ) -> Self {
        Self {
            name,
            class,
            failure_threshold,
            base_reset: reset_timeout,
            max_reset: max_reset_timeout,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: Instant::now(),
                current_reset: reset_timeout,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> DependencyClass {
        self.class
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn try_acquire(&self) -> (Admission, Transition) {
        self.try_acquire_at(Instant::now())
    }

    pub(crate) fn try_acquire_at(&self, now: Instant) -> (Admission, Transition) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => (Admission::Allowed { trial: false }, None),
            BreakerState::Open => {
                if now.saturating_duration_since(inner.opened_at) >= inner.current_reset {
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    (
                        Admission::Allowed { trial: true },
                        Some((BreakerState::Open, BreakerState::HalfOpen)),
                    )
                } else {
                    (Admission::Rejected, None)
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    (Admission::Rejected, None)
                } else {
                    inner.trial_in_flight = true;
                    (Admission::Allowed { trial: true }, None)
                }
            }
        }
    }

    pub fn record_success(&self) -> Transition {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
                None
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.consecutive_failures = 0;
                inner.current_reset = self.base_reset;
                inner.trial_in_flight = false;
                Some((BreakerState::HalfOpen, BreakerState::Closed))
            }
            // Late result for a call admitted before the breaker tripped.
            BreakerState::Open => None,
        }
    }

    pub fn record_failure(&self) -> Transition {
        self.record_failure_at(Instant::now())
    }

    pub(crate) fn record_failure_at(&self, now: Instant) -> Transition {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = now;
                    Some((BreakerState::Closed, BreakerState::Open))
                } else {
                    None
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = now;
                inner.current_reset = (inner.current_reset * 2).min(self.max_reset);
                inner.trial_in_flight = false;
                Some((BreakerState::HalfOpen, BreakerState::Open))
            }
            BreakerState::Open => None,
        }
    }

    /// Release a half-open trial slot whose call was abandoned (cancelled
    /// mid-flight, or never issued because the worker deregistered). The
    /// breaker stays half-open; the next acquire admits a fresh trial.
    pub fn release_trial(&self) {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            dependency: self.name.clone(),
            class: self.class,
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            current_reset_ms: inner.current_reset.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub dependency: String,
    pub class: DependencyClass,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub current_reset_ms: u64,
}

/// Last-known good value cached per backend dependency, served with an
/// explicit staleness flag while the breaker is open.
#[derive(Debug, Clone, Serialize)]
pub struct StaleValue {
    pub value: serde_json::Value,
    pub cached_at: DateTime<Utc>,
}

/// Cross-project validation skipped while a peer channel was down, kept
/// for later replay.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedValidation {
    pub request_id: RequestId,
    pub capability: Capability,
    pub payload: serde_json::Value,
    pub skipped_at: DateTime<Utc>,
}

const REPLAY_QUEUE_CAP: usize = 1024;

/// One breaker per named dependency plus the fallback machinery the
/// open-state policies need: a stale-value cache for backend dependencies
/// and a replay queue for skipped peer validations.
pub struct BreakerBank {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    stale_cache: DashMap<String, StaleValue>,
    replay_queue: Mutex<VecDeque<SkippedValidation>>,
    bus: EventBus,
}

impl BreakerBank {
    pub fn from_config(dependencies: &[DependencyConfig], bus: EventBus) -> Self {
        let breakers = DashMap::new();
        for dep in dependencies {
            info!(
                "Registering breaker '{}' (class {:?}, threshold {})",
                dep.name, dep.class, dep.failure_threshold
            );
            breakers.insert(
                dep.name.clone(),
                Arc::new(CircuitBreaker::new(
                    dep.name.clone(),
                    dep.class,
                    dep.failure_threshold,
                    dep.reset_timeout,
                    dep.max_reset_timeout,
                )),
            );
        }
        Self {
            breakers,
            stale_cache: DashMap::new(),
            replay_queue: Mutex::new(VecDeque::new()),
            bus,
        }
    }

    pub fn breaker(&self, dependency: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(dependency).map(|entry| Arc::clone(entry.value()))
    }

    pub fn class_of(&self, dependency: &str) -> Option<DependencyClass> {
        self.breakers.get(dependency).map(|entry| entry.class())
    }

    /// Ask whether a call crossing `dependency` may proceed. Unknown
    /// dependencies are not guarded and always pass.
    pub fn try_acquire(&self, dependency: &str) -> Admission {
        match self.breaker(dependency) {
            Some(breaker) => {
                let (admission, transition) = breaker.try_acquire();
                self.publish_transition(&breaker, transition);
                admission
            }
            None => Admission::Allowed { trial: false },
        }
    }

    pub fn record_success(&self, dependency: &str) {
        if let Some(breaker) = self.breaker(dependency) {
            let transition = breaker.record_success();
            self.publish_transition(&breaker, transition);
        }
    }

    pub fn record_failure(&self, dependency: &str) {
        if let Some(breaker) = self.breaker(dependency) {
            let transition = breaker.record_failure();
            self.publish_transition(&breaker, transition);
        }
    }

    pub fn release_trial(&self, dependency: &str) {
        if let Some(breaker) = self.breaker(dependency) {
            breaker.release_trial();
        }
    }

    fn publish_transition(&self, breaker: &CircuitBreaker, transition: Transition) {
        if let Some((from, to)) = transition {
            info!("Breaker '{}' transitioned {:?} -> {:?}", breaker.name(), from, to);
            metrics::counter!(
                "guidepost_breaker_transitions_total",
                "dependency" => breaker.name().to_string()
            )
            .increment(1);
            self.bus.publish_breaker(BreakerTransition {
                dependency: breaker.name().to_string(),
                from,
                to,
                at: Utc::now(),
            });
        }
    }

    /// Refresh the last-known good value for a backend dependency.
    pub fn cache_value(&self, dependency: &str, value: serde_json::Value) {
        self.stale_cache.insert(
            dependency.to_string(),
            StaleValue {
                value,
                cached_at: Utc::now(),
            },
        );
    }

    pub fn cached_value(&self, dependency: &str) -> Option<StaleValue> {
        self.stale_cache.get(dependency).map(|entry| entry.clone())
    }

    /// Queue a validation skipped while a peer channel was down.
    pub fn queue_skipped(&self, skipped: SkippedValidation) {
        let mut queue = self.replay_queue.lock();
        if queue.len() >= REPLAY_QUEUE_CAP {
            warn!("Replay queue full, dropping oldest skipped validation");
            queue.pop_front();
        }
        queue.push_back(skipped);
    }

    /// Drain everything queued for replay, oldest first.
    pub fn drain_skipped(&self) -> Vec<SkippedValidation> {
        self.replay_queue.lock().drain(..).collect()
    }

    /// Whether context writes may proceed: every persistence-class breaker
    /// must be closed. Reads are unaffected.
    pub fn persistence_writable(&self) -> bool {
        self.breakers.iter().all(|entry| {
            entry.class() != DependencyClass::Persistence
                || entry.state() == BreakerState::Closed
        })
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<BreakerSnapshot> =
            self.breakers.iter().map(|entry| entry.snapshot()).collect();
        snapshots.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, reset_ms: u64, max_reset_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "backend-api".to_string(),
            DependencyClass::Backend,
            threshold,
            Duration::from_millis(reset_ms),
            Duration::from_millis(max_reset_ms),
        )
    }

    #[test]
    fn test_opens_after_threshold_consecutive_failures() {
        let breaker = breaker(3, 100, 800);
        assert!(breaker.record_failure().is_none());
        assert!(breaker.record_failure().is_none());
        let transition = breaker.record_failure();
        assert_eq!(transition, Some((BreakerState::Closed, BreakerState::Open)));
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn test_success_resets_counter_while_closed() {
        let breaker = breaker(3, 100, 800);
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_open_short_circuits_until_reset_elapses() {
        let breaker = breaker(1, 100, 800);
        let tripped_at = Instant::now();
        breaker.record_failure_at(tripped_at);

        let (admission, _) = breaker.try_acquire_at(tripped_at + Duration::from_millis(50));
        assert_eq!(admission, Admission::Rejected);

        let (admission, transition) =
            breaker.try_acquire_at(tripped_at + Duration::from_millis(150));
        assert_eq!(admission, Admission::Allowed { trial: true });
        assert_eq!(transition, Some((BreakerState::Open, BreakerState::HalfOpen)));
    }

    #[test]
    fn test_half_open_admits_exactly_one_trial() {
        let breaker = breaker(1, 100, 800);
        let tripped_at = Instant::now();
        breaker.record_failure_at(tripped_at);

        let after_reset = tripped_at + Duration::from_millis(150);
        let (first, _) = breaker.try_acquire_at(after_reset);
        let (second, _) = breaker.try_acquire_at(after_reset);
        assert_eq!(first, Admission::Allowed { trial: true });
        assert_eq!(second, Admission::Rejected);
    }

    #[test]
    fn test_released_trial_admits_another() {
        let breaker = breaker(1, 100, 800);
        let tripped_at = Instant::now();
        breaker.record_failure_at(tripped_at);

        let after_reset = tripped_at + Duration::from_millis(150);
        breaker.try_acquire_at(after_reset);
        let (blocked, _) = breaker.try_acquire_at(after_reset);
        assert_eq!(blocked, Admission::Rejected);

        // An abandoned trial must not occupy the slot forever.
        breaker.release_trial();
        let (readmitted, _) = breaker.try_acquire_at(after_reset);
        assert_eq!(readmitted, Admission::Allowed { trial: true });
    }

    #[test]
    fn test_trial_success_closes_and_resets() {
        let breaker = breaker(1, 100, 800);
        let tripped_at = Instant::now();
        breaker.record_failure_at(tripped_at);
        breaker.try_acquire_at(tripped_at + Duration::from_millis(150));

        let transition = breaker.record_success();
        assert_eq!(transition, Some((BreakerState::HalfOpen, BreakerState::Closed)));
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.snapshot().consecutive_failures, 0);
        assert_eq!(breaker.snapshot().current_reset_ms, 100);
    }

    #[test]
    fn test_trial_failure_doubles_reset_up_to_max() {
        let breaker = breaker(1, 100, 300);
        let mut now = Instant::now();
        breaker.record_failure_at(now);

        // First failed trial: 100ms -> 200ms.
        now += Duration::from_millis(150);
        breaker.try_acquire_at(now);
        breaker.record_failure_at(now);
        assert_eq!(breaker.snapshot().current_reset_ms, 200);

        // Second failed trial: 200ms -> min(400, 300) = 300ms.
        now += Duration::from_millis(250);
        breaker.try_acquire_at(now);
        breaker.record_failure_at(now);
        assert_eq!(breaker.snapshot().current_reset_ms, 300);
    }

    #[test]
    fn test_bank_fallback_machinery() {
        let config = vec![DependencyConfig {
            name: "backend-api".to_string(),
            class: DependencyClass::Backend,
            failure_threshold: 1,
            reset_timeout: Duration::from_secs(30),
            max_reset_timeout: Duration::from_secs(300),
            capabilities: vec!["entity-guidance".to_string()],
        }];
        let bank = BreakerBank::from_config(&config, EventBus::new(16));

        assert!(bank.cached_value("backend-api").is_none());
        bank.cache_value("backend-api", serde_json::json!({"fields": ["a"]}));
        let cached = bank.cached_value("backend-api").unwrap();
        assert_eq!(cached.value, serde_json::json!({"fields": ["a"]}));

        bank.queue_skipped(SkippedValidation {
            request_id: RequestId::new(),
            capability: Capability::parse("entity-guidance").unwrap(),
            payload: serde_json::json!({}),
            skipped_at: Utc::now(),
        });
        assert_eq!(bank.drain_skipped().len(), 1);
        assert!(bank.drain_skipped().is_empty());
    }

    #[test]
    fn test_persistence_writable_tracks_store_breaker() {
        let config = vec![DependencyConfig {
            name: "session-store".to_string(),
            class: DependencyClass::Persistence,
            failure_threshold: 1,
            reset_timeout: Duration::from_secs(30),
            max_reset_timeout: Duration::from_secs(300),
            capabilities: vec![],
        }];
        let bank = BreakerBank::from_config(&config, EventBus::new(16));

        assert!(bank.persistence_writable());
        bank.record_failure("session-store");
        assert!(!bank.persistence_writable());
    }

    #[test]
    fn test_unknown_dependency_is_unguarded() {
        let bank = BreakerBank::from_config(&[], EventBus::new(16));
        assert_eq!(bank.try_acquire("nope"), Admission::Allowed { trial: false });
    }

    #[tokio::test]
    async fn test_transitions_published_on_bus() {
        let bus = EventBus::new(16);
        let mut receiver = bus.subscribe();
        let config = vec![DependencyConfig {
            name: "backend-api".to_string(),
            class: DependencyClass::Backend,
            failure_threshold: 1,
            reset_timeout: Duration::from_secs(30),
            max_reset_timeout: Duration::from_secs(300),
            capabilities: vec![],
        }];
        let bank = BreakerBank::from_config(&config, bus);

        bank.record_failure("backend-api");

        match receiver.try_recv().unwrap() {
            crate::domain::events::DomainEvent::Breaker(transition) => {
                assert_eq!(transition.dependency, "backend-api");
                assert_eq!(transition.to, BreakerState::Open);
            }
            other => panic!("wrong event type: {:?}", other),
        }
    }
}
