// Copyright (c) 2026 Guidepost AI
// SPDX-License-Identifier: AGPL-3.0

// Assembly point wiring the registry, breaker bank, router, collaboration
// controller, and context manager from one configuration.

use crate::infrastructure::breaker::BreakerBank;
use crate::infrastructure::config::CoreConfig;
use crate::infrastructure::event_bus::EventBus;
use std::sync::Arc;

use super::collaboration::CollaborationController;
use super::context::ContextManager;
use super::registry::CapabilityRegistry;
use super::router::RequestRouter;

pub struct CoreServices {
    pub bus: EventBus,
    pub registry: Arc<CapabilityRegistry>,
    pub bank: Arc<BreakerBank>,
    pub router: Arc<RequestRouter>,
    pub collaboration: Arc<CollaborationController>,
    pub context: Arc<ContextManager>,
}

impl CoreServices {
    pub fn new(config: CoreConfig) -> Self {
        let bus = EventBus::with_default_capacity();
        let registry = Arc::new(CapabilityRegistry::new(config.heartbeat.clone()));
        let bank = Arc::new(BreakerBank::from_config(&config.dependencies, bus.clone()));
        let router = Arc::new(RequestRouter::new(
            Arc::clone(&registry),
            Arc::clone(&bank),
            bus.clone(),
            config.sla.clone(),
            config.dependency_bindings(),
        ));
        let collaboration = Arc::new(CollaborationController::new(
            Arc::clone(&router),
            Arc::clone(&registry),
        ));
        let context = Arc::new(ContextManager::new(Arc::clone(&bank), config.context.clone()));
        Self {
            bus,
            registry,
            bank,
            router,
            collaboration,
            context,
        }
    }

    /// Start the background tasks: context sweeping and registry staleness
    /// marking. Returns their handles so callers can abort on shutdown.
    pub fn spawn_background(&self, heartbeat_interval: std::time::Duration) -> Vec<tokio::task::JoinHandle<()>> {
        let sweeper = self.context.spawn_sweeper();
        let registry = Arc::clone(&self.registry);
        let staleness = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                registry.sweep_stale();
            }
        });
        vec![sweeper, staleness]
    }
}
