// Copyright (c) 2026 Guidepost AI
// SPDX-License-Identifier: AGPL-3.0

pub mod breaker;
pub mod config;
pub mod event_bus;

pub use breaker::{Admission, BreakerBank, BreakerSnapshot, CircuitBreaker};
pub use config::CoreConfig;
pub use event_bus::{EventBus, EventBusError, EventReceiver};
