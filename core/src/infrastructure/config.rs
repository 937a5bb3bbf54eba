// Copyright (c) 2026 Guidepost AI
// SPDX-License-Identifier: AGPL-3.0

// Core configuration surface.
//
// Everything the routing and resilience paths consult is supplied here:
// per-capability SLA budgets, breaker thresholds and timeouts, heartbeat
// interval and miss tolerance, context TTLs. No hidden defaults live in
// logic paths; tests override any of these values.

use crate::domain::capability::Capability;
use crate::domain::dependency::DependencyClass;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoreConfig {
    #[serde(default)]
    pub sla: SlaConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub context: ContextConfig,

    /// Named external dependencies guarded by breakers.
    #[serde(default)]
    pub dependencies: Vec<DependencyConfig>,
}

/// Per-capability response-time budgets. Budgets are per capability, not
/// per worker: security guidance can carry a tighter bound than deployment
/// guidance regardless of which worker serves it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaConfig {
    /// Budget applied to capabilities without an explicit entry.
    #[serde(default = "default_sla_ms")]
    pub default_budget_ms: u64,

    /// capability name -> budget in milliseconds
    #[serde(default)]
    pub capability_budgets_ms: HashMap<String, u64>,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            default_budget_ms: default_sla_ms(),
            capability_budgets_ms: HashMap::new(),
        }
    }
}

impl SlaConfig {
    pub fn budget_for(&self, capability: &Capability) -> Duration {
        let ms = self
            .capability_budgets_ms
            .get(capability.as_str())
            .copied()
            .unwrap_or(self.default_budget_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Expected interval between worker heartbeats.
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub interval: Duration,

    /// A worker missing this many consecutive intervals is marked
    /// unhealthy (excluded from candidates, not deregistered).
    #[serde(default = "default_miss_tolerance")]
    pub miss_tolerance: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: default_heartbeat_interval(),
            miss_tolerance: default_miss_tolerance(),
        }
    }
}

impl HeartbeatConfig {
    /// Window after which a silent worker is considered unhealthy.
    pub fn stale_window(&self) -> Duration {
        self.interval * self.miss_tolerance
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Default TTL for entries written without an explicit one.
    #[serde(with = "humantime_serde", default = "default_context_ttl")]
    pub default_ttl: Duration,

    /// Sessions idle longer than this are reaped wholesale.
    #[serde(with = "humantime_serde", default = "default_idle_max")]
    pub idle_max: Duration,

    /// Interval of the background sweep task.
    #[serde(with = "humantime_serde", default = "default_sweep_interval")]
    pub sweep_interval: Duration,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            default_ttl: default_context_ttl(),
            idle_max: default_idle_max(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyConfig {
    /// Unique dependency name (e.g. "backend-api").
    pub name: String,

    pub class: DependencyClass,

    /// Consecutive failures that trip the breaker open.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Time the breaker stays open before admitting a trial call.
    #[serde(with = "humantime_serde", default = "default_reset_timeout")]
    pub reset_timeout: Duration,

    /// Upper bound on the doubling reset timeout.
    #[serde(with = "humantime_serde", default = "default_max_reset_timeout")]
    pub max_reset_timeout: Duration,

    /// Capabilities whose dispatches cross this dependency.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl CoreConfig {
    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        let config: CoreConfig =
            serde_yaml::from_str(raw).context("failed to parse core configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml(&raw)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen = std::collections::HashSet::new();
        for dep in &self.dependencies {
            if dep.name.is_empty() {
                anyhow::bail!("dependency name cannot be empty");
            }
            if !seen.insert(dep.name.as_str()) {
                anyhow::bail!("duplicate dependency name '{}'", dep.name);
            }
            if dep.failure_threshold == 0 {
                anyhow::bail!("dependency '{}': failure_threshold must be >= 1", dep.name);
            }
            if dep.max_reset_timeout < dep.reset_timeout {
                anyhow::bail!(
                    "dependency '{}': max_reset_timeout below reset_timeout",
                    dep.name
                );
            }
            for capability in &dep.capabilities {
                Capability::parse(capability).with_context(|| {
                    format!("dependency '{}': invalid capability binding", dep.name)
                })?;
            }
        }
        if self.heartbeat.miss_tolerance == 0 {
            anyhow::bail!("heartbeat.miss_tolerance must be >= 1");
        }
        Ok(())
    }

    /// Dependency name bound to a capability, if any. Resolved once by the
    /// router at construction, not re-scanned per request.
    pub fn dependency_bindings(&self) -> HashMap<Capability, String> {
        let mut bindings = HashMap::new();
        for dep in &self.dependencies {
            for capability in &dep.capabilities {
                if let Ok(parsed) = Capability::parse(capability) {
                    bindings.insert(parsed, dep.name.clone());
                }
            }
        }
        bindings
    }
}

fn default_sla_ms() -> u64 {
    2000
}
fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(10)
}
fn default_miss_tolerance() -> u32 {
    3
}
fn default_context_ttl() -> Duration {
    Duration::from_secs(300)
}
fn default_idle_max() -> Duration {
    Duration::from_secs(600)
}
fn default_sweep_interval() -> Duration {
    Duration::from_secs(30)
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_reset_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_max_reset_timeout() -> Duration {
    Duration::from_secs(300)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.sla.default_budget_ms, 2000);
        assert_eq!(config.heartbeat.miss_tolerance, 3);
        assert_eq!(config.heartbeat.stale_window(), Duration::from_secs(30));
    }

    #[test]
    fn test_from_yaml() {
        let raw = r#"
sla:
  default_budget_ms: 3000
  capability_budgets_ms:
    security-guidance: 800
heartbeat:
  interval: 5s
  miss_tolerance: 2
dependencies:
  - name: backend-api
    class: backend
    failure_threshold: 5
    reset_timeout: 30s
    capabilities: [entity-guidance]
  - name: session-store
    class: persistence
"#;
        let config = CoreConfig::from_yaml(raw).unwrap();
        let security = Capability::parse("security-guidance").unwrap();
        let other = Capability::parse("deployment-guidance").unwrap();
        assert_eq!(config.sla.budget_for(&security), Duration::from_millis(800));
        assert_eq!(config.sla.budget_for(&other), Duration::from_millis(3000));
        assert_eq!(config.heartbeat.stale_window(), Duration::from_secs(10));

        let bindings = config.dependency_bindings();
        let entity = Capability::parse("entity-guidance").unwrap();
        assert_eq!(bindings.get(&entity).map(String::as_str), Some("backend-api"));
    }

    #[test]
    fn test_validate_rejects_duplicate_dependencies() {
        let raw = r#"
dependencies:
  - name: backend-api
    class: backend
  - name: backend-api
    class: backend
"#;
        assert!(CoreConfig::from_yaml(raw).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let raw = r#"
dependencies:
  - name: backend-api
    class: backend
    failure_threshold: 0
"#;
        assert!(CoreConfig::from_yaml(raw).is_err());
    }
}
