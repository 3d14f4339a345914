use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::metrics::Reporter;
use crate::store::OrderStore;

// ============================================================================
// Health Registry
// ============================================================================
//
// Components push their latest status here; /health reads a snapshot.
// - "repository": the periodic ping task
// - "kafka_consumer": the ingestion loop (fetch errors degrade it)
//
// ============================================================================

pub const COMPONENT_REPOSITORY: &str = "repository";
pub const COMPONENT_CONSUMER: &str = "kafka_consumer";

/// Health status of a component
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    #[cfg(test)]
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    #[serde(flatten)]
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub overall: HealthStatus,
    pub components: BTreeMap<String, ComponentHealth>,
    pub check_time: DateTime<Utc>,
}

#[derive(Default)]
pub struct HealthRegistry {
    components: RwLock<BTreeMap<String, ComponentHealth>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, component: &str, status: HealthStatus) {
        let mut components = self.components.write().unwrap_or_else(PoisonError::into_inner);
        let changed = components
            .get(component)
            .map_or(true, |previous| previous.status != status);

        if changed {
            tracing::info!(component = component, status = ?status, "Component health changed");
        }

        components.insert(
            component.to_string(),
            ComponentHealth { status, last_check: Utc::now() },
        );
    }

    #[cfg(test)]
    pub fn status_of(&self, component: &str) -> Option<HealthStatus> {
        self.components
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(component)
            .map(|c| c.status.clone())
    }

    pub fn snapshot(&self) -> SystemHealth {
        let components = self.components.read().unwrap_or_else(PoisonError::into_inner).clone();
        SystemHealth {
            overall: overall_status(&components),
            components,
            check_time: Utc::now(),
        }
    }
}

fn overall_status(components: &BTreeMap<String, ComponentHealth>) -> HealthStatus {
    let mut has_degraded = false;
    let mut unhealthy_components = Vec::new();

    for (name, health) in components {
        match &health.status {
            HealthStatus::Unhealthy(msg) => unhealthy_components.push(format!("{}: {}", name, msg)),
            HealthStatus::Degraded(_) => has_degraded = true,
            HealthStatus::Healthy => {}
        }
    }

    if !unhealthy_components.is_empty() {
        HealthStatus::Unhealthy(unhealthy_components.join(", "))
    } else if has_degraded {
        HealthStatus::Degraded("Some components degraded".to_string())
    } else {
        HealthStatus::Healthy
    }
}

// ============================================================================
// Repository Ping Task
// ============================================================================

/// Ping the store every `interval` (first probe immediately) and publish the
/// outcome to the `repository_up` gauge and the registry.
pub fn spawn_repository_ping(
    store: Arc<dyn OrderStore>,
    reporter: Arc<dyn Reporter>,
    registry: Arc<HealthRegistry>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match store.ping().await {
                        Ok(()) => {
                            reporter.set_up(true);
                            registry.update(COMPONENT_REPOSITORY, HealthStatus::Healthy);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Repository ping failed");
                            reporter.set_up(false);
                            registry.update(COMPONENT_REPOSITORY, HealthStatus::Unhealthy(e.to_string()));
                        }
                    }
                }
            }
        }

        tracing::info!("Repository ping stopped");
    })
}
