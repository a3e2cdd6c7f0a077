use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

// ============================================================================
// Component Health
// ============================================================================
//
// Routers and workers report their lifecycle here; the metrics server
// exposes the aggregate on /health.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub overall_status: HealthStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub check_time: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn update(&self, component: &str, status: HealthStatus, details: Option<String>) {
        tracing::debug!(component = %component, status = ?status, "Updated component health");

        let health = ComponentHealth {
            name: component.to_string(),
            status,
            last_check: Utc::now(),
            details,
        };
        self.components
            .write()
            .await
            .insert(component.to_string(), health);
    }

    pub async fn snapshot(&self) -> SystemHealth {
        let components = self.components.read().await.clone();

        SystemHealth {
            overall_status: overall_status(&components),
            components,
            check_time: Utc::now(),
        }
    }
}

fn overall_status(components: &HashMap<String, ComponentHealth>) -> HealthStatus {
    let mut unhealthy: Vec<String> = components
        .values()
        .filter_map(|health| match &health.status {
            HealthStatus::Unhealthy(reason) => Some(format!("{}: {}", health.name, reason)),
            _ => None,
        })
        .collect();

    if !unhealthy.is_empty() {
        unhealthy.sort();
        return HealthStatus::Unhealthy(unhealthy.join(", "));
    }

    let degraded = components
        .values()
        .any(|health| matches!(health.status, HealthStatus::Degraded(_)));

    if degraded {
        HealthStatus::Degraded("Some components degraded".to_string())
    } else {
        HealthStatus::Healthy
    }
}
