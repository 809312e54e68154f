use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::time::Instant;
use tracing::warn;

/// Liveness reporting for the asynchronous loops of a service.
///
/// Each loop registers a component and must report healthy more often
/// than its deadline. The process is healthy only while every
/// registered component has a live report, which is what the k8s
/// liveness probe reads. A loop that stalls (e.g. wedged on a hung
/// storage call) stops reporting and eventually fails the probe.
#[derive(Clone)]
pub struct HealthRegistry {
    name: &'static str,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentStatus {
    /// Set on registration, before the first report.
    Starting,
    /// Reported healthy; stale once the deadline passes.
    HealthyUntil(Instant),
    /// Reported unhealthy.
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_healthy(&self) -> bool {
        match self {
            ComponentStatus::HealthyUntil(until) => *until > Instant::now(),
            _ => false,
        }
    }
}

/// Per-component reporting handle. Cheap to clone and safe to call from
/// both async tasks and synchronous callbacks (e.g. rdkafka stats).
#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
}

impl HealthHandle {
    /// Report healthy until the component's deadline. Must be called
    /// more frequently than the deadline.
    pub fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            Instant::now() + self.deadline,
        ));
    }

    pub fn report_status(&self, status: ComponentStatus) {
        match self.components.write() {
            Ok(mut components) => {
                components.insert(self.component.clone(), status);
            }
            Err(err) => warn!("failed to report health status: {}", err),
        }
    }
}

/// Point-in-time view of the registry, rendered by the liveness endpoint.
#[derive(Debug)]
pub struct HealthStatus {
    pub healthy: bool,
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

impl HealthRegistry {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            components: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a component; it will be `Starting` until its first report.
    pub fn register(&self, component: impl Into<String>, deadline: Duration) -> HealthHandle {
        let component = component.into();
        if let Ok(mut components) = self.components.write() {
            components.insert(component.clone(), ComponentStatus::Starting);
        }
        HealthHandle {
            component,
            deadline,
            components: self.components.clone(),
        }
    }

    pub fn get_status(&self) -> HealthStatus {
        let components = self
            .components
            .read()
            .map(|c| c.clone())
            .unwrap_or_default();
        let healthy = !components.is_empty() && components.values().all(|s| s.is_healthy());
        if !healthy {
            warn!(registry = self.name, "liveness check failed: {components:?}");
        }
        HealthStatus {
            healthy,
            components,
        }
    }
}
