//! Health reporting for the components of a Fireworq daemon (queue
//! dispatchers, config watchers). Grounded on `common/health/src/lib.rs`'s
//! `HealthRegistry`/`HealthHandle`/`ComponentStatus` pattern, adapted to
//! `std::time::Instant` instead of the `time` crate: this workspace has
//! no other use for `time`, and `Instant` carries the same "healthy
//! until" deadline without adding a dependency.
//!
//! An arbitrary number of components register and report their health
//! independently. The registry's overall status is the combination of
//! them: unhealthy if any component is unhealthy or has gone stale past
//! its deadline, healthy once every registered component has reported
//! in time.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Default, Debug)]
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

#[derive(Debug, Clone, PartialEq)]
pub enum ComponentStatus {
    /// Set automatically when a component is newly registered.
    Starting,
    HealthyUntil(Instant),
    Unhealthy,
    /// Set automatically once a `HealthyUntil` deadline has passed.
    Stalled,
}

impl ComponentStatus {
    pub fn is_healthy(&self) -> bool {
        match self {
            ComponentStatus::HealthyUntil(until) => Instant::now() < *until,
            _ => false,
        }
    }
}

struct HealthMessage {
    component: String,
    status: ComponentStatus,
}

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthHandle {
    /// Must be called more frequently than the registered deadline.
    pub async fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(Instant::now() + self.deadline)).await
    }

    pub async fn report_status(&self, status: ComponentStatus) {
        let message = HealthMessage {
            component: self.component.clone(),
            status,
        };
        if let Err(e) = self.sender.send(message).await {
            warn!(error = %e, "Failed to report health status");
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum HealthStrategy {
    /// All components must be healthy for the registry to be healthy.
    All,
    /// At least one component must be healthy for the registry to be healthy.
    Any,
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    strategy: HealthStrategy,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
    sender: mpsc::Sender<HealthMessage>,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self::new_with_strategy(name, HealthStrategy::All)
    }

    pub fn new_with_strategy(name: &str, strategy: HealthStrategy) -> Self {
        let (tx, mut rx) = mpsc::channel::<HealthMessage>(16);
        let registry = HealthRegistry {
            name: name.to_owned(),
            strategy,
            components: Arc::new(RwLock::new(HashMap::new())),
            sender: tx,
        };

        let components = registry.components.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match components.write() {
                    Ok(mut map) => {
                        map.insert(message.component, message.status);
                    }
                    Err(_) => warn!("Poisoned HealthRegistry mutex"),
                }
            }
        });

        registry
    }

    /// Registers a new component, returning a handle the component
    /// should use to report its health at least once per `deadline`.
    pub async fn register(&self, component: String, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component,
            deadline,
            sender: self.sender.clone(),
        };
        handle.report_status(ComponentStatus::Starting).await;
        handle
    }

    /// The overall process status, computed from every currently
    /// registered component. Usable directly as an axum handler body
    /// via `IntoResponse`.
    pub fn get_status(&self) -> HealthStatus {
        let components = self.components.read().expect("poisoned HealthRegistry mutex");
        let now = Instant::now();

        let mut result = HealthStatus {
            healthy: !components.is_empty() && self.strategy == HealthStrategy::All,
            components: HashMap::new(),
        };

        for (name, status) in components.iter() {
            match status {
                ComponentStatus::HealthyUntil(until) => {
                    if *until > now {
                        if self.strategy == HealthStrategy::Any {
                            result.healthy = true;
                        }
                        result.components.insert(name.clone(), status.clone());
                    } else {
                        if self.strategy == HealthStrategy::All {
                            result.healthy = false;
                        }
                        result.components.insert(name.clone(), ComponentStatus::Stalled);
                    }
                }
                _ => {
                    if self.strategy == HealthStrategy::All {
                        result.healthy = false;
                    }
                    result.components.insert(name.clone(), status.clone());
                }
            }
        }

        if !result.healthy {
            warn!(registry = %self.name, components = ?result.components, "Health check failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn assert_or_retry<F: Fn() -> bool>(check: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !check() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(check());
    }

    #[tokio::test]
    async fn defaults_to_unhealthy() {
        let registry = HealthRegistry::new("test");
        assert!(!registry.get_status().healthy);
    }

    #[tokio::test]
    async fn one_component_goes_healthy_then_unhealthy() {
        let registry = HealthRegistry::new("test");
        let handle = registry.register("one".to_string(), Duration::from_secs(30)).await;
        assert_or_retry(|| registry.get_status().components.len() == 1).await;
        assert!(!registry.get_status().healthy);

        handle.report_healthy().await;
        assert_or_retry(|| registry.get_status().healthy).await;

        handle.report_status(ComponentStatus::Unhealthy).await;
        assert_or_retry(|| !registry.get_status().healthy).await;
    }

    #[tokio::test]
    async fn stale_component_is_stalled() {
        let registry = HealthRegistry::new("test");
        let handle = registry.register("one".to_string(), Duration::from_secs(30)).await;
        handle.report_status(ComponentStatus::HealthyUntil(Instant::now() - Duration::from_secs(1))).await;
        assert_or_retry(|| !registry.get_status().healthy).await;
        assert_eq!(registry.get_status().components.get("one"), Some(&ComponentStatus::Stalled));
    }

    #[tokio::test]
    async fn any_strategy_is_healthy_if_one_component_is() {
        let registry = HealthRegistry::new_with_strategy("test", HealthStrategy::Any);
        let handle1 = registry.register("one".to_string(), Duration::from_secs(30)).await;
        let handle2 = registry.register("two".to_string(), Duration::from_secs(30)).await;
        assert_or_retry(|| registry.get_status().components.len() == 2).await;
        assert!(!registry.get_status().healthy);

        handle1.report_healthy().await;
        assert_or_retry(|| registry.get_status().healthy).await;

        handle2.report_status(ComponentStatus::Unhealthy).await;
        assert_or_retry(|| registry.get_status().healthy).await;

        handle1.report_status(ComponentStatus::Unhealthy).await;
        assert_or_retry(|| !registry.get_status().healthy).await;
    }

    #[tokio::test]
    async fn into_response_maps_health_to_status_code() {
        let unhealthy = HealthStatus::default().into_response();
        assert_eq!(unhealthy.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let healthy = HealthStatus {
            healthy: true,
            components: HashMap::new(),
        }
        .into_response();
        assert_eq!(healthy.status(), StatusCode::OK);
    }
}
