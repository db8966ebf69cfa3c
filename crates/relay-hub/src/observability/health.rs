//! Health endpoints for the Relay Hub
//!
//! - `GET /health` - liveness; 200 while the process can answer
//! - `GET /ready` - readiness; 200 only while the WebSocket listener is
//!   accepting and the hub loop is running, with a JSON breakdown either way
//! - `GET /metrics` - Prometheus text, see [`metrics_router`]

use crate::actors::HubActorHandle;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Readiness inputs shared between `main` and the health router.
#[derive(Debug, Default)]
pub struct HealthState {
    /// Set once the relay listener is bound, cleared when draining starts.
    accepting: AtomicBool,
    /// Cancelled together with the hub. `None` when no hub is attached.
    hub_token: Option<CancellationToken>,
}

/// Body of `GET /ready`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Readiness {
    pub ready: bool,
    pub accepting: bool,
    pub hub_running: bool,
}

impl HealthState {
    /// Not accepting, no hub attached.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track the given hub; readiness drops as soon as it is cancelled.
    #[must_use]
    pub fn for_hub(hub: &HubActorHandle) -> Self {
        Self {
            accepting: AtomicBool::new(false),
            hub_token: Some(hub.child_token()),
        }
    }

    pub fn mark_accepting(&self) {
        self.accepting.store(true, Ordering::SeqCst);
    }

    /// Called first thing on shutdown so load balancers stop routing here.
    pub fn mark_draining(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn hub_running(&self) -> bool {
        !self
            .hub_token
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    #[must_use]
    pub fn readiness(&self) -> Readiness {
        let accepting = self.accepting.load(Ordering::SeqCst);
        let hub_running = self.hub_running();
        Readiness {
            ready: accepting && hub_running,
            accepting,
            hub_running,
        }
    }
}

/// Router serving `/health` and `/ready`.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

/// `GET /metrics` in Prometheus text format.
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    )
}

async fn readiness_handler(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, Json<Readiness>) {
    let readiness = state.readiness();
    let status = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(readiness))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::{HubMetrics, HubSettings};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("Failed to build request");
        let response = app.oneshot(request).await.expect("Failed to execute request");
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    async fn readiness_of(state: &Arc<HealthState>) -> (StatusCode, serde_json::Value) {
        let (status, body) = get(health_router(Arc::clone(state)), "/ready").await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[test]
    fn test_new_state_is_not_ready() {
        let state = HealthState::new();
        assert!(state.hub_running(), "No hub attached counts as running");
        assert!(!state.readiness().ready);
    }

    #[tokio::test]
    async fn test_liveness_always_ok() {
        let state = Arc::new(HealthState::new());
        let (status, body) = get(health_router(state), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");
    }

    #[tokio::test]
    async fn test_readiness_follows_accepting_flag() {
        let state = Arc::new(HealthState::new());
        let (status, body) = readiness_of(&state).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["accepting"], false);

        state.mark_accepting();
        let (status, body) = readiness_of(&state).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ready"], true);

        state.mark_draining();
        let (status, _) = readiness_of(&state).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_readiness_drops_when_hub_stops() {
        let (hub, _task) = HubActorHandle::spawn(HubSettings::default(), HubMetrics::new());
        let state = Arc::new(HealthState::for_hub(&hub));
        state.mark_accepting();
        assert_eq!(readiness_of(&state).await.0, StatusCode::OK);

        hub.cancel();

        let (status, body) = readiness_of(&state).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["accepting"], true);
        assert_eq!(body["hub_running"], false);
    }

    #[tokio::test]
    async fn test_unknown_path_returns_404() {
        let state = Arc::new(HealthState::new());
        let (status, _) = get(health_router(state), "/unknown").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
