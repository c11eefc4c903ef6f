//! HTTP routing: health endpoints and the websocket gateways.

mod health;

use axum::{http::Method, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::gateway;
use crate::state::AppState;

/// Create the main router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_origin(Any);

    Router::new()
        .merge(health::routes())
        .merge(gateway::routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::db::Store;
    use crate::gateway::{AgentHub, ResourceFeed};
    use crate::resources::ResourceRepository;
    use crate::{build_bus, Domain};

    fn router() -> (Router, AppState) {
        let store = Arc::new(Store::in_memory());
        let domain = Domain::new(
            "lab-01",
            ResourceRepository::new(store.clone()),
            store,
            AgentHub::default(),
            ResourceFeed::default(),
        );
        let state = AppState::new(domain, build_bus());
        (create_router(state.clone()), state)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_readyz_reports_counts() {
        let (app, _) = router();
        let (status, body) = get(app, "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["components"]["agents"], 0);
        assert_eq!(body["components"]["active_jobs"], 0);
    }

    #[tokio::test]
    async fn test_readyz_degraded_during_shutdown() {
        let (app, state) = router();
        state.request_shutdown();
        let (status, body) = get(app, "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "degraded");
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let (app, _) = router();
        let response = app
            .oneshot(Request::builder().uri("/v1/orgs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
