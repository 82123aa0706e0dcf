//! Route definitions and router setup
//!
//! Configures all API routes and middleware. Everything under `/api`
//! requires a bearer token.

mod events;
mod tables;

use crate::auth::auth_middleware;
use crate::config::CorsConfig;
use crate::state::SharedState;
use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::MakeRequestUuid,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::Level;

/// Create the application router with all routes and middleware
pub fn create_router(state: SharedState, cors: &CorsConfig) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let stack = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(trace_layer)
        .layer(CompressionLayer::new())
        .layer(build_cors_layer(cors))
        .propagate_x_request_id();

    let api = Router::new()
        .route("/api/tables", get(tables::list_tables))
        .route("/api/tables/attach", post(tables::attach_tables))
        .route("/api/tables/{table}/attach", post(tables::attach_table))
        .route("/api/tables/{table}/status", get(tables::table_status))
        .route(
            "/api/tables/{table}/events",
            post(events::capture_event).get(events::list_events),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health_check))
        .merge(api)
        .layer(stack)
        .with_state(state)
}

/// Build CORS layer from settings
fn build_cors_layer(cors: &CorsConfig) -> CorsLayer {
    let origins: Vec<_> = cors
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let layer = if origins.is_empty() {
        CorsLayer::new().allow_origin(Any)
    } else {
        CorsLayer::new().allow_origin(origins)
    };

    layer
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .max_age(Duration::from_secs(3600))
}

/// Health check endpoint
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "success": true,
        "message": "Server is running fine.",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{create_token, Role};
    use crate::crypto::KeyMaterial;
    use crate::mirror::MirrorOrchestrator;
    use crate::schema::{CatalogColumn, SensitivityPolicy, TableRef};
    use crate::state::AppState;
    use crate::store::MemoryStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    const SECRET: &str = "router-test-secret";

    async fn app() -> Router {
        let store = MemoryStore::new();
        store
            .create_source_table(
                &TableRef::new("public", "accounts"),
                vec![
                    CatalogColumn::new("id", "int4", "integer").primary_key(),
                    CatalogColumn::new("owner", "text", "text"),
                ],
            )
            .await;

        let mirror = MirrorOrchestrator::new(
            &KeyMaterial::generate(),
            SensitivityPolicy::AllExceptIdentifiers,
        );
        let state = Arc::new(AppState::new(
            Arc::new(store),
            mirror,
            SECRET.to_string(),
        ));
        create_router(state, &CorsConfig::default())
    }

    fn request(method: &str, uri: &str, role: Option<Role>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(role) = role {
            let token = create_token(SECRET, "alice", role).unwrap();
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let response = app()
            .await
            .oneshot(request("GET", "/health", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_requires_token() {
        let response = app()
            .await
            .oneshot(request("GET", "/api/tables", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_roles_gate_routes() {
        let app = app().await;

        let response = app
            .clone()
            .oneshot(request("POST", "/api/tables/accounts/attach", Some(Role::Recorder), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(request("GET", "/api/tables/accounts/events", Some(Role::Recorder), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_attach_capture_and_view() {
        let app = app().await;

        let response = app
            .clone()
            .oneshot(request("POST", "/api/tables/accounts/attach", Some(Role::Admin), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["shadowTable"]["name"], "aud_accounts");

        let capture = serde_json::json!({
            "action": "INSERT",
            "fields": { "id": "1", "owner": "alice@example.com" }
        });
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/tables/accounts/events",
                Some(Role::Recorder),
                Some(capture),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(request(
                "GET",
                "/api/tables/accounts/events?action=insert",
                Some(Role::Auditor),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["events"][0]["actor"], "alice");
        assert_eq!(body["events"][0]["fields"]["owner"]["value"], "alice@example.com");
    }

    #[tokio::test]
    async fn test_mistyped_clear_text_value_is_bad_request() {
        let app = app().await;
        app.clone()
            .oneshot(request("POST", "/api/tables/accounts/attach", Some(Role::Admin), None))
            .await
            .unwrap();

        let capture = serde_json::json!({ "action": "INSERT", "fields": { "id": "abc" } });
        let response = app
            .oneshot(request(
                "POST",
                "/api/tables/accounts/events",
                Some(Role::Recorder),
                Some(capture),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json(response).await;
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_capture_before_attach_conflicts() {
        let capture = serde_json::json!({ "action": "DELETE", "fields": { "id": "1" } });
        let response = app()
            .await
            .oneshot(request(
                "POST",
                "/api/tables/accounts/events",
                Some(Role::Admin),
                Some(capture),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
