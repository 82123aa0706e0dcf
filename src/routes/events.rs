//! Audit event routes
//!
//! Capturing writes into a shadow table and reading the decrypted trail back.

use crate::audit::AuditEvent;
use crate::auth::{require_role, Claims, Role};
use crate::error::{validation_error, ApiResult};
use crate::models::{
    CaptureEventRequest, CaptureResponse, EventListResponse, EventQuery, SuccessResponse,
};
use crate::state::SharedState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use tracing::debug;
use validator::Validate;

/// POST /api/tables/{table}/events
///
/// The token subject becomes `audit_actor`.
pub async fn capture_event(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(table): Path<String>,
    Json(payload): Json<CaptureEventRequest>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<CaptureResponse>>)> {
    require_role(&claims, Role::Recorder)?;
    payload
        .validate()
        .map_err(|e| validation_error(e.to_string()))?;

    let mut event = AuditEvent::new(claims.sub.clone(), payload.action);
    event.fields = payload.fields;

    let audit_id = state
        .mirror
        .capture_write(state.store.as_ref(), &table, event)
        .await?;
    let table = state.mirror.resolve(&table)?;
    debug!("Captured {} on {} as {}", payload.action, table, audit_id);

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::with_data(
            "Write captured",
            CaptureResponse { table, audit_id },
        )),
    ))
}

/// GET /api/tables/{table}/events
pub async fn list_events(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(table): Path<String>,
    Query(query): Query<EventQuery>,
) -> ApiResult<Json<SuccessResponse<EventListResponse>>> {
    require_role(&claims, Role::Auditor)?;
    let filter = query.into_filter()?;

    let listing = state
        .mirror
        .view_events(state.store.as_ref(), &table, filter)
        .await?;
    let events = listing.collect().await?;
    let table = listing.shadow().source.clone();

    Ok(Json(SuccessResponse::with_data(
        format!("Found {} events", events.len()),
        EventListResponse {
            table,
            count: events.len(),
            events,
        },
    )))
}
