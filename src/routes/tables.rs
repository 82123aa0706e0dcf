//! Table routes
//!
//! Listing auditable tables, attaching them and reporting their audit setup.

use crate::auth::{require_role, Claims, Role};
use crate::error::{validation_error, ApiResult};
use crate::mirror::{AuditStatus, BulkAttachReport};
use crate::models::{
    AttachResponse, AttachTablesRequest, ListTablesQuery, SuccessResponse, TableListResponse,
};
use crate::state::SharedState;
use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use tracing::{debug, info};
use validator::Validate;

/// GET /api/tables
pub async fn list_tables(
    State(state): State<SharedState>,
    Query(query): Query<ListTablesQuery>,
) -> ApiResult<Json<SuccessResponse<TableListResponse>>> {
    let schema = query
        .schema
        .unwrap_or_else(|| state.mirror.default_schema().to_string());
    debug!("Listing auditable tables in {}", schema);

    let tables = state
        .mirror
        .list_auditable_tables(state.store.as_ref(), Some(schema.as_str()))
        .await?;

    Ok(Json(SuccessResponse::with_data(
        format!("Found {} tables", tables.len()),
        TableListResponse { schema, tables },
    )))
}

/// POST /api/tables/attach
pub async fn attach_tables(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<AttachTablesRequest>,
) -> ApiResult<Json<SuccessResponse<BulkAttachReport>>> {
    require_role(&claims, Role::Admin)?;
    payload
        .validate()
        .map_err(|e| validation_error(e.to_string()))?;

    info!("{} attaching {} tables", claims.sub, payload.tables.len());
    let report = state
        .mirror
        .attach_many(state.store.as_ref(), &payload.tables)
        .await;

    Ok(Json(SuccessResponse::with_data(
        format!(
            "{} attached, {} failed",
            report.attached.len(),
            report.failed.len()
        ),
        report,
    )))
}

/// POST /api/tables/{table}/attach
pub async fn attach_table(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(table): Path<String>,
) -> ApiResult<Json<SuccessResponse<AttachResponse>>> {
    require_role(&claims, Role::Admin)?;

    let shadow = state.mirror.attach(state.store.as_ref(), &table).await?;

    Ok(Json(SuccessResponse::with_data(
        format!("{} is mirrored into {}", shadow.source, shadow.table),
        AttachResponse::from(shadow.as_ref()),
    )))
}

/// GET /api/tables/{table}/status
pub async fn table_status(
    State(state): State<SharedState>,
    Path(table): Path<String>,
) -> ApiResult<Json<SuccessResponse<AuditStatus>>> {
    let status = state.mirror.status(state.store.as_ref(), &table).await?;

    Ok(Json(SuccessResponse::with_data(
        format!("Audit status of {}", status.table),
        status,
    )))
}
