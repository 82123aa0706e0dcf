//! Data models and DTOs (Data Transfer Objects)
//!
//! Request/response structures of the HTTP front end.

use crate::audit::{AuditAction, AuditEventView, EventFilter, RowId};
use crate::error::{validation_error, AuditError};
use crate::schema::{ShadowColumn, ShadowSchema, TableRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

/// Generic success response
#[derive(Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub data: Option<T>,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn with_data(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

/// Query for listing auditable tables
#[derive(Debug, Deserialize)]
pub struct ListTablesQuery {
    pub schema: Option<String>,
}

/// Response containing auditable tables
#[derive(Debug, Serialize)]
pub struct TableListResponse {
    pub schema: String,
    pub tables: Vec<TableRef>,
}

/// Request to attach several tables at once
#[derive(Debug, Deserialize, Validate)]
pub struct AttachTablesRequest {
    #[validate(length(min = 1, max = 100, message = "Between 1 and 100 tables per request"))]
    pub tables: Vec<String>,
}

/// Shadow schema of an attached table
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachResponse {
    pub table: TableRef,
    pub shadow_table: TableRef,
    pub fingerprint: String,
    pub columns: Vec<ShadowColumn>,
}

impl From<&ShadowSchema> for AttachResponse {
    fn from(shadow: &ShadowSchema) -> Self {
        Self {
            table: shadow.source.clone(),
            shadow_table: shadow.table.clone(),
            fingerprint: shadow.fingerprint(),
            columns: shadow.columns.clone(),
        }
    }
}

/// One captured write. The actor is taken from the bearer token.
#[derive(Debug, Deserialize, Validate)]
pub struct CaptureEventRequest {
    pub action: AuditAction,

    #[validate(length(min = 1, message = "At least one field is required"))]
    pub fields: BTreeMap<String, Option<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResponse {
    pub table: TableRef,
    pub audit_id: RowId,
}

/// Query string of the audit view
#[derive(Debug, Default, Deserialize, Validate)]
pub struct EventQuery {
    #[validate(length(min = 1, message = "Actor must not be empty"))]
    pub actor: Option<String>,

    pub action: Option<String>,

    pub from: Option<DateTime<Utc>>,

    pub to: Option<DateTime<Utc>>,

    #[validate(range(min = 1, max = 1000, message = "Limit must be between 1 and 1000"))]
    pub limit: Option<i64>,

    #[validate(range(min = 0, message = "Offset must not be negative"))]
    pub offset: Option<i64>,
}

impl EventQuery {
    pub fn into_filter(self) -> Result<EventFilter, AuditError> {
        self.validate().map_err(|e| validation_error(e.to_string()))?;

        let action = self.action.as_deref().map(str::parse).transpose()?;
        let filter = EventFilter {
            actor: self.actor,
            action,
            from: self.from,
            to: self.to,
            limit: self.limit,
            offset: self.offset,
        };
        filter.validate()?;
        Ok(filter)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventListResponse {
    pub table: TableRef,
    pub count: usize,
    pub events: Vec<AuditEventView>,
}
