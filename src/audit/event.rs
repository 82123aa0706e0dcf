//! Audit event types
//!
//! Write side: [`AuditEvent`] in, [`RowId`] out.
//! Read side: [`EventFilter`] in, [`AuditEventView`] out.

use crate::error::AuditError;
use crate::schema::ShadowSchema;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of write being audited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    Insert,
    Update,
    Delete,
}

impl AuditAction {
    pub const ALL: [AuditAction; 3] = [
        AuditAction::Insert,
        AuditAction::Update,
        AuditAction::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Insert => "INSERT",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Ok(AuditAction::Insert),
            "UPDATE" => Ok(AuditAction::Update),
            "DELETE" => Ok(AuditAction::Delete),
            other => Err(AuditError::Validation(format!(
                "Unknown audit action '{}', expected INSERT, UPDATE or DELETE",
                other
            ))),
        }
    }
}

/// One intercepted write. Consumed by the recorder, never retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    pub actor: String,
    pub action: AuditAction,
    pub timestamp: DateTime<Utc>,
    /// Source column name to plaintext value; `None` is SQL NULL
    pub fields: BTreeMap<String, Option<String>>,
}

impl AuditEvent {
    /// New event stamped with the current time
    pub fn new(actor: impl Into<String>, action: AuditAction) -> Self {
        Self {
            actor: actor.into(),
            action,
            timestamp: Utc::now(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(column.into(), Some(value.into()));
        self
    }

    pub fn with_null(mut self, column: impl Into<String>) -> Self {
        self.fields.insert(column.into(), None);
        self
    }

    /// Check the event against the shadow schema it is about to be written to
    pub fn validate(&self, shadow: &ShadowSchema) -> Result<(), AuditError> {
        if self.actor.trim().is_empty() {
            return Err(AuditError::Validation("Audit actor must not be empty".to_string()));
        }

        let unknown: Vec<&str> = self
            .fields
            .keys()
            .filter(|name| shadow.column_for_source(name).is_none())
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(AuditError::Validation(format!(
                "Unknown columns for {}: {}",
                shadow.source,
                unknown.join(", ")
            )));
        }

        // clear-text values reach the database as typed literals
        for (name, value) in &self.fields {
            let (Some(column), Some(value)) = (shadow.column_for_source(name), value) else {
                continue;
            };
            if column.is_encrypted() {
                continue;
            }
            if let Some(data_type) = column.data_type {
                data_type
                    .check_literal(&column.native_type, value)
                    .map_err(|e| AuditError::Validation(format!("Column {}: {}", name, e)))?;
            }
        }

        Ok(())
    }
}

/// Row key of a recorded event (the shadow row's `audit_id`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(pub Uuid);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Filter over the clear-text audit metadata columns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    pub actor: Option<String>,
    pub action: Option<AuditAction>,
    /// Inclusive lower bound
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl EventFilter {
    pub const DEFAULT_LIMIT: i64 = 100;
    pub const MAX_LIMIT: i64 = 1000;

    pub fn by_actor(actor: impl Into<String>) -> Self {
        Self {
            actor: Some(actor.into()),
            ..Default::default()
        }
    }

    pub fn action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Requested limit, clamped to `1..=MAX_LIMIT`
    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    /// Evaluate against one row's metadata
    pub fn matches(&self, actor: &str, action: AuditAction, timestamp: DateTime<Utc>) -> bool {
        self.actor.as_deref().map_or(true, |a| a == actor)
            && self.action.map_or(true, |a| a == action)
            && self.from.map_or(true, |from| timestamp >= from)
            && self.to.map_or(true, |to| timestamp <= to)
    }

    pub fn validate(&self) -> Result<(), AuditError> {
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(AuditError::Validation(
                    "'from' must not be later than 'to'".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// A field as rendered on the read path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "value")]
pub enum FieldView {
    Value(String),
    Null,
    /// The cell could not be decrypted; the reason never includes plaintext
    DecryptionError(String),
}

impl FieldView {
    pub fn value(&self) -> Option<&str> {
        match self {
            FieldView::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_decryption_error(&self) -> bool {
        matches!(self, FieldView::DecryptionError(_))
    }
}

/// One audit row with its sensitive fields decrypted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEventView {
    pub audit_id: Uuid,
    pub actor: String,
    pub action: AuditAction,
    pub timestamp: DateTime<Utc>,
    /// Keyed by source column name
    pub fields: BTreeMap<String, FieldView>,
}

impl AuditEventView {
    pub fn field(&self, column: &str) -> Option<&FieldView> {
        self.fields.get(column)
    }
}
