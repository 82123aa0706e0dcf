//! Storage Module
//!
//! The database handle the engine consumes. The whole surface is four
//! operations (catalog lookup, DDL, transactional insert, filtered query) plus
//! a table listing used by front ends to offer candidates for auditing.
//!
//! - [`PgAuditStore`]: PostgreSQL over a deadpool connection pool
//! - [`MemoryStore`]: in-process catalog and rows, for tests and embedders

pub mod memory;
pub mod postgres;
pub mod queries;

pub use memory::MemoryStore;
pub use postgres::PgAuditStore;

use crate::audit::{AuditAction, EventFilter};
use crate::error::AuditError;
use crate::schema::{CatalogColumn, ShadowSchema, TableRef};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One stored cell of a shadow row, keyed by shadow column name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Null,
    /// Non-sensitive value, carried in its text form
    Text(String),
    /// Encoded cipher frame
    Bytes(Vec<u8>),
}

/// A shadow-table row: audit metadata plus one cell per source column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowRow {
    pub audit_id: Uuid,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub cells: BTreeMap<String, Cell>,
}

/// Window into a filtered result set.
///
/// With `after` set, only rows strictly older than that
/// `(audit_timestamp, audit_id)` position are returned, so rows committed
/// while a listing is being paged cannot shift later pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
    pub after: Option<(DateTime<Utc>, Uuid)>,
}

impl Page {
    pub fn first(limit: i64, offset: i64) -> Self {
        Self {
            limit,
            offset,
            after: None,
        }
    }

    /// Next page after the last row already seen
    pub fn after(limit: i64, timestamp: DateTime<Utc>, audit_id: Uuid) -> Self {
        Self {
            limit,
            offset: 0,
            after: Some((timestamp, audit_id)),
        }
    }
}

/// Database handle consumed by the mirroring engine
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Catalog lookup. `None` when the relation does not exist.
    async fn lookup_table(
        &self,
        table: &TableRef,
    ) -> Result<Option<Vec<CatalogColumn>>, AuditError>;

    /// Base tables of a schema, shadow tables excluded
    async fn list_tables(&self, schema: &str) -> Result<Vec<TableRef>, AuditError>;

    /// Create the shadow table if it does not exist yet
    async fn create_table(&self, shadow: &ShadowSchema) -> Result<(), AuditError>;

    /// Insert one row in its own transaction
    async fn insert_row(&self, shadow: &ShadowSchema, row: &ShadowRow) -> Result<(), AuditError>;

    /// Rows matching the metadata filter, newest first
    async fn query_rows(
        &self,
        shadow: &ShadowSchema,
        filter: &EventFilter,
        page: Page,
    ) -> Result<Vec<ShadowRow>, AuditError>;
}
