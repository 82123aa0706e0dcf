//! In-memory store
//!
//! Catalog and rows behind one `RwLock`. Each insert happens entirely under
//! the write lock, so a row is either fully present or absent.

use crate::audit::EventFilter;
use crate::error::AuditError;
use crate::schema::shadow::AUDIT_ID;
use crate::schema::{CatalogColumn, ShadowSchema, TableRef};
use crate::store::{AuditStore, Cell, Page, ShadowRow};
use async_trait::async_trait;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default)]
struct MemoryTable {
    columns: Vec<CatalogColumn>,
    rows: Vec<ShadowRow>,
}

/// [`AuditStore`] kept entirely in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<BTreeMap<TableRef, MemoryTable>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table in the catalog, replacing any previous definition
    pub async fn create_source_table(&self, table: &TableRef, columns: Vec<CatalogColumn>) {
        let mut tables = self.tables.write().await;
        tables.insert(
            table.clone(),
            MemoryTable {
                columns,
                rows: Vec::new(),
            },
        );
    }

    /// Make every following DDL or insert fail as a storage outage would
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn row_count(&self, table: &TableRef) -> usize {
        let tables = self.tables.read().await;
        tables.get(table).map_or(0, |t| t.rows.len())
    }

    /// Stored cell of one row, bypassing the read path
    pub async fn cell(&self, table: &TableRef, audit_id: Uuid, column: &str) -> Option<Cell> {
        let tables = self.tables.read().await;
        tables
            .get(table)?
            .rows
            .iter()
            .find(|r| r.audit_id == audit_id)?
            .cells
            .get(column)
            .cloned()
    }

    /// Rewrite the raw bytes of a stored frame
    #[cfg(test)]
    pub async fn tamper_cell<F>(&self, table: &TableRef, audit_id: Uuid, column: &str, f: F)
    where
        F: FnOnce(&mut Vec<u8>),
    {
        let mut tables = self.tables.write().await;
        let cell = tables
            .get_mut(table)
            .and_then(|t| t.rows.iter_mut().find(|r| r.audit_id == audit_id))
            .and_then(|r| r.cells.get_mut(column));
        if let Some(Cell::Bytes(bytes)) = cell {
            f(bytes);
        }
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn lookup_table(
        &self,
        table: &TableRef,
    ) -> Result<Option<Vec<CatalogColumn>>, AuditError> {
        let tables = self.tables.read().await;
        Ok(tables.get(table).map(|t| t.columns.clone()))
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<TableRef>, AuditError> {
        let tables = self.tables.read().await;
        Ok(tables
            .keys()
            .filter(|t| t.schema == schema && !t.is_shadow())
            .cloned()
            .collect())
    }

    async fn create_table(&self, shadow: &ShadowSchema) -> Result<(), AuditError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AuditError::Persistence("simulated write failure".to_string()));
        }

        let mut tables = self.tables.write().await;
        tables.entry(shadow.table.clone()).or_insert_with(|| {
            let columns = shadow
                .columns
                .iter()
                .map(|c| {
                    let mut col = CatalogColumn::new(&c.name, &c.native_type, &c.native_type);
                    col.nullable = c.nullable;
                    col.is_primary_key = c.name == AUDIT_ID;
                    col
                })
                .collect();
            MemoryTable {
                columns,
                rows: Vec::new(),
            }
        });
        Ok(())
    }

    async fn insert_row(&self, shadow: &ShadowSchema, row: &ShadowRow) -> Result<(), AuditError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AuditError::Persistence("simulated write failure".to_string()));
        }

        let mut tables = self.tables.write().await;
        let table = tables.get_mut(&shadow.table).ok_or_else(|| {
            AuditError::Persistence(format!("relation {} does not exist", shadow.table))
        })?;

        if let Some(unknown) = row
            .cells
            .keys()
            .find(|name| !table.columns.iter().any(|c| &c.name == *name))
        {
            return Err(AuditError::Persistence(format!(
                "column {} of relation {} does not exist",
                unknown, shadow.table
            )));
        }
        if table.rows.iter().any(|r| r.audit_id == row.audit_id) {
            return Err(AuditError::Persistence(format!(
                "duplicate key value violates unique constraint on {}",
                AUDIT_ID
            )));
        }

        table.rows.push(row.clone());
        debug!("Inserted row {} into {}", row.audit_id, shadow.table);
        Ok(())
    }

    async fn query_rows(
        &self,
        shadow: &ShadowSchema,
        filter: &EventFilter,
        page: Page,
    ) -> Result<Vec<ShadowRow>, AuditError> {
        let tables = self.tables.read().await;
        let table = tables.get(&shadow.table).ok_or_else(|| {
            AuditError::Persistence(format!("relation {} does not exist", shadow.table))
        })?;

        let mut rows: Vec<&ShadowRow> = table
            .rows
            .iter()
            .filter(|r| filter.matches(&r.actor, r.action, r.timestamp))
            .filter(|r| page.after.map_or(true, |cursor| (r.timestamp, r.audit_id) < cursor))
            .collect();
        rows.sort_by_key(|r| Reverse((r.timestamp, r.audit_id)));

        Ok(rows
            .into_iter()
            .skip(page.offset.max(0) as usize)
            .take(page.limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
