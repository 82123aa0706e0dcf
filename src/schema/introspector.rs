//! Schema Introspection
//!
//! Reads a source table's column definitions from the catalog and maps every
//! column onto a [`SemanticType`]. Read-only.

use crate::error::AuditError;
use crate::schema::{CatalogColumn, SemanticType, TableRef};
use crate::store::AuditStore;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Column of a source table, immutable once read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: SemanticType,
    /// Declared type, reused verbatim for non-sensitive shadow columns
    pub native_type: String,
    pub nullable: bool,
    /// Primary key or system-generated column
    pub identifier: bool,
}

impl ColumnDescriptor {
    /// Map one catalog column; fails on types outside the semantic table
    pub fn from_catalog(column: &CatalogColumn) -> Result<Self, AuditError> {
        let data_type = SemanticType::from_native(&column.type_name).ok_or_else(|| {
            AuditError::UnsupportedType {
                column: column.name.clone(),
                native_type: column.native_type.clone(),
            }
        })?;

        Ok(Self {
            name: column.name.clone(),
            data_type,
            native_type: column.native_type.clone(),
            nullable: column.nullable,
            identifier: column.is_primary_key || column.is_generated,
        })
    }
}

/// Ordered column list of a source table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSchema {
    pub table: TableRef,
    pub columns: Vec<ColumnDescriptor>,
}

impl SourceSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Schema introspector over any [`AuditStore`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaIntrospector;

impl SchemaIntrospector {
    pub fn new() -> Self {
        Self
    }

    /// Describe a source table in catalog order
    pub async fn describe(
        &self,
        db: &dyn AuditStore,
        table: &TableRef,
    ) -> Result<SourceSchema, AuditError> {
        let catalog = db
            .lookup_table(table)
            .await?
            .ok_or_else(|| AuditError::NotFound(table.to_string()))?;

        let columns = catalog
            .iter()
            .map(ColumnDescriptor::from_catalog)
            .collect::<Result<Vec<_>, _>>()?;

        debug!("Introspected {} with {} columns", table, columns.len());

        Ok(SourceSchema {
            table: table.clone(),
            columns,
        })
    }
}
