//! Schema Module
//!
//! Everything that describes tables rather than rows:
//! - Table references and identifier rules
//! - Native to semantic type mapping
//! - Source table introspection
//! - Shadow schema derivation and drift checks

pub mod introspector;
pub mod shadow;
pub mod types;

pub use introspector::{ColumnDescriptor, SchemaIntrospector, SourceSchema};
pub use shadow::{
    SensitivityPolicy, ShadowColumn, ShadowColumnKind, ShadowSchema, ShadowSchemaBuilder,
};
pub use types::SemanticType;

use crate::error::AuditError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// PostgreSQL truncates identifiers beyond NAMEDATALEN - 1 bytes
pub const MAX_IDENTIFIER_LEN: usize = 63;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").expect("identifier regex is valid"));

/// Validate a table or column identifier
pub fn validate_identifier(ident: &str) -> Result<(), AuditError> {
    if ident.is_empty() {
        return Err(AuditError::InvalidIdentifier("identifier is empty".to_string()));
    }
    if ident.len() > MAX_IDENTIFIER_LEN {
        return Err(AuditError::InvalidIdentifier(format!(
            "'{}' exceeds {} bytes",
            ident, MAX_IDENTIFIER_LEN
        )));
    }
    if !IDENTIFIER_RE.is_match(ident) {
        return Err(AuditError::InvalidIdentifier(format!(
            "'{}' contains unsupported characters",
            ident
        )));
    }
    Ok(())
}

/// A schema-qualified table name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Parse `schema.table` or a bare `table` (placed in `default_schema`)
    pub fn parse(raw: &str, default_schema: &str) -> Result<Self, AuditError> {
        let raw = raw.trim();
        let table = match raw.split_once('.') {
            Some((schema, name)) => Self::new(schema, name),
            None => Self::new(default_schema, raw),
        };
        validate_identifier(&table.schema)?;
        validate_identifier(&table.name)?;
        Ok(table)
    }

    /// Shadow tables live next to their source as `aud_<table>`
    pub fn shadow(&self) -> Result<TableRef, AuditError> {
        let name = format!("{}{}", shadow::SHADOW_TABLE_PREFIX, self.name);
        validate_identifier(&name)?;
        Ok(TableRef::new(self.schema.clone(), name))
    }

    pub fn is_shadow(&self) -> bool {
        self.name.starts_with(shadow::SHADOW_TABLE_PREFIX)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// A column as the catalog reports it, before semantic mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogColumn {
    pub name: String,
    /// Full type as the engine prints it, e.g. `character varying(255)`
    pub native_type: String,
    /// Base type name, e.g. `varchar`
    pub type_name: String,
    pub nullable: bool,
    pub is_primary_key: bool,
    /// Identity column or `nextval(...)` default
    pub is_generated: bool,
}

impl CatalogColumn {
    pub fn new(name: &str, type_name: &str, native_type: &str) -> Self {
        Self {
            name: name.to_string(),
            native_type: native_type.to_string(),
            type_name: type_name.to_string(),
            nullable: true,
            is_primary_key: false,
            is_generated: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.nullable = false;
        self
    }
}
