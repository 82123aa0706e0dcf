//! Shadow Schema Builder
//!
//! Derives the audit-mirror table for a source table: non-sensitive columns are
//! copied verbatim, sensitive ones are replaced by a `bytea` column holding a
//! cipher frame, and four audit columns are appended.
//!
//! Derivation is a pure function of the source schema and the policy, so two
//! builds of the same input are always equal.

use crate::error::AuditError;
use crate::schema::{validate_identifier, ColumnDescriptor, SemanticType, SourceSchema, TableRef};
use crate::store::AuditStore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, warn};

pub const SHADOW_TABLE_PREFIX: &str = "aud_";
pub const ENCRYPTED_SUFFIX: &str = "_enc";

pub const AUDIT_ID: &str = "audit_id";
pub const AUDIT_ACTOR: &str = "audit_actor";
pub const AUDIT_TIMESTAMP: &str = "audit_timestamp";
pub const AUDIT_ACTION: &str = "audit_action";

pub const RESERVED_COLUMNS: [&str; 4] = [AUDIT_ID, AUDIT_ACTOR, AUDIT_TIMESTAMP, AUDIT_ACTION];

const BINARY_TYPE: &str = "bytea";

/// Column name fragments treated as sensitive by `default_patterns`
pub const DEFAULT_SENSITIVE_PATTERNS: &[&str] = &[
    "password", "passwd", "email", "correo", "phone", "telefono", "celular", "dni", "cedula",
    "ssn", "rfc", "card", "tarjeta", "account", "cuenta",
];

/// Which source columns get encrypted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "kind", content = "patterns")]
pub enum SensitivityPolicy {
    /// Everything except primary keys and generated columns
    #[default]
    AllExceptIdentifiers,
    /// Columns whose lower-cased name contains one of the patterns
    NamePatterns(Vec<String>),
}

impl SensitivityPolicy {
    pub fn default_patterns() -> Self {
        SensitivityPolicy::NamePatterns(
            DEFAULT_SENSITIVE_PATTERNS.iter().map(|p| p.to_string()).collect(),
        )
    }

    pub fn is_sensitive(&self, column: &ColumnDescriptor) -> bool {
        if column.identifier {
            return false;
        }
        match self {
            SensitivityPolicy::AllExceptIdentifiers => true,
            SensitivityPolicy::NamePatterns(patterns) => {
                let name = column.name.to_lowercase();
                patterns.iter().any(|p| name.contains(&p.to_lowercase()))
            }
        }
    }
}

/// Role of a shadow column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "source")]
pub enum ShadowColumnKind {
    /// Non-sensitive source column copied as-is
    Verbatim(String),
    /// Cipher frame of a sensitive source column
    Encrypted(String),
    AuditId,
    Actor,
    Timestamp,
    Action,
}

/// One column of a shadow table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShadowColumn {
    pub name: String,
    pub native_type: String,
    /// Semantic type of the mirrored source column
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<SemanticType>,
    pub nullable: bool,
    pub kind: ShadowColumnKind,
}

impl ShadowColumn {
    /// Source column this shadow column mirrors, if any
    pub fn source_column(&self) -> Option<&str> {
        match &self.kind {
            ShadowColumnKind::Verbatim(src) | ShadowColumnKind::Encrypted(src) => Some(src),
            _ => None,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self.kind, ShadowColumnKind::Encrypted(_))
    }
}

/// Derived shadow table definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShadowSchema {
    pub source: TableRef,
    pub table: TableRef,
    pub columns: Vec<ShadowColumn>,
}

impl ShadowSchema {
    /// Shadow columns that mirror source columns, in source order
    pub fn mirrored_columns(&self) -> impl Iterator<Item = &ShadowColumn> {
        self.columns.iter().filter(|c| c.source_column().is_some())
    }

    /// Shadow column for a given source column
    pub fn column_for_source(&self, source: &str) -> Option<&ShadowColumn> {
        self.columns.iter().find(|c| c.source_column() == Some(source))
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// SHA-256 over the ordered (name, type) pairs
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.table.to_string().as_bytes());
        for col in &self.columns {
            hasher.update(format!("|{}:{}", col.name, col.native_type).as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Deterministic name of the encrypted column for `table.column`
pub fn encrypted_column_name(table: &str, column: &str) -> String {
    format!("{}_{}{}", table, column, ENCRYPTED_SUFFIX)
}

/// Builds shadow schemas and makes sure they exist in storage
#[derive(Debug, Clone, Default)]
pub struct ShadowSchemaBuilder {
    policy: SensitivityPolicy,
}

impl ShadowSchemaBuilder {
    pub fn new(policy: SensitivityPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SensitivityPolicy {
        &self.policy
    }

    /// Derive the shadow schema for a source schema
    pub fn build_shadow(&self, source: &SourceSchema) -> Result<ShadowSchema, AuditError> {
        let table = source.table.shadow()?;
        let mut columns = Vec::with_capacity(source.columns.len() + RESERVED_COLUMNS.len());

        for col in &source.columns {
            if RESERVED_COLUMNS.contains(&col.name.as_str()) {
                return Err(AuditError::ColumnCollision(format!(
                    "source column '{}' uses a reserved audit column name",
                    col.name
                )));
            }

            let shadow_col = if self.policy.is_sensitive(col) {
                let name = encrypted_column_name(&source.table.name, &col.name);
                validate_identifier(&name)?;
                ShadowColumn {
                    name,
                    native_type: BINARY_TYPE.to_string(),
                    data_type: Some(col.data_type),
                    nullable: true,
                    kind: ShadowColumnKind::Encrypted(col.name.clone()),
                }
            } else {
                ShadowColumn {
                    name: col.name.clone(),
                    native_type: col.native_type.clone(),
                    data_type: Some(col.data_type),
                    nullable: true,
                    kind: ShadowColumnKind::Verbatim(col.name.clone()),
                }
            };
            columns.push(shadow_col);
        }

        columns.extend([
            audit_column(AUDIT_ID, "uuid", ShadowColumnKind::AuditId),
            audit_column(AUDIT_ACTOR, "text", ShadowColumnKind::Actor),
            audit_column(AUDIT_TIMESTAMP, "timestamp with time zone", ShadowColumnKind::Timestamp),
            audit_column(AUDIT_ACTION, "text", ShadowColumnKind::Action),
        ]);

        let mut seen = HashSet::new();
        for col in &columns {
            if !seen.insert(col.name.as_str()) {
                return Err(AuditError::ColumnCollision(format!(
                    "derived column '{}' appears more than once in {}",
                    col.name, table
                )));
            }
        }

        Ok(ShadowSchema {
            source: source.table.clone(),
            table,
            columns,
        })
    }

    /// Create the shadow table if absent; otherwise verify it matches
    pub async fn ensure_exists(
        &self,
        shadow: &ShadowSchema,
        db: &dyn AuditStore,
    ) -> Result<(), AuditError> {
        if db.lookup_table(&shadow.table).await?.is_none() {
            info!("Creating shadow table {} for {}", shadow.table, shadow.source);
            db.create_table(shadow).await?;
        }

        // Re-read even after creating: a concurrent attacher may have won the race
        let existing = db
            .lookup_table(&shadow.table)
            .await?
            .ok_or_else(|| AuditError::NotFound(shadow.table.to_string()))?;

        let expected: BTreeSet<(String, String)> = shadow
            .columns
            .iter()
            .map(|c| (c.name.clone(), c.native_type.clone()))
            .collect();
        let actual: BTreeSet<(String, String)> = existing
            .iter()
            .map(|c| (c.name.clone(), c.native_type.clone()))
            .collect();

        if expected != actual {
            let render = |set: Vec<&(String, String)>| {
                set.into_iter()
                    .map(|(name, ty)| format!("{} {}", name, ty))
                    .collect::<Vec<_>>()
            };
            let missing = render(expected.difference(&actual).collect());
            let unexpected = render(actual.difference(&expected).collect());
            warn!(
                "Schema drift on {}: missing {:?}, unexpected {:?}",
                shadow.table, missing, unexpected
            );
            return Err(AuditError::SchemaDrift {
                table: shadow.table.to_string(),
                missing,
                unexpected,
            });
        }

        debug!("Shadow table {} verified ({})", shadow.table, shadow.fingerprint());
        Ok(())
    }
}

fn audit_column(name: &str, native_type: &str, kind: ShadowColumnKind) -> ShadowColumn {
    ShadowColumn {
        name: name.to_string(),
        native_type: native_type.to_string(),
        data_type: None,
        nullable: false,
        kind,
    }
}
