//! Mirror Orchestrator
//!
//! Per-table lifecycle of audit mirroring:
//!
//! ```text
//! Uninitialized --ensure_shadow--> ShadowEnsured --attach--> Active
//! ```
//!
//! `attach` runs both transitions. There is no way back to `Uninitialized`.
//! Only `Active` tables accept captured writes and view requests.
//!
//! The orchestrator holds the cipher engine and the cache of derived shadow
//! schemas; the database handle is passed into every call.

use crate::audit::{AuditEvent, AuditReader, AuditRecorder, EventFilter, EventListing, RowId};
use crate::crypto::{CipherEngine, KeyMaterial};
use crate::error::AuditError;
use crate::schema::{
    SchemaIntrospector, SensitivityPolicy, ShadowSchema, ShadowSchemaBuilder, TableRef,
};
use crate::store::AuditStore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const DEFAULT_SCHEMA: &str = "public";

/// Lifecycle state of one source table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachState {
    Uninitialized,
    ShadowEnsured,
    Active,
}

#[derive(Debug, Clone)]
struct TableEntry {
    state: AttachState,
    shadow: Arc<ShadowSchema>,
}

/// One table of a bulk attach that succeeded
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachOutcome {
    pub table: TableRef,
    pub shadow_table: TableRef,
    pub fingerprint: String,
}

/// One table of a bulk attach that failed
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachFailure {
    pub table: String,
    pub error: String,
    /// The table itself is unusable as defined; retrying will not help
    pub schema_error: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkAttachReport {
    pub attached: Vec<AttachOutcome>,
    pub failed: Vec<AttachFailure>,
}

/// Snapshot of one table's audit setup
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStatus {
    pub table: TableRef,
    pub shadow_table: TableRef,
    pub source_exists: bool,
    pub shadow_exists: bool,
    pub state: AttachState,
    pub fingerprint: Option<String>,
    pub encrypted_columns: Vec<String>,
}

pub struct MirrorOrchestrator {
    engine: CipherEngine,
    introspector: SchemaIntrospector,
    builder: ShadowSchemaBuilder,
    recorder: AuditRecorder,
    reader: AuditReader,
    default_schema: String,
    tables: RwLock<HashMap<TableRef, TableEntry>>,
}

impl MirrorOrchestrator {
    pub fn new(key: &KeyMaterial, policy: SensitivityPolicy) -> Self {
        Self {
            engine: CipherEngine::new(key),
            introspector: SchemaIntrospector::new(),
            builder: ShadowSchemaBuilder::new(policy),
            recorder: AuditRecorder::new(),
            reader: AuditReader::new(),
            default_schema: DEFAULT_SCHEMA.to_string(),
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Schema used for unqualified table names
    pub fn with_default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = schema.into();
        self
    }

    pub fn default_schema(&self) -> &str {
        &self.default_schema
    }

    pub fn policy(&self) -> &SensitivityPolicy {
        self.builder.policy()
    }

    /// Parse a table name, rejecting shadow tables
    pub fn resolve(&self, raw: &str) -> Result<TableRef, AuditError> {
        let table = TableRef::parse(raw, &self.default_schema)?;
        if table.is_shadow() {
            return Err(AuditError::InvalidIdentifier(format!(
                "{} is a shadow table and cannot be audited itself",
                table
            )));
        }
        Ok(table)
    }

    pub async fn state(&self, table: &TableRef) -> AttachState {
        self.tables
            .read()
            .await
            .get(table)
            .map_or(AttachState::Uninitialized, |e| e.state)
    }

    /// Uninitialized -> ShadowEnsured: introspect, derive, create or verify
    pub async fn ensure_shadow(
        &self,
        db: &dyn AuditStore,
        table: &str,
    ) -> Result<Arc<ShadowSchema>, AuditError> {
        let table = self.resolve(table)?;
        if let Some(entry) = self.tables.read().await.get(&table) {
            return Ok(Arc::clone(&entry.shadow));
        }

        let source = self.introspector.describe(db, &table).await?;
        let shadow = Arc::new(self.builder.build_shadow(&source)?);
        self.builder.ensure_exists(&shadow, db).await?;

        let mut tables = self.tables.write().await;
        // a concurrent call may have finished first; keep its entry
        let entry = tables.entry(table).or_insert_with(|| TableEntry {
            state: AttachState::ShadowEnsured,
            shadow,
        });
        Ok(Arc::clone(&entry.shadow))
    }

    /// Bring a table to `Active`. Re-attaching returns the cached schema.
    pub async fn attach(
        &self,
        db: &dyn AuditStore,
        table: &str,
    ) -> Result<Arc<ShadowSchema>, AuditError> {
        let table_ref = self.resolve(table)?;
        if let Some(entry) = self.tables.read().await.get(&table_ref) {
            if entry.state == AttachState::Active {
                debug!("{} already attached", table_ref);
                return Ok(Arc::clone(&entry.shadow));
            }
        }

        let shadow = self.ensure_shadow(db, table).await?;

        let mut tables = self.tables.write().await;
        if let Some(entry) = tables.get_mut(&table_ref) {
            if entry.state != AttachState::Active {
                entry.state = AttachState::Active;
                info!(
                    "Attached {} -> {} ({} columns, fingerprint {})",
                    shadow.source,
                    shadow.table,
                    shadow.columns.len(),
                    shadow.fingerprint()
                );
            }
        }
        Ok(shadow)
    }

    /// Attach each table in turn, continuing past failures
    pub async fn attach_many(&self, db: &dyn AuditStore, tables: &[String]) -> BulkAttachReport {
        let mut report = BulkAttachReport::default();

        for raw in tables {
            match self.attach(db, raw).await {
                Ok(shadow) => report.attached.push(AttachOutcome {
                    table: shadow.source.clone(),
                    shadow_table: shadow.table.clone(),
                    fingerprint: shadow.fingerprint(),
                }),
                Err(e) => {
                    warn!("Failed to attach {}: {}", raw, e);
                    report.failed.push(AttachFailure {
                        table: raw.clone(),
                        error: e.to_string(),
                        schema_error: e.is_schema_error(),
                    });
                }
            }
        }

        info!(
            "Bulk attach finished: {} attached, {} failed",
            report.attached.len(),
            report.failed.len()
        );
        report
    }

    /// Shadow schema of an `Active` table
    pub async fn active_schema(&self, table: &TableRef) -> Result<Arc<ShadowSchema>, AuditError> {
        match self.tables.read().await.get(table) {
            Some(entry) if entry.state == AttachState::Active => Ok(Arc::clone(&entry.shadow)),
            _ => Err(AuditError::NotAttached(table.to_string())),
        }
    }

    /// Record one write against an attached table
    pub async fn capture_write(
        &self,
        db: &dyn AuditStore,
        table: &str,
        event: AuditEvent,
    ) -> Result<RowId, AuditError> {
        let table = self.resolve(table)?;
        let shadow = self.active_schema(&table).await?;
        self.recorder.record(db, event, &shadow, &self.engine).await
    }

    /// Lazy, decrypting listing of an attached table's audit trail
    pub async fn view_events<'a>(
        &'a self,
        db: &'a dyn AuditStore,
        table: &str,
        filter: EventFilter,
    ) -> Result<EventListing<'a>, AuditError> {
        filter.validate()?;
        let table = self.resolve(table)?;
        let shadow = self.active_schema(&table).await?;

        info!(
            "Audit view on {}: actor={:?} action={:?} from={:?} to={:?} limit={} offset={}",
            table,
            filter.actor,
            filter.action,
            filter.from,
            filter.to,
            filter.effective_limit(),
            filter.effective_offset()
        );

        Ok(self.reader.list_events(db, shadow, &self.engine, filter))
    }

    pub async fn status(
        &self,
        db: &dyn AuditStore,
        table: &str,
    ) -> Result<AuditStatus, AuditError> {
        let table = self.resolve(table)?;
        let shadow_table = table.shadow()?;

        let source_exists = db.lookup_table(&table).await?.is_some();
        let shadow_exists = db.lookup_table(&shadow_table).await?.is_some();

        let entry = self.tables.read().await.get(&table).cloned();
        let (state, fingerprint, encrypted_columns) = match entry {
            Some(entry) => (
                entry.state,
                Some(entry.shadow.fingerprint()),
                entry
                    .shadow
                    .columns
                    .iter()
                    .filter(|c| c.is_encrypted())
                    .map(|c| c.name.clone())
                    .collect(),
            ),
            None => (AttachState::Uninitialized, None, Vec::new()),
        };

        Ok(AuditStatus {
            table,
            shadow_table,
            source_exists,
            shadow_exists,
            state,
            fingerprint,
            encrypted_columns,
        })
    }

    /// Source tables of a schema that could be attached
    pub async fn list_auditable_tables(
        &self,
        db: &dyn AuditStore,
        schema: Option<&str>,
    ) -> Result<Vec<TableRef>, AuditError> {
        let schema = schema.unwrap_or(&self.default_schema);
        crate::schema::validate_identifier(schema)?;
        db.list_tables(schema).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditAction, FieldView};
    use crate::schema::CatalogColumn;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;
    use tokio_test::assert_ok;

    async fn accounts_db() -> MemoryStore {
        let db = MemoryStore::new();
        db.create_source_table(
            &TableRef::new("public", "accounts"),
            vec![
                CatalogColumn::new("id", "int4", "integer").primary_key(),
                CatalogColumn::new("balance", "numeric", "numeric"),
                CatalogColumn::new("owner", "text", "text"),
            ],
        )
        .await;
        db
    }

    fn orchestrator() -> MirrorOrchestrator {
        MirrorOrchestrator::new(&KeyMaterial::generate(), SensitivityPolicy::default())
    }

    #[tokio::test]
    async fn test_attach_accounts() {
        let db = accounts_db().await;
        let mirror = orchestrator();

        let shadow = mirror.attach(&db, "accounts").await.unwrap();
        assert_eq!(
            shadow.column_names(),
            vec![
                "id",
                "accounts_balance_enc",
                "accounts_owner_enc",
                "audit_id",
                "audit_actor",
                "audit_timestamp",
                "audit_action",
            ]
        );
        assert!(db
            .lookup_table(&TableRef::new("public", "aud_accounts"))
            .await
            .unwrap()
            .is_some());
        assert_eq!(
            mirror.state(&TableRef::new("public", "accounts")).await,
            AttachState::Active
        );
    }

    #[tokio::test]
    async fn test_attach_twice_returns_same_schema() {
        let db = accounts_db().await;
        let mirror = orchestrator();

        let first = mirror.attach(&db, "accounts").await.unwrap();
        let second = assert_ok!(mirror.attach(&db, "public.accounts").await);
        assert!(Arc::ptr_eq(&first, &second));

        // a fresh process against an existing shadow table must not see drift
        let other = orchestrator();
        let third = assert_ok!(other.attach(&db, "accounts").await);
        assert_eq!(*first, *third);
    }

    #[tokio::test]
    async fn test_capture_then_view() {
        let db = accounts_db().await;
        let mirror = orchestrator();
        mirror.attach(&db, "accounts").await.unwrap();

        let event = AuditEvent::new("alice", AuditAction::Update)
            .with_field("balance", "500")
            .with_field("owner", "bob");
        mirror.capture_write(&db, "accounts", event).await.unwrap();

        let events = mirror
            .view_events(&db, "accounts", EventFilter::by_actor("alice"))
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].actor, "alice");
        assert_eq!(events[0].action, AuditAction::Update);
        assert_eq!(events[0].field("balance"), Some(&FieldView::Value("500".into())));
        assert_eq!(events[0].field("owner"), Some(&FieldView::Value("bob".into())));
    }

    #[tokio::test]
    async fn test_corrupted_balance_keeps_owner_visible() {
        let db = accounts_db().await;
        let mirror = orchestrator();
        let shadow = mirror.attach(&db, "accounts").await.unwrap();

        let event = AuditEvent::new("alice", AuditAction::Update)
            .with_field("balance", "500")
            .with_field("owner", "bob");
        let row = mirror.capture_write(&db, "accounts", event).await.unwrap();

        db.tamper_cell(&shadow.table, row.0, "accounts_balance_enc", |bytes| {
            bytes[5] ^= 0x10;
        })
        .await;

        let events = mirror
            .view_events(&db, "accounts", EventFilter::default())
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert!(events[0].field("balance").unwrap().is_decryption_error());
        assert_eq!(events[0].field("owner"), Some(&FieldView::Value("bob".into())));
    }

    #[tokio::test]
    async fn test_schema_errors_abort_attach() {
        let db = accounts_db().await;
        db.create_source_table(
            &TableRef::new("public", "places"),
            vec![CatalogColumn::new("shape", "geometry", "geometry")],
        )
        .await;
        let mirror = orchestrator();

        assert!(matches!(
            mirror.attach(&db, "ghost").await,
            Err(AuditError::NotFound(_))
        ));
        assert!(matches!(
            mirror.attach(&db, "places").await,
            Err(AuditError::UnsupportedType { .. })
        ));
        assert_eq!(
            mirror.state(&TableRef::new("public", "places")).await,
            AttachState::Uninitialized
        );

        // shadow left behind by an older definition of accounts
        db.create_source_table(
            &TableRef::new("public", "aud_accounts"),
            vec![CatalogColumn::new("audit_id", "uuid", "uuid")],
        )
        .await;
        assert!(matches!(
            mirror.attach(&db, "accounts").await,
            Err(AuditError::SchemaDrift { .. })
        ));
    }

    #[tokio::test]
    async fn test_state_machine_gates_writes() {
        let db = accounts_db().await;
        let mirror = orchestrator();
        let table = TableRef::new("public", "accounts");
        let event = || AuditEvent::new("alice", AuditAction::Insert).with_field("owner", "bob");

        assert_eq!(mirror.state(&table).await, AttachState::Uninitialized);
        assert!(matches!(
            mirror.capture_write(&db, "accounts", event()).await,
            Err(AuditError::NotAttached(_))
        ));

        mirror.ensure_shadow(&db, "accounts").await.unwrap();
        assert_eq!(mirror.state(&table).await, AttachState::ShadowEnsured);
        assert!(matches!(
            mirror.view_events(&db, "accounts", EventFilter::default()).await,
            Err(AuditError::NotAttached(_))
        ));

        mirror.attach(&db, "accounts").await.unwrap();
        assert_eq!(mirror.state(&table).await, AttachState::Active);
        assert_ok!(mirror.capture_write(&db, "accounts", event()).await);
    }

    #[tokio::test]
    async fn test_attach_many_continues_past_failures() {
        let db = accounts_db().await;
        let mirror = orchestrator();
        let report = mirror
            .attach_many(
                &db,
                &["ghost".to_string(), "accounts".to_string(), "bad name".to_string()],
            )
            .await;

        assert_eq!(report.attached.len(), 1);
        assert_eq!(report.attached[0].table, TableRef::new("public", "accounts"));
        let failed: Vec<_> = report.failed.iter().map(|f| f.table.as_str()).collect();
        assert_eq!(failed, vec!["ghost", "bad name"]);
        assert!(report.failed.iter().all(|f| f.schema_error));
    }

    #[tokio::test]
    async fn test_attach_many_flags_storage_failures() {
        let db = accounts_db().await;
        let mirror = orchestrator();
        db.fail_writes(true);

        let report = mirror.attach_many(&db, &["accounts".to_string()]).await;
        assert!(report.attached.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert!(!report.failed[0].schema_error);
    }

    #[tokio::test]
    async fn test_status_and_listing() {
        let db = accounts_db().await;
        let mirror = orchestrator();

        let before = mirror.status(&db, "accounts").await.unwrap();
        assert!(before.source_exists);
        assert!(!before.shadow_exists);
        assert_eq!(before.state, AttachState::Uninitialized);
        assert_eq!(before.fingerprint, None);

        let shadow = mirror.attach(&db, "accounts").await.unwrap();
        let after = mirror.status(&db, "accounts").await.unwrap();
        assert!(after.shadow_exists);
        assert_eq!(after.state, AttachState::Active);
        assert_eq!(after.fingerprint, Some(shadow.fingerprint()));
        assert_eq!(
            after.encrypted_columns,
            vec!["accounts_balance_enc", "accounts_owner_enc"]
        );

        let tables = mirror.list_auditable_tables(&db, None).await.unwrap();
        assert_eq!(tables, vec![TableRef::new("public", "accounts")]);
    }

    #[tokio::test]
    async fn test_shadow_tables_cannot_be_attached() {
        let mirror = orchestrator();
        assert!(matches!(
            mirror.resolve("aud_accounts"),
            Err(AuditError::InvalidIdentifier(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_captures() {
        let db = Arc::new(accounts_db().await);
        let mirror = Arc::new(orchestrator());
        mirror.attach(db.as_ref(), "accounts").await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let db = Arc::clone(&db);
            let mirror = Arc::clone(&mirror);
            handles.push(tokio::spawn(async move {
                let event = AuditEvent::new(format!("user{}", i % 4), AuditAction::Insert)
                    .with_field("id", i.to_string())
                    .with_field("owner", format!("owner{}", i));
                mirror.capture_write(db.as_ref(), "accounts", event).await
            }));
        }
        for handle in handles {
            assert_ok!(handle.await.unwrap());
        }

        let events = mirror
            .view_events(db.as_ref(), "accounts", EventFilter::default())
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(events.len(), 16);
        assert!(events.iter().all(|e| {
            matches!(e.field("owner"), Some(FieldView::Value(v)) if v.starts_with("owner"))
        }));
    }
}
