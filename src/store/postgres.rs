//! PostgreSQL store
//!
//! [`AuditStore`] over a deadpool connection pool. Each insert runs in its own
//! transaction; a dropped future before commit rolls the transaction back.

use crate::audit::{AuditAction, EventFilter};
use crate::config::DatabaseSettings;
use crate::error::AuditError;
use crate::schema::{CatalogColumn, ShadowSchema, TableRef};
use crate::store::queries::{self, SqlBuilder};
use crate::store::{AuditStore, Cell, Page, ShadowRow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

/// Number of audit metadata columns leading every SELECT
const META_COLUMNS: usize = 4;

pub struct PgAuditStore {
    pool: Pool,
}

impl PgAuditStore {
    /// Build the pool, with TLS when the settings ask for it, and verify it
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, AuditError> {
        let mut cfg = Config::new();
        cfg.host = Some(settings.host.clone());
        cfg.port = Some(settings.port);
        cfg.user = Some(settings.user.clone());
        cfg.password = Some(settings.password.clone());
        cfg.dbname = Some(settings.database.clone());
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(settings.max_connections));
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = if settings.use_tls {
            let certs = rustls_native_certs::load_native_certs();
            let mut root_store = rustls::RootCertStore::empty();
            for cert in certs.certs {
                root_store.add(cert).ok();
            }

            let tls_config = rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth();
            let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

            cfg.create_pool(Some(Runtime::Tokio1), tls)
        } else {
            cfg.create_pool(Some(Runtime::Tokio1), tokio_postgres::NoTls)
        }
        .map_err(|e| AuditError::Config(format!("Failed to create pool: {}", e)))?;

        let client = pool.get().await?;
        client.query_one("SELECT 1", &[]).await?;
        drop(client);

        info!(
            "Database pool ready for {}:{}/{} (TLS: {})",
            settings.host, settings.port, settings.database, settings.use_tls
        );
        Ok(Self { pool })
    }

    fn decode_row(
        shadow: &ShadowSchema,
        row: &tokio_postgres::Row,
    ) -> Result<ShadowRow, AuditError> {
        let audit_id: Uuid = row.try_get(0)?;
        let actor: String = row.try_get(1)?;
        let timestamp: DateTime<Utc> = row.try_get(2)?;
        let action: String = row.try_get(3)?;
        let action: AuditAction = action
            .parse()
            .map_err(|_| {
                AuditError::Persistence(format!("stored action '{}' is invalid", action))
            })?;

        let mut cells = BTreeMap::new();
        for (i, col) in shadow.mirrored_columns().enumerate() {
            let idx = META_COLUMNS + i;
            let cell = if col.is_encrypted() {
                row.try_get::<_, Option<Vec<u8>>>(idx)?
                    .map_or(Cell::Null, Cell::Bytes)
            } else {
                row.try_get::<_, Option<String>>(idx)?
                    .map_or(Cell::Null, Cell::Text)
            };
            cells.insert(col.name.clone(), cell);
        }

        Ok(ShadowRow {
            audit_id,
            actor,
            timestamp,
            action,
            cells,
        })
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn lookup_table(
        &self,
        table: &TableRef,
    ) -> Result<Option<Vec<CatalogColumn>>, AuditError> {
        let client = self.pool.get().await?;

        let exists: bool = client
            .query_one(queries::TABLE_EXISTS, &[&table.schema, &table.name])
            .await?
            .try_get(0)?;
        if !exists {
            return Ok(None);
        }

        let rows = client
            .query(queries::GET_COLUMNS, &[&table.schema, &table.name])
            .await?;

        let columns = rows
            .iter()
            .map(|r| -> Result<CatalogColumn, AuditError> {
                Ok(CatalogColumn {
                    name: r.try_get(0)?,
                    native_type: r.try_get(1)?,
                    type_name: r.try_get(2)?,
                    nullable: r.try_get(3)?,
                    is_primary_key: r.try_get(4)?,
                    is_generated: r.try_get(5)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!("Catalog lookup {}: {} columns", table, columns.len());
        Ok(Some(columns))
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<TableRef>, AuditError> {
        let client = self.pool.get().await?;
        let rows = client.query(queries::LIST_TABLES, &[&schema]).await?;

        rows.iter()
            .map(|r| -> Result<TableRef, AuditError> {
                Ok(TableRef::new(r.try_get::<_, String>(0)?, r.try_get::<_, String>(1)?))
            })
            .collect()
    }

    async fn create_table(&self, shadow: &ShadowSchema) -> Result<(), AuditError> {
        let client = self.pool.get().await?;
        let ddl = SqlBuilder::create_shadow_table(shadow);
        debug!("DDL: {}", ddl);
        client.batch_execute(&ddl).await?;
        Ok(())
    }

    async fn insert_row(&self, shadow: &ShadowSchema, row: &ShadowRow) -> Result<(), AuditError> {
        let stmt = SqlBuilder::insert_row(shadow, row);

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        tx.execute(stmt.sql.as_str(), &stmt.param_refs()).await?;
        tx.commit().await?;

        debug!("Committed row {} into {}", row.audit_id, shadow.table);
        Ok(())
    }

    async fn query_rows(
        &self,
        shadow: &ShadowSchema,
        filter: &EventFilter,
        page: Page,
    ) -> Result<Vec<ShadowRow>, AuditError> {
        let stmt = SqlBuilder::select_rows(shadow, filter, page);

        let client = self.pool.get().await?;
        let rows = client.query(stmt.sql.as_str(), &stmt.param_refs()).await?;

        rows.iter().map(|r| Self::decode_row(shadow, r)).collect()
    }
}
