//! Audit Recorder
//!
//! Turns one [`AuditEvent`] into one shadow row. Every sensitive value is
//! encrypted before anything reaches storage, and the row is handed to the
//! store as a whole so it commits or rolls back as a unit.

use crate::audit::{AuditEvent, RowId};
use crate::crypto::{AssociatedData, CipherEngine};
use crate::error::AuditError;
use crate::schema::ShadowSchema;
use crate::store::{AuditStore, Cell, ShadowRow};
use std::collections::BTreeMap;
use tracing::{debug, error, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default)]
pub struct AuditRecorder;

impl AuditRecorder {
    pub fn new() -> Self {
        Self
    }

    /// Encrypt and persist one event. Storage errors are returned unretried.
    pub async fn record(
        &self,
        db: &dyn AuditStore,
        event: AuditEvent,
        shadow: &ShadowSchema,
        engine: &CipherEngine,
    ) -> Result<RowId, AuditError> {
        event.validate(shadow)?;

        let audit_id = Uuid::new_v4();
        let row = Self::seal_row(audit_id, event, shadow, engine)?;

        if let Err(e) = db.insert_row(shadow, &row).await {
            error!("Failed to record {} on {}: {}", row.action, shadow.table, e);
            return Err(e);
        }

        info!(
            "Recorded {} on {} by {} ({})",
            row.action, shadow.source, row.actor, audit_id
        );
        Ok(RowId(audit_id))
    }

    /// Build the shadow row, encrypting sensitive cells under `audit_id`
    fn seal_row(
        audit_id: Uuid,
        event: AuditEvent,
        shadow: &ShadowSchema,
        engine: &CipherEngine,
    ) -> Result<ShadowRow, AuditError> {
        let AuditEvent {
            actor,
            action,
            timestamp,
            mut fields,
        } = event;

        let mut cells = BTreeMap::new();
        let mut encrypted = 0usize;

        for column in shadow.mirrored_columns() {
            let Some(source) = column.source_column() else {
                continue;
            };

            let cell = match fields.remove(source).flatten() {
                None => Cell::Null,
                Some(value) if column.is_encrypted() => {
                    let aad = AssociatedData::for_field(&shadow.table, source, &audit_id);
                    let frame = engine.encrypt_field(value.as_bytes(), &aad)?;
                    encrypted += 1;
                    Cell::Bytes(frame.encode())
                }
                Some(value) => Cell::Text(value),
            };
            cells.insert(column.name.clone(), cell);
        }

        debug!(
            "Sealed row {} for {}: {} cells, {} encrypted",
            audit_id,
            shadow.table,
            cells.len(),
            encrypted
        );

        Ok(ShadowRow {
            audit_id,
            actor,
            timestamp,
            action,
            cells,
        })
    }
}
