//! Audit Reader
//!
//! The only path that turns stored cipher frames back into plaintext.
//! Filtering runs on the clear-text metadata columns; decryption happens per
//! field after the rows are fetched, and a field that fails to decrypt is
//! reported in place instead of failing the row.

use crate::audit::{AuditEventView, EventFilter, FieldView};
use crate::crypto::{AssociatedData, CipherEngine};
use crate::error::AuditError;
use crate::schema::ShadowSchema;
use crate::store::{AuditStore, Cell, Page, ShadowRow};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Rows fetched per storage round trip
pub const PAGE_SIZE: i64 = 50;

#[derive(Debug, Clone, Copy, Default)]
pub struct AuditReader;

impl AuditReader {
    pub fn new() -> Self {
        Self
    }

    /// Lazy listing of the events matching `filter`. Nothing is read until
    /// the listing is streamed or collected.
    pub fn list_events<'a>(
        &self,
        db: &'a dyn AuditStore,
        shadow: Arc<ShadowSchema>,
        engine: &'a CipherEngine,
        filter: EventFilter,
    ) -> EventListing<'a> {
        EventListing {
            db,
            shadow,
            engine,
            filter,
        }
    }

    /// Decrypt one stored row into a view
    pub fn render(shadow: &ShadowSchema, engine: &CipherEngine, row: ShadowRow) -> AuditEventView {
        let mut fields = BTreeMap::new();

        for column in shadow.mirrored_columns() {
            let Some(source) = column.source_column() else {
                continue;
            };

            let view = match row.cells.get(&column.name) {
                None | Some(Cell::Null) => FieldView::Null,
                Some(Cell::Bytes(encoded)) if column.is_encrypted() => {
                    let aad = AssociatedData::for_field(&shadow.table, source, &row.audit_id);
                    match engine.decrypt_encoded(encoded, &aad) {
                        Ok(plain) => match String::from_utf8(plain) {
                            Ok(value) => FieldView::Value(value),
                            Err(_) => FieldView::DecryptionError(
                                "decrypted value is not valid UTF-8".to_string(),
                            ),
                        },
                        Err(e) => {
                            warn!(
                                "Field {} of {} row {} failed to decrypt: {}",
                                source, shadow.table, row.audit_id, e
                            );
                            FieldView::DecryptionError(e.to_string())
                        }
                    }
                }
                Some(Cell::Text(_)) if column.is_encrypted() => FieldView::DecryptionError(
                    "expected a cipher frame, found clear text".to_string(),
                ),
                Some(Cell::Text(value)) => FieldView::Value(value.clone()),
                Some(Cell::Bytes(_)) => FieldView::DecryptionError(
                    "unexpected binary cell in a clear-text column".to_string(),
                ),
            };
            fields.insert(source.to_string(), view);
        }

        AuditEventView {
            audit_id: row.audit_id,
            actor: row.actor,
            action: row.action,
            timestamp: row.timestamp,
            fields,
        }
    }
}

/// Finite, restartable sequence of audit events.
///
/// Every call to [`EventListing::stream`] re-runs the underlying query, so
/// two passes may differ if rows were recorded in between.
pub struct EventListing<'a> {
    db: &'a dyn AuditStore,
    shadow: Arc<ShadowSchema>,
    engine: &'a CipherEngine,
    filter: EventFilter,
}

impl<'a> EventListing<'a> {
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    pub fn shadow(&self) -> &ShadowSchema {
        &self.shadow
    }

    /// Fresh pass over the matching events, fetched page by page.
    ///
    /// The user offset applies to the first page only; later pages continue
    /// strictly after the last row seen, so writes committed mid-pass never
    /// make a row appear twice.
    pub fn stream(&self) -> BoxStream<'a, Result<AuditEventView, AuditError>> {
        let db = self.db;
        let shadow = Arc::clone(&self.shadow);
        let engine = self.engine;
        let filter = self.filter.clone();
        let start = Cursor {
            remaining: filter.effective_limit(),
            page: Page::first(PAGE_SIZE, filter.effective_offset()),
        };

        stream::try_unfold(start, move |cursor| {
            fetch_page(db, Arc::clone(&shadow), engine, filter.clone(), cursor)
        })
        .map_ok(|views| stream::iter(views.into_iter().map(Ok::<_, AuditError>)))
        .try_flatten()
        .boxed()
    }

    /// Drain one pass into memory
    pub async fn collect(&self) -> Result<Vec<AuditEventView>, AuditError> {
        self.stream().try_collect().await
    }
}

/// Position of a pass between two pages
#[derive(Debug, Clone, Copy)]
struct Cursor {
    remaining: i64,
    page: Page,
}

/// One page of views plus the cursor for the next page
async fn fetch_page(
    db: &dyn AuditStore,
    shadow: Arc<ShadowSchema>,
    engine: &CipherEngine,
    filter: EventFilter,
    cursor: Cursor,
) -> Result<Option<(Vec<AuditEventView>, Cursor)>, AuditError> {
    if cursor.remaining <= 0 {
        return Ok(None);
    }

    let page = Page {
        limit: cursor.remaining.min(PAGE_SIZE),
        ..cursor.page
    };
    let rows = db.query_rows(&shadow, &filter, page).await?;
    let Some(last) = rows.last() else {
        return Ok(None);
    };

    let fetched = rows.len() as i64;
    let next_page = Page::after(PAGE_SIZE, last.timestamp, last.audit_id);
    debug!("Fetched {} rows from {}", fetched, shadow.table);

    let views = rows
        .into_iter()
        .map(|row| AuditReader::render(&shadow, engine, row))
        .collect();

    // a short page means the result set is exhausted
    let remaining = if fetched < page.limit {
        0
    } else {
        cursor.remaining - fetched
    };
    Ok(Some((
        views,
        Cursor {
            remaining,
            page: next_page,
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditAction, AuditEvent, AuditRecorder};
    use crate::crypto::KeyMaterial;
    use crate::schema::{CatalogColumn, SchemaIntrospector, ShadowSchemaBuilder, TableRef};
    use crate::store::MemoryStore;
    use chrono::{Duration, Utc};

    async fn setup() -> (MemoryStore, Arc<ShadowSchema>, CipherEngine) {
        let db = MemoryStore::new();
        let table = TableRef::new("public", "accounts");
        db.create_source_table(
            &table,
            vec![
                CatalogColumn::new("id", "int4", "integer").primary_key(),
                CatalogColumn::new("balance", "numeric", "numeric"),
                CatalogColumn::new("owner", "text", "text"),
            ],
        )
        .await;
        let source = SchemaIntrospector::new().describe(&db, &table).await.unwrap();
        let builder = ShadowSchemaBuilder::default();
        let shadow = builder.build_shadow(&source).unwrap();
        builder.ensure_exists(&shadow, &db).await.unwrap();
        (db, Arc::new(shadow), CipherEngine::new(&KeyMaterial::generate()))
    }

    async fn record(
        db: &MemoryStore,
        shadow: &ShadowSchema,
        engine: &CipherEngine,
        event: AuditEvent,
    ) -> uuid::Uuid {
        AuditRecorder::new()
            .record(db, event, shadow, engine)
            .await
            .unwrap()
            .0
    }

    #[tokio::test]
    async fn test_decrypts_recorded_values() {
        let (db, shadow, engine) = setup().await;
        record(
            &db,
            &shadow,
            &engine,
            AuditEvent::new("alice", AuditAction::Update)
                .with_field("id", "1")
                .with_field("balance", "500")
                .with_field("owner", "bob"),
        )
        .await;

        let events = AuditReader::new()
            .list_events(&db, shadow.clone(), &engine, EventFilter::by_actor("alice"))
            .collect()
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].field("id"), Some(&FieldView::Value("1".into())));
        assert_eq!(events[0].field("balance"), Some(&FieldView::Value("500".into())));
        assert_eq!(events[0].field("owner"), Some(&FieldView::Value("bob".into())));
    }

    #[tokio::test]
    async fn test_corrupted_field_is_isolated() {
        let (db, shadow, engine) = setup().await;
        let id = record(
            &db,
            &shadow,
            &engine,
            AuditEvent::new("alice", AuditAction::Update)
                .with_field("balance", "500")
                .with_field("owner", "bob"),
        )
        .await;

        db.tamper_cell(&shadow.table, id, "accounts_balance_enc", |bytes| {
            let last = bytes.len() - 1;
            bytes[last] ^= 0x01;
        })
        .await;

        let events = AuditReader::new()
            .list_events(&db, shadow.clone(), &engine, EventFilter::default())
            .collect()
            .await
            .unwrap();

        assert!(events[0].field("balance").unwrap().is_decryption_error());
        assert_eq!(events[0].field("owner"), Some(&FieldView::Value("bob".into())));
    }

    #[tokio::test]
    async fn test_swapped_frames_do_not_verify() {
        let (db, shadow, engine) = setup().await;
        let first = record(
            &db,
            &shadow,
            &engine,
            AuditEvent::new("alice", AuditAction::Insert).with_field("owner", "bob"),
        )
        .await;
        let second = record(
            &db,
            &shadow,
            &engine,
            AuditEvent::new("alice", AuditAction::Insert).with_field("owner", "mallory"),
        )
        .await;

        // move row one's frame into row two
        let frame = db.cell(&shadow.table, first, "accounts_owner_enc").await.unwrap();
        db.tamper_cell(&shadow.table, second, "accounts_owner_enc", |bytes| {
            *bytes = match &frame {
                Cell::Bytes(b) => b.clone(),
                _ => Vec::new(),
            }
        })
        .await;

        let events = AuditReader::new()
            .list_events(&db, shadow.clone(), &engine, EventFilter::default())
            .collect()
            .await
            .unwrap();
        let swapped = events.iter().find(|e| e.audit_id == second).unwrap();
        assert!(swapped.field("owner").unwrap().is_decryption_error());
    }

    #[tokio::test]
    async fn test_filters_on_metadata() {
        let (db, shadow, engine) = setup().await;
        let base = Utc::now();
        for (i, (actor, action)) in [
            ("alice", AuditAction::Insert),
            ("bob", AuditAction::Update),
            ("alice", AuditAction::Delete),
        ]
        .into_iter()
        .enumerate()
        {
            let mut event = AuditEvent::new(actor, action).with_field("id", i.to_string());
            event.timestamp = base + Duration::seconds(i as i64);
            record(&db, &shadow, &engine, event).await;
        }

        let reader = AuditReader::new();
        let alice = reader
            .list_events(&db, shadow.clone(), &engine, EventFilter::by_actor("alice"))
            .collect()
            .await
            .unwrap();
        assert_eq!(alice.len(), 2);
        // newest first
        assert_eq!(alice[0].action, AuditAction::Delete);

        let updates = reader
            .list_events(
                &db,
                shadow.clone(),
                &engine,
                EventFilter::default().action(AuditAction::Update),
            )
            .collect()
            .await
            .unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].actor, "bob");

        let window = EventFilter::default().between(base, base + Duration::milliseconds(1500));
        let early = reader
            .list_events(&db, shadow.clone(), &engine, window)
            .collect()
            .await
            .unwrap();
        assert_eq!(early.len(), 2);
    }

    #[tokio::test]
    async fn test_listing_pages_and_restarts() {
        let (db, shadow, engine) = setup().await;
        let base = Utc::now();
        for i in 0..120 {
            let mut event =
                AuditEvent::new("alice", AuditAction::Insert).with_field("id", i.to_string());
            event.timestamp = base + Duration::milliseconds(i);
            record(&db, &shadow, &engine, event).await;
        }

        let listing = AuditReader::new().list_events(
            &db,
            shadow.clone(),
            &engine,
            EventFilter::default().limit(110).offset(5),
        );
        let first = listing.collect().await.unwrap();
        assert_eq!(first.len(), 110);
        assert_eq!(first[0].field("id"), Some(&FieldView::Value("114".into())));
        assert_eq!(first[109].field("id"), Some(&FieldView::Value("5".into())));

        record(
            &db,
            &shadow,
            &engine,
            {
                let mut late =
                    AuditEvent::new("alice", AuditAction::Insert).with_field("id", "999");
                late.timestamp = base + Duration::hours(1);
                late
            },
        )
        .await;
        let second = listing.collect().await.unwrap();
        assert_eq!(second.len(), 110);
        assert_ne!(first[0].audit_id, second[0].audit_id);
    }

    #[tokio::test]
    async fn test_write_during_pass_is_not_repeated() {
        let (db, shadow, engine) = setup().await;
        let base = Utc::now();
        for i in 0..60 {
            let mut event =
                AuditEvent::new("alice", AuditAction::Insert).with_field("id", i.to_string());
            event.timestamp = base + Duration::milliseconds(i);
            record(&db, &shadow, &engine, event).await;
        }

        let listing =
            AuditReader::new().list_events(&db, shadow.clone(), &engine, EventFilter::default());
        let mut stream = listing.stream();
        let mut seen = Vec::new();
        for _ in 0..PAGE_SIZE {
            seen.push(stream.next().await.unwrap().unwrap().audit_id);
        }

        let mut newer = AuditEvent::new("alice", AuditAction::Update).with_field("id", "60");
        newer.timestamp = base + Duration::hours(1);
        record(&db, &shadow, &engine, newer).await;

        while let Some(view) = stream.next().await {
            seen.push(view.unwrap().audit_id);
        }

        let unique: std::collections::HashSet<_> = seen.iter().collect();
        assert_eq!(seen.len(), 60);
        assert_eq!(unique.len(), 60);
    }

    #[tokio::test]
    async fn test_empty_listing() {
        let (db, shadow, engine) = setup().await;
        let listing = AuditReader::new().list_events(
            &db,
            shadow.clone(),
            &engine,
            EventFilter::by_actor("nobody"),
        );
        let mut stream = listing.stream();
        assert!(stream.next().await.is_none());
    }
}
