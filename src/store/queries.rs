//! SQL query constants and builders
//!
//! Catalog queries plus the dynamic DDL/DML for shadow tables. Every
//! identifier goes through [`SqlBuilder::quote_ident`]; every value is a
//! bound parameter.

use crate::audit::{AuditAction, EventFilter};
use crate::schema::shadow::{AUDIT_ACTION, AUDIT_ACTOR, AUDIT_ID, AUDIT_TIMESTAMP};
use crate::schema::{ShadowColumnKind, ShadowSchema, TableRef};
use crate::store::{Cell, Page, ShadowRow};
use chrono::{DateTime, Utc};
use postgres_types::ToSql;
use uuid::Uuid;

/// Does a base or partitioned table exist
pub const TABLE_EXISTS: &str = r#"
    SELECT EXISTS(
        SELECT 1
        FROM pg_catalog.pg_class c
        JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        WHERE n.nspname = $1
            AND c.relname = $2
            AND c.relkind IN ('r', 'p')
    ) AS exists
"#;

/// Columns of a table in definition order
pub const GET_COLUMNS: &str = r#"
    SELECT
        a.attname::text AS name,
        pg_catalog.format_type(a.atttypid, a.atttypmod) AS native_type,
        t.typname::text AS type_name,
        NOT a.attnotnull AS nullable,
        EXISTS(
            SELECT 1
            FROM pg_catalog.pg_index i
            WHERE i.indrelid = c.oid
                AND i.indisprimary
                AND a.attnum = ANY(i.indkey)
        ) AS is_primary_key,
        (
            a.attidentity <> ''
            OR a.attgenerated <> ''
            OR COALESCE(pg_catalog.pg_get_expr(d.adbin, d.adrelid) LIKE 'nextval(%', false)
        ) AS is_generated
    FROM pg_catalog.pg_attribute a
    JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    JOIN pg_catalog.pg_type t ON t.oid = a.atttypid
    LEFT JOIN pg_catalog.pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
    WHERE n.nspname = $1
        AND c.relname = $2
        AND a.attnum > 0
        AND NOT a.attisdropped
    ORDER BY a.attnum
"#;

/// Base tables of a schema, shadow tables excluded
pub const LIST_TABLES: &str = r#"
    SELECT n.nspname::text AS schema, c.relname::text AS name
    FROM pg_catalog.pg_class c
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = $1
        AND c.relkind IN ('r', 'p')
        AND left(c.relname, 4) <> 'aud_'
    ORDER BY c.relname
"#;

/// A bound value of a dynamic statement
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Int(i64),
}

impl SqlParam {
    pub fn as_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            SqlParam::Text(v) => v,
            SqlParam::Bytes(v) => v,
            SqlParam::Uuid(v) => v,
            SqlParam::Timestamp(v) => v,
            SqlParam::Int(v) => v,
        }
    }
}

/// Statement text plus its parameters in `$n` order
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl Statement {
    fn push(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }

    pub fn param_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params.iter().map(SqlParam::as_sql).collect()
    }
}

/// SQL builder for safe identifier quoting
pub struct SqlBuilder;

impl SqlBuilder {
    /// Quote an identifier (table/column name) safely
    pub fn quote_ident(ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    pub fn qualified(table: &TableRef) -> String {
        format!(
            "{}.{}",
            Self::quote_ident(&table.schema),
            Self::quote_ident(&table.name)
        )
    }

    /// CREATE TABLE IF NOT EXISTS for a shadow table
    pub fn create_shadow_table(shadow: &ShadowSchema) -> String {
        let defs: Vec<String> = shadow
            .columns
            .iter()
            .map(|col| {
                let mut def = format!("{} {}", Self::quote_ident(&col.name), col.native_type);
                match col.kind {
                    ShadowColumnKind::AuditId => def.push_str(" NOT NULL PRIMARY KEY"),
                    ShadowColumnKind::Action => def.push_str(&format!(
                        " NOT NULL CHECK ({} IN ({}))",
                        Self::quote_ident(&col.name),
                        AuditAction::ALL
                            .iter()
                            .map(|a| format!("'{}'", a.as_str()))
                            .collect::<Vec<_>>()
                            .join(", ")
                    )),
                    _ if !col.nullable => def.push_str(" NOT NULL"),
                    _ => {}
                }
                def
            })
            .collect();

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            Self::qualified(&shadow.table),
            defs.join(", ")
        )
    }

    /// INSERT of one shadow row. Clear-text values are cast to the column type.
    pub fn insert_row(shadow: &ShadowSchema, row: &ShadowRow) -> Statement {
        let mut stmt = Statement {
            sql: String::new(),
            params: Vec::new(),
        };
        let mut columns = Vec::new();
        let mut values = Vec::new();

        for col in shadow.mirrored_columns() {
            let value = match row.cells.get(&col.name) {
                None | Some(Cell::Null) => continue,
                Some(Cell::Text(v)) => {
                    let p = stmt.push(SqlParam::Text(v.clone()));
                    format!("CAST({}::text AS {})", p, col.native_type)
                }
                Some(Cell::Bytes(b)) => stmt.push(SqlParam::Bytes(b.clone())),
            };
            columns.push(Self::quote_ident(&col.name));
            values.push(value);
        }

        for (name, param) in [
            (AUDIT_ID, SqlParam::Uuid(row.audit_id)),
            (AUDIT_ACTOR, SqlParam::Text(row.actor.clone())),
            (AUDIT_TIMESTAMP, SqlParam::Timestamp(row.timestamp)),
            (AUDIT_ACTION, SqlParam::Text(row.action.as_str().to_string())),
        ] {
            columns.push(Self::quote_ident(name));
            values.push(stmt.push(param));
        }

        stmt.sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            Self::qualified(&shadow.table),
            columns.join(", "),
            values.join(", ")
        );
        stmt
    }

    /// Filtered, paged SELECT. The four audit columns come first, then one
    /// column per mirrored source column in shadow order.
    pub fn select_rows(shadow: &ShadowSchema, filter: &EventFilter, page: Page) -> Statement {
        let mut stmt = Statement {
            sql: String::new(),
            params: Vec::new(),
        };

        let mut select = vec![
            Self::quote_ident(AUDIT_ID),
            Self::quote_ident(AUDIT_ACTOR),
            Self::quote_ident(AUDIT_TIMESTAMP),
            Self::quote_ident(AUDIT_ACTION),
        ];
        for col in shadow.mirrored_columns() {
            let ident = Self::quote_ident(&col.name);
            if col.is_encrypted() {
                select.push(ident);
            } else {
                select.push(format!("{}::text AS {}", ident, ident));
            }
        }

        let mut conditions = Vec::new();
        if let Some(actor) = &filter.actor {
            let p = stmt.push(SqlParam::Text(actor.clone()));
            conditions.push(format!("{} = {}", Self::quote_ident(AUDIT_ACTOR), p));
        }
        if let Some(action) = filter.action {
            let p = stmt.push(SqlParam::Text(action.as_str().to_string()));
            conditions.push(format!("{} = {}", Self::quote_ident(AUDIT_ACTION), p));
        }
        if let Some(from) = filter.from {
            let p = stmt.push(SqlParam::Timestamp(from));
            conditions.push(format!("{} >= {}", Self::quote_ident(AUDIT_TIMESTAMP), p));
        }
        if let Some(to) = filter.to {
            let p = stmt.push(SqlParam::Timestamp(to));
            conditions.push(format!("{} <= {}", Self::quote_ident(AUDIT_TIMESTAMP), p));
        }
        if let Some((timestamp, audit_id)) = page.after {
            let t = stmt.push(SqlParam::Timestamp(timestamp));
            let id = stmt.push(SqlParam::Uuid(audit_id));
            conditions.push(format!(
                "({}, {}) < ({}, {})",
                Self::quote_ident(AUDIT_TIMESTAMP),
                Self::quote_ident(AUDIT_ID),
                t,
                id
            ));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let limit = stmt.push(SqlParam::Int(page.limit));
        let offset = stmt.push(SqlParam::Int(page.offset));

        stmt.sql = format!(
            "SELECT {} FROM {}{} ORDER BY {} DESC, {} DESC LIMIT {} OFFSET {}",
            select.join(", "),
            Self::qualified(&shadow.table),
            where_clause,
            Self::quote_ident(AUDIT_TIMESTAMP),
            Self::quote_ident(AUDIT_ID),
            limit,
            offset
        );
        stmt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDescriptor, SemanticType, ShadowSchemaBuilder, SourceSchema};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn shadow() -> ShadowSchema {
        let col = |name: &str, native: &str, identifier: bool| ColumnDescriptor {
            name: name.to_string(),
            data_type: SemanticType::Integer,
            native_type: native.to_string(),
            nullable: !identifier,
            identifier,
        };
        let source = SourceSchema {
            table: TableRef::new("public", "accounts"),
            columns: vec![
                col("id", "integer", true),
                col("balance", "numeric", false),
            ],
        };
        ShadowSchemaBuilder::default().build_shadow(&source).unwrap()
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(SqlBuilder::quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_create_shadow_table() {
        assert_eq!(
            SqlBuilder::create_shadow_table(&shadow()),
            "CREATE TABLE IF NOT EXISTS \"public\".\"aud_accounts\" (\
             \"id\" integer, \
             \"accounts_balance_enc\" bytea, \
             \"audit_id\" uuid NOT NULL PRIMARY KEY, \
             \"audit_actor\" text NOT NULL, \
             \"audit_timestamp\" timestamp with time zone NOT NULL, \
             \"audit_action\" text NOT NULL CHECK (\"audit_action\" IN ('INSERT', 'UPDATE', 'DELETE')))"
        );
    }

    #[test]
    fn test_insert_skips_null_cells() {
        let mut cells = BTreeMap::new();
        cells.insert("id".to_string(), Cell::Text("7".to_string()));
        cells.insert("accounts_balance_enc".to_string(), Cell::Null);
        let row = ShadowRow {
            audit_id: Uuid::nil(),
            actor: "alice".to_string(),
            timestamp: Utc::now(),
            action: AuditAction::Delete,
            cells,
        };

        let stmt = SqlBuilder::insert_row(&shadow(), &row);
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"public\".\"aud_accounts\" \
             (\"id\", \"audit_id\", \"audit_actor\", \"audit_timestamp\", \"audit_action\") \
             VALUES (CAST($1::text AS integer), $2, $3, $4, $5)"
        );
        assert_eq!(stmt.params.len(), 5);
        assert_eq!(stmt.params[4], SqlParam::Text("DELETE".to_string()));
    }

    #[test]
    fn test_select_with_filter() {
        let filter = EventFilter::by_actor("alice").action(AuditAction::Update);
        let stmt = SqlBuilder::select_rows(&shadow(), &filter, Page::first(50, 0));
        assert_eq!(
            stmt.sql,
            "SELECT \"audit_id\", \"audit_actor\", \"audit_timestamp\", \"audit_action\", \
             \"id\"::text AS \"id\", \"accounts_balance_enc\" \
             FROM \"public\".\"aud_accounts\" \
             WHERE \"audit_actor\" = $1 AND \"audit_action\" = $2 \
             ORDER BY \"audit_timestamp\" DESC, \"audit_id\" DESC LIMIT $3 OFFSET $4"
        );
        assert_eq!(stmt.params[2], SqlParam::Int(50));
        assert_eq!(stmt.param_refs().len(), 4);
    }

    #[test]
    fn test_select_after_cursor() {
        let at = Utc::now();
        let id = Uuid::new_v4();
        let stmt = SqlBuilder::select_rows(
            &shadow(),
            &EventFilter::by_actor("alice"),
            Page::after(50, at, id),
        );
        assert_eq!(
            stmt.sql,
            "SELECT \"audit_id\", \"audit_actor\", \"audit_timestamp\", \"audit_action\", \
             \"id\"::text AS \"id\", \"accounts_balance_enc\" \
             FROM \"public\".\"aud_accounts\" \
             WHERE \"audit_actor\" = $1 AND (\"audit_timestamp\", \"audit_id\") < ($2, $3) \
             ORDER BY \"audit_timestamp\" DESC, \"audit_id\" DESC LIMIT $4 OFFSET $5"
        );
        assert_eq!(stmt.params[1], SqlParam::Timestamp(at));
        assert_eq!(stmt.params[2], SqlParam::Uuid(id));
        assert_eq!(stmt.params[4], SqlParam::Int(0));
    }
}
