//! SQLite catalog reads.
//!
//! - `sqlite_master`: tables, views and trigger definitions per schema
//! - `pragma_table_info()`: column details
//! - `pragma_index_list()` / `pragma_index_info()`: indexes and their columns
//! - `pragma_foreign_key_list()`: foreign keys (unnamed in SQLite)
//!
//! Table-valued PRAGMA functions take the table and schema as bound
//! arguments, so no identifier needs quoting except the schema prefix of
//! `sqlite_master`.

use sqlx::SqlitePool;
use tracing::debug;

use super::MAIN_SCHEMA;
use crate::Result;
use crate::adapters::ConnectionConfig;
use crate::adapters::helpers::{catalog_value, count_to_u64, sqlx_catalog_error};
use crate::error::DbBridgeError;
use crate::models::{
    ColumnDescriptor, DatabaseDescriptor, EngineType, ForeignKeyDescriptor, IndexDescriptor,
    TableDescriptor, TableInfo, TableKind, TriggerDescriptor,
};
use crate::normalize::{
    ForeignKeyColumnRow, IndexColumnRow, group_foreign_keys, group_index_columns, is_length_type,
    normalize_default, parse_trigger_event, parse_trigger_timing, parse_type_dimensions,
};
use crate::query::quote_ident;

/// Lists the main database and every attached schema.
pub(super) async fn list_databases(pool: &SqlitePool) -> Result<Vec<DatabaseDescriptor>> {
    let names: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_database_list ORDER BY seq")
        .fetch_all(pool)
        .await
        .map_err(|e| sqlx_catalog_error("database list", e))?;

    let mut databases = Vec::with_capacity(names.len());
    for name in names {
        let mut descriptor = DatabaseDescriptor::new(name.as_str());
        descriptor.is_current = name == MAIN_SCHEMA;

        match list_tables(pool, &name).await {
            Ok(objects) => {
                for object in objects {
                    match object.kind {
                        TableKind::Table => descriptor.tables.push(object.name),
                        TableKind::View => descriptor.views.push(object.name),
                    }
                }
            }
            Err(e) if e.is_connection_error() => return Err(e),
            Err(e) => descriptor.error = Some(e.to_string()),
        }

        descriptor.size_bytes = database_size(pool, &name).await;
        databases.push(descriptor);
    }

    Ok(databases)
}

/// Maps a requested database name onto an attached schema.
///
/// The empty string, `main` and the database file's stem all mean `main`.
pub(super) async fn resolve_schema(
    pool: &SqlitePool,
    config: &ConnectionConfig,
    database: &str,
) -> Result<String> {
    let requested = database.trim();
    if requested.is_empty() || requested.eq_ignore_ascii_case(MAIN_SCHEMA) {
        return Ok(MAIN_SCHEMA.to_string());
    }

    let attached: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_database_list")
        .fetch_all(pool)
        .await
        .map_err(|e| sqlx_catalog_error("database list", e))?;
    if let Some(found) = attached
        .into_iter()
        .find(|name| name.eq_ignore_ascii_case(requested))
    {
        return Ok(found);
    }

    let stem = config
        .file_path
        .as_ref()
        .and_then(|path| path.file_stem())
        .and_then(|stem| stem.to_str());
    if stem == Some(requested) {
        return Ok(MAIN_SCHEMA.to_string());
    }

    Err(DbBridgeError::introspection_failed(
        requested,
        "database is not attached to this connection",
    ))
}

pub(super) async fn list_tables(pool: &SqlitePool, schema: &str) -> Result<Vec<TableDescriptor>> {
    let sql = format!(
        "SELECT name, type FROM {}.sqlite_master \
         WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
         ORDER BY name",
        quote_ident(EngineType::Sqlite, schema)
    );

    let rows = sqlx::query(&sql)
        .fetch_all(pool)
        .await
        .map_err(|e| sqlx_catalog_error(schema, e))?;

    rows.iter()
        .map(|row| {
            let name: String = catalog_value(row, "name", schema)?;
            let kind: String = catalog_value(row, "type", schema)?;
            Ok(TableDescriptor {
                name,
                schema: Some(schema.to_string()),
                kind: TableKind::from_catalog(&kind),
                row_count: None,
                comment: None,
            })
        })
        .collect()
}

/// `page_count * page_size`, `None` when either PRAGMA is unavailable.
async fn database_size(pool: &SqlitePool, schema: &str) -> Option<u64> {
    let quoted = quote_ident(EngineType::Sqlite, schema);
    let page_count: i64 = sqlx::query_scalar(&format!("PRAGMA {quoted}.page_count"))
        .fetch_one(pool)
        .await
        .ok()?;
    let page_size: i64 = sqlx::query_scalar(&format!("PRAGMA {quoted}.page_size"))
        .fetch_one(pool)
        .await
        .ok()?;
    Some(count_to_u64(page_count).saturating_mul(count_to_u64(page_size)))
}

/// Describes one table or view in `schema`.
pub(super) async fn describe_table(
    pool: &SqlitePool,
    database: &str,
    schema: &str,
    table: &str,
) -> Result<TableInfo> {
    let sql = format!(
        "SELECT type FROM {}.sqlite_master WHERE type IN ('table', 'view') AND name = ?1",
        quote_ident(EngineType::Sqlite, schema)
    );
    let kind: Option<String> = sqlx::query_scalar(&sql)
        .bind(table)
        .fetch_optional(pool)
        .await
        .map_err(|e| sqlx_catalog_error(table, e))?;
    if kind.is_none() {
        return Err(DbBridgeError::introspection_failed(table, "table not found"));
    }

    let mut info = TableInfo::empty(database, Some(schema.to_string()), table);
    let (columns, primary_key) = collect_columns(pool, schema, table).await?;
    info.columns = columns;
    info.indexes = collect_indexes(pool, schema, table, &primary_key).await?;
    info.foreign_keys = collect_foreign_keys(pool, schema, table).await?;
    info.triggers = collect_triggers(pool, schema, table).await?;
    info.row_count = count_rows(pool, schema, table).await;

    debug!(
        "Described SQLite table {}.{}: {} columns, {} indexes",
        schema,
        table,
        info.columns.len(),
        info.indexes.len()
    );
    Ok(info)
}

/// Columns in declaration order plus the primary key columns in key order.
async fn collect_columns(
    pool: &SqlitePool,
    schema: &str,
    table: &str,
) -> Result<(Vec<ColumnDescriptor>, Vec<String>)> {
    let rows = sqlx::query(
        "SELECT cid, name, type, \"notnull\", dflt_value, pk \
         FROM pragma_table_info(?1, ?2) ORDER BY cid",
    )
    .bind(table)
    .bind(schema)
    .fetch_all(pool)
    .await
    .map_err(|e| sqlx_catalog_error(table, e))?;

    let mut keyed: Vec<(i64, String)> = Vec::new();
    let mut columns = Vec::with_capacity(rows.len());

    for row in &rows {
        let cid: i64 = catalog_value(row, "cid", table)?;
        let name: String = catalog_value(row, "name", table)?;
        let declared: String = catalog_value::<_, Option<String>, _>(row, "type", table)?
            .unwrap_or_default();
        let not_null: i64 = catalog_value(row, "notnull", table)?;
        let default: Option<String> = catalog_value(row, "dflt_value", table)?;
        let pk: i64 = catalog_value(row, "pk", table)?;

        let ordinal = u32::try_from(cid.saturating_add(1)).unwrap_or(u32::MAX);
        let mut column = ColumnDescriptor::new(name.as_str(), declared.as_str(), ordinal);
        column.is_primary_key = pk > 0;
        // PRIMARY KEY columns are treated as NOT NULL even where SQLite reports otherwise
        column.is_nullable = not_null == 0 && pk == 0;
        column.default_value = normalize_default(default);

        let (first, second) = parse_type_dimensions(&declared);
        if is_length_type(&declared) {
            column.max_length = first;
        } else {
            column.precision = first;
            column.scale = second;
        }

        if pk > 0 {
            keyed.push((pk, name));
        }
        columns.push(column);
    }

    // A lone INTEGER PRIMARY KEY aliases the rowid and is assigned automatically
    if keyed.len() == 1
        && let Some(column) = columns
            .iter_mut()
            .find(|c| c.is_primary_key && c.data_type.eq_ignore_ascii_case("INTEGER"))
    {
        column.is_auto_increment = true;
    }

    keyed.sort_by_key(|(position, _)| *position);
    Ok((columns, keyed.into_iter().map(|(_, name)| name).collect()))
}

async fn collect_indexes(
    pool: &SqlitePool,
    schema: &str,
    table: &str,
    primary_key: &[String],
) -> Result<Vec<IndexDescriptor>> {
    let rows = sqlx::query(
        "SELECT il.name AS index_name, COALESCE(ii.name, '<expression>') AS column_name, \
                il.\"unique\" AS is_unique, il.origin AS origin \
         FROM pragma_index_list(?1, ?2) AS il \
         JOIN pragma_index_info(il.name, ?2) AS ii \
         ORDER BY il.seq, ii.seqno",
    )
    .bind(table)
    .bind(schema)
    .fetch_all(pool)
    .await
    .map_err(|e| sqlx_catalog_error(table, e))?;

    let mut index_rows = Vec::with_capacity(rows.len());
    for row in &rows {
        let is_unique: i64 = catalog_value(row, "is_unique", table)?;
        let origin: String = catalog_value(row, "origin", table)?;
        index_rows.push(IndexColumnRow {
            index_name: catalog_value(row, "index_name", table)?,
            column_name: catalog_value(row, "column_name", table)?,
            is_unique: is_unique != 0,
            is_primary: origin == "pk",
            index_type: None,
        });
    }

    let mut indexes = group_index_columns(index_rows);

    // Rowid primary keys have no backing index entry
    if !primary_key.is_empty() && !indexes.iter().any(|idx| idx.is_primary) {
        indexes.insert(
            0,
            IndexDescriptor {
                name: "PRIMARY".to_string(),
                columns: primary_key.to_vec(),
                is_unique: true,
                is_primary: true,
                index_type: None,
            },
        );
    }

    Ok(indexes)
}

async fn collect_foreign_keys(
    pool: &SqlitePool,
    schema: &str,
    table: &str,
) -> Result<Vec<ForeignKeyDescriptor>> {
    let rows = sqlx::query(
        "SELECT id, seq, \"table\" AS ref_table, \"from\" AS from_col, \"to\" AS to_col, \
                on_update, on_delete \
         FROM pragma_foreign_key_list(?1, ?2) ORDER BY id, seq",
    )
    .bind(table)
    .bind(schema)
    .fetch_all(pool)
    .await
    .map_err(|e| sqlx_catalog_error(table, e))?;

    let mut fk_rows = Vec::with_capacity(rows.len());
    for row in &rows {
        let id: i64 = catalog_value(row, "id", table)?;
        let seq: i64 = catalog_value(row, "seq", table)?;
        let referenced_table: String = catalog_value(row, "ref_table", table)?;
        let to_col: Option<String> = catalog_value(row, "to_col", table)?;

        // A missing target column means the parent's primary key
        let referenced_column = match to_col {
            Some(column) => column,
            None => parent_key_column(pool, schema, &referenced_table, seq)
                .await?
                .unwrap_or_default(),
        };

        fk_rows.push(ForeignKeyColumnRow {
            constraint_name: id.to_string(),
            named: false,
            column_name: catalog_value(row, "from_col", table)?,
            referenced_schema: None,
            referenced_table,
            referenced_column,
            on_update: catalog_value(row, "on_update", table)?,
            on_delete: catalog_value(row, "on_delete", table)?,
        });
    }

    Ok(group_foreign_keys(fk_rows))
}

async fn parent_key_column(
    pool: &SqlitePool,
    schema: &str,
    parent: &str,
    seq: i64,
) -> Result<Option<String>> {
    let keys: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM pragma_table_info(?1, ?2) WHERE pk > 0 ORDER BY pk",
    )
    .bind(parent)
    .bind(schema)
    .fetch_all(pool)
    .await
    .map_err(|e| sqlx_catalog_error(parent, e))?;

    Ok(usize::try_from(seq).ok().and_then(|i| keys.into_iter().nth(i)))
}

async fn collect_triggers(
    pool: &SqlitePool,
    schema: &str,
    table: &str,
) -> Result<Vec<TriggerDescriptor>> {
    let sql = format!(
        "SELECT name, sql FROM {}.sqlite_master \
         WHERE type = 'trigger' AND tbl_name = ?1 ORDER BY name",
        quote_ident(EngineType::Sqlite, schema)
    );
    let rows = sqlx::query(&sql)
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(|e| sqlx_catalog_error(table, e))?;

    rows.iter()
        .map(|row| {
            let name: String = catalog_value(row, "name", table)?;
            let definition: Option<String> = catalog_value(row, "sql", table)?;
            let text = definition.as_deref().unwrap_or_default();
            Ok(TriggerDescriptor {
                name,
                timing: parse_trigger_timing(text),
                event: parse_trigger_event(text),
                definition,
            })
        })
        .collect()
}

/// Exact count; SQLite keeps no cheap estimate.
async fn count_rows(pool: &SqlitePool, schema: &str, table: &str) -> Option<u64> {
    let sql = format!(
        "SELECT COUNT(*) FROM {}.{}",
        quote_ident(EngineType::Sqlite, schema),
        quote_ident(EngineType::Sqlite, table)
    );
    match sqlx::query_scalar::<_, i64>(&sql).fetch_one(pool).await {
        Ok(count) => Some(count_to_u64(count)),
        Err(e) => {
            debug!("Row count unavailable for {}.{}: {}", schema, table, e);
            None
        }
    }
}
