//! MySQL `INFORMATION_SCHEMA` catalog reads.
//!
//! Every text column is `CAST(... AS CHAR)`: depending on server version and
//! collation, `INFORMATION_SCHEMA` reports names as binary strings that would
//! not decode as `String`.

use sqlx::MySqlPool;
use tracing::debug;

use crate::Result;
use crate::adapters::helpers::{catalog_value, count_to_u64, sqlx_catalog_error};
use crate::error::DbBridgeError;
use crate::models::{
    ColumnDescriptor, DatabaseDescriptor, ForeignKeyDescriptor, IndexDescriptor, TableDescriptor,
    TableInfo, TableKind, TriggerDescriptor,
};
use crate::normalize::{
    ForeignKeyColumnRow, IndexColumnRow, group_foreign_keys, group_index_columns,
    is_nullable_flag, normalize_default, normalize_dimension,
};

pub(super) async fn list_databases(
    pool: &MySqlPool,
    current: Option<&str>,
) -> Result<Vec<DatabaseDescriptor>> {
    let rows = sqlx::query(
        "SELECT CAST(s.SCHEMA_NAME AS CHAR) AS name, \
                CAST(SUM(t.DATA_LENGTH + t.INDEX_LENGTH) AS SIGNED) AS size_bytes \
         FROM INFORMATION_SCHEMA.SCHEMATA s \
         LEFT JOIN INFORMATION_SCHEMA.TABLES t ON t.TABLE_SCHEMA = s.SCHEMA_NAME \
         GROUP BY s.SCHEMA_NAME \
         ORDER BY s.SCHEMA_NAME",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| sqlx_catalog_error("database list", e))?;

    let mut databases = Vec::with_capacity(rows.len());
    for row in &rows {
        let name: String = catalog_value(row, "name", "database list")?;
        let size: Option<i64> = catalog_value(row, "size_bytes", "database list")?;
        let mut descriptor = DatabaseDescriptor::new(name.as_str());
        descriptor.size_bytes = size.map(count_to_u64);
        descriptor.is_current = current == Some(name.as_str());
        databases.push(descriptor);
    }

    // Objects for all databases in one pass; a failure is recorded per descriptor
    let objects = sqlx::query(
        "SELECT CAST(TABLE_SCHEMA AS CHAR) AS table_schema, \
                CAST(TABLE_NAME AS CHAR) AS table_name, \
                CAST(TABLE_TYPE AS CHAR) AS table_type \
         FROM INFORMATION_SCHEMA.TABLES \
         ORDER BY TABLE_SCHEMA, TABLE_NAME",
    )
    .fetch_all(pool)
    .await;

    match objects {
        Ok(rows) => {
            for row in &rows {
                let schema: String = catalog_value(row, "table_schema", "table list")?;
                let name: String = catalog_value(row, "table_name", "table list")?;
                let kind: String = catalog_value(row, "table_type", "table list")?;
                if let Some(descriptor) = databases.iter_mut().find(|d| d.name == schema) {
                    match TableKind::from_catalog(&kind) {
                        TableKind::Table => descriptor.tables.push(name),
                        TableKind::View => descriptor.views.push(name),
                    }
                }
            }
        }
        Err(e) => {
            let error = sqlx_catalog_error("table list", e);
            if error.is_connection_error() {
                return Err(error);
            }
            for descriptor in &mut databases {
                descriptor.error = Some(error.to_string());
            }
        }
    }

    Ok(databases)
}

pub(super) async fn list_tables(pool: &MySqlPool, database: &str) -> Result<Vec<TableDescriptor>> {
    let rows = sqlx::query(
        "SELECT CAST(TABLE_NAME AS CHAR) AS table_name, \
                CAST(TABLE_TYPE AS CHAR) AS table_type, \
                CAST(TABLE_ROWS AS SIGNED) AS table_rows, \
                CAST(TABLE_COMMENT AS CHAR) AS table_comment \
         FROM INFORMATION_SCHEMA.TABLES \
         WHERE TABLE_SCHEMA = ? \
         ORDER BY TABLE_NAME",
    )
    .bind(database)
    .fetch_all(pool)
    .await
    .map_err(|e| sqlx_catalog_error(database, e))?;

    rows.iter()
        .map(|row| {
            let table_type: String = catalog_value(row, "table_type", database)?;
            let kind = TableKind::from_catalog(&table_type);
            let rows: Option<i64> = catalog_value(row, "table_rows", database)?;
            let comment: Option<String> = catalog_value(row, "table_comment", database)?;
            Ok(TableDescriptor {
                name: catalog_value(row, "table_name", database)?,
                schema: Some(database.to_string()),
                kind,
                row_count: match kind {
                    TableKind::Table => rows.map(count_to_u64),
                    TableKind::View => None,
                },
                // Views carry the literal comment "VIEW"
                comment: comment.filter(|c| !c.is_empty() && kind == TableKind::Table),
            })
        })
        .collect()
}

pub(super) async fn describe_table(
    pool: &MySqlPool,
    database: &str,
    table: &str,
) -> Result<TableInfo> {
    let mut info = TableInfo::empty(database, Some(database.to_string()), table);
    info.columns = collect_columns(pool, database, table).await?;
    if info.columns.is_empty() {
        return Err(DbBridgeError::introspection_failed(table, "table not found"));
    }
    info.indexes = collect_indexes(pool, database, table).await?;
    info.foreign_keys = collect_foreign_keys(pool, database, table).await?;
    info.triggers = collect_triggers(pool, database, table).await?;
    info.row_count = estimate_rows(pool, database, table).await;

    debug!(
        "Described MySQL table {}.{}: {} columns, {} indexes, {} foreign keys",
        database,
        table,
        info.columns.len(),
        info.indexes.len(),
        info.foreign_keys.len()
    );
    Ok(info)
}

async fn collect_columns(
    pool: &MySqlPool,
    database: &str,
    table: &str,
) -> Result<Vec<ColumnDescriptor>> {
    let rows = sqlx::query(
        "SELECT CAST(COLUMN_NAME AS CHAR) AS column_name, \
                CAST(COLUMN_TYPE AS CHAR) AS column_type, \
                CAST(IS_NULLABLE AS CHAR) AS is_nullable, \
                CAST(COLUMN_DEFAULT AS CHAR) AS column_default, \
                CAST(CHARACTER_MAXIMUM_LENGTH AS SIGNED) AS max_length, \
                CAST(NUMERIC_PRECISION AS SIGNED) AS numeric_precision, \
                CAST(NUMERIC_SCALE AS SIGNED) AS numeric_scale, \
                CAST(COLUMN_KEY AS CHAR) AS column_key, \
                CAST(EXTRA AS CHAR) AS extra, \
                CAST(COLUMN_COMMENT AS CHAR) AS column_comment, \
                CAST(ORDINAL_POSITION AS SIGNED) AS ordinal_position \
         FROM INFORMATION_SCHEMA.COLUMNS \
         WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
         ORDER BY ORDINAL_POSITION",
    )
    .bind(database)
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| sqlx_catalog_error(table, e))?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let name: String = catalog_value(row, "column_name", table)?;
        let data_type: String = catalog_value(row, "column_type", table)?;
        let ordinal: i64 = catalog_value(row, "ordinal_position", table)?;
        let nullable: String = catalog_value(row, "is_nullable", table)?;
        let key: Option<String> = catalog_value(row, "column_key", table)?;
        let extra: Option<String> = catalog_value(row, "extra", table)?;
        let comment: Option<String> = catalog_value(row, "column_comment", table)?;

        let mut column = ColumnDescriptor::new(
            name,
            data_type,
            u32::try_from(ordinal).unwrap_or_default(),
        );
        column.is_nullable = is_nullable_flag(&nullable);
        column.default_value = normalize_default(catalog_value(row, "column_default", table)?);
        column.max_length = normalize_dimension(catalog_value(row, "max_length", table)?);
        column.precision = normalize_dimension(catalog_value(row, "numeric_precision", table)?);
        column.scale = normalize_dimension(catalog_value(row, "numeric_scale", table)?);
        column.is_primary_key = key.as_deref() == Some("PRI");
        column.is_auto_increment = extra
            .as_deref()
            .is_some_and(|e| e.to_ascii_lowercase().contains("auto_increment"));
        column.comment = comment.filter(|c| !c.is_empty());
        columns.push(column);
    }

    Ok(columns)
}

async fn collect_indexes(
    pool: &MySqlPool,
    database: &str,
    table: &str,
) -> Result<Vec<IndexDescriptor>> {
    let rows = sqlx::query(
        "SELECT CAST(INDEX_NAME AS CHAR) AS index_name, \
                CAST(COALESCE(COLUMN_NAME, '<expression>') AS CHAR) AS column_name, \
                CAST(NON_UNIQUE AS SIGNED) AS non_unique, \
                CAST(INDEX_TYPE AS CHAR) AS index_type \
         FROM INFORMATION_SCHEMA.STATISTICS \
         WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
         ORDER BY INDEX_NAME = 'PRIMARY' DESC, INDEX_NAME, SEQ_IN_INDEX",
    )
    .bind(database)
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| sqlx_catalog_error(table, e))?;

    let mut index_rows = Vec::with_capacity(rows.len());
    for row in &rows {
        let index_name: String = catalog_value(row, "index_name", table)?;
        let non_unique: i64 = catalog_value(row, "non_unique", table)?;
        index_rows.push(IndexColumnRow {
            is_primary: index_name == "PRIMARY",
            index_name,
            column_name: catalog_value(row, "column_name", table)?,
            is_unique: non_unique == 0,
            index_type: catalog_value(row, "index_type", table)?,
        });
    }

    Ok(group_index_columns(index_rows))
}

async fn collect_foreign_keys(
    pool: &MySqlPool,
    database: &str,
    table: &str,
) -> Result<Vec<ForeignKeyDescriptor>> {
    let rows = sqlx::query(
        "SELECT CAST(kcu.CONSTRAINT_NAME AS CHAR) AS constraint_name, \
                CAST(kcu.COLUMN_NAME AS CHAR) AS column_name, \
                CAST(kcu.REFERENCED_TABLE_SCHEMA AS CHAR) AS referenced_schema, \
                CAST(kcu.REFERENCED_TABLE_NAME AS CHAR) AS referenced_table, \
                CAST(kcu.REFERENCED_COLUMN_NAME AS CHAR) AS referenced_column, \
                CAST(rc.UPDATE_RULE AS CHAR) AS update_rule, \
                CAST(rc.DELETE_RULE AS CHAR) AS delete_rule \
         FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu \
         JOIN INFORMATION_SCHEMA.REFERENTIAL_CONSTRAINTS rc \
           ON rc.CONSTRAINT_SCHEMA = kcu.CONSTRAINT_SCHEMA \
          AND rc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME \
          AND rc.TABLE_NAME = kcu.TABLE_NAME \
         WHERE kcu.TABLE_SCHEMA = ? AND kcu.TABLE_NAME = ? \
           AND kcu.REFERENCED_TABLE_NAME IS NOT NULL \
         ORDER BY kcu.CONSTRAINT_NAME, kcu.ORDINAL_POSITION",
    )
    .bind(database)
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| sqlx_catalog_error(table, e))?;

    let mut fk_rows = Vec::with_capacity(rows.len());
    for row in &rows {
        fk_rows.push(ForeignKeyColumnRow {
            constraint_name: catalog_value(row, "constraint_name", table)?,
            named: true,
            column_name: catalog_value(row, "column_name", table)?,
            referenced_schema: catalog_value(row, "referenced_schema", table)?,
            referenced_table: catalog_value(row, "referenced_table", table)?,
            referenced_column: catalog_value(row, "referenced_column", table)?,
            on_update: catalog_value(row, "update_rule", table)?,
            on_delete: catalog_value(row, "delete_rule", table)?,
        });
    }

    Ok(group_foreign_keys(fk_rows))
}

async fn collect_triggers(
    pool: &MySqlPool,
    database: &str,
    table: &str,
) -> Result<Vec<TriggerDescriptor>> {
    let rows = sqlx::query(
        "SELECT CAST(TRIGGER_NAME AS CHAR) AS trigger_name, \
                CAST(ACTION_TIMING AS CHAR) AS timing, \
                CAST(EVENT_MANIPULATION AS CHAR) AS event, \
                CAST(ACTION_STATEMENT AS CHAR) AS definition \
         FROM INFORMATION_SCHEMA.TRIGGERS \
         WHERE EVENT_OBJECT_SCHEMA = ? AND EVENT_OBJECT_TABLE = ? \
         ORDER BY TRIGGER_NAME",
    )
    .bind(database)
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| sqlx_catalog_error(table, e))?;

    rows.iter()
        .map(|row| {
            Ok(TriggerDescriptor {
                name: catalog_value(row, "trigger_name", table)?,
                timing: catalog_value(row, "timing", table)?,
                event: catalog_value(row, "event", table)?,
                definition: catalog_value(row, "definition", table)?,
            })
        })
        .collect()
}

/// InnoDB's `TABLE_ROWS` estimate.
async fn estimate_rows(pool: &MySqlPool, database: &str, table: &str) -> Option<u64> {
    let estimate = sqlx::query_scalar::<_, Option<i64>>(
        "SELECT CAST(TABLE_ROWS AS SIGNED) FROM INFORMATION_SCHEMA.TABLES \
         WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?",
    )
    .bind(database)
    .bind(table)
    .fetch_optional(pool)
    .await
    .ok()
    .flatten()
    .flatten();
    estimate.map(count_to_u64)
}
