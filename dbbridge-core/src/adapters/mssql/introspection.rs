//! SQL Server catalog reads.
//!
//! Queries are prefixed with the quoted database name (`[db].sys.tables`) so
//! any database on the instance can be read without changing the session's
//! current database. An empty database name reads the current one.

use tiberius::{Row, ToSql};
use tracing::debug;

use super::PooledClient;
use crate::Result;
use crate::adapters::helpers::count_to_u64;
use crate::error::DbBridgeError;
use crate::models::{
    ColumnDescriptor, DatabaseDescriptor, ForeignKeyDescriptor, IndexDescriptor, TableDescriptor,
    TableInfo, TableKind, TriggerDescriptor,
};
use crate::normalize::{
    ForeignKeyColumnRow, IndexColumnRow, group_foreign_keys, group_index_columns,
    is_nullable_flag, normalize_default, normalize_dimension, parse_trigger_event,
};
use crate::query::{TableRef, quote_ident};

/// Schema that is left off object names in database listings.
const DEFAULT_SCHEMA: &str = "dbo";

fn catalog_error(item: &str, error: tiberius::error::Error) -> DbBridgeError {
    match error {
        tiberius::error::Error::Io { .. } | tiberius::error::Error::Routing { .. } => {
            DbBridgeError::connection_failed(format!("Catalog read for '{item}' lost its session"), error)
        }
        other => DbBridgeError::introspection_failed(item, other),
    }
}

async fn fetch(
    conn: &mut PooledClient,
    sql: &str,
    params: &[&dyn ToSql],
    item: &str,
) -> Result<Vec<Row>> {
    conn.query(sql, params)
        .await
        .map_err(|e| catalog_error(item, e))?
        .into_first_result()
        .await
        .map_err(|e| catalog_error(item, e))
}

fn text(row: &Row, column: &str, item: &str) -> Result<Option<String>> {
    row.try_get::<&str, _>(column)
        .map(|value| value.map(str::to_string))
        .map_err(|e| catalog_error(item, e))
}

fn required_text(row: &Row, column: &str, item: &str) -> Result<String> {
    text(row, column, item)?
        .ok_or_else(|| DbBridgeError::introspection_failed(item, format!("{column} is NULL")))
}

fn int(row: &Row, column: &str, item: &str) -> Result<Option<i64>> {
    row.try_get::<i64, _>(column).map_err(|e| catalog_error(item, e))
}

fn flag(row: &Row, column: &str, item: &str) -> Result<bool> {
    row.try_get::<bool, _>(column)
        .map(Option::unwrap_or_default)
        .map_err(|e| catalog_error(item, e))
}

/// `[db].` for a named database, nothing for the current one.
fn prefix(database: &str) -> String {
    if database.is_empty() {
        String::new()
    } else {
        format!("{}.", quote_ident(crate::models::EngineType::SqlServer, database))
    }
}

pub(super) async fn list_databases(
    conn: &mut PooledClient,
    current: Option<&str>,
) -> Result<Vec<DatabaseDescriptor>> {
    let rows = fetch(
        conn,
        "SELECT d.name AS name, \
                CAST(SUM(CAST(mf.size AS bigint)) * 8192 AS bigint) AS size_bytes, \
                CAST(HAS_DBACCESS(d.name) AS bit) AS has_access \
         FROM sys.databases d \
         LEFT JOIN sys.master_files mf ON mf.database_id = d.database_id \
         WHERE d.state = 0 \
         GROUP BY d.name \
         ORDER BY d.name",
        &[],
        "database list",
    )
    .await?;

    let mut databases = Vec::with_capacity(rows.len());
    for row in &rows {
        let name = required_text(row, "name", "database list")?;
        let mut descriptor = DatabaseDescriptor::new(name.as_str());
        descriptor.size_bytes = int(row, "size_bytes", "database list")?.map(count_to_u64);
        descriptor.is_current = current == Some(name.as_str());

        if !flag(row, "has_access", "database list")? {
            descriptor.error = Some("current login has no access to this database".to_string());
            databases.push(descriptor);
            continue;
        }

        match list_tables(conn, &name).await {
            Ok(tables) => {
                for table in tables {
                    let qualified = match table.schema.as_deref() {
                        Some(schema) if schema != DEFAULT_SCHEMA => {
                            format!("{schema}.{}", table.name)
                        }
                        _ => table.name,
                    };
                    match table.kind {
                        TableKind::Table => descriptor.tables.push(qualified),
                        TableKind::View => descriptor.views.push(qualified),
                    }
                }
            }
            Err(e) if e.is_connection_error() => return Err(e),
            Err(e) => {
                debug!("Could not list objects of database '{}': {}", name, e);
                descriptor.error = Some(e.to_string());
            }
        }
        databases.push(descriptor);
    }

    Ok(databases)
}

pub(super) async fn list_tables(conn: &mut PooledClient, database: &str) -> Result<Vec<TableDescriptor>> {
    let db = prefix(database);
    let sql = format!(
        "SELECT s.name AS schema_name, o.name AS table_name, RTRIM(o.type) AS object_type, \
                (SELECT CAST(SUM(p.rows) AS bigint) FROM {db}sys.partitions p \
                  WHERE p.object_id = o.object_id AND p.index_id IN (0, 1)) AS row_estimate, \
                CAST(ep.value AS nvarchar(4000)) AS table_comment \
         FROM {db}sys.objects o \
         JOIN {db}sys.schemas s ON s.schema_id = o.schema_id \
         LEFT JOIN {db}sys.extended_properties ep \
           ON ep.class = 1 AND ep.major_id = o.object_id AND ep.minor_id = 0 \
          AND ep.name = 'MS_Description' \
         WHERE o.type IN ('U', 'V') AND o.is_ms_shipped = 0 \
         ORDER BY s.name, o.name"
    );
    let item = if database.is_empty() { "table list" } else { database };
    let rows = fetch(conn, &sql, &[], item).await?;

    rows.iter()
        .map(|row| {
            let object_type = required_text(row, "object_type", item)?;
            let kind = TableKind::from_catalog(&object_type);
            Ok(TableDescriptor {
                name: required_text(row, "table_name", item)?,
                schema: text(row, "schema_name", item)?,
                kind,
                row_count: match kind {
                    TableKind::Table => int(row, "row_estimate", item)?.map(count_to_u64),
                    TableKind::View => None,
                },
                comment: text(row, "table_comment", item)?,
            })
        })
        .collect()
}

pub(super) async fn describe_table(
    conn: &mut PooledClient,
    database: &str,
    table: &str,
) -> Result<TableInfo> {
    let reference = TableRef::parse(table);
    let db = prefix(database);
    let (schema, object_id) = resolve_object(conn, &db, &reference).await?;
    let name = reference.name.as_str();

    let mut info = TableInfo::empty(database, Some(schema.clone()), name);
    info.columns = collect_columns(conn, &db, object_id, &schema, name).await?;
    info.indexes = collect_indexes(conn, &db, object_id, name).await?;
    info.foreign_keys = collect_foreign_keys(conn, &db, object_id, name).await?;
    info.triggers = collect_triggers(conn, &db, object_id, name).await?;
    info.row_count = estimate_rows(conn, &db, object_id, name).await;

    debug!(
        "Described SQL Server table {}.{}: {} columns, {} indexes, {} foreign keys",
        schema,
        name,
        info.columns.len(),
        info.indexes.len(),
        info.foreign_keys.len()
    );
    Ok(info)
}

/// Schema and object id of a table or view; the session's default schema
/// wins when none is given.
async fn resolve_object(conn: &mut PooledClient, db: &str, reference: &TableRef) -> Result<(String, i32)> {
    let sql = format!(
        "SELECT TOP 1 s.name AS schema_name, o.object_id AS object_id \
         FROM {db}sys.objects o \
         JOIN {db}sys.schemas s ON s.schema_id = o.schema_id \
         WHERE o.name = @P1 AND (@P2 = N'' OR s.name = @P2) AND o.type IN ('U', 'V') \
         ORDER BY CASE WHEN s.name = SCHEMA_NAME() THEN 0 ELSE 1 END, s.name"
    );
    let schema = reference.schema.as_deref().unwrap_or_default();
    let item = reference.name.as_str();
    let rows = fetch(conn, &sql, &[&item, &schema], item).await?;

    let Some(row) = rows.first() else {
        return Err(DbBridgeError::introspection_failed(item, "table not found"));
    };
    let schema = required_text(row, "schema_name", item)?;
    let object_id = row
        .try_get::<i32, _>("object_id")
        .map_err(|e| catalog_error(item, e))?
        .ok_or_else(|| DbBridgeError::introspection_failed(item, "object_id is NULL"))?;
    Ok((schema, object_id))
}

async fn collect_columns(
    conn: &mut PooledClient,
    db: &str,
    object_id: i32,
    schema: &str,
    table: &str,
) -> Result<Vec<ColumnDescriptor>> {
    let sql = format!(
        "SELECT c.COLUMN_NAME AS column_name, c.DATA_TYPE AS data_type, \
                c.IS_NULLABLE AS is_nullable, c.COLUMN_DEFAULT AS column_default, \
                CAST(c.CHARACTER_MAXIMUM_LENGTH AS bigint) AS max_length, \
                CAST(c.NUMERIC_PRECISION AS bigint) AS numeric_precision, \
                CAST(c.NUMERIC_SCALE AS bigint) AS numeric_scale, \
                CAST(c.ORDINAL_POSITION AS bigint) AS ordinal_position, \
                sc.is_identity AS is_identity, \
                CAST(CASE WHEN pk.column_id IS NULL THEN 0 ELSE 1 END AS bit) AS is_primary, \
                CAST(ep.value AS nvarchar(4000)) AS column_comment \
         FROM {db}INFORMATION_SCHEMA.COLUMNS c \
         JOIN {db}sys.columns sc ON sc.object_id = @P1 AND sc.name = c.COLUMN_NAME \
         LEFT JOIN ( \
             SELECT ic.column_id FROM {db}sys.index_columns ic \
             JOIN {db}sys.indexes i ON i.object_id = ic.object_id AND i.index_id = ic.index_id \
             WHERE i.is_primary_key = 1 AND ic.object_id = @P1 \
         ) pk ON pk.column_id = sc.column_id \
         LEFT JOIN {db}sys.extended_properties ep \
           ON ep.class = 1 AND ep.major_id = @P1 AND ep.minor_id = sc.column_id \
          AND ep.name = 'MS_Description' \
         WHERE c.TABLE_SCHEMA = @P2 AND c.TABLE_NAME = @P3 \
         ORDER BY c.ORDINAL_POSITION"
    );
    let rows = fetch(conn, &sql, &[&object_id, &schema, &table], table).await?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let ordinal = int(row, "ordinal_position", table)?.unwrap_or_default();
        let mut column = ColumnDescriptor::new(
            required_text(row, "column_name", table)?,
            required_text(row, "data_type", table)?,
            u32::try_from(ordinal).unwrap_or_default(),
        );
        column.is_nullable = is_nullable_flag(&required_text(row, "is_nullable", table)?);
        column.default_value = normalize_default(text(row, "column_default", table)?);
        column.max_length = normalize_dimension(int(row, "max_length", table)?);
        column.precision = normalize_dimension(int(row, "numeric_precision", table)?);
        column.scale = normalize_dimension(int(row, "numeric_scale", table)?);
        column.is_primary_key = flag(row, "is_primary", table)?;
        column.is_auto_increment = flag(row, "is_identity", table)?;
        column.comment = text(row, "column_comment", table)?;
        columns.push(column);
    }

    Ok(columns)
}

async fn collect_indexes(
    conn: &mut PooledClient,
    db: &str,
    object_id: i32,
    table: &str,
) -> Result<Vec<IndexDescriptor>> {
    let sql = format!(
        "SELECT i.name AS index_name, c.name AS column_name, \
                i.is_unique AS is_unique, i.is_primary_key AS is_primary, \
                i.type_desc AS index_type \
         FROM {db}sys.indexes i \
         JOIN {db}sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id \
         JOIN {db}sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id \
         WHERE i.object_id = @P1 AND i.name IS NOT NULL AND ic.is_included_column = 0 \
         ORDER BY i.is_primary_key DESC, i.name, ic.key_ordinal"
    );
    let rows = fetch(conn, &sql, &[&object_id], table).await?;

    let mut index_rows = Vec::with_capacity(rows.len());
    for row in &rows {
        index_rows.push(IndexColumnRow {
            index_name: required_text(row, "index_name", table)?,
            column_name: required_text(row, "column_name", table)?,
            is_unique: flag(row, "is_unique", table)?,
            is_primary: flag(row, "is_primary", table)?,
            index_type: text(row, "index_type", table)?,
        });
    }

    Ok(group_index_columns(index_rows))
}

async fn collect_foreign_keys(
    conn: &mut PooledClient,
    db: &str,
    object_id: i32,
    table: &str,
) -> Result<Vec<ForeignKeyDescriptor>> {
    let sql = format!(
        "SELECT fk.name AS constraint_name, pc.name AS column_name, \
                rs.name AS referenced_schema, rt.name AS referenced_table, \
                rc.name AS referenced_column, \
                fk.update_referential_action_desc AS update_rule, \
                fk.delete_referential_action_desc AS delete_rule \
         FROM {db}sys.foreign_keys fk \
         JOIN {db}sys.foreign_key_columns fkc ON fkc.constraint_object_id = fk.object_id \
         JOIN {db}sys.columns pc \
           ON pc.object_id = fkc.parent_object_id AND pc.column_id = fkc.parent_column_id \
         JOIN {db}sys.objects rt ON rt.object_id = fkc.referenced_object_id \
         JOIN {db}sys.schemas rs ON rs.schema_id = rt.schema_id \
         JOIN {db}sys.columns rc \
           ON rc.object_id = fkc.referenced_object_id AND rc.column_id = fkc.referenced_column_id \
         WHERE fk.parent_object_id = @P1 \
         ORDER BY fk.name, fkc.constraint_column_id"
    );
    let rows = fetch(conn, &sql, &[&object_id], table).await?;

    let mut fk_rows = Vec::with_capacity(rows.len());
    for row in &rows {
        fk_rows.push(ForeignKeyColumnRow {
            constraint_name: required_text(row, "constraint_name", table)?,
            named: true,
            column_name: required_text(row, "column_name", table)?,
            referenced_schema: text(row, "referenced_schema", table)?,
            referenced_table: required_text(row, "referenced_table", table)?,
            referenced_column: required_text(row, "referenced_column", table)?,
            on_update: text(row, "update_rule", table)?,
            on_delete: text(row, "delete_rule", table)?,
        });
    }

    Ok(group_foreign_keys(fk_rows))
}

async fn collect_triggers(
    conn: &mut PooledClient,
    db: &str,
    object_id: i32,
    table: &str,
) -> Result<Vec<TriggerDescriptor>> {
    let sql = format!(
        "SELECT t.name AS trigger_name, \
                CASE WHEN t.is_instead_of_trigger = 1 THEN N'INSTEAD OF' ELSE N'AFTER' END AS timing, \
                m.definition AS definition \
         FROM {db}sys.triggers t \
         LEFT JOIN {db}sys.sql_modules m ON m.object_id = t.object_id \
         WHERE t.parent_id = @P1 \
         ORDER BY t.name"
    );
    let rows = fetch(conn, &sql, &[&object_id], table).await?;

    rows.iter()
        .map(|row| {
            // Encrypted modules have no readable definition
            let definition = text(row, "definition", table)?;
            Ok(TriggerDescriptor {
                name: required_text(row, "trigger_name", table)?,
                timing: text(row, "timing", table)?,
                event: definition.as_deref().and_then(parse_trigger_event),
                definition,
            })
        })
        .collect()
}

/// Row count from partition statistics.
async fn estimate_rows(conn: &mut PooledClient, db: &str, object_id: i32, table: &str) -> Option<u64> {
    let sql = format!(
        "SELECT CAST(SUM(p.rows) AS bigint) AS row_estimate \
         FROM {db}sys.partitions p \
         WHERE p.object_id = @P1 AND p.index_id IN (0, 1)"
    );
    let rows = fetch(conn, &sql, &[&object_id], table).await.ok()?;
    let row = rows.first()?;
    int(row, "row_estimate", table).ok().flatten().map(count_to_u64)
}
