//! PostgreSQL catalog reads over `pg_catalog`.
//!
//! Relations are addressed by `to_regclass(format('%I.%I', schema, table))`
//! so mixed-case and reserved names resolve exactly as stored.

use futures::stream::{self, StreamExt};
use sqlx::PgPool;
use tracing::debug;

use super::PostgresAdapter;
use crate::Result;
use crate::adapters::helpers::{catalog_value, count_to_u64, sqlx_catalog_error};
use crate::error::DbBridgeError;
use crate::models::{
    ColumnDescriptor, DatabaseDescriptor, ForeignKeyDescriptor, IndexDescriptor, TableDescriptor,
    TableInfo, TableKind, TriggerDescriptor,
};
use crate::normalize::{
    ForeignKeyColumnRow, IndexColumnRow, group_foreign_keys, group_index_columns,
    normalize_default, normalize_dimension, parse_trigger_event, parse_trigger_timing,
};
use crate::query::TableRef;

/// Databases whose objects are listed concurrently.
const DATABASE_LIST_CONCURRENCY: usize = 4;

/// Schema that is left off object names in database listings.
const DEFAULT_SCHEMA: &str = "public";

const RELATION: &str = "to_regclass(format('%I.%I', $1::text, $2::text))";

pub(super) async fn list_databases(
    adapter: &PostgresAdapter,
    pool: &PgPool,
    current: &str,
) -> Result<Vec<DatabaseDescriptor>> {
    let rows = sqlx::query(
        "SELECT d.datname::text AS name, \
                CASE WHEN has_database_privilege(d.datname, 'CONNECT') \
                     THEN pg_database_size(d.datname) END AS size_bytes \
         FROM pg_database d \
         WHERE d.datallowconn AND NOT d.datistemplate \
         ORDER BY d.datname",
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
        descriptor.is_current = name == current;
        databases.push(descriptor);
    }

    // Each database needs its own session; failures stay on that descriptor
    let names: Vec<String> = databases.iter().map(|d| d.name.clone()).collect();
    let objects: Vec<Result<Vec<TableDescriptor>>> = stream::iter(names)
        .map(|name| async move {
            let catalog = adapter.catalog_pool(&name).await?;
            let listed = list_tables(catalog.pool()).await;
            catalog.release().await;
            listed
        })
        .buffered(DATABASE_LIST_CONCURRENCY)
        .collect()
        .await;

    for (descriptor, listed) in databases.iter_mut().zip(objects) {
        match listed {
            Ok(tables) => {
                for table in tables {
                    let name = match table.schema.as_deref() {
                        Some(schema) if schema != DEFAULT_SCHEMA => {
                            format!("{schema}.{}", table.name)
                        }
                        _ => table.name,
                    };
                    match table.kind {
                        TableKind::Table => descriptor.tables.push(name),
                        TableKind::View => descriptor.views.push(name),
                    }
                }
            }
            Err(e) => {
                debug!("Could not list objects of database '{}': {}", descriptor.name, e);
                descriptor.error = Some(e.to_string());
            }
        }
    }

    Ok(databases)
}

/// Tables, views and foreign tables in every user schema of the pool's database.
pub(super) async fn list_tables(pool: &PgPool) -> Result<Vec<TableDescriptor>> {
    let rows = sqlx::query(
        "SELECT c.relname::text AS table_name, \
                n.nspname::text AS schema_name, \
                c.relkind::text AS relkind, \
                CASE WHEN c.reltuples < 0 THEN NULL ELSE c.reltuples::int8 END AS estimated_rows, \
                obj_description(c.oid, 'pg_class') AS table_comment \
         FROM pg_class c \
         JOIN pg_namespace n ON n.oid = c.relnamespace \
         WHERE c.relkind IN ('r', 'p', 'v', 'm', 'f') \
           AND n.nspname NOT IN ('pg_catalog', 'information_schema') \
           AND n.nspname NOT LIKE 'pg_toast%' \
           AND n.nspname NOT LIKE 'pg_temp%' \
         ORDER BY n.nspname, c.relname",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| sqlx_catalog_error("table list", e))?;

    rows.iter()
        .map(|row| {
            let relkind: String = catalog_value(row, "relkind", "table list")?;
            let kind = TableKind::from_catalog(&relkind);
            let estimate: Option<i64> = catalog_value(row, "estimated_rows", "table list")?;
            Ok(TableDescriptor {
                name: catalog_value(row, "table_name", "table list")?,
                schema: catalog_value(row, "schema_name", "table list")?,
                kind,
                row_count: match kind {
                    TableKind::Table => estimate.map(count_to_u64),
                    TableKind::View => None,
                },
                comment: catalog_value(row, "table_comment", "table list")?,
            })
        })
        .collect()
}

pub(super) async fn describe_table(pool: &PgPool, database: &str, table: &str) -> Result<TableInfo> {
    let reference = TableRef::parse(table);
    let (schema, estimate) = resolve_relation(pool, &reference).await?;
    let name = reference.name.as_str();

    let mut info = TableInfo::empty(database, Some(schema.clone()), name);
    info.columns = collect_columns(pool, &schema, name).await?;
    info.indexes = collect_indexes(pool, &schema, name).await?;
    info.foreign_keys = collect_foreign_keys(pool, &schema, name).await?;
    info.triggers = collect_triggers(pool, &schema, name).await?;
    info.row_count = estimate;

    debug!(
        "Described PostgreSQL table {}.{}: {} columns, {} indexes, {} foreign keys",
        schema,
        name,
        info.columns.len(),
        info.indexes.len(),
        info.foreign_keys.len()
    );
    Ok(info)
}

/// Finds the schema holding `reference`; without an explicit schema the
/// current schema wins over others.
async fn resolve_relation(pool: &PgPool, reference: &TableRef) -> Result<(String, Option<u64>)> {
    let row = sqlx::query(
        "SELECT n.nspname::text AS schema_name, \
                CASE WHEN c.reltuples < 0 THEN NULL ELSE c.reltuples::int8 END AS estimated_rows \
         FROM pg_class c \
         JOIN pg_namespace n ON n.oid = c.relnamespace \
         WHERE c.relname = $1 \
           AND ($2::text IS NULL OR n.nspname = $2::text) \
           AND c.relkind IN ('r', 'p', 'v', 'm', 'f') \
         ORDER BY (n.nspname = current_schema()) DESC, n.nspname \
         LIMIT 1",
    )
    .bind(&reference.name)
    .bind(reference.schema.as_deref())
    .fetch_optional(pool)
    .await
    .map_err(|e| sqlx_catalog_error(&reference.name, e))?;

    let Some(row) = row else {
        return Err(DbBridgeError::introspection_failed(
            &reference.name,
            "table not found",
        ));
    };
    let schema: String = catalog_value(&row, "schema_name", &reference.name)?;
    let estimate: Option<i64> = catalog_value(&row, "estimated_rows", &reference.name)?;
    Ok((schema, estimate.map(count_to_u64)))
}

async fn collect_columns(pool: &PgPool, schema: &str, table: &str) -> Result<Vec<ColumnDescriptor>> {
    let sql = format!(
        "SELECT c.column_name::text AS column_name, \
                format_type(a.atttypid, a.atttypmod) AS data_type, \
                c.is_nullable::text AS is_nullable, \
                c.column_default::text AS column_default, \
                c.character_maximum_length::int8 AS max_length, \
                c.numeric_precision::int8 AS numeric_precision, \
                c.numeric_scale::int8 AS numeric_scale, \
                c.is_identity::text AS is_identity, \
                c.ordinal_position::int8 AS ordinal_position, \
                col_description(a.attrelid, a.attnum) AS column_comment, \
                EXISTS ( \
                    SELECT 1 FROM pg_index ix \
                    WHERE ix.indrelid = a.attrelid AND ix.indisprimary \
                      AND a.attnum = ANY(ix.indkey::int2[]) \
                ) AS is_primary \
         FROM information_schema.columns c \
         JOIN pg_attribute a ON a.attrelid = {RELATION} AND a.attname = c.column_name \
         WHERE c.table_schema = $1 AND c.table_name = $2 \
         ORDER BY c.ordinal_position"
    );
    let rows = sqlx::query(&sql)
        .bind(schema)
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(|e| sqlx_catalog_error(table, e))?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let name: String = catalog_value(row, "column_name", table)?;
        let data_type: String = catalog_value(row, "data_type", table)?;
        let ordinal: i64 = catalog_value(row, "ordinal_position", table)?;
        let nullable: String = catalog_value(row, "is_nullable", table)?;
        let identity: Option<String> = catalog_value(row, "is_identity", table)?;
        let default: Option<String> = catalog_value(row, "column_default", table)?;

        let mut column = ColumnDescriptor::new(
            name,
            data_type,
            u32::try_from(ordinal).unwrap_or_default(),
        );
        column.is_nullable = nullable.eq_ignore_ascii_case("YES");
        column.is_auto_increment = identity.as_deref() == Some("YES")
            || default.as_deref().is_some_and(|d| d.starts_with("nextval("));
        column.default_value = normalize_default(default);
        column.max_length = normalize_dimension(catalog_value(row, "max_length", table)?);
        column.precision = normalize_dimension(catalog_value(row, "numeric_precision", table)?);
        column.scale = normalize_dimension(catalog_value(row, "numeric_scale", table)?);
        column.is_primary_key = catalog_value(row, "is_primary", table)?;
        column.comment = catalog_value(row, "column_comment", table)?;
        columns.push(column);
    }

    Ok(columns)
}

async fn collect_indexes(pool: &PgPool, schema: &str, table: &str) -> Result<Vec<IndexDescriptor>> {
    let sql = format!(
        "SELECT ic.relname::text AS index_name, \
                COALESCE(a.attname::text, '<expression>') AS column_name, \
                ix.indisunique AS is_unique, \
                ix.indisprimary AS is_primary, \
                am.amname::text AS index_type \
         FROM pg_index ix \
         JOIN pg_class ic ON ic.oid = ix.indexrelid \
         JOIN pg_am am ON am.oid = ic.relam \
         CROSS JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord) \
         LEFT JOIN pg_attribute a ON a.attrelid = ix.indrelid AND a.attnum = k.attnum \
         WHERE ix.indrelid = {RELATION} \
         ORDER BY ix.indisprimary DESC, ic.relname, k.ord"
    );
    let rows = sqlx::query(&sql)
        .bind(schema)
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(|e| sqlx_catalog_error(table, e))?;

    let mut index_rows = Vec::with_capacity(rows.len());
    for row in &rows {
        index_rows.push(IndexColumnRow {
            index_name: catalog_value(row, "index_name", table)?,
            column_name: catalog_value(row, "column_name", table)?,
            is_unique: catalog_value(row, "is_unique", table)?,
            is_primary: catalog_value(row, "is_primary", table)?,
            index_type: catalog_value(row, "index_type", table)?,
        });
    }

    Ok(group_index_columns(index_rows))
}

async fn collect_foreign_keys(
    pool: &PgPool,
    schema: &str,
    table: &str,
) -> Result<Vec<ForeignKeyDescriptor>> {
    let sql = format!(
        "SELECT con.conname::text AS constraint_name, \
                a.attname::text AS column_name, \
                rn.nspname::text AS referenced_schema, \
                rc.relname::text AS referenced_table, \
                ra.attname::text AS referenced_column, \
                {update_rule} AS update_rule, \
                {delete_rule} AS delete_rule \
         FROM pg_constraint con \
         CROSS JOIN LATERAL unnest(con.conkey, con.confkey) WITH ORDINALITY AS k(attnum, refnum, ord) \
         JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum \
         JOIN pg_class rc ON rc.oid = con.confrelid \
         JOIN pg_namespace rn ON rn.oid = rc.relnamespace \
         JOIN pg_attribute ra ON ra.attrelid = con.confrelid AND ra.attnum = k.refnum \
         WHERE con.contype = 'f' AND con.conrelid = {RELATION} \
         ORDER BY con.conname, k.ord",
        update_rule = referential_action_case("con.confupdtype"),
        delete_rule = referential_action_case("con.confdeltype"),
    );
    let rows = sqlx::query(&sql)
        .bind(schema)
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

/// SQL mapping a `pg_constraint` action code to its keyword.
fn referential_action_case(column: &str) -> String {
    format!(
        "CASE {column} \
             WHEN 'a' THEN 'NO ACTION' \
             WHEN 'r' THEN 'RESTRICT' \
             WHEN 'c' THEN 'CASCADE' \
             WHEN 'n' THEN 'SET NULL' \
             WHEN 'd' THEN 'SET DEFAULT' \
         END"
    )
}

async fn collect_triggers(pool: &PgPool, schema: &str, table: &str) -> Result<Vec<TriggerDescriptor>> {
    let sql = format!(
        "SELECT t.tgname::text AS trigger_name, \
                pg_get_triggerdef(t.oid) AS definition \
         FROM pg_trigger t \
         WHERE t.tgrelid = {RELATION} AND NOT t.tgisinternal \
         ORDER BY t.tgname"
    );
    let rows = sqlx::query(&sql)
        .bind(schema)
        .bind(table)
        .fetch_all(pool)
        .await
        .map_err(|e| sqlx_catalog_error(table, e))?;

    rows.iter()
        .map(|row| {
            let definition: String = catalog_value(row, "definition", table)?;
            Ok(TriggerDescriptor {
                name: catalog_value(row, "trigger_name", table)?,
                timing: parse_trigger_timing(&definition),
                event: parse_trigger_event(&definition),
                definition: Some(definition),
            })
        })
        .collect()
}
