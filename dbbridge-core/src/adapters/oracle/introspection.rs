//! Oracle data dictionary reads through the `ALL_*` views.
//!
//! Schemas stand in for databases. Owners are bound as parameters and table
//! names are matched exactly as stored in the dictionary.

use ::oracle::sql_type::ToSql;
use ::oracle::{Connection, Row};
use tracing::debug;

use super::is_session_lost;
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
    parse_trigger_timing,
};

fn catalog_error(item: &str, error: ::oracle::Error) -> DbBridgeError {
    let message = error.to_string();
    if is_session_lost(&message) {
        DbBridgeError::connection_failed(format!("Catalog read for '{item}' lost its session"), error)
    } else {
        DbBridgeError::introspection_failed(item, message)
    }
}

/// Runs a dictionary query with named binds and collects its rows.
fn fetch(conn: &Connection, sql: &str, params: &[(&str, &dyn ToSql)], item: &str) -> Result<Vec<Row>> {
    let rows = conn
        .query_named(sql, params)
        .map_err(|e| catalog_error(item, e))?;
    rows.map(|row| row.map_err(|e| catalog_error(item, e)))
        .collect()
}

fn text(row: &Row, column: &str, item: &str) -> Result<Option<String>> {
    row.get::<_, Option<String>>(column)
        .map_err(|e| catalog_error(item, e))
}

fn required_text(row: &Row, column: &str, item: &str) -> Result<String> {
    text(row, column, item)?
        .ok_or_else(|| DbBridgeError::introspection_failed(item, format!("{column} is NULL")))
}

fn int(row: &Row, column: &str, item: &str) -> Result<Option<i64>> {
    row.get::<_, Option<i64>>(column)
        .map_err(|e| catalog_error(item, e))
}

/// `Y`/`YES`/`1` style dictionary flags.
fn flag(row: &Row, column: &str, item: &str) -> Result<bool> {
    Ok(text(row, column, item)?.is_some_and(|raw| is_nullable_flag(&raw)))
}

pub(super) fn list_schemas(conn: &Connection, current: Option<&str>) -> Result<Vec<DatabaseDescriptor>> {
    let schemas = fetch(
        conn,
        "SELECT username FROM all_users WHERE oracle_maintained = 'N' ORDER BY username",
        &[],
        "schema list",
    )?;

    let mut databases = Vec::with_capacity(schemas.len());
    for row in &schemas {
        let name = required_text(row, "USERNAME", "schema list")?;
        let mut descriptor = DatabaseDescriptor::new(name.as_str());
        descriptor.is_current = current == Some(name.as_str());

        match list_tables(conn, &name) {
            Ok(tables) => {
                for table in tables {
                    match table.kind {
                        TableKind::Table => descriptor.tables.push(table.name),
                        TableKind::View => descriptor.views.push(table.name),
                    }
                }
            }
            Err(e) if e.is_connection_error() => return Err(e),
            Err(e) => {
                debug!("Could not list objects of schema '{}': {}", name, e);
                descriptor.error = Some(e.to_string());
            }
        }
        databases.push(descriptor);
    }

    // Segment sizes are only visible for the session's own schema
    if let Some(size) = own_schema_size(conn)
        && let Some(own) = databases.iter_mut().find(|db| db.is_current)
    {
        own.size_bytes = Some(size);
    }

    Ok(databases)
}

fn own_schema_size(conn: &Connection) -> Option<u64> {
    let rows = fetch(
        conn,
        "SELECT SUM(bytes) AS size_bytes FROM user_segments",
        &[],
        "schema size",
    )
    .ok()?;
    let row = rows.first()?;
    int(row, "SIZE_BYTES", "schema size").ok().flatten().map(count_to_u64)
}

/// Tables and views owned by `owner`; an empty owner means the current schema.
pub(super) fn list_tables(conn: &Connection, owner: &str) -> Result<Vec<TableDescriptor>> {
    let item = if owner.is_empty() { "table list" } else { owner };
    let rows = fetch(
        conn,
        "SELECT o.owner, o.object_name, o.object_type, t.num_rows, c.comments \
         FROM all_objects o \
         LEFT JOIN all_tables t ON t.owner = o.owner AND t.table_name = o.object_name \
         LEFT JOIN all_tab_comments c ON c.owner = o.owner AND c.table_name = o.object_name \
         WHERE o.owner = NVL(:owner, SYS_CONTEXT('USERENV', 'CURRENT_SCHEMA')) \
           AND o.object_type IN ('TABLE', 'VIEW') \
           AND o.object_name NOT LIKE 'BIN$%' \
         ORDER BY o.object_name",
        &[("owner", &owner)],
        item,
    )?;

    rows.iter()
        .map(|row| {
            let kind = TableKind::from_catalog(&required_text(row, "OBJECT_TYPE", item)?);
            Ok(TableDescriptor {
                name: required_text(row, "OBJECT_NAME", item)?,
                schema: text(row, "OWNER", item)?,
                kind,
                row_count: match kind {
                    TableKind::Table => int(row, "NUM_ROWS", item)?.map(count_to_u64),
                    TableKind::View => None,
                },
                comment: text(row, "COMMENTS", item)?,
            })
        })
        .collect()
}

pub(super) fn describe_table(conn: &Connection, owner: &str, table: &str) -> Result<TableInfo> {
    let owner = resolve_owner(conn, owner, table)?;

    let mut info = TableInfo::empty(owner.as_str(), Some(owner.clone()), table);
    info.columns = collect_columns(conn, &owner, table)?;
    info.indexes = collect_indexes(conn, &owner, table)?;
    info.foreign_keys = collect_foreign_keys(conn, &owner, table)?;
    info.triggers = collect_triggers(conn, &owner, table)?;
    info.row_count = row_statistics(conn, &owner, table);

    debug!(
        "Described Oracle table {}.{}: {} columns, {} indexes, {} foreign keys",
        owner,
        table,
        info.columns.len(),
        info.indexes.len(),
        info.foreign_keys.len()
    );
    Ok(info)
}

/// Owner of a visible table or view, defaulting to the current schema.
fn resolve_owner(conn: &Connection, owner: &str, table: &str) -> Result<String> {
    let rows = fetch(
        conn,
        "SELECT owner FROM all_objects \
         WHERE owner = NVL(:owner, SYS_CONTEXT('USERENV', 'CURRENT_SCHEMA')) \
           AND object_name = :tbl AND object_type IN ('TABLE', 'VIEW') \
           AND ROWNUM = 1",
        &[("owner", &owner), ("tbl", &table)],
        table,
    )?;
    let Some(row) = rows.first() else {
        return Err(DbBridgeError::introspection_failed(table, "table not found"));
    };
    required_text(row, "OWNER", table)
}

fn collect_columns(conn: &Connection, owner: &str, table: &str) -> Result<Vec<ColumnDescriptor>> {
    let rows = fetch(
        conn,
        "SELECT c.column_name, c.data_type, c.nullable, c.data_default, \
                c.char_length, c.data_precision, c.data_scale, c.column_id, \
                c.identity_column, cm.comments, \
                CASE WHEN pk.column_name IS NULL THEN 'N' ELSE 'Y' END AS is_primary \
         FROM all_tab_columns c \
         LEFT JOIN all_col_comments cm \
           ON cm.owner = c.owner AND cm.table_name = c.table_name AND cm.column_name = c.column_name \
         LEFT JOIN ( \
             SELECT cc.column_name FROM all_constraints k \
             JOIN all_cons_columns cc ON cc.owner = k.owner AND cc.constraint_name = k.constraint_name \
             WHERE k.owner = :owner AND k.table_name = :tbl AND k.constraint_type = 'P' \
         ) pk ON pk.column_name = c.column_name \
         WHERE c.owner = :owner AND c.table_name = :tbl \
         ORDER BY c.column_id",
        &[("owner", &owner), ("tbl", &table)],
        table,
    )?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let ordinal = int(row, "COLUMN_ID", table)?.unwrap_or_default();
        let mut column = ColumnDescriptor::new(
            required_text(row, "COLUMN_NAME", table)?,
            required_text(row, "DATA_TYPE", table)?,
            u32::try_from(ordinal).unwrap_or_default(),
        );
        column.is_nullable = is_nullable_flag(&required_text(row, "NULLABLE", table)?);
        column.default_value = normalize_default(text(row, "DATA_DEFAULT", table)?);
        // CHAR_LENGTH is 0 for non-character types
        column.max_length = normalize_dimension(int(row, "CHAR_LENGTH", table)?.filter(|len| *len > 0));
        column.precision = normalize_dimension(int(row, "DATA_PRECISION", table)?);
        column.scale = normalize_dimension(int(row, "DATA_SCALE", table)?);
        column.is_primary_key = flag(row, "IS_PRIMARY", table)?;
        column.is_auto_increment = flag(row, "IDENTITY_COLUMN", table)?
            || column
                .default_value
                .as_deref()
                .is_some_and(|default| default.to_ascii_uppercase().contains(".NEXTVAL"));
        column.comment = text(row, "COMMENTS", table)?;
        columns.push(column);
    }

    Ok(columns)
}

fn collect_indexes(conn: &Connection, owner: &str, table: &str) -> Result<Vec<IndexDescriptor>> {
    let rows = fetch(
        conn,
        "SELECT i.index_name, ic.column_name, i.uniqueness, i.index_type, \
                CASE WHEN k.constraint_name IS NULL THEN 'N' ELSE 'Y' END AS is_primary \
         FROM all_indexes i \
         JOIN all_ind_columns ic ON ic.index_owner = i.owner AND ic.index_name = i.index_name \
         LEFT JOIN all_constraints k \
           ON k.owner = i.table_owner AND k.table_name = i.table_name \
          AND k.index_name = i.index_name AND k.constraint_type = 'P' \
         WHERE i.table_owner = :owner AND i.table_name = :tbl \
         ORDER BY is_primary DESC, i.index_name, ic.column_position",
        &[("owner", &owner), ("tbl", &table)],
        table,
    )?;

    let mut index_rows = Vec::with_capacity(rows.len());
    for row in &rows {
        index_rows.push(IndexColumnRow {
            index_name: required_text(row, "INDEX_NAME", table)?,
            column_name: required_text(row, "COLUMN_NAME", table)?,
            is_unique: text(row, "UNIQUENESS", table)?.as_deref() == Some("UNIQUE"),
            is_primary: flag(row, "IS_PRIMARY", table)?,
            index_type: text(row, "INDEX_TYPE", table)?,
        });
    }

    Ok(group_index_columns(index_rows))
}

/// Oracle has no `ON UPDATE` rule; only the delete rule is reported.
fn collect_foreign_keys(conn: &Connection, owner: &str, table: &str) -> Result<Vec<ForeignKeyDescriptor>> {
    let rows = fetch(
        conn,
        "SELECT c.constraint_name, cc.column_name, r.owner AS referenced_owner, \
                r.table_name AS referenced_table, rc.column_name AS referenced_column, \
                c.delete_rule \
         FROM all_constraints c \
         JOIN all_cons_columns cc ON cc.owner = c.owner AND cc.constraint_name = c.constraint_name \
         JOIN all_constraints r ON r.owner = c.r_owner AND r.constraint_name = c.r_constraint_name \
         JOIN all_cons_columns rc \
           ON rc.owner = r.owner AND rc.constraint_name = r.constraint_name AND rc.position = cc.position \
         WHERE c.owner = :owner AND c.table_name = :tbl AND c.constraint_type = 'R' \
         ORDER BY c.constraint_name, cc.position",
        &[("owner", &owner), ("tbl", &table)],
        table,
    )?;

    let mut fk_rows = Vec::with_capacity(rows.len());
    for row in &rows {
        fk_rows.push(ForeignKeyColumnRow {
            constraint_name: required_text(row, "CONSTRAINT_NAME", table)?,
            named: true,
            column_name: required_text(row, "COLUMN_NAME", table)?,
            referenced_schema: text(row, "REFERENCED_OWNER", table)?,
            referenced_table: required_text(row, "REFERENCED_TABLE", table)?,
            referenced_column: required_text(row, "REFERENCED_COLUMN", table)?,
            on_update: None,
            on_delete: text(row, "DELETE_RULE", table)?,
        });
    }

    Ok(group_foreign_keys(fk_rows))
}

fn collect_triggers(conn: &Connection, owner: &str, table: &str) -> Result<Vec<TriggerDescriptor>> {
    let rows = fetch(
        conn,
        "SELECT trigger_name, trigger_type, triggering_event, trigger_body \
         FROM all_triggers \
         WHERE table_owner = :owner AND table_name = :tbl \
         ORDER BY trigger_name",
        &[("owner", &owner), ("tbl", &table)],
        table,
    )?;

    rows.iter()
        .map(|row| {
            let trigger_type = text(row, "TRIGGER_TYPE", table)?;
            let event = text(row, "TRIGGERING_EVENT", table)?;
            Ok(TriggerDescriptor {
                name: required_text(row, "TRIGGER_NAME", table)?,
                timing: trigger_type.as_deref().and_then(parse_trigger_timing),
                event: event.as_deref().and_then(parse_trigger_event),
                definition: text(row, "TRIGGER_BODY", table)?,
            })
        })
        .collect()
}

/// Row count from optimizer statistics; absent until the table is analyzed.
fn row_statistics(conn: &Connection, owner: &str, table: &str) -> Option<u64> {
    let rows = fetch(
        conn,
        "SELECT num_rows FROM all_tables WHERE owner = :owner AND table_name = :tbl",
        &[("owner", &owner), ("tbl", &table)],
        table,
    )
    .ok()?;
    let row = rows.first()?;
    int(row, "NUM_ROWS", table).ok().flatten().map(count_to_u64)
}
