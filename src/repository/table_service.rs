//! Allow-listed generic CRUD over the fleet tables.
//!
//! Rows travel as `serde_json::Value` via `row_to_json`, and writes go through
//! `jsonb_populate_record` so Postgres resolves column types (uuid, enum,
//! numeric, date) from the table definition instead of the application
//! guessing them.

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde_json::{Map, Value};
use sqlx::{postgres::PgRow, Postgres, QueryBuilder, Row};

use crate::error::AppError;

const ALLOWED_TABLES: &[&str] = &[
    "audit_logs",
    "boundary_contracts",
    "branches",
    "breakdown_types",
    "drivers",
    "expenses",
    "franchises",
    "revenue_breakdowns",
    "revenues",
    "staff_members",
    "vehicles",
];

pub async fn list_rows(
    pool: &sqlx::PgPool,
    table: &str,
    filters: Option<&Map<String, Value>>,
    limit: i64,
    offset: i64,
    order_by: &str,
    ascending: bool,
) -> Result<Vec<Value>, AppError> {
    let table_name = validate_table(table)?;
    let order_name = if order_by.trim().is_empty() {
        "created_at"
    } else {
        validate_identifier(order_by)?
    };

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE 1=1");

    if let Some(filter_map) = filters {
        for (key, value) in filter_map {
            push_filter_clause(&mut query, key, value)?;
        }
    }

    query.push(" ORDER BY t.").push(order_name);
    query.push(if ascending { " ASC" } else { " DESC" });
    query
        .push(" LIMIT ")
        .push_bind(limit.clamp(1, 2000))
        .push(" OFFSET ")
        .push_bind(offset.max(0));

    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    Ok(read_rows(rows))
}

pub async fn get_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
    id_field: &str,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;

    let mut query = QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM ");
    query.push(table_name).push(" t WHERE ");
    push_scalar_equals(&mut query, id_name, row_id);
    query.push(" LIMIT 1");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

pub async fn create_row(
    pool: &sqlx::PgPool,
    table: &str,
    payload: &Map<String, Value>,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    if payload.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Could not create {table_name} record."
        )));
    }

    let mut keys = payload.keys().cloned().collect::<Vec<_>>();
    keys.sort_unstable();
    for key in &keys {
        validate_identifier(key)?;
    }

    let mut query = QueryBuilder::<Postgres>::new("INSERT INTO ");
    query.push(table_name).push(" (");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(key.as_str());
        }
    }
    query.push(") SELECT ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push("r.");
            separated.push_unseparated(key.as_str());
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query
        .push(") r RETURNING row_to_json(")
        .push(table_name)
        .push(".*) AS row");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::Internal(format!("Could not create {table_name} record.")))
}

pub async fn update_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
    payload: &Map<String, Value>,
    id_field: &str,
) -> Result<Value, AppError> {
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;
    if payload.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }

    let mut keys = payload.keys().cloned().collect::<Vec<_>>();
    keys.sort_unstable();
    for key in &keys {
        validate_identifier(key)?;
    }

    let mut query = QueryBuilder::<Postgres>::new("UPDATE ");
    query.push(table_name).push(" t SET ");
    {
        let mut separated = query.separated(", ");
        for key in &keys {
            separated.push(key.as_str());
            separated.push_unseparated(" = r.");
            separated.push_unseparated(key.as_str());
        }
    }
    query
        .push(" FROM jsonb_populate_record(NULL::")
        .push(table_name)
        .push(", ");
    query.push_bind(Value::Object(payload.clone()));
    query.push(") r WHERE ");
    push_scalar_equals(&mut query, id_name, row_id);
    query.push(" RETURNING row_to_json(t) AS row");

    let row = query
        .build()
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound(format!("{table_name} record not found.")))
}

pub async fn delete_row(
    pool: &sqlx::PgPool,
    table: &str,
    row_id: &str,
    id_field: &str,
) -> Result<Value, AppError> {
    let existing = get_row(pool, table, row_id, id_field).await?;
    let table_name = validate_table(table)?;
    let id_name = validate_identifier(id_field)?;

    let mut query = QueryBuilder::<Postgres>::new("DELETE FROM ");
    query.push(table_name).push(" t WHERE ");
    push_scalar_equals(&mut query, id_name, row_id);
    query.build().execute(pool).await.map_err(map_db_error)?;

    Ok(existing)
}

fn read_rows(rows: Vec<PgRow>) -> Vec<Value> {
    rows.into_iter()
        .filter_map(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .collect()
}

fn validate_table(table: &str) -> Result<&str, AppError> {
    let normalized = validate_identifier(table)?;
    if ALLOWED_TABLES.contains(&normalized) {
        return Ok(normalized);
    }
    Err(AppError::Forbidden(format!(
        "Table '{normalized}' is not allowed."
    )))
}

fn validate_identifier(identifier: &str) -> Result<&str, AppError> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest(
            "Identifier cannot be empty.".to_string(),
        ));
    }
    let valid_chars = trimmed.chars().all(|character| {
        character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_'
    });
    let starts_with_digit = trimmed
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_digit());
    if !valid_chars || starts_with_digit {
        return Err(AppError::BadRequest(format!(
            "Invalid identifier '{trimmed}'."
        )));
    }
    Ok(trimmed)
}

/// Filter key suffixes: `col__gte`, `col__lte`, `col__ilike`, `col__in`
/// (array value). A bare key is equality. Null values are skipped so callers
/// can pass optional filters straight through.
fn push_filter_clause(
    query: &mut QueryBuilder<Postgres>,
    filter_key: &str,
    value: &Value,
) -> Result<(), AppError> {
    let (column, suffix) = match filter_key.rsplit_once("__") {
        Some((column, suffix)) if matches!(suffix, "gte" | "lte" | "ilike" | "in") => {
            (validate_identifier(column)?, suffix)
        }
        _ => (validate_identifier(filter_key)?, ""),
    };

    match (suffix, value) {
        (_, Value::Null) => Ok(()),
        ("in", Value::Array(items)) => {
            let values = items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(ToOwned::to_owned)
                .collect::<Vec<_>>();
            if values.is_empty() {
                return Ok(());
            }
            query
                .push(" AND t.")
                .push(column)
                .push("::text = ANY(")
                .push_bind(values)
                .push(")");
            Ok(())
        }
        ("in", _) => Err(AppError::BadRequest(format!(
            "Filter '{filter_key}' requires an array value."
        ))),
        ("ilike", _) => {
            query
                .push(" AND t.")
                .push(column)
                .push("::text ILIKE ")
                .push_bind(format!("%{}%", scalar_text(value)));
            Ok(())
        }
        ("gte", _) | ("lte", _) => {
            let operator = if suffix == "gte" { " >= " } else { " <= " };
            query.push(" AND t.").push(column);
            push_comparable(query, column, operator, value);
            Ok(())
        }
        (_, Value::Array(_)) => Err(AppError::BadRequest(format!(
            "Filter '{filter_key}' does not support array values (use __in)."
        ))),
        _ => {
            query.push(" AND ");
            push_scalar_equals(query, column, &scalar_text(value));
            Ok(())
        }
    }
}

/// Equality with the column cast to text except for uuid-shaped id columns,
/// which bind natively so indexes stay usable.
fn push_scalar_equals(query: &mut QueryBuilder<Postgres>, column: &str, raw: &str) {
    query.push("t.").push(column);
    if is_uuid_column(column) {
        if let Ok(parsed) = uuid::Uuid::parse_str(raw.trim()) {
            query.push(" = ").push_bind(parsed);
            return;
        }
    }
    query.push("::text = ").push_bind(raw.trim().to_string());
}

fn push_comparable(query: &mut QueryBuilder<Postgres>, column: &str, operator: &str, value: &Value) {
    let text = scalar_text(value);
    let trimmed = text.trim();
    if is_date_column(column) {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            query.push(operator).push_bind(date);
            return;
        }
        if let Ok(stamp) = DateTime::<FixedOffset>::parse_from_rfc3339(trimmed) {
            query.push(operator).push_bind(stamp);
            return;
        }
    }
    if let Some(number) = value.as_f64() {
        query.push(operator).push_bind(number);
        return;
    }
    query
        .push("::text")
        .push(operator)
        .push_bind(trimmed.to_string());
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        other => other.to_string(),
    }
}

fn is_uuid_column(column: &str) -> bool {
    let trimmed = column.trim();
    trimmed == "id" || trimmed.ends_with("_id")
}

fn is_date_column(column: &str) -> bool {
    let trimmed = column.trim();
    trimmed.ends_with("_date")
        || trimmed.ends_with("_on")
        || trimmed.ends_with("_at")
        || matches!(trimmed, "license_expiry")
}

fn map_db_error(error: sqlx::Error) -> AppError {
    let message = error.to_string();
    tracing::error!(db_error = %message, "Database query failed");

    if message.contains("23505")
        || message
            .to_ascii_lowercase()
            .contains("duplicate key value violates unique constraint")
    {
        return AppError::Conflict("Duplicate value violates a unique constraint.".to_string());
    }
    AppError::Dependency("Database operation failed.".to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};
    use sqlx::{Postgres, QueryBuilder};

    use super::{push_filter_clause, validate_identifier, validate_table};

    fn filtered_sql(filters: &[(&str, Value)]) -> String {
        let mut query =
            QueryBuilder::<Postgres>::new("SELECT row_to_json(t) AS row FROM revenues t WHERE 1=1");
        let map: Map<String, Value> = filters
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.clone()))
            .collect();
        for (key, value) in &map {
            push_filter_clause(&mut query, key, value).unwrap();
        }
        query.sql().to_string()
    }

    #[test]
    fn rejects_tables_outside_the_allow_list() {
        assert!(validate_table("revenues").is_ok());
        assert!(validate_table("pg_catalog").is_err());
        assert!(validate_table("revenues; DROP TABLE drivers").is_err());
    }

    #[test]
    fn rejects_hostile_identifiers() {
        assert!(validate_identifier("payment_date").is_ok());
        assert!(validate_identifier("1column").is_err());
        assert!(validate_identifier("name--").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn equality_binds_uuid_columns_natively() {
        let sql = filtered_sql(&[(
            "driver_id",
            json!("550e8400-e29b-41d4-a716-446655440000"),
        )]);
        assert!(sql.contains("t.driver_id = "), "got: {sql}");
        assert!(!sql.contains("driver_id::text"), "got: {sql}");
    }

    #[test]
    fn range_suffixes_map_to_comparisons() {
        let sql = filtered_sql(&[
            ("payment_date__gte", json!("2025-11-01")),
            ("payment_date__lte", json!("2025-11-30")),
        ]);
        assert!(sql.contains("t.payment_date >= "), "got: {sql}");
        assert!(sql.contains("t.payment_date <= "), "got: {sql}");
    }

    #[test]
    fn in_suffix_expands_to_any() {
        let sql = filtered_sql(&[("status__in", json!(["paid", "pending"]))]);
        assert!(sql.contains("t.status::text = ANY("), "got: {sql}");
    }

    #[test]
    fn null_filters_are_skipped() {
        let sql = filtered_sql(&[("branch_id", Value::Null)]);
        assert!(!sql.contains("branch_id"), "got: {sql}");
    }
}
