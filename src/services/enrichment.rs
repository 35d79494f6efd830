//! Attaches display names to raw rows so list endpoints do not force the
//! client into follow-up lookups. One `ANY(..)` query per referenced table.

use std::collections::HashMap;

use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub async fn enrich_revenues(pool: &PgPool, mut rows: Vec<Value>) -> AppResult<Vec<Value>> {
    attach_names(pool, &mut rows, "driver_id", "drivers", "full_name", "driver_name").await?;
    attach_names(pool, &mut rows, "branch_id", "branches", "name", "branch_name").await?;
    Ok(rows)
}

pub async fn enrich_expenses(pool: &PgPool, mut rows: Vec<Value>) -> AppResult<Vec<Value>> {
    attach_names(pool, &mut rows, "branch_id", "branches", "name", "branch_name").await?;
    Ok(rows)
}

pub async fn enrich_contracts(pool: &PgPool, mut rows: Vec<Value>) -> AppResult<Vec<Value>> {
    attach_names(pool, &mut rows, "driver_id", "drivers", "full_name", "driver_name").await?;
    attach_names(pool, &mut rows, "vehicle_id", "vehicles", "plate_no", "vehicle_plate").await?;
    Ok(rows)
}

pub async fn enrich_vehicles(pool: &PgPool, mut rows: Vec<Value>) -> AppResult<Vec<Value>> {
    attach_names(pool, &mut rows, "driver_id", "drivers", "full_name", "driver_name").await?;
    Ok(rows)
}

pub async fn enrich_branches(pool: &PgPool, mut rows: Vec<Value>) -> AppResult<Vec<Value>> {
    attach_names(
        pool,
        &mut rows,
        "franchise_id",
        "franchises",
        "name",
        "franchise_name",
    )
    .await?;
    Ok(rows)
}

async fn attach_names(
    pool: &PgPool,
    rows: &mut [Value],
    fk_column: &str,
    table: &str,
    name_column: &str,
    target_key: &str,
) -> AppResult<()> {
    let ids = rows
        .iter()
        .filter_map(|row| row.get(fk_column))
        .filter_map(Value::as_str)
        .filter_map(|raw| Uuid::parse_str(raw).ok())
        .collect::<Vec<_>>();
    if ids.is_empty() {
        return Ok(());
    }

    // table and name_column come from the callers above, never from input.
    let sql = format!("SELECT id::text AS id, {name_column}::text AS name FROM {table} WHERE id = ANY($1)");
    let fetched = sqlx::query(&sql)
        .bind(&ids)
        .fetch_all(pool)
        .await
        .map_err(|error| {
            tracing::error!(error = %error, table, "Name lookup failed");
            AppError::Dependency("Database operation failed.".to_string())
        })?;

    let mut names: HashMap<String, String> = HashMap::with_capacity(fetched.len());
    for row in fetched {
        if let (Ok(id), Ok(name)) = (row.try_get::<String, _>("id"), row.try_get::<String, _>("name"))
        {
            names.insert(id, name);
        }
    }

    for row in rows.iter_mut() {
        let Some(object) = row.as_object_mut() else {
            continue;
        };
        let name = object
            .get(fk_column)
            .and_then(Value::as_str)
            .and_then(|id| names.get(id))
            .cloned();
        if let Some(name) = name {
            object.insert(target_key.to_string(), Value::String(name));
        }
    }
    Ok(())
}
