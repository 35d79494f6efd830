use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    reports::aggregate::{list_breakdown_types, BreakdownType},
    repository::table_service::{create_row, delete_row, get_row, list_rows, update_row},
    schemas::{
        clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input, CreateRevenueInput,
        ListRevenuesQuery, RevenuePath, UpdateRevenueInput,
    },
    services::{audit::write_audit_log, enrichment::enrich_revenues},
    state::AppState,
    tenancy::{
        assert_branch_access, assert_franchise_access, assert_role, assert_staff, scope_filters,
        ROLE_MANAGER, ROLE_OWNER, ROLE_SUPER_ADMIN,
    },
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/revenues",
            axum::routing::get(list_revenues).post(create_revenue),
        )
        .route(
            "/revenues/{revenue_id}",
            axum::routing::get(get_revenue)
                .patch(update_revenue)
                .delete(delete_revenue),
        )
}

async fn list_revenues(
    State(state): State<AppState>,
    Query(query): Query<ListRevenuesQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let membership = assert_staff(&state, &user_id).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    if let Some(franchise_id) = non_empty_opt(query.franchise_id.as_deref()) {
        filters.insert("franchise_id".to_string(), Value::String(franchise_id));
    }
    if let Some(branch_id) = non_empty_opt(query.branch_id.as_deref()) {
        filters.insert("branch_id".to_string(), Value::String(branch_id));
    }
    if let Some(driver_id) = non_empty_opt(query.driver_id.as_deref()) {
        filters.insert("driver_id".to_string(), Value::String(driver_id));
    }
    if let Some(status) = non_empty_opt(query.status.as_deref()) {
        filters.insert("status".to_string(), Value::String(status));
    }
    if let Some(service_type) = non_empty_opt(query.service_type.as_deref()) {
        filters.insert("service_type".to_string(), Value::String(service_type));
    }
    if let Some(from_date) = non_empty_opt(query.from_date.as_deref()) {
        filters.insert("payment_date__gte".to_string(), Value::String(from_date));
    }
    if let Some(to_date) = non_empty_opt(query.to_date.as_deref()) {
        filters.insert("payment_date__lte".to_string(), Value::String(to_date));
    }
    for (key, value) in scope_filters(&membership) {
        filters.insert(key, value);
    }

    let rows = list_rows(
        pool,
        "revenues",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 2000),
        0,
        "payment_date",
        false,
    )
    .await?;
    let enriched = enrich_revenues(pool, rows).await?;
    Ok(Json(json!({ "data": enriched })))
}

async fn create_revenue(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateRevenueInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    let membership = assert_role(
        &state,
        &user_id,
        &[ROLE_SUPER_ADMIN, ROLE_OWNER, ROLE_MANAGER],
    )
    .await?;
    validate_input(&payload)?;
    assert_franchise_access(&membership, &payload.franchise_id)?;
    assert_branch_access(&membership, &payload.branch_id)?;
    let pool = db_pool(&state)?;

    let record = remove_nulls(serialize_to_map(&payload));
    let created = create_row(pool, "revenues", &record).await?;
    let entity_id = value_str(&created, "id");

    // Paid trip revenue earns its deduction rows immediately so the report
    // aggregation never has to re-derive them.
    if payload.status == "paid" && payload.service_type == "trips" {
        materialize_breakdowns(pool, &entity_id, payload.amount).await?;
    }

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&payload.franchise_id),
        Some(&user_id),
        "create",
        "revenues",
        Some(&entity_id),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_revenue(
    State(state): State<AppState>,
    Path(path): Path<RevenuePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let membership = assert_staff(&state, &user_id).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "revenues", &path.revenue_id, "id").await?;
    assert_franchise_access(&membership, &value_str(&record, "franchise_id"))?;
    assert_branch_access(&membership, &value_str(&record, "branch_id"))?;

    let breakdowns = list_revenue_breakdowns(pool, &path.revenue_id).await?;
    let mut enriched = enrich_revenues(pool, vec![record]).await?;
    let mut response = enriched.pop().unwrap_or_else(|| Value::Object(Map::new()));
    if let Some(object) = response.as_object_mut() {
        object.insert("breakdowns".to_string(), Value::Array(breakdowns));
    }
    Ok(Json(response))
}

async fn update_revenue(
    State(state): State<AppState>,
    Path(path): Path<RevenuePath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateRevenueInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let membership = assert_role(
        &state,
        &user_id,
        &[ROLE_SUPER_ADMIN, ROLE_OWNER, ROLE_MANAGER],
    )
    .await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "revenues", &path.revenue_id, "id").await?;
    let franchise_id = value_str(&record, "franchise_id");
    assert_franchise_access(&membership, &franchise_id)?;
    assert_branch_access(&membership, &value_str(&record, "branch_id"))?;

    let patch = remove_nulls(serialize_to_map(&payload));
    let updated = update_row(pool, "revenues", &path.revenue_id, &patch, "id").await?;

    // Any patch touching amount, status, or service_type invalidates the
    // materialized deductions: a pending revenue marked paid earns its rows
    // here, and a revenue leaving paid/trips sheds its stale ones.
    if touches_deduction_inputs(&patch) {
        delete_revenue_breakdowns(pool, &path.revenue_id).await?;
        if is_paid_trips(&updated) {
            if let Some(amount) = value_f64(&updated, "amount") {
                materialize_breakdowns(pool, &path.revenue_id, amount).await?;
            }
        }
    }

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&franchise_id),
        Some(&user_id),
        "update",
        "revenues",
        Some(&path.revenue_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

async fn delete_revenue(
    State(state): State<AppState>,
    Path(path): Path<RevenuePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let membership = assert_role(&state, &user_id, &[ROLE_SUPER_ADMIN, ROLE_OWNER]).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "revenues", &path.revenue_id, "id").await?;
    let franchise_id = value_str(&record, "franchise_id");
    assert_franchise_access(&membership, &franchise_id)?;

    delete_revenue_breakdowns(pool, &path.revenue_id).await?;
    let deleted = delete_row(pool, "revenues", &path.revenue_id, "id").await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&franchise_id),
        Some(&user_id),
        "delete",
        "revenues",
        Some(&path.revenue_id),
        Some(deleted.clone()),
        None,
    )
    .await;

    Ok(Json(deleted))
}

/// True when the patch touched any field the deduction rows are derived
/// from, so a pending→paid transition rebuilds them even with no amount
/// change.
fn touches_deduction_inputs(patch: &Map<String, Value>) -> bool {
    ["amount", "status", "service_type"]
        .iter()
        .any(|key| patch.contains_key(*key))
}

fn is_paid_trips(row: &Value) -> bool {
    value_str(row, "status") == "paid" && value_str(row, "service_type") == "trips"
}

/// Applies every configured breakdown type to the gross amount and inserts
/// the `revenue_breakdowns` rows in one statement, so a failure leaves either
/// all of them or none.
async fn materialize_breakdowns(
    pool: &sqlx::PgPool,
    revenue_id: &str,
    amount: f64,
) -> AppResult<()> {
    let revenue_uuid = Uuid::parse_str(revenue_id.trim())
        .map_err(|_| AppError::Internal("Revenue id is not a UUID.".to_string()))?;
    let types = list_breakdown_types(pool).await?;
    if types.is_empty() {
        return Ok(());
    }

    let gross = Decimal::from_f64_retain(amount)
        .unwrap_or_default()
        .round_dp(2);
    let mut query = build_breakdown_insert(revenue_uuid, gross, &types);
    query.build().execute(pool).await.map_err(|error| {
        tracing::error!(error = %error, "Breakdown materialization failed");
        AppError::Dependency("Database operation failed.".to_string())
    })?;
    Ok(())
}

fn build_breakdown_insert(
    revenue_id: Uuid,
    gross: Decimal,
    types: &[BreakdownType],
) -> QueryBuilder<'static, Postgres> {
    let mut query = QueryBuilder::<Postgres>::new(
        "INSERT INTO revenue_breakdowns (revenue_id, breakdown_type_id, earning_amount) ",
    );
    query.push_values(types, |mut row, breakdown| {
        row.push_bind(revenue_id)
            .push_bind(breakdown.id)
            .push_bind(breakdown.deduction_for(gross));
    });
    query
}

async fn delete_revenue_breakdowns(pool: &sqlx::PgPool, revenue_id: &str) -> AppResult<()> {
    sqlx::query("DELETE FROM revenue_breakdowns WHERE revenue_id = $1::uuid")
        .bind(revenue_id)
        .execute(pool)
        .await
        .map_err(|error| {
            tracing::error!(error = %error, "Breakdown cleanup failed");
            AppError::Dependency("Database operation failed.".to_string())
        })?;
    Ok(())
}

async fn list_revenue_breakdowns(
    pool: &sqlx::PgPool,
    revenue_id: &str,
) -> AppResult<Vec<Value>> {
    let rows = sqlx::query(
        "SELECT row_to_json(x) AS row FROM ( \
           SELECT rb.id, rb.breakdown_type_id, bt.name, rb.earning_amount \
           FROM revenue_breakdowns rb \
           JOIN breakdown_types bt ON bt.id = rb.breakdown_type_id \
           WHERE rb.revenue_id = $1::uuid \
           ORDER BY bt.name ASC \
         ) x",
    )
    .bind(revenue_id)
    .fetch_all(pool)
    .await
    .map_err(|error| {
        tracing::error!(error = %error, "Breakdown lookup failed");
        AppError::Dependency("Database operation failed.".to_string())
    })?;

    Ok(rows
        .into_iter()
        .filter_map(|row| {
            sqlx::Row::try_get::<Option<Value>, _>(&row, "row")
                .ok()
                .flatten()
        })
        .collect())
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

fn value_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}

fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}

fn value_f64(row: &Value, key: &str) -> Option<f64> {
    let value = row.as_object()?.get(key)?;
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|raw| raw.trim().parse().ok()))
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::{json, Map, Value};
    use uuid::Uuid;

    use crate::reports::aggregate::{BreakdownKind, BreakdownType};

    use super::{build_breakdown_insert, is_paid_trips, touches_deduction_inputs, value_f64};

    fn patch_of(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn marking_pending_revenue_paid_rebuilds_deductions() {
        // No amount change: the status flip alone must trigger the rebuild,
        // otherwise the report predicate matches a revenue with zero
        // deduction rows and the driver earning equals the full gross.
        let patch = patch_of(&[("status", json!("paid"))]);
        let updated = json!({
            "status": "paid",
            "service_type": "trips",
            "amount": 1500.0
        });
        assert!(touches_deduction_inputs(&patch));
        assert!(is_paid_trips(&updated));
        assert_eq!(value_f64(&updated, "amount"), Some(1500.0));
    }

    #[test]
    fn unrelated_patches_leave_deductions_alone() {
        let patch = patch_of(&[("reference_no", json!("OR-1234"))]);
        assert!(!touches_deduction_inputs(&patch));
    }

    #[test]
    fn leaving_paid_trips_sheds_deductions() {
        let patch = patch_of(&[("service_type", json!("rental"))]);
        let updated = json!({
            "status": "paid",
            "service_type": "rental",
            "amount": 900.0
        });
        assert!(touches_deduction_inputs(&patch));
        assert!(!is_paid_trips(&updated));
    }

    #[test]
    fn amounts_read_from_numbers_or_strings() {
        assert_eq!(value_f64(&json!({ "amount": 1500.5 }), "amount"), Some(1500.5));
        assert_eq!(value_f64(&json!({ "amount": "1500.50" }), "amount"), Some(1500.5));
        assert_eq!(value_f64(&json!({}), "amount"), None);
    }

    #[test]
    fn breakdown_insert_is_a_single_statement() {
        let types = vec![
            BreakdownType {
                id: Uuid::new_v4(),
                name: "bank".to_string(),
                kind: BreakdownKind::Fixed,
                value: Decimal::new(2000, 2),
            },
            BreakdownType {
                id: Uuid::new_v4(),
                name: "tax".to_string(),
                kind: BreakdownKind::Percentage,
                value: Decimal::new(500, 2),
            },
        ];
        let query = build_breakdown_insert(Uuid::new_v4(), Decimal::new(150_000, 2), &types);
        let sql = query.sql();
        assert!(sql.starts_with(
            "INSERT INTO revenue_breakdowns (revenue_id, breakdown_type_id, earning_amount) VALUES"
        ));
        assert_eq!(sql.matches("INSERT INTO").count(), 1);
        // One value tuple per breakdown type.
        assert_eq!(sql.matches('(').count() - 1, types.len());
    }
}
