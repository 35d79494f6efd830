use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    repository::table_service::{create_row, delete_row, get_row, list_rows, update_row},
    schemas::{
        clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input,
        BoundaryContractPath, CreateBoundaryContractInput, ListBoundaryContractsQuery,
        UpdateBoundaryContractInput,
    },
    services::{audit::write_audit_log, enrichment::enrich_contracts},
    state::AppState,
    tenancy::{
        assert_branch_access, assert_franchise_access, assert_role, assert_staff, scope_filters,
        ROLE_MANAGER, ROLE_OWNER, ROLE_SUPER_ADMIN,
    },
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/boundary-contracts",
            axum::routing::get(list_contracts).post(create_contract),
        )
        .route(
            "/boundary-contracts/{contract_id}/terminate",
            axum::routing::post(terminate_contract),
        )
        .route(
            "/boundary-contracts/{contract_id}",
            axum::routing::get(get_contract)
                .patch(update_contract)
                .delete(delete_contract),
        )
}

async fn list_contracts(
    State(state): State<AppState>,
    Query(query): Query<ListBoundaryContractsQuery>,
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
    for (key, value) in scope_filters(&membership) {
        filters.insert(key, value);
    }

    let rows = list_rows(
        pool,
        "boundary_contracts",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 2000),
        0,
        "starts_on",
        false,
    )
    .await?;
    let enriched = enrich_contracts(pool, rows).await?;
    Ok(Json(json!({ "data": enriched })))
}

async fn create_contract(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateBoundaryContractInput>,
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

    // The driver and vehicle must live in the same franchise as the contract.
    let driver = get_row(pool, "drivers", &payload.driver_id, "id").await?;
    if value_str(&driver, "franchise_id") != payload.franchise_id {
        return Err(AppError::BadRequest(
            "driver_id belongs to another franchise.".to_string(),
        ));
    }
    let vehicle = get_row(pool, "vehicles", &payload.vehicle_id, "id").await?;
    if value_str(&vehicle, "franchise_id") != payload.franchise_id {
        return Err(AppError::BadRequest(
            "vehicle_id belongs to another franchise.".to_string(),
        ));
    }

    let record = remove_nulls(serialize_to_map(&payload));
    let created = create_row(pool, "boundary_contracts", &record).await?;
    let entity_id = value_str(&created, "id");

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&payload.franchise_id),
        Some(&user_id),
        "create",
        "boundary_contracts",
        Some(&entity_id),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_contract(
    State(state): State<AppState>,
    Path(path): Path<BoundaryContractPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let membership = assert_staff(&state, &user_id).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "boundary_contracts", &path.contract_id, "id").await?;
    assert_franchise_access(&membership, &value_str(&record, "franchise_id"))?;
    assert_branch_access(&membership, &value_str(&record, "branch_id"))?;

    let mut enriched = enrich_contracts(pool, vec![record]).await?;
    Ok(Json(
        enriched.pop().unwrap_or_else(|| Value::Object(Map::new())),
    ))
}

async fn update_contract(
    State(state): State<AppState>,
    Path(path): Path<BoundaryContractPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateBoundaryContractInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let membership = assert_role(
        &state,
        &user_id,
        &[ROLE_SUPER_ADMIN, ROLE_OWNER, ROLE_MANAGER],
    )
    .await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "boundary_contracts", &path.contract_id, "id").await?;
    let franchise_id = value_str(&record, "franchise_id");
    assert_franchise_access(&membership, &franchise_id)?;
    assert_branch_access(&membership, &value_str(&record, "branch_id"))?;

    let patch = remove_nulls(serialize_to_map(&payload));
    let updated = update_row(pool, "boundary_contracts", &path.contract_id, &patch, "id").await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&franchise_id),
        Some(&user_id),
        "update",
        "boundary_contracts",
        Some(&path.contract_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

/// Marks the contract terminated as of today without deleting its history.
async fn terminate_contract(
    State(state): State<AppState>,
    Path(path): Path<BoundaryContractPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let membership = assert_role(&state, &user_id, &[ROLE_SUPER_ADMIN, ROLE_OWNER]).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "boundary_contracts", &path.contract_id, "id").await?;
    let franchise_id = value_str(&record, "franchise_id");
    assert_franchise_access(&membership, &franchise_id)?;

    if value_str(&record, "status") == "terminated" {
        return Err(AppError::Conflict(
            "Contract is already terminated.".to_string(),
        ));
    }

    let today = chrono::Utc::now()
        .with_timezone(&state.config.report_tz())
        .date_naive();
    let mut patch = Map::new();
    patch.insert(
        "status".to_string(),
        Value::String("terminated".to_string()),
    );
    patch.insert(
        "ends_on".to_string(),
        Value::String(today.format("%Y-%m-%d").to_string()),
    );

    let updated = update_row(pool, "boundary_contracts", &path.contract_id, &patch, "id").await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&franchise_id),
        Some(&user_id),
        "terminate",
        "boundary_contracts",
        Some(&path.contract_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

async fn delete_contract(
    State(state): State<AppState>,
    Path(path): Path<BoundaryContractPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let membership = assert_role(&state, &user_id, &[ROLE_SUPER_ADMIN, ROLE_OWNER]).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "boundary_contracts", &path.contract_id, "id").await?;
    let franchise_id = value_str(&record, "franchise_id");
    assert_franchise_access(&membership, &franchise_id)?;

    let deleted = delete_row(pool, "boundary_contracts", &path.contract_id, "id").await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&franchise_id),
        Some(&user_id),
        "delete",
        "boundary_contracts",
        Some(&path.contract_id),
        Some(deleted.clone()),
        None,
    )
    .await;

    Ok(Json(deleted))
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
