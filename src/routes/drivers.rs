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
        clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input, CreateDriverInput,
        DriverPath, ListDriversQuery, UpdateDriverInput,
    },
    services::audit::write_audit_log,
    state::AppState,
    tenancy::{
        assert_branch_access, assert_franchise_access, assert_role, assert_staff, scope_filters,
        ROLE_MANAGER, ROLE_OWNER, ROLE_SUPER_ADMIN,
    },
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/drivers",
            axum::routing::get(list_drivers).post(create_driver),
        )
        .route(
            "/drivers/{driver_id}",
            axum::routing::get(get_driver)
                .patch(update_driver)
                .delete(delete_driver),
        )
}

async fn list_drivers(
    State(state): State<AppState>,
    Query(query): Query<ListDriversQuery>,
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
    if let Some(status) = non_empty_opt(query.status.as_deref()) {
        filters.insert("status".to_string(), Value::String(status));
    }
    if let Some(search) = non_empty_opt(query.search.as_deref()) {
        filters.insert("full_name__ilike".to_string(), Value::String(search));
    }
    for (key, value) in scope_filters(&membership) {
        filters.insert(key, value);
    }

    let rows = list_rows(
        pool,
        "drivers",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 2000),
        0,
        "full_name",
        true,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn create_driver(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateDriverInput>,
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
    let created = create_row(pool, "drivers", &record).await?;
    let entity_id = value_str(&created, "id");

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&payload.franchise_id),
        Some(&user_id),
        "create",
        "drivers",
        Some(&entity_id),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_driver(
    State(state): State<AppState>,
    Path(path): Path<DriverPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let membership = assert_staff(&state, &user_id).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "drivers", &path.driver_id, "id").await?;
    assert_franchise_access(&membership, &value_str(&record, "franchise_id"))?;
    assert_branch_access(&membership, &value_str(&record, "branch_id"))?;
    Ok(Json(record))
}

async fn update_driver(
    State(state): State<AppState>,
    Path(path): Path<DriverPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateDriverInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let membership = assert_role(
        &state,
        &user_id,
        &[ROLE_SUPER_ADMIN, ROLE_OWNER, ROLE_MANAGER],
    )
    .await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "drivers", &path.driver_id, "id").await?;
    let franchise_id = value_str(&record, "franchise_id");
    assert_franchise_access(&membership, &franchise_id)?;
    assert_branch_access(&membership, &value_str(&record, "branch_id"))?;

    let patch = remove_nulls(serialize_to_map(&payload));
    if let Some(next_branch) = patch.get("branch_id").and_then(Value::as_str) {
        assert_branch_access(&membership, next_branch)?;
    }
    let updated = update_row(pool, "drivers", &path.driver_id, &patch, "id").await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&franchise_id),
        Some(&user_id),
        "update",
        "drivers",
        Some(&path.driver_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

async fn delete_driver(
    State(state): State<AppState>,
    Path(path): Path<DriverPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let membership = assert_role(&state, &user_id, &[ROLE_SUPER_ADMIN, ROLE_OWNER]).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "drivers", &path.driver_id, "id").await?;
    let franchise_id = value_str(&record, "franchise_id");
    assert_franchise_access(&membership, &franchise_id)?;

    let deleted = delete_row(pool, "drivers", &path.driver_id, "id").await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&franchise_id),
        Some(&user_id),
        "delete",
        "drivers",
        Some(&path.driver_id),
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
