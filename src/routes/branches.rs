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
        clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input, BranchPath,
        CreateBranchInput, ListBranchesQuery, UpdateBranchInput,
    },
    services::{audit::write_audit_log, enrichment::enrich_branches},
    state::AppState,
    tenancy::{
        assert_branch_access, assert_franchise_access, assert_role, assert_staff, scope_filters,
        ROLE_OWNER, ROLE_SUPER_ADMIN,
    },
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/branches",
            axum::routing::get(list_branches).post(create_branch),
        )
        .route(
            "/branches/{branch_id}",
            axum::routing::get(get_branch)
                .patch(update_branch)
                .delete(delete_branch),
        )
}

async fn list_branches(
    State(state): State<AppState>,
    Query(query): Query<ListBranchesQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let membership = assert_staff(&state, &user_id).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    if let Some(franchise_id) = non_empty_opt(query.franchise_id.as_deref()) {
        filters.insert("franchise_id".to_string(), Value::String(franchise_id));
    }
    if let Some(status) = non_empty_opt(query.status.as_deref()) {
        filters.insert("status".to_string(), Value::String(status));
    }
    // Role scope always wins over caller-supplied filters. A manager's branch
    // scope applies to the branch's own id here, not a branch_id column.
    for (key, value) in scope_filters(&membership) {
        let key = if key == "branch_id" { "id".to_string() } else { key };
        filters.insert(key, value);
    }

    let rows = list_rows(
        pool,
        "branches",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 2000),
        0,
        "name",
        true,
    )
    .await?;
    let enriched = enrich_branches(pool, rows).await?;
    Ok(Json(json!({ "data": enriched })))
}

async fn create_branch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateBranchInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    let membership = assert_role(&state, &user_id, &[ROLE_SUPER_ADMIN, ROLE_OWNER]).await?;
    validate_input(&payload)?;
    assert_franchise_access(&membership, &payload.franchise_id)?;
    let pool = db_pool(&state)?;

    let record = remove_nulls(serialize_to_map(&payload));
    let created = create_row(pool, "branches", &record).await?;
    let entity_id = value_str(&created, "id");

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&payload.franchise_id),
        Some(&user_id),
        "create",
        "branches",
        Some(&entity_id),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_branch(
    State(state): State<AppState>,
    Path(path): Path<BranchPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let membership = assert_staff(&state, &user_id).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "branches", &path.branch_id, "id").await?;
    assert_franchise_access(&membership, &value_str(&record, "franchise_id"))?;
    assert_branch_access(&membership, &value_str(&record, "id"))?;
    Ok(Json(record))
}

async fn update_branch(
    State(state): State<AppState>,
    Path(path): Path<BranchPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateBranchInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let membership = assert_role(&state, &user_id, &[ROLE_SUPER_ADMIN, ROLE_OWNER]).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "branches", &path.branch_id, "id").await?;
    let franchise_id = value_str(&record, "franchise_id");
    assert_franchise_access(&membership, &franchise_id)?;

    let patch = remove_nulls(serialize_to_map(&payload));
    let updated = update_row(pool, "branches", &path.branch_id, &patch, "id").await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&franchise_id),
        Some(&user_id),
        "update",
        "branches",
        Some(&path.branch_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

async fn delete_branch(
    State(state): State<AppState>,
    Path(path): Path<BranchPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let membership = assert_role(&state, &user_id, &[ROLE_SUPER_ADMIN, ROLE_OWNER]).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "branches", &path.branch_id, "id").await?;
    let franchise_id = value_str(&record, "franchise_id");
    assert_franchise_access(&membership, &franchise_id)?;

    let deleted = delete_row(pool, "branches", &path.branch_id, "id").await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&franchise_id),
        Some(&user_id),
        "delete",
        "branches",
        Some(&path.branch_id),
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
