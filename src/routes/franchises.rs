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
        CreateFranchiseInput, FranchisePath, ListFranchisesQuery, UpdateFranchiseInput,
    },
    services::audit::write_audit_log,
    state::AppState,
    tenancy::{
        assert_franchise_access, assert_role, assert_staff, membership_franchise_id,
        membership_role, ROLE_OWNER, ROLE_SUPER_ADMIN,
    },
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/franchises",
            axum::routing::get(list_franchises).post(create_franchise),
        )
        .route(
            "/franchises/{franchise_id}",
            axum::routing::get(get_franchise)
                .patch(update_franchise)
                .delete(delete_franchise),
        )
}

async fn list_franchises(
    State(state): State<AppState>,
    Query(query): Query<ListFranchisesQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let membership = assert_staff(&state, &user_id).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    if let Some(status) = non_empty_opt(query.status.as_deref()) {
        filters.insert("status".to_string(), Value::String(status));
    }
    if let Some(search) = non_empty_opt(query.search.as_deref()) {
        filters.insert("name__ilike".to_string(), Value::String(search));
    }
    // Non-admin staff only ever see the franchise they belong to.
    if membership_role(&membership) != ROLE_SUPER_ADMIN {
        let own = membership_franchise_id(&membership).ok_or_else(|| {
            AppError::Forbidden("Forbidden: staff account has no franchise.".to_string())
        })?;
        filters.insert("id".to_string(), Value::String(own));
    }

    let rows = list_rows(
        pool,
        "franchises",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 2000),
        0,
        "name",
        true,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn create_franchise(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateFranchiseInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_role(&state, &user_id, &[ROLE_SUPER_ADMIN]).await?;
    validate_input(&payload)?;
    let pool = db_pool(&state)?;

    let record = remove_nulls(serialize_to_map(&payload));
    let created = create_row(pool, "franchises", &record).await?;
    let entity_id = value_str(&created, "id");

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&entity_id),
        Some(&user_id),
        "create",
        "franchises",
        Some(&entity_id),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_franchise(
    State(state): State<AppState>,
    Path(path): Path<FranchisePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let membership = assert_staff(&state, &user_id).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "franchises", &path.franchise_id, "id").await?;
    assert_franchise_access(&membership, &value_str(&record, "id"))?;
    Ok(Json(record))
}

async fn update_franchise(
    State(state): State<AppState>,
    Path(path): Path<FranchisePath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateFranchiseInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let membership = assert_role(&state, &user_id, &[ROLE_SUPER_ADMIN, ROLE_OWNER]).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "franchises", &path.franchise_id, "id").await?;
    assert_franchise_access(&membership, &value_str(&record, "id"))?;

    let patch = remove_nulls(serialize_to_map(&payload));
    let updated = update_row(pool, "franchises", &path.franchise_id, &patch, "id").await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&path.franchise_id),
        Some(&user_id),
        "update",
        "franchises",
        Some(&path.franchise_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

async fn delete_franchise(
    State(state): State<AppState>,
    Path(path): Path<FranchisePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_role(&state, &user_id, &[ROLE_SUPER_ADMIN]).await?;
    let pool = db_pool(&state)?;

    let deleted = delete_row(pool, "franchises", &path.franchise_id, "id").await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&path.franchise_id),
        Some(&user_id),
        "delete",
        "franchises",
        Some(&path.franchise_id),
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
