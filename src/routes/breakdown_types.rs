use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    reports::aggregate::BreakdownKind,
    repository::table_service::{create_row, delete_row, get_row, list_rows, update_row},
    schemas::{
        clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input, BreakdownTypePath,
        CreateBreakdownTypeInput, ListBreakdownTypesQuery, UpdateBreakdownTypeInput,
    },
    services::audit::write_audit_log,
    state::AppState,
    tenancy::{assert_role, assert_staff, ROLE_SUPER_ADMIN},
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/breakdown-types",
            axum::routing::get(list_breakdown_types).post(create_breakdown_type),
        )
        .route(
            "/breakdown-types/{breakdown_type_id}",
            axum::routing::get(get_breakdown_type)
                .patch(update_breakdown_type)
                .delete(delete_breakdown_type),
        )
}

async fn list_breakdown_types(
    State(state): State<AppState>,
    Query(query): Query<ListBreakdownTypesQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    // Any staff member may read the deduction rules; only admins edit them.
    assert_staff(&state, &user_id).await?;
    let pool = db_pool(&state)?;

    let rows = list_rows(
        pool,
        "breakdown_types",
        None,
        clamp_limit_in_range(query.limit, 1, 2000),
        0,
        "name",
        true,
    )
    .await?;
    Ok(Json(json!({ "data": rows })))
}

async fn create_breakdown_type(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateBreakdownTypeInput>,
) -> AppResult<impl IntoResponse> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_role(&state, &user_id, &[ROLE_SUPER_ADMIN]).await?;
    validate_input(&payload)?;
    validate_kind(&payload.kind)?;
    let pool = db_pool(&state)?;

    let record = remove_nulls(serialize_to_map(&payload));
    let created = create_row(pool, "breakdown_types", &record).await?;
    let entity_id = value_str(&created, "id");

    write_audit_log(
        state.db_pool.as_ref(),
        None,
        Some(&user_id),
        "create",
        "breakdown_types",
        Some(&entity_id),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_breakdown_type(
    State(state): State<AppState>,
    Path(path): Path<BreakdownTypePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_staff(&state, &user_id).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "breakdown_types", &path.breakdown_type_id, "id").await?;
    Ok(Json(record))
}

async fn update_breakdown_type(
    State(state): State<AppState>,
    Path(path): Path<BreakdownTypePath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateBreakdownTypeInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_role(&state, &user_id, &[ROLE_SUPER_ADMIN]).await?;
    if let Some(kind) = payload.kind.as_deref() {
        validate_kind(kind)?;
    }
    let pool = db_pool(&state)?;

    let record = get_row(pool, "breakdown_types", &path.breakdown_type_id, "id").await?;
    let patch = remove_nulls(serialize_to_map(&payload));
    let updated = update_row(pool, "breakdown_types", &path.breakdown_type_id, &patch, "id").await?;

    write_audit_log(
        state.db_pool.as_ref(),
        None,
        Some(&user_id),
        "update",
        "breakdown_types",
        Some(&path.breakdown_type_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

async fn delete_breakdown_type(
    State(state): State<AppState>,
    Path(path): Path<BreakdownTypePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_role(&state, &user_id, &[ROLE_SUPER_ADMIN]).await?;
    let pool = db_pool(&state)?;

    let deleted = delete_row(pool, "breakdown_types", &path.breakdown_type_id, "id").await?;

    write_audit_log(
        state.db_pool.as_ref(),
        None,
        Some(&user_id),
        "delete",
        "breakdown_types",
        Some(&path.breakdown_type_id),
        Some(deleted.clone()),
        None,
    )
    .await;

    Ok(Json(deleted))
}

fn validate_kind(kind: &str) -> AppResult<()> {
    if BreakdownKind::parse(kind).is_none() {
        return Err(AppError::BadRequest(
            "kind must be 'percentage' or 'fixed'.".to_string(),
        ));
    }
    Ok(())
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
