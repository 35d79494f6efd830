use serde_json::{Map, Value};
use sqlx::{PgPool, Row};

use crate::error::AppError;
use crate::state::AppState;

pub const ROLE_SUPER_ADMIN: &str = "super_admin";
pub const ROLE_OWNER: &str = "owner";
pub const ROLE_MANAGER: &str = "manager";

fn db_pool(state: &AppState) -> Result<&PgPool, AppError> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

pub async fn get_staff_membership(
    state: &AppState,
    user_id: &str,
) -> Result<Option<Value>, AppError> {
    if let Some(cached) = state.staff_cache.get(user_id).await {
        return Ok(cached);
    }

    let pool = db_pool(state)?;
    let row = sqlx::query(
        "SELECT row_to_json(t) AS row
         FROM staff_members t
         WHERE user_id = $1::uuid
         LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(|error| AppError::Dependency(format!("Staff lookup failed: {error}")))?;

    let membership = row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten());
    state
        .staff_cache
        .insert(user_id.to_string(), membership.clone())
        .await;
    Ok(membership)
}

pub async fn assert_staff(state: &AppState, user_id: &str) -> Result<Value, AppError> {
    get_staff_membership(state, user_id)
        .await?
        .ok_or_else(|| AppError::Forbidden("Forbidden: not a staff account.".to_string()))
}

pub async fn assert_role(
    state: &AppState,
    user_id: &str,
    allowed_roles: &[&str],
) -> Result<Value, AppError> {
    let membership = assert_staff(state, user_id).await?;
    let role = membership_role(&membership);
    if allowed_roles.contains(&role.as_str()) {
        return Ok(membership);
    }
    Err(AppError::Forbidden(format!(
        "Forbidden: role '{role}' is not allowed for this action."
    )))
}

pub fn membership_role(membership: &Value) -> String {
    field_str(membership, "role").unwrap_or_else(|| "unknown".to_string())
}

pub fn membership_franchise_id(membership: &Value) -> Option<String> {
    field_str(membership, "franchise_id")
}

pub fn membership_branch_id(membership: &Value) -> Option<String> {
    field_str(membership, "branch_id")
}

/// Verifies the staff account may touch records of the given franchise.
/// Super admins pass unconditionally.
pub fn assert_franchise_access(membership: &Value, franchise_id: &str) -> Result<(), AppError> {
    if membership_role(membership) == ROLE_SUPER_ADMIN {
        return Ok(());
    }
    match membership_franchise_id(membership) {
        Some(own) if own == franchise_id => Ok(()),
        _ => Err(AppError::Forbidden(
            "Forbidden: record belongs to another franchise.".to_string(),
        )),
    }
}

pub fn assert_branch_access(membership: &Value, branch_id: &str) -> Result<(), AppError> {
    let role = membership_role(membership);
    if role == ROLE_SUPER_ADMIN || role == ROLE_OWNER {
        return Ok(());
    }
    match membership_branch_id(membership) {
        Some(own) if own == branch_id => Ok(()),
        _ => Err(AppError::Forbidden(
            "Forbidden: record belongs to another branch.".to_string(),
        )),
    }
}

/// List-query filters implied by the caller's role: owners only see their
/// franchise, managers only their branch, super admins see everything.
pub fn scope_filters(membership: &Value) -> Map<String, Value> {
    let mut filters = Map::new();
    match membership_role(membership).as_str() {
        ROLE_OWNER => {
            if let Some(franchise_id) = membership_franchise_id(membership) {
                filters.insert("franchise_id".to_string(), Value::String(franchise_id));
            }
        }
        ROLE_MANAGER => {
            if let Some(franchise_id) = membership_franchise_id(membership) {
                filters.insert("franchise_id".to_string(), Value::String(franchise_id));
            }
            if let Some(branch_id) = membership_branch_id(membership) {
                filters.insert("branch_id".to_string(), Value::String(branch_id));
            }
        }
        _ => {}
    }
    filters
}

fn field_str(value: &Value, key: &str) -> Option<String> {
    value
        .as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        assert_branch_access, assert_franchise_access, membership_role, scope_filters,
    };

    #[test]
    fn super_admin_sees_everything() {
        let membership = json!({ "role": "super_admin" });
        assert_eq!(membership_role(&membership), "super_admin");
        assert!(assert_franchise_access(&membership, "any").is_ok());
        assert!(scope_filters(&membership).is_empty());
    }

    #[test]
    fn owner_is_confined_to_their_franchise() {
        let membership = json!({ "role": "owner", "franchise_id": "f-1" });
        assert!(assert_franchise_access(&membership, "f-1").is_ok());
        assert!(assert_franchise_access(&membership, "f-2").is_err());
        assert!(assert_branch_access(&membership, "b-9").is_ok());

        let filters = scope_filters(&membership);
        assert_eq!(filters.get("franchise_id"), Some(&json!("f-1")));
        assert!(!filters.contains_key("branch_id"));
    }

    #[test]
    fn manager_is_confined_to_their_branch() {
        let membership = json!({
            "role": "manager",
            "franchise_id": "f-1",
            "branch_id": "b-1"
        });
        assert!(assert_branch_access(&membership, "b-1").is_ok());
        assert!(assert_branch_access(&membership, "b-2").is_err());

        let filters = scope_filters(&membership);
        assert_eq!(filters.get("branch_id"), Some(&json!("b-1")));
    }
}
