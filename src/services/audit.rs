use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::repository::table_service::create_row;

/// Records a mutation in the audit trail. Best-effort: failures are logged
/// and never surface to the caller, so a broken audit table cannot block
/// writes to the record itself.
#[allow(clippy::too_many_arguments)]
pub async fn write_audit_log(
    pool: Option<&PgPool>,
    franchise_id: Option<&str>,
    user_id: Option<&str>,
    action: &str,
    table_name: &str,
    entity_id: Option<&str>,
    before: Option<Value>,
    after: Option<Value>,
) {
    let Some(pool) = pool else {
        return;
    };

    let mut record = Map::new();
    if let Some(franchise_id) = franchise_id {
        record.insert(
            "franchise_id".to_string(),
            Value::String(franchise_id.to_string()),
        );
    }
    if let Some(user_id) = user_id {
        record.insert("user_id".to_string(), Value::String(user_id.to_string()));
    }
    record.insert("action".to_string(), Value::String(action.to_string()));
    record.insert(
        "table_name".to_string(),
        Value::String(table_name.to_string()),
    );
    if let Some(entity_id) = entity_id {
        record.insert("entity_id".to_string(), Value::String(entity_id.to_string()));
    }
    if let Some(before) = before {
        record.insert("before".to_string(), before);
    }
    if let Some(after) = after {
        record.insert("after".to_string(), after);
    }

    if let Err(error) = create_row(pool, "audit_logs", &record).await {
        tracing::warn!(error = %error, action, table_name, "Audit log write failed");
    }
}
