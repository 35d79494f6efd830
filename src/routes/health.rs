use std::time::Duration;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use crate::state::AppState;

const DB_PING_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let database = match &state.db_pool {
        None => "not_configured",
        Some(pool) => {
            // Bounded ping so a hung connection cannot stall the probe.
            let ping = tokio::time::timeout(
                DB_PING_TIMEOUT,
                sqlx::query("SELECT 1").execute(pool),
            )
            .await;
            match ping {
                Ok(Ok(_)) => "up",
                Ok(Err(error)) => {
                    tracing::error!(error = %error, "Health ping failed");
                    "down"
                }
                Err(_) => {
                    tracing::error!(timeout_seconds = DB_PING_TIMEOUT.as_secs(), "Health ping timed out");
                    "down"
                }
            }
        }
    };

    Json(json!({
        "status": overall_status(database),
        "app": state.config.app_name,
        "database": database,
        "checked_at": Utc::now().to_rfc3339(),
    }))
}

fn overall_status(database: &str) -> &'static str {
    if database == "down" {
        "degraded"
    } else {
        "ok"
    }
}

#[cfg(test)]
mod tests {
    use super::overall_status;

    #[test]
    fn only_a_failing_database_degrades_the_service() {
        assert_eq!(overall_status("up"), "ok");
        assert_eq!(overall_status("not_configured"), "ok");
        assert_eq!(overall_status("down"), "degraded");
    }
}
