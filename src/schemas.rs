use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

use crate::error::AppError;
use crate::reports::period::ReportPeriod;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

pub fn clamp_limit_in_range(limit: i64, min: i64, max: i64) -> i64 {
    limit.clamp(min, max)
}

pub fn serialize_to_map<T: Serialize>(input: &T) -> Map<String, Value> {
    serde_json::to_value(input)
        .ok()
        .and_then(|value| value.as_object().cloned())
        .unwrap_or_default()
}

pub fn remove_nulls(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .filter(|(_, value)| !value.is_null())
        .collect()
}

fn default_limit_100() -> i64 {
    100
}
fn default_status_active() -> String {
    "active".to_string()
}
fn default_status_paid() -> String {
    "paid".to_string()
}
fn default_service_type_trips() -> String {
    "trips".to_string()
}

// ── Franchises ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CreateFranchiseInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub code: Option<String>,
    pub owner_name: Option<String>,
    pub contact_phone: Option<String>,
    #[serde(default = "default_status_active")]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpdateFranchiseInput {
    pub name: Option<String>,
    pub code: Option<String>,
    pub owner_name: Option<String>,
    pub contact_phone: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FranchisePath {
    pub franchise_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListFranchisesQuery {
    pub status: Option<String>,
    pub search: Option<String>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
}

// ── Branches ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CreateBranchInput {
    pub franchise_id: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub code: Option<String>,
    pub address: Option<String>,
    #[serde(default = "default_status_active")]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpdateBranchInput {
    pub name: Option<String>,
    pub code: Option<String>,
    pub address: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BranchPath {
    pub branch_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListBranchesQuery {
    pub franchise_id: Option<String>,
    pub status: Option<String>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
}

// ── Drivers ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CreateDriverInput {
    pub franchise_id: String,
    pub branch_id: String,
    #[validate(length(min = 1, max = 255))]
    pub full_name: String,
    #[validate(length(min = 1, max = 64))]
    pub license_no: String,
    pub license_expiry: Option<String>,
    pub phone: Option<String>,
    #[serde(default = "default_status_active")]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpdateDriverInput {
    pub branch_id: Option<String>,
    pub full_name: Option<String>,
    pub license_no: Option<String>,
    pub license_expiry: Option<String>,
    pub phone: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriverPath {
    pub driver_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListDriversQuery {
    pub franchise_id: Option<String>,
    pub branch_id: Option<String>,
    pub status: Option<String>,
    pub search: Option<String>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
}

// ── Vehicles ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CreateVehicleInput {
    pub franchise_id: String,
    pub branch_id: String,
    pub driver_id: Option<String>,
    #[validate(length(min = 1, max = 32))]
    pub plate_no: String,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    #[serde(default = "default_status_active")]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpdateVehicleInput {
    pub branch_id: Option<String>,
    pub driver_id: Option<String>,
    pub plate_no: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VehiclePath {
    pub vehicle_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListVehiclesQuery {
    pub franchise_id: Option<String>,
    pub branch_id: Option<String>,
    pub driver_id: Option<String>,
    pub status: Option<String>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
}

// ── Boundary contracts ──────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CreateBoundaryContractInput {
    pub franchise_id: String,
    pub branch_id: String,
    pub driver_id: String,
    pub vehicle_id: String,
    #[validate(range(min = 0.0))]
    pub daily_rate: f64,
    pub starts_on: String,
    pub ends_on: Option<String>,
    #[serde(default = "default_status_active")]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpdateBoundaryContractInput {
    pub daily_rate: Option<f64>,
    pub starts_on: Option<String>,
    pub ends_on: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoundaryContractPath {
    pub contract_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListBoundaryContractsQuery {
    pub franchise_id: Option<String>,
    pub branch_id: Option<String>,
    pub driver_id: Option<String>,
    pub status: Option<String>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
}

// ── Revenues ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CreateRevenueInput {
    pub franchise_id: String,
    pub branch_id: String,
    pub driver_id: String,
    pub vehicle_id: Option<String>,
    #[validate(range(min = 0.0))]
    pub amount: f64,
    pub payment_date: String,
    #[serde(default = "default_status_paid")]
    pub status: String,
    #[serde(default = "default_service_type_trips")]
    pub service_type: String,
    pub reference_no: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpdateRevenueInput {
    pub amount: Option<f64>,
    pub payment_date: Option<String>,
    pub status: Option<String>,
    pub reference_no: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RevenuePath {
    pub revenue_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListRevenuesQuery {
    pub franchise_id: Option<String>,
    pub branch_id: Option<String>,
    pub driver_id: Option<String>,
    pub status: Option<String>,
    pub service_type: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
}

// ── Expenses ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CreateExpenseInput {
    pub franchise_id: String,
    pub branch_id: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub category: String,
    #[validate(range(min = 0.0))]
    pub amount: f64,
    pub expense_date: String,
    pub description: Option<String>,
    #[serde(default = "default_status_paid")]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpdateExpenseInput {
    pub branch_id: Option<String>,
    pub category: Option<String>,
    pub amount: Option<f64>,
    pub expense_date: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpensePath {
    pub expense_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListExpensesQuery {
    pub franchise_id: Option<String>,
    pub branch_id: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
}

// ── Breakdown types ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CreateBreakdownTypeInput {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    pub kind: String,
    #[validate(range(min = 0.0))]
    pub value: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpdateBreakdownTypeInput {
    pub name: Option<String>,
    pub kind: Option<String>,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakdownTypePath {
    pub breakdown_type_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListBreakdownTypesQuery {
    #[serde(default = "default_limit_100")]
    pub limit: i64,
}

// ── Reports ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ReportQuery {
    pub period: ReportPeriod,
    pub label: Option<String>,
    pub franchise_id: Option<String>,
    pub branch_id: Option<String>,
    pub driver_id: Option<String>,
    /// Entity-scope dimension for summary reports: "franchise" or "branch".
    pub tab: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{clamp_limit_in_range, remove_nulls, serialize_to_map, UpdateDriverInput};

    #[test]
    fn clamps_limits() {
        assert_eq!(clamp_limit_in_range(0, 1, 100), 1);
        assert_eq!(clamp_limit_in_range(50, 1, 100), 50);
        assert_eq!(clamp_limit_in_range(9999, 1, 100), 100);
    }

    #[test]
    fn patch_payloads_drop_missing_fields() {
        let patch: UpdateDriverInput = serde_json::from_value(json!({
            "full_name": "Juan Reyes",
            "status": null
        }))
        .unwrap();
        let map = remove_nulls(serialize_to_map(&patch));
        assert_eq!(map.get("full_name"), Some(&json!("Juan Reyes")));
        assert!(!map.contains_key("status"));
        assert!(!map.contains_key("phone"));
    }
}
