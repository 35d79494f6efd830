//! Report endpoints: payroll by driver, revenue summary by franchise or
//! branch, and expense summary by category. Each has a JSON and a CSV form
//! over the same resolver pipeline: label -> range -> grouped sums -> labeled
//! rows + grand total.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    reports::{
        aggregate::{
            list_breakdown_types, run_expense_aggregation, run_revenue_aggregation,
            AggregatedRow, BreakdownType, ReportDimension, ReportScope,
        },
        export::{render_csv, report_headings, report_records},
        period::{format_daily, format_monthly, format_weekly, DateRange, ReportPeriod,
            resolve_range},
        rows::{finalize_report, ReportRow},
    },
    schemas::ReportQuery,
    state::AppState,
    tenancy::{
        assert_staff, membership_branch_id, membership_franchise_id, membership_role,
        ROLE_MANAGER, ROLE_OWNER,
    },
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/reports/payroll", axum::routing::get(payroll))
        .route("/reports/payroll/export", axum::routing::get(payroll_export))
        .route(
            "/reports/revenue-summary",
            axum::routing::get(revenue_summary),
        )
        .route(
            "/reports/revenue-summary/export",
            axum::routing::get(revenue_summary_export),
        )
        .route(
            "/reports/expense-summary",
            axum::routing::get(expense_summary),
        )
        .route(
            "/reports/expense-summary/export",
            axum::routing::get(expense_summary_export),
        )
}

async fn payroll(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let report = build_payroll(&state, &headers, &query).await?;
    Ok(Json(report_json(&query, &report)))
}

async fn payroll_export(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let report = build_payroll(&state, &headers, &query).await?;
    let names = breakdown_names(&report.types);
    let bytes = render_csv(
        &format!("Payroll Report - {}", report.label),
        &report_headings("Driver", &names),
        &report_records(&report.rows, &names),
    )?;
    Ok(csv_response("payroll-report.csv", bytes))
}

async fn revenue_summary(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let report = build_revenue_summary(&state, &headers, &query).await?;
    Ok(Json(report_json(&query, &report)))
}

async fn revenue_summary_export(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let report = build_revenue_summary(&state, &headers, &query).await?;
    let names = breakdown_names(&report.types);
    let entity_heading = match report.dimension {
        ReportDimension::Branch => "Branch",
        _ => "Franchise",
    };
    let bytes = render_csv(
        &format!("Revenue Summary - {}", report.label),
        &report_headings(entity_heading, &names),
        &report_records(&report.rows, &names),
    )?;
    Ok(csv_response("revenue-summary.csv", bytes))
}

async fn expense_summary(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let report = build_expense_summary(&state, &headers, &query).await?;
    Ok(Json(report_json(&query, &report)))
}

async fn expense_summary_export(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let report = build_expense_summary(&state, &headers, &query).await?;
    let bytes = render_csv(
        &format!("Expense Summary - {}", report.label),
        &report_headings("Category", &[]),
        &report_records(&report.rows, &[]),
    )?;
    Ok(csv_response("expense-summary.csv", bytes))
}

struct BuiltReport {
    label: String,
    range: DateRange,
    dimension: ReportDimension,
    types: Vec<BreakdownType>,
    rows: Vec<ReportRow>,
}

async fn build_payroll(
    state: &AppState,
    headers: &HeaderMap,
    query: &ReportQuery,
) -> AppResult<BuiltReport> {
    let user_id = require_user_id(state, headers).await?;
    let membership = assert_staff(state, &user_id).await?;
    let pool = db_pool(state)?;

    let scope = resolved_scope(&membership, query)?;
    let range = resolve_range(
        query.label.as_deref().unwrap_or(""),
        query.period,
        state.config.report_tz(),
    );
    let types = list_breakdown_types(pool).await?;
    let mut aggregated = run_revenue_aggregation(
        pool,
        &range,
        query.period,
        &scope,
        ReportDimension::Driver,
        &types,
    )
    .await?;
    truncate_rows(&mut aggregated, state.config.export_row_limit);

    Ok(BuiltReport {
        label: display_label(query, &range),
        range,
        dimension: ReportDimension::Driver,
        types,
        rows: finalize_report(aggregated, query.period),
    })
}

async fn build_revenue_summary(
    state: &AppState,
    headers: &HeaderMap,
    query: &ReportQuery,
) -> AppResult<BuiltReport> {
    let user_id = require_user_id(state, headers).await?;
    let membership = assert_staff(state, &user_id).await?;
    let pool = db_pool(state)?;

    let dimension = dimension_for_tab(query.tab.as_deref())?;
    let scope = resolved_scope(&membership, query)?;
    let range = resolve_range(
        query.label.as_deref().unwrap_or(""),
        query.period,
        state.config.report_tz(),
    );
    let types = list_breakdown_types(pool).await?;
    let mut aggregated =
        run_revenue_aggregation(pool, &range, query.period, &scope, dimension, &types).await?;
    truncate_rows(&mut aggregated, state.config.export_row_limit);

    Ok(BuiltReport {
        label: display_label(query, &range),
        range,
        dimension,
        types,
        rows: finalize_report(aggregated, query.period),
    })
}

async fn build_expense_summary(
    state: &AppState,
    headers: &HeaderMap,
    query: &ReportQuery,
) -> AppResult<BuiltReport> {
    let user_id = require_user_id(state, headers).await?;
    let membership = assert_staff(state, &user_id).await?;
    let pool = db_pool(state)?;

    let scope = resolved_scope(&membership, query)?;
    let range = resolve_range(
        query.label.as_deref().unwrap_or(""),
        query.period,
        state.config.report_tz(),
    );
    let mut aggregated = run_expense_aggregation(pool, &range, query.period, &scope).await?;
    truncate_rows(&mut aggregated, state.config.export_row_limit);

    Ok(BuiltReport {
        label: display_label(query, &range),
        range,
        dimension: ReportDimension::Branch,
        types: Vec::new(),
        rows: finalize_report(aggregated, query.period),
    })
}

/// Scope requested by the caller, narrowed by their role: owners are pinned
/// to their own franchise and managers to their own branch regardless of what
/// the query asks for.
fn resolved_scope(membership: &Value, query: &ReportQuery) -> AppResult<ReportScope> {
    let mut scope = ReportScope {
        franchise_id: parse_uuid_opt(query.franchise_id.as_deref(), "franchise_id")?,
        branch_id: parse_uuid_opt(query.branch_id.as_deref(), "branch_id")?,
        driver_id: parse_uuid_opt(query.driver_id.as_deref(), "driver_id")?,
    };

    match membership_role(membership).as_str() {
        ROLE_OWNER => {
            scope.franchise_id = Some(own_uuid(
                membership_franchise_id(membership),
                "franchise",
            )?);
        }
        ROLE_MANAGER => {
            scope.franchise_id = Some(own_uuid(
                membership_franchise_id(membership),
                "franchise",
            )?);
            scope.branch_id = Some(own_uuid(membership_branch_id(membership), "branch")?);
        }
        _ => {}
    }
    Ok(scope)
}

fn own_uuid(raw: Option<String>, kind: &str) -> AppResult<Uuid> {
    raw.as_deref()
        .and_then(|value| Uuid::parse_str(value.trim()).ok())
        .ok_or_else(|| {
            AppError::Forbidden(format!("Forbidden: staff account has no {kind}."))
        })
}

fn parse_uuid_opt(raw: Option<&str>, field: &str) -> AppResult<Option<Uuid>> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(None),
        Some(value) => Uuid::parse_str(value)
            .map(Some)
            .map_err(|_| AppError::BadRequest(format!("{field} must be a UUID."))),
    }
}

fn dimension_for_tab(tab: Option<&str>) -> AppResult<ReportDimension> {
    match tab.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(ReportDimension::Franchise),
        Some(value) if value.eq_ignore_ascii_case("franchise") => Ok(ReportDimension::Franchise),
        Some(value) if value.eq_ignore_ascii_case("branch") => Ok(ReportDimension::Branch),
        Some(value) => Err(AppError::BadRequest(format!(
            "tab must be 'franchise' or 'branch', got '{value}'."
        ))),
    }
}

/// Title label for the report: the caller's label when given, otherwise the
/// resolved range formatted for the period kind.
fn display_label(query: &ReportQuery, range: &DateRange) -> String {
    if let Some(label) = query.label.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
        return label.to_string();
    }
    match query.period {
        ReportPeriod::Daily => format_daily(range.start_date()),
        ReportPeriod::Weekly => format_weekly(range.start_date(), range.end_date()),
        ReportPeriod::Monthly => format_monthly(range.start_date()),
    }
}

fn report_json(query: &ReportQuery, report: &BuiltReport) -> Value {
    json!({
        "period": query.period.as_str(),
        "label": report.label,
        "start_date": report.range.start_date().format("%Y-%m-%d").to_string(),
        "end_date": report.range.end_date().format("%Y-%m-%d").to_string(),
        "breakdown_types": breakdown_names(&report.types),
        "rows": report.rows.iter().map(ReportRow::to_json).collect::<Vec<_>>(),
    })
}

fn breakdown_names(types: &[BreakdownType]) -> Vec<String> {
    types.iter().map(|breakdown| breakdown.name.clone()).collect()
}

fn truncate_rows(rows: &mut Vec<AggregatedRow>, limit: usize) {
    if rows.len() > limit {
        tracing::warn!(
            dropped = rows.len() - limit,
            limit,
            "Report truncated to the row limit"
        );
        rows.truncate(limit);
    }
}

fn csv_response(filename: &str, bytes: Vec<u8>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::reports::aggregate::ReportDimension;

    use super::{dimension_for_tab, resolved_scope};
    use crate::schemas::ReportQuery;

    fn query(franchise_id: Option<&str>, branch_id: Option<&str>) -> ReportQuery {
        ReportQuery {
            period: crate::reports::period::ReportPeriod::Monthly,
            label: None,
            franchise_id: franchise_id.map(ToOwned::to_owned),
            branch_id: branch_id.map(ToOwned::to_owned),
            driver_id: None,
            tab: None,
        }
    }

    #[test]
    fn tab_maps_to_dimension() {
        assert_eq!(dimension_for_tab(None).unwrap(), ReportDimension::Franchise);
        assert_eq!(
            dimension_for_tab(Some("branch")).unwrap(),
            ReportDimension::Branch
        );
        assert!(dimension_for_tab(Some("driver")).is_err());
    }

    #[test]
    fn owner_scope_is_pinned_to_their_franchise() {
        let own = "11111111-1111-4111-8111-111111111111";
        let other = "22222222-2222-4222-8222-222222222222";
        let membership = json!({ "role": "owner", "franchise_id": own });
        let scope = resolved_scope(&membership, &query(Some(other), None)).unwrap();
        assert_eq!(scope.franchise_id.unwrap().to_string(), own);
    }

    #[test]
    fn manager_scope_is_pinned_to_their_branch() {
        let membership = json!({
            "role": "manager",
            "franchise_id": "11111111-1111-4111-8111-111111111111",
            "branch_id": "33333333-3333-4333-8333-333333333333"
        });
        let scope = resolved_scope(&membership, &query(None, None)).unwrap();
        assert_eq!(
            scope.branch_id.unwrap().to_string(),
            "33333333-3333-4333-8333-333333333333"
        );
    }

    #[test]
    fn super_admin_scope_follows_the_query() {
        let membership = json!({ "role": "super_admin" });
        let scope = resolved_scope(
            &membership,
            &query(Some("11111111-1111-4111-8111-111111111111"), None),
        )
        .unwrap();
        assert!(scope.franchise_id.is_some());
        assert!(scope.branch_id.is_none());

        assert!(resolved_scope(&membership, &query(Some("not-a-uuid"), None)).is_err());
    }
}
