//! Grouped-sum aggregation over revenues and expenses.
//!
//! The breakdown-type set is configuration-driven, so the projection gains one
//! conditional-sum column per type at request time (`bd_0`, `bd_1`, ...),
//! mapped back to type names by index when rows are read. Breakdown amounts
//! are pre-aggregated per revenue in a subquery so the join cannot fan out
//! and inflate `SUM(amount)`.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

use super::period::{DateRange, ReportPeriod};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakdownKind {
    Percentage,
    Fixed,
}

impl BreakdownKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "percentage" => Some(Self::Percentage),
            "fixed" => Some(Self::Fixed),
            _ => None,
        }
    }
}

/// A named deduction rule applied to gross trip revenue. Fetched fresh per
/// request; the set is open-ended.
#[derive(Debug, Clone)]
pub struct BreakdownType {
    pub id: Uuid,
    pub name: String,
    pub kind: BreakdownKind,
    pub value: Decimal,
}

impl BreakdownType {
    /// Deduction owed for a gross revenue amount.
    pub fn deduction_for(&self, amount: Decimal) -> Decimal {
        match self.kind {
            BreakdownKind::Percentage => {
                (amount * self.value / Decimal::ONE_HUNDRED).round_dp(2)
            }
            BreakdownKind::Fixed => self.value,
        }
    }
}

pub async fn list_breakdown_types(pool: &PgPool) -> AppResult<Vec<BreakdownType>> {
    let rows = sqlx::query(
        "SELECT id, name, kind::text AS kind, value
         FROM breakdown_types
         ORDER BY name ASC",
    )
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;

    let mut types = Vec::with_capacity(rows.len());
    for row in rows {
        let kind_raw: String = row.try_get("kind").unwrap_or_default();
        let Some(kind) = BreakdownKind::parse(&kind_raw) else {
            tracing::warn!(kind = %kind_raw, "Skipping breakdown type with unknown kind");
            continue;
        };
        types.push(BreakdownType {
            id: row.try_get("id").map_err(map_db_error)?,
            name: row.try_get("name").map_err(map_db_error)?,
            kind,
            value: row.try_get("value").map_err(map_db_error)?,
        });
    }
    Ok(types)
}

/// The report's entity-scope filter. Fields are additive; an unknown id
/// simply matches zero rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportScope {
    pub franchise_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
}

/// Grouping dimension — the "tab" on the report screens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportDimension {
    Driver,
    Franchise,
    Branch,
}

impl ReportDimension {
    fn join(self) -> &'static str {
        match self {
            Self::Driver => " JOIN drivers dim ON dim.id = r.driver_id",
            Self::Franchise => " JOIN franchises dim ON dim.id = r.franchise_id",
            Self::Branch => " JOIN branches dim ON dim.id = r.branch_id",
        }
    }

    fn name_column(self) -> &'static str {
        match self {
            Self::Driver => "dim.full_name",
            Self::Franchise | Self::Branch => "dim.name",
        }
    }
}

/// One grouped result: entity dimension, calendar bucket, total amount, and
/// per-breakdown-type sums.
#[derive(Debug, Clone)]
pub struct AggregatedRow {
    pub entity_id: Option<String>,
    pub entity_name: Option<String>,
    pub bucket_start: NaiveDate,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub amount: Decimal,
    pub breakdowns: BTreeMap<String, Decimal>,
}

pub fn build_revenue_query<'a>(
    range: &'a DateRange,
    period: ReportPeriod,
    scope: &'a ReportScope,
    dimension: ReportDimension,
    types: &'a [BreakdownType],
) -> QueryBuilder<'a, Postgres> {
    let mut query = QueryBuilder::<Postgres>::new("SELECT dim.id::text AS entity_id, ");
    query.push(dimension.name_column());
    query.push(" AS entity_name, date_trunc('");
    query.push(period.trunc_unit());
    query.push(
        "', r.payment_date)::date AS bucket_start, \
         MIN(r.payment_date)::date AS first_date, \
         MAX(r.payment_date)::date AS last_date, \
         COALESCE(SUM(r.amount), 0) AS amount",
    );
    for index in 0..types.len() {
        query.push(format!(", COALESCE(SUM(b.bd_{index}), 0) AS bd_{index}"));
    }

    query.push(" FROM revenues r");
    query.push(dimension.join());

    if !types.is_empty() {
        query.push(" LEFT JOIN (SELECT rb.revenue_id");
        for (index, breakdown) in types.iter().enumerate() {
            query.push(", SUM(rb.earning_amount) FILTER (WHERE bt.name = ");
            query.push_bind(breakdown.name.as_str());
            query.push(format!(") AS bd_{index}"));
        }
        query.push(
            " FROM revenue_breakdowns rb \
             JOIN breakdown_types bt ON bt.id = rb.breakdown_type_id \
             GROUP BY rb.revenue_id) b ON b.revenue_id = r.id",
        );
    }

    query.push(" WHERE r.status = 'paid' AND r.service_type = 'trips'");
    query.push(" AND r.payment_date >= ").push_bind(range.start);
    query.push(" AND r.payment_date <= ").push_bind(range.end);
    if let Some(franchise_id) = scope.franchise_id {
        query.push(" AND r.franchise_id = ").push_bind(franchise_id);
    }
    if let Some(branch_id) = scope.branch_id {
        query.push(" AND r.branch_id = ").push_bind(branch_id);
    }
    if let Some(driver_id) = scope.driver_id {
        query.push(" AND r.driver_id = ").push_bind(driver_id);
    }

    query.push(
        " GROUP BY entity_id, entity_name, bucket_start \
         ORDER BY bucket_start DESC, entity_name ASC",
    );
    query
}

/// Runs the grouped revenue aggregation. Most recent bucket first.
pub async fn run_revenue_aggregation(
    pool: &PgPool,
    range: &DateRange,
    period: ReportPeriod,
    scope: &ReportScope,
    dimension: ReportDimension,
    types: &[BreakdownType],
) -> AppResult<Vec<AggregatedRow>> {
    let mut query = build_revenue_query(range, period, scope, dimension, types);
    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;

    let mut results = Vec::with_capacity(rows.len());
    for row in rows {
        let mut breakdowns = BTreeMap::new();
        for (index, breakdown) in types.iter().enumerate() {
            let value: Decimal = row
                .try_get(format!("bd_{index}").as_str())
                .map_err(map_db_error)?;
            breakdowns.insert(breakdown.name.clone(), value);
        }
        results.push(AggregatedRow {
            entity_id: row.try_get("entity_id").ok(),
            entity_name: row.try_get("entity_name").ok(),
            bucket_start: row.try_get("bucket_start").map_err(map_db_error)?,
            first_date: row.try_get("first_date").map_err(map_db_error)?,
            last_date: row.try_get("last_date").map_err(map_db_error)?,
            amount: row.try_get("amount").map_err(map_db_error)?,
            breakdowns,
        });
    }
    Ok(results)
}

/// Expense sums bucketed the same way, grouped by category. No breakdown
/// columns apply here.
pub async fn run_expense_aggregation(
    pool: &PgPool,
    range: &DateRange,
    period: ReportPeriod,
    scope: &ReportScope,
) -> AppResult<Vec<AggregatedRow>> {
    let mut query = QueryBuilder::<Postgres>::new(
        "SELECT e.category AS entity_name, date_trunc('",
    );
    query.push(period.trunc_unit());
    query.push(
        "', e.expense_date)::date AS bucket_start, \
         MIN(e.expense_date)::date AS first_date, \
         MAX(e.expense_date)::date AS last_date, \
         COALESCE(SUM(e.amount), 0) AS amount \
         FROM expenses e WHERE e.status = 'paid'",
    );
    query.push(" AND e.expense_date >= ").push_bind(range.start);
    query.push(" AND e.expense_date <= ").push_bind(range.end);
    if let Some(franchise_id) = scope.franchise_id {
        query.push(" AND e.franchise_id = ").push_bind(franchise_id);
    }
    if let Some(branch_id) = scope.branch_id {
        query.push(" AND e.branch_id = ").push_bind(branch_id);
    }

    query.push(
        " GROUP BY entity_name, bucket_start \
         ORDER BY bucket_start DESC, entity_name ASC",
    );

    let rows = query.build().fetch_all(pool).await.map_err(map_db_error)?;
    let mut results = Vec::with_capacity(rows.len());
    for row in rows {
        results.push(AggregatedRow {
            entity_id: None,
            entity_name: row.try_get("entity_name").ok(),
            bucket_start: row.try_get("bucket_start").map_err(map_db_error)?,
            first_date: row.try_get("first_date").map_err(map_db_error)?,
            last_date: row.try_get("last_date").map_err(map_db_error)?,
            amount: row.try_get("amount").map_err(map_db_error)?,
            breakdowns: BTreeMap::new(),
        });
    }
    Ok(results)
}

fn map_db_error(error: sqlx::Error) -> AppError {
    tracing::error!(db_error = %error, "Report query failed");
    AppError::Dependency("Database operation failed.".to_string())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use crate::reports::period::{DateRange, ReportPeriod};

    use super::{
        build_revenue_query, BreakdownKind, BreakdownType, ReportDimension, ReportScope,
    };

    fn sample_types() -> Vec<BreakdownType> {
        vec![
            BreakdownType {
                id: Uuid::new_v4(),
                name: "bank".to_string(),
                kind: BreakdownKind::Fixed,
                value: Decimal::new(2000, 2),
            },
            BreakdownType {
                id: Uuid::new_v4(),
                name: "tax".to_string(),
                kind: BreakdownKind::Percentage,
                value: Decimal::new(500, 2),
            },
        ]
    }

    fn sample_range() -> DateRange {
        DateRange::days(
            NaiveDate::from_ymd_opt(2025, 11, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 11, 30).unwrap(),
        )
    }

    #[test]
    fn projection_gains_one_column_per_breakdown_type() {
        let range = sample_range();
        let scope = ReportScope::default();
        let types = sample_types();
        let query = build_revenue_query(
            &range,
            ReportPeriod::Monthly,
            &scope,
            ReportDimension::Driver,
            &types,
        );
        let sql = query.sql();
        assert!(sql.contains("AS bd_0"));
        assert!(sql.contains("AS bd_1"));
        assert!(!sql.contains("bd_2"));
        assert!(sql.contains("date_trunc('month'"));
        assert!(sql.contains("GROUP BY rb.revenue_id"));
    }

    #[test]
    fn base_predicate_and_ordering_are_fixed() {
        let range = sample_range();
        let scope = ReportScope {
            driver_id: Some(Uuid::new_v4()),
            ..Default::default()
        };
        let query = build_revenue_query(
            &range,
            ReportPeriod::Weekly,
            &scope,
            ReportDimension::Driver,
            &[],
        );
        let sql = query.sql();
        assert!(sql.contains("r.status = 'paid'"));
        assert!(sql.contains("r.service_type = 'trips'"));
        assert!(sql.contains("date_trunc('week'"));
        assert!(sql.contains("ORDER BY bucket_start DESC"));
        assert!(sql.contains("AND r.driver_id = "));
        assert!(!sql.contains("LEFT JOIN"));
    }

    #[test]
    fn identical_inputs_build_identical_sql() {
        let range = sample_range();
        let scope = ReportScope::default();
        let types = sample_types();
        let first = build_revenue_query(
            &range,
            ReportPeriod::Daily,
            &scope,
            ReportDimension::Branch,
            &types,
        );
        let second = build_revenue_query(
            &range,
            ReportPeriod::Daily,
            &scope,
            ReportDimension::Branch,
            &types,
        );
        assert_eq!(first.sql(), second.sql());
    }

    #[test]
    fn percentage_and_fixed_deductions() {
        let types = sample_types();
        let amount = Decimal::new(150000, 2); // 1500.00
        assert_eq!(types[0].deduction_for(amount), Decimal::new(2000, 2));
        assert_eq!(types[1].deduction_for(amount), Decimal::new(7500, 2));
    }
}
