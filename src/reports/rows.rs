//! Report row labeling and grand-total synthesis.
//!
//! The total row is a tagged variant rather than a sentinel label, and its
//! earning is recomputed from the summed amount and summed deductions instead
//! of summing clamped per-row earnings, so individually floored rows cannot
//! skew the total.

use std::collections::BTreeMap;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};

use super::aggregate::AggregatedRow;
use super::period::{format_daily, format_monthly, format_weekly, ReportPeriod};

#[derive(Debug, Clone)]
pub struct ReportRowValues {
    pub label: String,
    pub entity_id: Option<String>,
    pub entity_name: Option<String>,
    pub amount: Decimal,
    pub breakdowns: BTreeMap<String, Decimal>,
    pub earning: Decimal,
}

#[derive(Debug, Clone)]
pub enum ReportRow {
    Data(ReportRowValues),
    Total(ReportRowValues),
}

impl ReportRow {
    pub fn values(&self) -> &ReportRowValues {
        match self {
            Self::Data(values) | Self::Total(values) => values,
        }
    }

    pub fn is_total(&self) -> bool {
        matches!(self, Self::Total(_))
    }

    pub fn to_json(&self) -> Value {
        let values = self.values();
        let mut breakdowns = Map::new();
        for (name, value) in &values.breakdowns {
            breakdowns.insert(name.clone(), json!(decimal_f64(*value)));
        }
        json!({
            "label": values.label,
            "entity_id": values.entity_id,
            "entity_name": values.entity_name,
            "amount": decimal_f64(values.amount),
            "breakdowns": breakdowns,
            "earning": decimal_f64(values.earning),
            "is_total": self.is_total(),
        })
    }
}

/// Labels each aggregated row for its period kind, computes the clamped
/// per-row earning, and appends the grand total. Empty input yields a single
/// zero total so reports always render a summary line.
pub fn finalize_report(rows: Vec<AggregatedRow>, period: ReportPeriod) -> Vec<ReportRow> {
    let mut total_amount = Decimal::ZERO;
    let mut total_breakdowns: BTreeMap<String, Decimal> = BTreeMap::new();

    let mut output = Vec::with_capacity(rows.len() + 1);
    for row in rows {
        let label = bucket_label(&row, period);
        let deductions: Decimal = row.breakdowns.values().copied().sum();
        let earning = clamp_earning(row.amount, deductions);

        total_amount += row.amount;
        for (name, value) in &row.breakdowns {
            *total_breakdowns.entry(name.clone()).or_insert(Decimal::ZERO) += *value;
        }

        output.push(ReportRow::Data(ReportRowValues {
            label,
            entity_id: row.entity_id,
            entity_name: row.entity_name,
            amount: row.amount,
            breakdowns: row.breakdowns,
            earning,
        }));
    }

    let total_deductions: Decimal = total_breakdowns.values().copied().sum();
    let total_earning = clamp_earning(total_amount, total_deductions);
    output.push(ReportRow::Total(ReportRowValues {
        label: "Grand Total".to_string(),
        entity_id: None,
        entity_name: None,
        amount: total_amount,
        breakdowns: total_breakdowns,
        earning: total_earning,
    }));
    output
}

fn bucket_label(row: &AggregatedRow, period: ReportPeriod) -> String {
    match period {
        ReportPeriod::Daily => format_daily(row.bucket_start),
        // Weekly display spans the observed payment dates within the ISO
        // bucket, which can be narrower than the full Monday-Sunday week.
        ReportPeriod::Weekly => format_weekly(row.first_date, row.last_date),
        ReportPeriod::Monthly => format_monthly(row.bucket_start),
    }
}

fn clamp_earning(amount: Decimal, deductions: Decimal) -> Decimal {
    (amount - deductions).max(Decimal::ZERO)
}

fn decimal_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use crate::reports::aggregate::AggregatedRow;
    use crate::reports::period::ReportPeriod;

    use super::{finalize_report, ReportRow};

    fn money(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn row(bucket: NaiveDate, amount: Decimal, tax: Decimal) -> AggregatedRow {
        AggregatedRow {
            entity_id: Some("d-1".to_string()),
            entity_name: Some("Juan Reyes".to_string()),
            bucket_start: bucket,
            first_date: bucket,
            last_date: bucket,
            amount,
            breakdowns: BTreeMap::from([("tax".to_string(), tax)]),
        }
    }

    #[test]
    fn earning_is_amount_minus_deductions_never_negative() {
        let rows = vec![
            row(date(2025, 11, 1), money(150_000), money(5_000)),
            row(date(2025, 11, 2), money(1_000), money(9_000)),
        ];
        let report = finalize_report(rows, ReportPeriod::Daily);
        assert_eq!(report.len(), 3);
        assert_eq!(report[0].values().earning, money(145_000));
        // Clamped at zero, never negative.
        assert_eq!(report[1].values().earning, Decimal::ZERO);
    }

    #[test]
    fn grand_total_recomputes_from_components() {
        let rows = vec![
            row(date(2025, 11, 1), money(150_000), money(5_000)),
            row(date(2025, 11, 2), money(1_000), money(9_000)),
        ];
        let report = finalize_report(rows, ReportPeriod::Daily);
        let total = report.last().unwrap();
        assert!(total.is_total());
        assert_eq!(total.values().amount, money(151_000));
        // Recomputed: 1510.00 - 140.00 = 1370.00, not the 1450.00 a sum of
        // clamped per-row earnings would produce.
        assert_eq!(total.values().earning, money(137_000));
        assert_eq!(
            total.values().breakdowns.get("tax").copied(),
            Some(money(14_000))
        );
    }

    #[test]
    fn grand_total_amount_matches_data_row_sum_exactly() {
        let rows = (1..=28)
            .map(|day| row(date(2025, 2, day), money(3_333), money(111)))
            .collect::<Vec<_>>();
        let report = finalize_report(rows, ReportPeriod::Daily);
        let data_sum: Decimal = report
            .iter()
            .filter(|r| !r.is_total())
            .map(|r| r.values().amount)
            .sum();
        assert_eq!(report.last().unwrap().values().amount, data_sum);
    }

    #[test]
    fn single_group_monthly_scenario() {
        // "November 2025": two paid trips of 1000.00 and 500.00 and a tax
        // breakdown of 50.00 collapse into one monthly bucket.
        let aggregated = AggregatedRow {
            entity_id: Some("d-1".to_string()),
            entity_name: Some("Juan Reyes".to_string()),
            bucket_start: date(2025, 11, 1),
            first_date: date(2025, 11, 3),
            last_date: date(2025, 11, 21),
            amount: money(150_000),
            breakdowns: BTreeMap::from([("tax".to_string(), money(5_000))]),
        };
        let report = finalize_report(vec![aggregated], ReportPeriod::Monthly);
        assert_eq!(report.len(), 2);

        let data = report[0].values();
        assert_eq!(data.label, "November 2025");
        assert_eq!(data.amount, money(150_000));
        assert_eq!(data.earning, money(145_000));

        let total = report[1].values();
        assert_eq!(total.amount, money(150_000));
        assert_eq!(total.earning, money(145_000));
    }

    #[test]
    fn weekly_rows_label_from_observed_dates() {
        let aggregated = AggregatedRow {
            entity_id: None,
            entity_name: None,
            bucket_start: date(2025, 11, 17),
            first_date: date(2025, 11, 19),
            last_date: date(2025, 11, 20),
            amount: money(10_000),
            breakdowns: BTreeMap::new(),
        };
        let report = finalize_report(vec![aggregated], ReportPeriod::Weekly);
        assert_eq!(report[0].values().label, "Nov 19 - 20, 2025");
    }

    #[test]
    fn empty_input_yields_zero_total() {
        let report = finalize_report(Vec::new(), ReportPeriod::Monthly);
        assert_eq!(report.len(), 1);
        let total = &report[0];
        assert!(total.is_total());
        assert_eq!(total.values().amount, Decimal::ZERO);
        assert_eq!(total.values().earning, Decimal::ZERO);
    }

    #[test]
    fn json_rows_carry_the_total_flag() {
        let report = finalize_report(
            vec![row(date(2025, 11, 1), money(100), Decimal::ZERO)],
            ReportPeriod::Daily,
        );
        let values = report.iter().map(ReportRow::to_json).collect::<Vec<_>>();
        assert_eq!(values[0]["is_total"], serde_json::json!(false));
        assert_eq!(values[1]["is_total"], serde_json::json!(true));
    }
}
