//! CSV rendering for report downloads.
//!
//! Thin wrapper over the `csv` crate: a title record, a blank spacer, the
//! column headings, then one record per row with currency-formatted amounts.
//! PDF/spreadsheet template rendering is intentionally not owned here.

use rust_decimal::Decimal;

use crate::error::{AppError, AppResult};

use super::rows::ReportRow;

pub fn render_csv(title: &str, headings: &[String], rows: &[Vec<String>]) -> AppResult<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());

    writer
        .write_record([title])
        .and_then(|_| writer.write_record([""]))
        .and_then(|_| writer.write_record(headings))
        .map_err(map_csv_error)?;
    for row in rows {
        writer.write_record(row).map_err(map_csv_error)?;
    }

    writer
        .into_inner()
        .map_err(|error| AppError::Internal(format!("CSV buffer flush failed: {error}")))
}

/// Headings for a finalized report: fixed columns plus one per breakdown
/// type, mirroring the dynamic projection.
pub fn report_headings(entity_heading: &str, breakdown_names: &[String]) -> Vec<String> {
    let mut headings = vec![
        "Period".to_string(),
        entity_heading.to_string(),
        "Amount".to_string(),
    ];
    for name in breakdown_names {
        headings.push(title_case(name));
    }
    headings.push("Driver Earning".to_string());
    headings
}

/// Flattens finalized rows into CSV records in heading order. The total row
/// renders its label in the entity column so it reads as a summary line.
pub fn report_records(rows: &[ReportRow], breakdown_names: &[String]) -> Vec<Vec<String>> {
    rows.iter()
        .map(|row| {
            let values = row.values();
            let mut record = Vec::with_capacity(breakdown_names.len() + 4);
            if row.is_total() {
                record.push(String::new());
                record.push(values.label.clone());
            } else {
                record.push(values.label.clone());
                record.push(values.entity_name.clone().unwrap_or_default());
            }
            record.push(format_money(values.amount));
            for name in breakdown_names {
                let value = values.breakdowns.get(name).copied().unwrap_or_default();
                record.push(format_money(value));
            }
            record.push(format_money(values.earning));
            record
        })
        .collect()
}

/// "1234567.5" -> "1,234,567.50"
pub fn format_money(value: Decimal) -> String {
    let fixed = value.round_dp(2);
    let raw = format!("{fixed:.2}");
    let (whole, cents) = raw.split_once('.').unwrap_or((raw.as_str(), "00"));
    let (sign, digits) = whole
        .strip_prefix('-')
        .map_or(("", whole), |rest| ("-", rest));

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (offset, ch) in digits.chars().enumerate() {
        if offset > 0 && (digits.len() - offset) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{sign}{grouped}.{cents}")
}

fn title_case(raw: &str) -> String {
    raw.split(['_', ' '])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn map_csv_error(error: csv::Error) -> AppError {
    AppError::Internal(format!("CSV rendering failed: {error}"))
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{format_money, render_csv, report_headings, title_case};

    #[test]
    fn formats_money_with_thousands_separators() {
        assert_eq!(format_money(Decimal::new(150_000, 2)), "1,500.00");
        assert_eq!(format_money(Decimal::new(123456789, 2)), "1,234,567.89");
        assert_eq!(format_money(Decimal::ZERO), "0.00");
        assert_eq!(format_money(Decimal::new(-5_000, 2)), "-50.00");
        assert_eq!(format_money(Decimal::new(999, 0)), "999.00");
    }

    #[test]
    fn headings_follow_breakdown_type_order() {
        let headings = report_headings(
            "Driver",
            &["bank".to_string(), "system_fee".to_string()],
        );
        assert_eq!(
            headings,
            vec!["Period", "Driver", "Amount", "Bank", "System Fee", "Driver Earning"]
        );
    }

    #[test]
    fn title_cases_snake_names() {
        assert_eq!(title_case("markup_fee"), "Markup Fee");
        assert_eq!(title_case("tax"), "Tax");
    }

    #[test]
    fn renders_title_headings_and_rows() {
        let bytes = render_csv(
            "Payroll Report - November 2025",
            &["Period".to_string(), "Amount".to_string()],
            &[vec!["November 2025".to_string(), "1,500.00".to_string()]],
        )
        .unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "Payroll Report - November 2025");
        assert_eq!(lines[1], "\"\"");
        assert_eq!(lines[2], "Period,Amount");
        assert_eq!(lines[3], "November 2025,\"1,500.00\"");
    }
}
