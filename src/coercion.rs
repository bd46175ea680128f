use crate::frame_utils::{column_names, datetime_column, text_column};
use crate::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use itertools::Itertools;
use polars::prelude::*;

/// Outcome of a best-effort numeric conversion of one column.
#[derive(Debug, Clone, PartialEq)]
pub struct CoercionReport {
    pub column: String,
    pub converted: bool,
    /// Values that blocked the conversion, in row order.
    pub failures: Vec<String>,
}

impl CoercionReport {
    fn unchanged(column: String, failures: Vec<String>) -> Self {
        Self {
            column,
            converted: false,
            failures,
        }
    }
}

pub struct Coercion;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M %p",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

const TIME_FORMATS: &[&str] = &["%H:%M:%S", "%H:%M", "%I:%M %p"];

impl Coercion {
    /// Values with surrounding whitespace trimmed and empty text as null. Whitespace-only
    /// values are kept as they are, so they never pass for a number.
    fn trimmed(column: &Column) -> Result<Column> {
        let values = column
            .str()?
            .iter()
            .map(|v| {
                v.filter(|s| !s.is_empty())
                    .map(|s| if s.trim().is_empty() { s } else { s.trim() })
                    .map(str::to_string)
            })
            .collect();
        Ok(text_column(column.name().as_str(), values))
    }

    /// Non-strict cast of a text column, with the values that were present but did not survive.
    fn try_cast(text: &Column, dtype: &DataType) -> Result<(Column, Vec<String>)> {
        let cast = text.cast(dtype)?;
        let lost = cast.is_null();
        let failures = text
            .str()?
            .iter()
            .zip(lost.iter())
            .filter_map(|(value, lost)| match (value, lost) {
                (Some(value), Some(true)) => Some(value.to_string()),
                _ => None,
            })
            .collect();
        Ok((cast, failures))
    }

    fn nan_to_null(column: &Column) -> Result<Column> {
        let values: Vec<Option<f64>> = column
            .f64()?
            .iter()
            .map(|v| v.filter(|f| !f.is_nan()))
            .collect();
        Ok(Series::new(column.name().clone(), values).into_column())
    }

    fn is_numeric(dtype: &DataType) -> bool {
        matches!(
            dtype,
            DataType::Int32 | DataType::Int64 | DataType::UInt32 | DataType::UInt64 | DataType::Float32 | DataType::Float64
        )
    }

    /// Convert a text column to integers, or failing that floats, only if every present value
    /// converts; otherwise leave it untouched and report the values that did not.
    pub fn best_effort_numeric(column: &mut Column) -> Result<CoercionReport> {
        let name = column.name().to_string();
        if column.dtype() != &DataType::String {
            return Ok(CoercionReport::unchanged(name, Vec::new()));
        }

        let trimmed = Self::trimmed(column)?;
        if trimmed.null_count() == trimmed.len() {
            return Ok(CoercionReport::unchanged(name, Vec::new()));
        }

        let (ints, int_failures) = Self::try_cast(&trimmed, &DataType::Int64)?;
        let converted = if int_failures.is_empty() {
            ints
        } else {
            let (floats, failures) = Self::try_cast(&trimmed, &DataType::Float64)?;
            if !failures.is_empty() {
                return Ok(CoercionReport::unchanged(name, failures));
            }
            Self::nan_to_null(&floats)?
        };

        *column = converted;
        Ok(CoercionReport {
            column: name,
            converted: true,
            failures: Vec::new(),
        })
    }

    pub fn best_effort_frame(df: &mut DataFrame) -> Result<Vec<CoercionReport>> {
        let mut reports = Vec::with_capacity(df.width());
        for name in column_names(df) {
            let mut column = df.column(&name)?.clone();
            let report = Self::best_effort_numeric(&mut column)?;
            if report.converted {
                df.with_column(column)?;
            }
            reports.push(report);
        }

        for report in reports.iter().filter(|r| !r.failures.is_empty()) {
            log::debug!(
                "Column {} left as-is ({} non-numeric values, e.g. {})",
                report.column,
                report.failures.len(),
                report.failures.iter().take(3).join(", ")
            );
        }
        Ok(reports)
    }

    /// Convert every value to a number; anything unparseable becomes missing.
    pub fn force_numeric(column: &Column) -> Result<Column> {
        match column.dtype() {
            dtype if Self::is_numeric(dtype) => Ok(column.clone()),
            DataType::String => {
                let trimmed = Self::trimmed(column)?;
                let (ints, failures) = Self::try_cast(&trimmed, &DataType::Int64)?;
                if failures.is_empty() {
                    Ok(ints)
                } else {
                    Self::nan_to_null(&trimmed.cast(&DataType::Float64)?)
                }
            }
            _ => Ok(Column::full_null(
                column.name().clone(),
                column.len(),
                &DataType::Float64,
            )),
        }
    }

    /// Convert every value to a timestamp; anything unparseable becomes missing.
    pub fn force_timestamp(column: &Column) -> Result<Column> {
        match column.dtype() {
            DataType::Datetime(_, _) => Ok(column.clone()),
            DataType::String => {
                let values: Vec<Option<NaiveDateTime>> = column
                    .str()?
                    .iter()
                    .map(|v| v.and_then(Self::parse_timestamp))
                    .collect();
                datetime_column(column.name().as_str(), &values)
            }
            _ => Ok(Column::full_null(
                column.name().clone(),
                column.len(),
                &DataType::Datetime(TimeUnit::Microseconds, None),
            )),
        }
    }

    /// Parse a date-time, a bare date (midnight), or a bare clock time. Clock times are placed on
    /// 1900-01-01 so that differences between them stay deterministic.
    pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
            return Some(dt.naive_local());
        }

        for format in DATETIME_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
                return Some(dt);
            }
        }

        for format in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
                return date.and_hms_opt(0, 0, 0);
            }
        }

        let reference = NaiveDate::from_ymd_opt(1900, 1, 1)?;
        TIME_FORMATS
            .iter()
            .find_map(|format| NaiveTime::parse_from_str(trimmed, format).ok())
            .map(|time| reference.and_time(time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(name: &str, values: &[Option<&str>]) -> Column {
        Column::new(name.into(), values.to_vec())
    }

    #[test]
    fn test_best_effort_converts_clean_column() {
        let mut column = text("age", &[Some("42"), Some(" 3.5 "), None, Some("")]);
        let report = Coercion::best_effort_numeric(&mut column).unwrap();

        assert!(report.converted);
        assert!(report.failures.is_empty());
        assert_eq!(column.dtype(), &DataType::Float64);
        let values: Vec<Option<f64>> = column.f64().unwrap().iter().collect();
        assert_eq!(values, vec![Some(42.0), Some(3.5), None, None]);
    }

    #[test]
    fn test_best_effort_prefers_integers() {
        let mut column = text("record_id", &[Some("5"), None, Some("15")]);
        assert!(Coercion::best_effort_numeric(&mut column).unwrap().converted);
        assert_eq!(column.dtype(), &DataType::Int64);
    }

    #[test]
    fn test_best_effort_keeps_whitespace_only_values() {
        let mut column = text("dicom", &[Some("1"), Some(" ")]);
        let report = Coercion::best_effort_numeric(&mut column).unwrap();

        assert!(!report.converted);
        assert_eq!(report.failures, vec![" ".to_string()]);
        assert_eq!(column.dtype(), &DataType::String);
    }

    #[test]
    fn test_best_effort_leaves_mixed_column_and_reports_failures() {
        let mut column = text("site", &[Some("1"), Some("Rush")]);
        let report = Coercion::best_effort_numeric(&mut column).unwrap();

        assert!(!report.converted);
        assert_eq!(report.failures, vec!["Rush".to_string()]);
        assert_eq!(column.dtype(), &DataType::String);
        let values: Vec<Option<&str>> = column.str().unwrap().iter().collect();
        assert_eq!(values, vec![Some("1"), Some("Rush")]);
    }

    #[test]
    fn test_best_effort_frame_types_each_column() {
        let mut df = DataFrame::new(vec![
            text("id", &[Some("1"), Some("2")]),
            text("site", &[Some("rush"), None]),
        ])
        .unwrap();
        let reports = Coercion::best_effort_frame(&mut df).unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(df.column("id").unwrap().dtype(), &DataType::Int64);
        assert_eq!(df.column("site").unwrap().dtype(), &DataType::String);
    }

    #[test]
    fn test_force_numeric_nulls_invalid_entries() {
        let column = text("bscp_aliq_cnt", &[Some("4"), Some("n/a")]);
        let forced = Coercion::force_numeric(&column).unwrap();
        let values: Vec<Option<f64>> = forced.f64().unwrap().iter().collect();
        assert_eq!(values, vec![Some(4.0), None]);
    }

    #[test]
    fn test_force_timestamp_nulls_invalid_entries() {
        let column = text("drawn", &[Some("2021-05-04 09:15"), Some("13:45"), Some("not recorded")]);
        let forced = Coercion::force_timestamp(&column).unwrap();

        assert_eq!(forced.dtype(), &DataType::Datetime(TimeUnit::Microseconds, None));
        assert_eq!(forced.null_count(), 1);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let full = Coercion::parse_timestamp("2021-05-04 09:15").unwrap();
        assert_eq!(full.format("%Y-%m-%d %H:%M").to_string(), "2021-05-04 09:15");

        let clock = Coercion::parse_timestamp("13:45").unwrap();
        assert_eq!(clock.format("%Y-%m-%d %H:%M").to_string(), "1900-01-01 13:45");

        assert!(Coercion::parse_timestamp("not a time").is_none());
        assert!(Coercion::parse_timestamp("").is_none());
    }
}
