//! Helpers over polars [`DataFrame`]s shared by the cleaners.
//!
//! Report payloads arrive as loosely typed JSON, so raw frames are built with every column as
//! text and typed later by [`crate::coercion`]. Column order is significant and preserved by
//! every helper here, because the cleaned datasets are handed to the dashboard as ordered
//! records.

use crate::{errors::DatastoreError, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use itertools::Itertools;
use polars::functions::concat_df_diagonal;
use polars::prelude::*;
use serde_json::{Map, Number, Value};

pub type Record = Map<String, Value>;

const ROW_INDEX: &str = "__row";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Day-normalised components of a duration: days are floored, so the remaining
/// hours/minutes/seconds are always non-negative (`-30min` is `-1 day + 23:30:00`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationComponents {
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

pub fn duration_components(duration: &Duration) -> DurationComponents {
    let total = duration.num_seconds();
    let days = total.div_euclid(86_400);
    let rem = total.rem_euclid(86_400);
    DurationComponents {
        days,
        hours: rem / 3_600,
        minutes: (rem % 3_600) / 60,
        seconds: rem % 60,
    }
}

pub fn format_duration(duration: &Duration) -> String {
    let c = duration_components(duration);
    let sign = if c.days < 0 { "+" } else { "" };
    format!(
        "{} days {}{:02}:{:02}:{:02}",
        c.days, sign, c.hours, c.minutes, c.seconds
    )
}

fn epoch() -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(1970, 1, 1)?.and_hms_opt(0, 0, 0)
}

/// Microseconds since the Unix epoch, the physical value of our datetime columns.
pub fn timestamp_micros(timestamp: &NaiveDateTime) -> Option<i64> {
    (*timestamp - epoch()?).num_microseconds()
}

fn to_micros(value: i64, unit: TimeUnit) -> i64 {
    match unit {
        TimeUnit::Nanoseconds => value / 1_000,
        TimeUnit::Microseconds => value,
        TimeUnit::Milliseconds => value.saturating_mul(1_000),
    }
}

/// Text column from raw cell values.
pub fn text_column(name: &str, values: Vec<Option<String>>) -> Column {
    Series::new(name.into(), values).into_column()
}

/// Text column repeating one value.
pub fn filled_text(name: &str, value: &str, height: usize) -> Column {
    Column::new(name.into(), vec![value; height])
}

/// Datetime column (microsecond precision) from optional timestamps.
pub fn datetime_column(name: &str, values: &[Option<NaiveDateTime>]) -> Result<Column> {
    let micros: Vec<Option<i64>> = values
        .iter()
        .map(|ts| ts.as_ref().and_then(timestamp_micros))
        .collect();
    Ok(Series::new(name.into(), micros)
        .into_column()
        .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?)
}

/// Durations of a duration column, in row order.
pub fn durations(column: &Column) -> Result<Vec<Option<Duration>>> {
    let unit = match column.dtype() {
        DataType::Duration(unit) => *unit,
        other => {
            return Err(DatastoreError::TransformError(format!(
                "Column {} is {}, not a duration",
                column.name(),
                other
            )))
        }
    };
    let physical = column.cast(&DataType::Int64)?;
    Ok(physical
        .i64()?
        .iter()
        .map(|v| v.map(|v| Duration::microseconds(to_micros(v, unit))))
        .collect())
}

/// JSON scalars as cell text. Objects and arrays keep their JSON text so they can be unnested
/// later.
pub fn json_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub fn any_to_json(value: AnyValue) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(b),
        AnyValue::String(s) => Value::String(s.to_string()),
        AnyValue::StringOwned(s) => Value::String(s.to_string()),
        AnyValue::Int32(i) => Value::from(i),
        AnyValue::Int64(i) => Value::from(i),
        AnyValue::UInt32(i) => Value::from(i),
        AnyValue::UInt64(i) => Value::from(i),
        AnyValue::Float32(f) => Number::from_f64(f64::from(f)).map_or(Value::Null, Value::Number),
        AnyValue::Float64(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        other => Value::String(other.to_string()),
    }
}

/// Cell text as written to CSV: missing is empty, floats keep a decimal point.
pub fn json_to_csv_field(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One text column per key, over the union of keys in first-seen order; absent keys are null.
pub fn frame_from_records(records: &[Record]) -> Result<DataFrame> {
    let names: Vec<&String> = records.iter().flat_map(|r| r.keys()).unique().collect();
    let columns = names
        .into_iter()
        .map(|name| {
            let values = records
                .iter()
                .map(|r| r.get(name).and_then(json_to_text))
                .collect();
            text_column(name, values)
        })
        .collect();
    Ok(DataFrame::new(columns)?)
}

fn column_values(column: &Column) -> Result<Vec<Value>> {
    match column.dtype() {
        DataType::Datetime(unit, _) => {
            let unit = *unit;
            let start = epoch();
            let physical = column.cast(&DataType::Int64)?;
            Ok(physical
                .i64()?
                .iter()
                .map(|v| {
                    v.zip(start)
                        .map(|(v, start)| start + Duration::microseconds(to_micros(v, unit)))
                        .map_or(Value::Null, |ts| Value::String(ts.format(TIMESTAMP_FORMAT).to_string()))
                })
                .collect())
        }
        DataType::Duration(_) => Ok(durations(column)?
            .iter()
            .map(|d| d.as_ref().map_or(Value::Null, |d| Value::String(format_duration(d))))
            .collect()),
        _ => Ok((0..column.len())
            .map(|row| any_to_json(column.get(row).unwrap_or(AnyValue::Null)))
            .collect()),
    }
}

/// Rows as ordered JSON records. Timestamps are ISO text and durations `D days HH:MM:SS`.
pub fn to_records(df: &DataFrame) -> Result<Vec<Record>> {
    let mut records = vec![Record::new(); df.height()];
    for column in df.get_columns() {
        let name = column.name().to_string();
        for (record, value) in records.iter_mut().zip(column_values(column)?) {
            record.insert(name.clone(), value);
        }
    }
    Ok(records)
}

/// One cell as JSON; null when the column or row is absent.
pub fn cell(df: &DataFrame, row: usize, name: &str) -> Value {
    match df.column(name) {
        Ok(column) => column_cell(column, row),
        Err(_) => Value::Null,
    }
}

fn column_cell(column: &Column, row: usize) -> Value {
    if row >= column.len() {
        return Value::Null;
    }
    match column.dtype() {
        DataType::Datetime(_, _) | DataType::Duration(_) => {
            let slice = column.slice(row as i64, 1);
            column_values(&slice)
                .ok()
                .and_then(|mut values| values.pop())
                .unwrap_or(Value::Null)
        }
        _ => any_to_json(column.get(row).unwrap_or(AnyValue::Null)),
    }
}

pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names_owned()
        .into_iter()
        .map(|name| name.to_string())
        .collect()
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.column(name).is_ok()
}

pub fn require<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column> {
    df.column(name)
        .map_err(|_| DatastoreError::MissingColumn(name.to_string()))
}

/// Stack frames over the union of their columns (first-seen order); missing cells are null.
pub fn stack(frames: Vec<DataFrame>) -> Result<DataFrame> {
    let frames: Vec<DataFrame> = frames.into_iter().filter(|f| f.width() > 0).collect();
    if frames.is_empty() {
        return Ok(DataFrame::empty());
    }
    Ok(concat_df_diagonal(&frames)?)
}

/// Left join on `on`, keeping the left row order. The right key is cast to the left key's type
/// first, so values that cannot be represented there never match.
pub fn left_join(left: &DataFrame, right: &DataFrame, on: &str) -> Result<DataFrame> {
    let key_dtype = require(left, on)?.dtype().clone();
    let mut right = right.clone();
    let right_key = require(&right, on)?;
    if right_key.dtype() != &key_dtype {
        let cast = right_key.cast(&key_dtype)?;
        right.with_column(cast)?;
    }

    let joined = left
        .with_row_index(ROW_INDEX.into(), None)?
        .left_join(&right, [on], [on])?
        .sort([ROW_INDEX], SortMultipleOptions::default().with_maintain_order(true))?
        .drop(ROW_INDEX)?;
    Ok(joined)
}

pub fn rename(df: &mut DataFrame, from: &str, to: &str) -> Result<()> {
    if has_column(df, from) {
        df.rename(from, to.into())?;
    }
    Ok(())
}

pub fn drop_columns(df: &mut DataFrame, names: &[&str]) -> Result<()> {
    for name in names {
        if has_column(df, name) {
            df.drop_in_place(name)?;
        }
    }
    Ok(())
}

pub fn move_column(df: &mut DataFrame, name: &str, position: usize) -> Result<()> {
    let column = df.drop_in_place(name)?;
    let position = position.min(df.width());
    df.insert_column(position, column)?;
    Ok(())
}

pub fn drop_null_rows(df: &DataFrame, name: &str) -> Result<DataFrame> {
    let mask = require(df, name)?.is_not_null();
    Ok(df.filter(&mask)?)
}

/// Rows by position, repeats allowed.
pub fn take_rows(df: &DataFrame, rows: &[usize]) -> Result<DataFrame> {
    let indices: Vec<IdxSize> = rows.iter().map(|&row| row as IdxSize).collect();
    let indices = IdxCa::from_vec("rows".into(), indices);
    Ok(df.take(&indices)?)
}

/// Set text cells matching `is_missing` to null in every text column.
pub fn null_text_where(df: &mut DataFrame, is_missing: impl Fn(&str) -> bool) -> Result<()> {
    let text_columns: Vec<String> = df
        .get_columns()
        .iter()
        .filter(|c| c.dtype() == &DataType::String)
        .map(|c| c.name().to_string())
        .collect();

    for name in text_columns {
        let values: Vec<Option<String>> = df
            .column(&name)?
            .str()?
            .iter()
            .map(|v| v.filter(|s| !is_missing(s)).map(str::to_string))
            .collect();
        df.with_column(text_column(&name, values))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(value: Value) -> Vec<Record> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect()
    }

    #[test]
    fn test_frame_from_records_unions_keys() {
        let df = frame_from_records(&records(json!([
            {"id": "1", "sex": "2"},
            {"id": 2, "age": null, "visits": {"a": 1}}
        ])))
        .unwrap();

        assert_eq!(column_names(&df), vec!["id", "sex", "age", "visits"]);
        assert_eq!(cell(&df, 1, "id"), json!("2"));
        assert_eq!(cell(&df, 1, "sex"), Value::Null);
        assert_eq!(cell(&df, 1, "visits"), json!("{\"a\":1}"));
    }

    #[test]
    fn test_stack_fills_missing_columns() {
        let first = frame_from_records(&records(json!([{"a": "1"}]))).unwrap();
        let second = frame_from_records(&records(json!([{"b": "x", "a": "2"}]))).unwrap();

        let stacked = stack(vec![first, DataFrame::empty(), second]).unwrap();
        assert_eq!(column_names(&stacked), vec!["a", "b"]);
        assert_eq!(stacked.height(), 2);
        assert_eq!(cell(&stacked, 0, "b"), Value::Null);
        assert_eq!(cell(&stacked, 1, "a"), json!("2"));
    }

    #[test]
    fn test_left_join_keeps_order_and_casts_key() {
        let left = DataFrame::new(vec![
            Column::new("code".into(), vec![Some(3.0), None, Some(1.0), Some(3.0)]),
            Column::new("id".into(), vec!["a", "b", "c", "d"]),
        ])
        .unwrap();
        let right = DataFrame::new(vec![
            Column::new("code".into(), vec![1i64, 3]),
            Column::new("label".into(), vec!["one", "three"]),
        ])
        .unwrap();

        let joined = left_join(&left, &right, "code").unwrap();
        assert_eq!(column_names(&joined), vec!["code", "id", "label"]);
        let labels: Vec<Value> = (0..4).map(|row| cell(&joined, row, "label")).collect();
        assert_eq!(labels, vec![json!("three"), Value::Null, json!("one"), json!("three")]);
        assert_eq!(cell(&joined, 3, "id"), json!("d"));
    }

    #[test]
    fn test_records_format_temporal_columns() {
        let start = NaiveDate::from_ymd_opt(2021, 3, 1).unwrap().and_hms_opt(10, 0, 0).unwrap();
        let mut df = DataFrame::new(vec![datetime_column("drawn", &[Some(start), None]).unwrap()]).unwrap();
        let minutes: Vec<Option<i64>> = vec![Some(-30 * 60 * 1_000_000), Some(45 * 60 * 1_000_000)];
        let elapsed = Series::new("elapsed".into(), minutes)
            .into_column()
            .cast(&DataType::Duration(TimeUnit::Microseconds))
            .unwrap();
        df.with_column(elapsed).unwrap();

        let out = to_records(&df).unwrap();
        assert_eq!(out[0]["drawn"], json!("2021-03-01T10:00:00"));
        assert_eq!(out[1]["drawn"], Value::Null);
        assert_eq!(out[0]["elapsed"], json!("-1 days +23:30:00"));
        assert_eq!(out[1]["elapsed"], json!("0 days 00:45:00"));
    }

    #[test]
    fn test_move_and_take() {
        let mut df = DataFrame::new(vec![
            Column::new("a".into(), vec!["x", "y"]),
            Column::new("b".into(), vec![1i64, 2]),
        ])
        .unwrap();
        move_column(&mut df, "b", 0).unwrap();
        assert_eq!(column_names(&df), vec!["b", "a"]);

        let repeated = take_rows(&df, &[1, 1, 0]).unwrap();
        assert_eq!(repeated.height(), 3);
        assert_eq!(cell(&repeated, 1, "b"), json!(2));
        assert_eq!(cell(&repeated, 2, "a"), json!("x"));
    }

    #[test]
    fn test_null_text_where() {
        let mut df = DataFrame::new(vec![
            Column::new("a".into(), vec!["N/A", "x"]),
            Column::new("b".into(), vec![1i64, 2]),
        ])
        .unwrap();
        null_text_where(&mut df, |s| s == "N/A").unwrap();
        assert_eq!(cell(&df, 0, "a"), Value::Null);
        assert_eq!(cell(&df, 1, "a"), json!("x"));
        assert_eq!(cell(&df, 0, "b"), json!(1));
    }
}
