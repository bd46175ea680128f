use crate::coercion::Coercion;
use crate::frame_utils::text_column;
use crate::{errors::DatastoreError, Result};
use csv::ReaderBuilder;
use polars::prelude::*;
use serde_json::Value;

pub struct ReportParser;

impl ReportParser {
    pub fn parse_json(body: &[u8]) -> Result<Value> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Parse a CSV report. Empty cells and short rows are missing values, a row with more fields
    /// than the header is an error, and each column is typed best-effort.
    pub fn parse_csv(body: &[u8]) -> Result<DataFrame> {
        let text = std::str::from_utf8(body)
            .map_err(|e| DatastoreError::ParseError(format!("CSV report is not UTF-8: {}", e)))?;

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut values: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];

        for (line, result) in reader.records().enumerate() {
            let record = result?;
            if record.len() > headers.len() {
                return Err(DatastoreError::ParseError(format!(
                    "CSV row {} has {} fields, expected at most {}",
                    line + 1,
                    record.len(),
                    headers.len()
                )));
            }
            for (i, column) in values.iter_mut().enumerate() {
                let value = record.get(i).filter(|raw| !raw.is_empty()).map(str::to_string);
                column.push(value);
            }
        }

        let columns = headers
            .iter()
            .zip(values)
            .map(|(name, values)| text_column(name, values))
            .collect();
        let mut df = DataFrame::new(columns)?;
        Coercion::best_effort_frame(&mut df)?;
        Ok(df)
    }
}
