use crate::http::HttpGet;
use crate::models::MccReport;
use crate::parser::ReportParser;
use crate::{errors::DatastoreError, Result};
use polars::prelude::DataFrame;
use serde_json::Value;

pub const SUBJECTS_DIR: &str = "subjects";
pub const IMAGING_DIR: &str = "imaging";
pub const BLOOD_DIR: &str = "blood";

/// Fetches report files from `<api_root>/<directory>/<file>`, one request at a time.
pub struct ReportsClient<'a> {
    http: &'a dyn HttpGet,
    api_root: &'a str,
}

impl<'a> ReportsClient<'a> {
    pub fn new(http: &'a dyn HttpGet, api_root: &'a str) -> Self {
        Self { http, api_root }
    }

    pub fn url(&self, directory: &str, file: &str) -> String {
        [self.api_root.trim_end_matches('/'), directory, file].join("/")
    }

    /// Body of a report, or `Unavailable` naming the file for any status other than 200.
    pub fn get_report(&self, directory: &str, file: &str) -> Result<Vec<u8>> {
        let url = self.url(directory, file);
        let response = self.http.get(&url)?;
        if !response.is_ok() {
            log::warn!("{} returned HTTP {}", url, response.status);
            return Err(DatastoreError::Unavailable {
                source_file: file.to_string(),
                status: response.status,
            });
        }
        log::debug!("Fetched {} ({} bytes)", url, response.body.len());
        Ok(response.body)
    }

    pub fn get_json(&self, directory: &str, file: &str) -> Result<Value> {
        let body = self.get_report(directory, file)?;
        ReportParser::parse_json(&body)
    }

    pub fn get_csv(&self, directory: &str, file: &str) -> Result<DataFrame> {
        let body = self.get_report(directory, file)?;
        ReportParser::parse_csv(&body)
    }

    /// Every centre's JSON payload, in order. Stops at the first unavailable report so that
    /// partial data is never returned.
    pub fn get_mcc_json(&self, directory: &str, reports: &[MccReport]) -> Result<Vec<(String, Value)>> {
        let mut payloads = Vec::with_capacity(reports.len());
        for report in reports {
            let payload = self.get_json(directory, &report.file)?;
            payloads.push((report.mcc.clone(), payload));
        }
        Ok(payloads)
    }
}
