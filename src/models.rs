use crate::frame_utils;
use chrono::NaiveDateTime;
use polars::prelude::DataFrame;
use serde::ser::{Error as _, SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_API_ROOT: &str =
    "https://api.a2cps.org/files/v2/download/public/system/a2cps.storage.community/reports";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayTerm {
    pub api_field: String,
    pub api_value: String,
    pub display_text: String,
    #[serde(deserialize_with = "deserialize_flag")]
    pub multi: bool,
}

fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_lowercase().as_str() {
        "1" | "1.0" | "true" | "yes" => Ok(true),
        "0" | "0.0" | "false" | "no" | "" => Ok(false),
        other => Err(serde::de::Error::custom(format!("invalid multi flag: {}", other))),
    }
}

/// Closed interval of subject record ids assigned to one screening site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningSiteRange {
    pub record_id_start: f64,
    pub record_id_end: f64,
    pub screening_site: String,
}

/// One per-centre report file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MccReport {
    pub mcc: String,
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagingReports {
    pub imaging: String,
    pub qc: String,
}

/// Relative locations of every report under the API root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResources {
    pub subjects: Vec<MccReport>,
    pub imaging: ImagingReports,
    pub blood: Vec<MccReport>,
}

impl Default for ApiResources {
    fn default() -> Self {
        Self {
            subjects: vec![
                MccReport { mcc: "1".to_string(), file: "subjects-1-latest.json".to_string() },
                MccReport { mcc: "2".to_string(), file: "subjects-2-latest.json".to_string() },
            ],
            imaging: ImagingReports {
                imaging: "imaging-log-latest.csv".to_string(),
                qc: "qc-log-latest.csv".to_string(),
            },
            blood: vec![
                MccReport { mcc: "1".to_string(), file: "blood-1-latest.json".to_string() },
                MccReport { mcc: "2".to_string(), file: "blood-2-latest.json".to_string() },
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatastoreConfig {
    pub api_root: String,
    pub assets_path: PathBuf,
    pub display_terms_file: String,
    pub screening_sites_file: String,
    pub timeout_secs: u64,
    pub resources: ApiResources,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            api_root: DEFAULT_API_ROOT.to_string(),
            assets_path: PathBuf::from("assets"),
            display_terms_file: "A2CPS_display_terms.csv".to_string(),
            screening_sites_file: "screening_sites.csv".to_string(),
            timeout_secs: 30,
            resources: ApiResources::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: String,
    pub frame: DataFrame,
}

impl Dataset {
    pub fn new(name: impl Into<String>, frame: DataFrame) -> Self {
        Self { name: name.into(), frame }
    }
}

impl PartialEq for Dataset {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.frame.equals_missing(&other.frame)
    }
}

/// Successful fetch: the fetch time and the named datasets, in output order.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiPayload {
    pub date: NaiveDateTime,
    pub data: Vec<Dataset>,
}

impl ApiPayload {
    pub fn dataset(&self, name: &str) -> Option<&DataFrame> {
        self.data.iter().find(|d| d.name == name).map(|d| &d.frame)
    }
}

struct DatasetRecords<'a>(&'a [Dataset]);

impl Serialize for DatasetRecords<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for dataset in self.0 {
            let records = frame_utils::to_records(&dataset.frame).map_err(S::Error::custom)?;
            map.serialize_entry(&dataset.name, &records)?;
        }
        map.end()
    }
}

impl Serialize for ApiPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("date", &self.date.format("%Y-%m-%dT%H:%M:%S%.6f").to_string())?;
        map.serialize_entry("data", &DatasetRecords(&self.data))?;
        map.end()
    }
}

/// Result of a top-level fetch-and-clean operation.
///
/// Serialises to `{date, data}`, `{status: "500", source}` or `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ApiOutcome {
    Success(ApiPayload),
    Unavailable { status: String, source: String },
    Failed,
}

impl ApiOutcome {
    pub fn unavailable(source: impl Into<String>) -> Self {
        ApiOutcome::Unavailable {
            status: "500".to_string(),
            source: source.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ApiOutcome::Success(_))
    }

    pub fn payload(&self) -> Option<&ApiPayload> {
        match self {
            ApiOutcome::Success(payload) => Some(payload),
            _ => None,
        }
    }
}
