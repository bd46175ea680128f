use crate::frame_utils::{column_names, json_to_csv_field, to_records};
use crate::models::*;
use crate::Result;
use csv::Writer;
use polars::prelude::DataFrame;
use std::fs;
use std::path::{Path, PathBuf};

pub struct OutputManager;

impl OutputManager {
    /// Write `<name>.json` with the serialised outcome and, on success, one
    /// `<name>_<dataset>.csv` per dataset. Returns the files written.
    pub fn save_outcome<P: AsRef<Path>>(
        name: &str,
        outcome: &ApiOutcome,
        output_path: P,
    ) -> Result<Vec<PathBuf>> {
        let output_dir = output_path.as_ref();
        fs::create_dir_all(output_dir)?;

        let mut written = vec![Self::save_json(name, outcome, output_dir)?];

        if let Some(payload) = outcome.payload() {
            for dataset in &payload.data {
                let file_path = output_dir.join(format!("{}_{}.csv", name, dataset.name));
                Self::save_csv(&dataset.frame, &file_path)?;
                written.push(file_path);
            }
        }

        log::info!("Results for {} saved to: {}", name, output_dir.display());
        Ok(written)
    }

    fn save_json(name: &str, outcome: &ApiOutcome, output_dir: &Path) -> Result<PathBuf> {
        let file_path = output_dir.join(format!("{}.json", name));
        let json_string = serde_json::to_string_pretty(outcome)?;
        fs::write(&file_path, json_string)?;
        Ok(file_path)
    }

    pub fn save_csv(df: &DataFrame, file_path: &Path) -> Result<()> {
        let mut writer = Writer::from_path(file_path)?;
        writer.write_record(column_names(df))?;
        for record in to_records(df)? {
            writer.write_record(record.values().map(json_to_csv_field))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// One-line status per outcome, for the console summary.
    pub fn summarize(name: &str, outcome: &ApiOutcome) -> String {
        match outcome {
            ApiOutcome::Success(payload) => {
                let counts: Vec<String> = payload
                    .data
                    .iter()
                    .map(|d| format!("{}={}", d.name, d.frame.height()))
                    .collect();
                format!("{}: ok at {} ({})", name, payload.date.format("%Y-%m-%d %H:%M:%S"), counts.join(", "))
            }
            ApiOutcome::Unavailable { status, source } => {
                format!("{}: unavailable, status {} from {}", name, status, source)
            }
            ApiOutcome::Failed => format!("{}: failed (see log)", name),
        }
    }
}
