use crate::adverse_events::AdverseEventsExtractor;
use crate::blood::BloodCleaner;
use crate::display_terms::{DisplayTermLoader, DisplayTerms};
use crate::fetch::{ReportsClient, BLOOD_DIR, IMAGING_DIR, SUBJECTS_DIR};
use crate::http::HttpGet;
use crate::models::*;
use crate::screening_sites::ScreeningSiteIndex;
use crate::subjects::{SubjectsCleaner, RECORD_ID};
use crate::{errors::DatastoreError, Result};
use chrono::{Local, NaiveDateTime};
use polars::prelude::DataFrame;

/// Reference tables loaded once per session and shared by every cleaning run.
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    pub display_terms: DisplayTerms,
    pub screening_sites: ScreeningSiteIndex,
}

impl ReferenceData {
    pub fn load(config: &DatastoreConfig) -> Result<Self> {
        let display_terms = DisplayTermLoader::load(&config.assets_path, &config.display_terms_file)?;
        let screening_sites =
            ScreeningSiteIndex::load(config.assets_path.join(&config.screening_sites_file))?;
        Ok(Self {
            display_terms,
            screening_sites,
        })
    }
}

/// Top-level fetch-and-clean operations. Failures come back as [`ApiOutcome`] values, never
/// as errors.
pub struct Datastore<'a> {
    config: &'a DatastoreConfig,
    http: &'a dyn HttpGet,
}

impl<'a> Datastore<'a> {
    pub fn new(config: &'a DatastoreConfig, http: &'a dyn HttpGet) -> Self {
        Self { config, http }
    }

    fn client(&self) -> ReportsClient<'_> {
        ReportsClient::new(self.http, &self.config.api_root)
    }

    /// Fetch and combine the per-centre subject reports.
    pub fn fetch_subjects_raw(&self) -> Result<DataFrame> {
        let payloads = self
            .client()
            .get_mcc_json(SUBJECTS_DIR, &self.config.resources.subjects)?;
        SubjectsCleaner::combine_mcc_json(&payloads)
    }

    /// Raw combined subject records.
    pub fn get_api_subjects(&self) -> ApiOutcome {
        let date = now();
        let result = self.fetch_subjects_raw().map(|raw| ApiPayload {
            date,
            data: vec![Dataset::new("subjects", raw)],
        });
        into_outcome("subjects", result)
    }

    /// Fetch subjects and produce the cleaned `subjects`, `consented` and `adverse_events`.
    pub fn refresh_subjects(&self, reference: &ReferenceData) -> ApiOutcome {
        let date = now();
        let result = self
            .fetch_subjects_raw()
            .and_then(|raw| Self::clean_subjects(&raw, reference))
            .map(|data| ApiPayload { date, data });
        into_outcome("subjects", result)
    }

    /// Clean an already-fetched raw subjects frame, stamped with `date`.
    pub fn create_clean_subjects(
        subjects_raw: &DataFrame,
        reference: &ReferenceData,
        date: NaiveDateTime,
    ) -> ApiOutcome {
        let result = Self::clean_subjects(subjects_raw, reference).map(|data| ApiPayload { date, data });
        into_outcome("subjects", result)
    }

    /// The subjects cleaning pipeline. Deterministic in its inputs.
    pub fn clean_subjects(subjects_raw: &DataFrame, reference: &ReferenceData) -> Result<Vec<Dataset>> {
        let subjects =
            SubjectsCleaner::clean_subjects_data(subjects_raw, &reference.display_terms.single)?;
        let subjects =
            SubjectsCleaner::add_screening_site(&reference.screening_sites, &subjects, RECORD_ID)?;
        let consented = SubjectsCleaner::get_consented_subjects(&subjects)?;

        let adverse_events =
            AdverseEventsExtractor::extract_and_clean(subjects_raw, &reference.display_terms.multi)
                .ok_or_else(|| {
                    DatastoreError::TransformError("adverse events could not be extracted".to_string())
                })?;

        log::info!(
            "Cleaned {} subjects ({} consented), {} adverse events",
            subjects.height(),
            consented.height(),
            adverse_events.height()
        );

        Ok(vec![
            Dataset::new("subjects", subjects),
            Dataset::new("consented", consented),
            Dataset::new("adverse_events", adverse_events),
        ])
    }

    /// Imaging log and QC log.
    pub fn get_api_imaging(&self) -> ApiOutcome {
        let date = now();
        let client = self.client();
        let reports = &self.config.resources.imaging;
        let result = client.get_csv(IMAGING_DIR, &reports.imaging).and_then(|imaging| {
            let qc = client.get_csv(IMAGING_DIR, &reports.qc)?;
            Ok(ApiPayload {
                date,
                data: vec![Dataset::new("imaging", imaging), Dataset::new("qc", qc)],
            })
        });
        into_outcome("imaging", result)
    }

    /// Per-centre blood reports, unnested by visit and cleaned.
    pub fn get_api_blood(&self) -> ApiOutcome {
        let date = now();
        let result = self
            .client()
            .get_mcc_json(BLOOD_DIR, &self.config.resources.blood)
            .and_then(|payloads| BloodCleaner::bloodjson_to_df(&payloads))
            .and_then(BloodCleaner::simplify_blooddata)
            .and_then(BloodCleaner::clean_blooddata)
            .map(|blood| ApiPayload {
                date,
                data: vec![Dataset::new("blood", blood)],
            });
        into_outcome("blood", result)
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn into_outcome(resource: &str, result: Result<ApiPayload>) -> ApiOutcome {
    match result {
        Ok(payload) => {
            log::info!(
                "{}: {}",
                resource,
                payload
                    .data
                    .iter()
                    .map(|d| format!("{} rows in {}", d.frame.height(), d.name))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            ApiOutcome::Success(payload)
        }
        Err(DatastoreError::Unavailable { source_file, status }) => {
            log::error!("{}: {} unavailable (HTTP {})", resource, source_file, status);
            ApiOutcome::unavailable(source_file)
        }
        Err(e) => {
            log::error!("{} failed: {:?}", resource, e);
            ApiOutcome::Failed
        }
    }
}
