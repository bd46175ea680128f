use serde_json::{json, Value};
use std::collections::HashMap;
use tempfile::TempDir;
use trial_datastore::{
    display_terms::DisplayTermLoader,
    example_data::ExampleDataGenerator,
    fetch::{IMAGING_DIR, SUBJECTS_DIR},
    http::{DirectoryReports, HttpGet, HttpResponse},
    output::OutputManager,
    screening_sites::ScreeningSiteIndex,
    frame_utils::{cell, column_names, has_column},
    ApiOutcome, DatastoreConfig, Datastore, DisplayTerm, ReferenceData, ScreeningSiteRange,
};

/// In-memory API: known URLs answer with their body, everything else is a 404.
struct FakeApi {
    responses: HashMap<String, (u16, Vec<u8>)>,
}

impl FakeApi {
    fn new() -> Self {
        Self { responses: HashMap::new() }
    }

    fn with(mut self, config: &DatastoreConfig, dir: &str, file: &str, status: u16, body: &str) -> Self {
        let url = format!("{}/{}/{}", config.api_root, dir, file);
        self.responses.insert(url, (status, body.as_bytes().to_vec()));
        self
    }
}

impl HttpGet for FakeApi {
    fn get(&self, url: &str) -> trial_datastore::Result<HttpResponse> {
        let (status, body) = self
            .responses
            .get(url)
            .cloned()
            .unwrap_or((404, Vec::new()));
        Ok(HttpResponse { status, body })
    }
}

fn term(field: &str, value: &str, text: &str, multi: bool) -> DisplayTerm {
    DisplayTerm {
        api_field: field.to_string(),
        api_value: value.to_string(),
        display_text: text.to_string(),
        multi,
    }
}

fn reference() -> ReferenceData {
    let display_terms = DisplayTermLoader::from_terms(vec![
        term("sex", "1", "Male", false),
        term("sex", "2", "Female", false),
        term("redcap_data_access_group", "rush", "Rush", false),
        term("redcap_data_access_group", "umichigan", "Michigan", false),
        term("erep_ae_severity", "1", "Mild", true),
        term("erep_ae_severity", "2", "Moderate", true),
    ])
    .unwrap();
    let screening_sites = ScreeningSiteIndex::new(vec![
        ScreeningSiteRange {
            record_id_start: 1.0,
            record_id_end: 10.0,
            screening_site: "A".to_string(),
        },
        ScreeningSiteRange {
            record_id_start: 11.0,
            record_id_end: 20.0,
            screening_site: "B".to_string(),
        },
    ]);
    ReferenceData {
        display_terms,
        screening_sites,
    }
}

fn subjects_api(config: &DatastoreConfig) -> FakeApi {
    let mcc1 = json!({
        "5": {
            "sex": "1",
            "redcap_data_access_group": "rush",
            "sp_data_site": "N/A",
            "dem_race": "2|5",
            "adverse_effects": {
                "1": {"erep_ae_severity": "1", "erep_ae_desc": "nausea"},
                "2": {"erep_ae_severity": "2", "erep_ae_desc": " "}
            }
        },
        "25": {
            "sex": "2",
            "redcap_data_access_group": "rush",
            "sp_data_site": "N/A",
            "dem_race": "5",
            "adverse_effects": null
        }
    });
    let mcc2 = json!({
        "15": {
            "sex": "2",
            "redcap_data_access_group": "umichigan",
            "sp_data_site": "N/A",
            "dem_race": "3",
            "adverse_effects": null
        }
    });
    FakeApi::new()
        .with(config, SUBJECTS_DIR, "subjects-1-latest.json", 200, &mcc1.to_string())
        .with(config, SUBJECTS_DIR, "subjects-2-latest.json", 200, &mcc2.to_string())
}

#[test]
fn test_complete_offline_workflow() {
    let temp_dir = TempDir::new().unwrap();
    let reports_dir = temp_dir.path().join("reports");

    let config = ExampleDataGenerator::generate_reports(&reports_dir, 16).unwrap();
    let http = DirectoryReports::new(&config.api_root, &reports_dir);
    let reference = ReferenceData::load(&config).unwrap();
    let datastore = Datastore::new(&config, &http);

    let subjects = datastore.refresh_subjects(&reference);
    let payload = subjects.payload().expect("subjects should refresh");
    let names: Vec<&str> = payload.data.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["subjects", "consented", "adverse_events"]);

    let cleaned = payload.dataset("subjects").unwrap();
    assert_eq!(cleaned.height(), 16);
    assert_eq!(&column_names(cleaned)[..2], &["record_id", "screening_site"]);
    assert!(has_column(cleaned, "sex_display"));
    assert!(has_column(payload.dataset("consented").unwrap(), "treatment_site"));

    let imaging = datastore.get_api_imaging();
    assert!(imaging.is_success());
    let blood = datastore.get_api_blood();
    let blood_frame = blood.payload().and_then(|p| p.dataset("blood")).unwrap();
    assert!(has_column(blood_frame, "Site"));
    assert!(has_column(blood_frame, "time_values_check"));
    assert_eq!(column_names(blood_frame)[2], "Visit");

    // Save results
    let output_path = temp_dir.path().join("output");
    let written = OutputManager::save_outcome("subjects", &subjects, &output_path).unwrap();
    assert_eq!(written.len(), 4);
    assert!(output_path.join("subjects.json").exists());
    assert!(output_path.join("subjects_consented.csv").exists());

    let saved: Value =
        serde_json::from_str(&std::fs::read_to_string(output_path.join("subjects.json")).unwrap()).unwrap();
    assert!(saved["date"].is_string());
    assert_eq!(saved["data"]["subjects"].as_array().unwrap().len(), 16);
}

#[test]
fn test_clean_subjects_pipeline() {
    let config = DatastoreConfig::default();
    let api = subjects_api(&config);
    let reference = reference();
    let datastore = Datastore::new(&config, &api);

    let outcome = datastore.refresh_subjects(&reference);
    let payload = outcome.payload().unwrap();
    let subjects = payload.dataset("subjects").unwrap();

    // 25 lies in no screening range
    assert_eq!(subjects.height(), 2);
    assert_eq!(cell(subjects, 0, "record_id"), json!(5));
    assert_eq!(cell(subjects, 0, "screening_site"), json!("A"));
    assert_eq!(cell(subjects, 1, "record_id"), json!(15));
    assert_eq!(cell(subjects, 1, "screening_site"), json!("B"));

    assert_eq!(cell(subjects, 0, "sex_display"), json!("Male"));
    assert_eq!(cell(subjects, 0, "dem_race"), json!(8));
    assert_eq!(cell(subjects, 0, "dem_race_original"), json!("2|5"));
    assert!(!has_column(subjects, "adverse_effects"));
    assert!(has_column(subjects, "sp_data_site"));
    assert_eq!(cell(subjects, 0, "sp_data_site"), Value::Null);

    let consented = payload.dataset("consented").unwrap();
    assert_eq!(cell(consented, 0, "treatment_site"), json!("Rush"));
    assert_eq!(cell(consented, 1, "treatment_site"), json!("Michigan"));

    let adverse_events = payload.dataset("adverse_events").unwrap();
    assert_eq!(adverse_events.height(), 2);
    assert_eq!(
        &column_names(adverse_events)[..4],
        &["record_id", "main_record_id", "mcc", "instance"]
    );
    assert_eq!(cell(adverse_events, 0, "erep_ae_severity_display"), json!("Mild"));
    assert_eq!(cell(adverse_events, 1, "erep_ae_severity_display"), json!("Moderate"));
    assert_eq!(cell(adverse_events, 1, "erep_ae_desc"), Value::Null);
}

#[test]
fn test_clean_subjects_is_deterministic() {
    let config = DatastoreConfig::default();
    let api = subjects_api(&config);
    let reference = reference();
    let datastore = Datastore::new(&config, &api);

    let raw = datastore.fetch_subjects_raw().unwrap();
    let first = Datastore::clean_subjects(&raw, &reference).unwrap();
    let second = Datastore::clean_subjects(&raw, &reference).unwrap();
    assert_eq!(first, second);

    let date = chrono::NaiveDate::from_ymd_opt(2023, 5, 1)
        .and_then(|d| d.and_hms_opt(12, 0, 0))
        .unwrap();
    let outcome = Datastore::create_clean_subjects(&raw, &reference, date);
    assert_eq!(outcome.payload().unwrap().data, first);
}

#[test]
fn test_ragged_imaging_report_fails() {
    let config = DatastoreConfig::default();
    let api = FakeApi::new()
        .with(&config, IMAGING_DIR, "imaging-log-latest.csv", 200, "site,subject_id\nrush,10001\nrush,10002,EXTRA\n")
        .with(&config, IMAGING_DIR, "qc-log-latest.csv", 200, "sub,ses,rating\n10001,V1,green\n");
    let outcome = Datastore::new(&config, &api).get_api_imaging();
    assert_eq!(outcome, ApiOutcome::Failed);
}

#[test]
fn test_missing_report_is_unavailable() {
    let config = DatastoreConfig::default();
    let api = FakeApi::new()
        .with(&config, SUBJECTS_DIR, "subjects-1-latest.json", 200, "{}")
        .with(&config, SUBJECTS_DIR, "subjects-2-latest.json", 404, "");
    let datastore = Datastore::new(&config, &api);

    let outcome = datastore.refresh_subjects(&reference());
    assert_eq!(outcome, ApiOutcome::unavailable("subjects-2-latest.json"));

    let serialized = serde_json::to_value(&outcome).unwrap();
    assert_eq!(serialized, json!({"status": "500", "source": "subjects-2-latest.json"}));

    let raw = datastore.get_api_subjects();
    assert_eq!(raw, ApiOutcome::unavailable("subjects-2-latest.json"));
}

#[test]
fn test_malformed_report_fails() {
    let config = DatastoreConfig::default();
    let api = FakeApi::new()
        .with(&config, SUBJECTS_DIR, "subjects-1-latest.json", 200, "not json")
        .with(&config, SUBJECTS_DIR, "subjects-2-latest.json", 200, "{}");
    let datastore = Datastore::new(&config, &api);

    let outcome = datastore.refresh_subjects(&reference());
    assert_eq!(outcome, ApiOutcome::Failed);
    assert_eq!(serde_json::to_value(&outcome).unwrap(), Value::Null);
}

#[test]
fn test_imaging_reports() {
    let config = DatastoreConfig::default();
    let api = FakeApi::new()
        .with(&config, IMAGING_DIR, "imaging-log-latest.csv", 200, "site,subject_id,visit\nrush,10001,V1\nrush,10002,\n")
        .with(&config, IMAGING_DIR, "qc-log-latest.csv", 200, "sub,ses,rating\n10001,V1,green\n");
    let datastore = Datastore::new(&config, &api);

    let outcome = datastore.get_api_imaging();
    let payload = outcome.payload().unwrap();
    let imaging = payload.dataset("imaging").unwrap();
    assert_eq!(imaging.height(), 2);
    assert_eq!(cell(imaging, 0, "subject_id"), json!(10001));
    assert_eq!(cell(imaging, 1, "visit"), Value::Null);
    assert_eq!(payload.dataset("qc").unwrap().height(), 1);

    let missing_qc = FakeApi::new().with(
        &config,
        IMAGING_DIR,
        "imaging-log-latest.csv",
        200,
        "site\nrush\n",
    );
    let outcome = Datastore::new(&config, &missing_qc).get_api_imaging();
    assert_eq!(outcome, ApiOutcome::unavailable("qc-log-latest.csv"));
}
