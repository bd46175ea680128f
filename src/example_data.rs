use crate::fetch::{BLOOD_DIR, IMAGING_DIR, SUBJECTS_DIR};
use crate::models::*;
use crate::Result;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Map, Value};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// (mcc, access group, first record id, last record id of the screening range)
const SITES: [(&str, &str, u32, u32); 4] = [
    ("1", "rush", 10_000, 10_049),
    ("1", "uchicago", 10_050, 19_999),
    ("2", "umichigan", 20_000, 20_049),
    ("2", "wayne_state", 20_050, 29_999),
];

const SITE_NAMES: [(&str, &str); 4] = [
    ("rush", "Rush University Medical Center"),
    ("uchicago", "University of Chicago"),
    ("umichigan", "University of Michigan"),
    ("wayne_state", "Wayne State University"),
];

const AE_DESCRIPTIONS: [&str; 5] = ["nausea", "headache", "rash", "dizziness", "wound infection"];

pub struct ExampleDataGenerator;

impl ExampleDataGenerator {
    /// Write a synthetic report tree under `output_dir` (the same `<directory>/<file>` layout as
    /// the reporting API, plus an `assets/` folder) and return a configuration pointing at it.
    pub fn generate_reports<P: AsRef<Path>>(output_dir: P, n_subjects: usize) -> Result<DatastoreConfig> {
        let output_dir = output_dir.as_ref();
        let mut rng = StdRng::seed_from_u64(42); // Reproducible results
        let config = DatastoreConfig {
            assets_path: output_dir.join("assets"),
            ..Default::default()
        };

        for dir in [SUBJECTS_DIR, BLOOD_DIR, IMAGING_DIR] {
            fs::create_dir_all(output_dir.join(dir))?;
        }
        fs::create_dir_all(&config.assets_path)?;

        let subjects = Self::generate_subjects(&mut rng, n_subjects);

        for report in &config.resources.subjects {
            let payload = Self::subjects_payload(&mut rng, &subjects, &report.mcc);
            Self::write_json(&output_dir.join(SUBJECTS_DIR).join(&report.file), &payload)?;
        }
        for report in &config.resources.blood {
            let payload = Self::blood_payload(&mut rng, &subjects, &report.mcc);
            Self::write_json(&output_dir.join(BLOOD_DIR).join(&report.file), &payload)?;
        }

        Self::write_imaging_logs(&mut rng, &subjects, output_dir, &config.resources.imaging)?;
        Self::write_display_terms(&config.assets_path.join(&config.display_terms_file))?;
        Self::write_screening_sites(&config.assets_path.join(&config.screening_sites_file))?;

        log::info!("Generated example reports for {} subjects in {}", n_subjects, output_dir.display());
        Ok(config)
    }

    fn generate_subjects(rng: &mut StdRng, n_subjects: usize) -> Vec<ExampleSubject> {
        (0..n_subjects)
            .map(|k| {
                let (mcc, group, base, _) = SITES[k % SITES.len()];
                ExampleSubject {
                    record_id: base + (k / SITES.len()) as u32,
                    mcc,
                    group,
                    surgery_site: if rng.gen_bool(0.7) { Some(group) } else { None },
                }
            })
            .collect()
    }

    fn subjects_payload(rng: &mut StdRng, subjects: &[ExampleSubject], mcc: &str) -> Value {
        let mut payload = Map::new();
        for subject in subjects.iter().filter(|s| s.mcc == mcc) {
            let race = if rng.gen_bool(0.15) {
                "2|5".to_string()
            } else {
                rng.gen_range(1..=6).to_string()
            };
            let sex = if rng.gen_bool(0.5) { "1" } else { "2" };
            let ethnic = if rng.gen_bool(0.2) { "N/A".to_string() } else { rng.gen_range(1..=2).to_string() };
            let adverse_effects = Self::adverse_effects(rng);

            payload.insert(
                subject.record_id.to_string(),
                json!({
                    "main_record_id": subject.record_id.to_string(),
                    "redcap_data_access_group": subject.group,
                    "sp_data_site": subject.surgery_site.unwrap_or("N/A"),
                    "dem_race": race,
                    "sex": sex,
                    "ethnic": ethnic,
                    "age": rng.gen_range(18..80).to_string(),
                    "adverse_effects": adverse_effects,
                }),
            );
        }
        Value::Object(payload)
    }

    fn adverse_effects(rng: &mut StdRng) -> Value {
        let n_events = rng.gen_range(0..=2);
        if n_events == 0 {
            return Value::Null;
        }
        let mut events = Map::new();
        for instance in 0..n_events {
            let onset = NaiveDate::from_ymd_opt(2021, 1, 1)
                .map(|d| d + Duration::days(rng.gen_range(0..365)))
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default();
            // blank relations exercise whitespace normalisation
            let relation = if rng.gen_bool(0.8) {
                rng.gen_range(1..=5).to_string()
            } else {
                " ".to_string()
            };
            events.insert(
                instance.to_string(),
                json!({
                    "erep_ae_yn": "1",
                    "erep_ae_severity": rng.gen_range(1..=3).to_string(),
                    "erep_ae_relation": relation,
                    "erep_ae_desc": AE_DESCRIPTIONS[rng.gen_range(0..AE_DESCRIPTIONS.len())],
                    "erep_onset_date": onset,
                }),
            );
        }
        Value::Object(events)
    }

    fn blood_payload(rng: &mut StdRng, subjects: &[ExampleSubject], mcc: &str) -> Value {
        let mut payload = Map::new();
        for subject in subjects.iter().filter(|s| s.mcc == mcc) {
            let mut record = Map::new();
            let screening_site = if rng.gen_bool(0.9) {
                Value::String(Self::site_name(subject.group).to_string())
            } else {
                Value::Null
            };
            record.insert("screening_site".to_string(), screening_site);

            let start = NaiveDate::from_ymd_opt(2021, 3, 1)
                .and_then(|d| d.and_hms_opt(8, 0, 0))
                .map(|d| d + Duration::days(rng.gen_range(0..120)) + Duration::minutes(rng.gen_range(0..240)));
            let Some(start) = start else { continue };

            let visits = [("Baseline Visit", 0), ("6-Wks Post-Op", 42), ("3-Mo Post-Op", 90)];
            for (visit, offset_days) in visits {
                if offset_days > 0 && rng.gen_bool(0.3) {
                    continue;
                }
                let draw = start + Duration::days(offset_days);
                record.insert(visit.to_string(), Self::blood_sample(rng, draw));
            }
            payload.insert(subject.record_id.to_string(), Value::Object(record));
        }
        Value::Object(payload)
    }

    fn blood_sample(rng: &mut StdRng, draw: NaiveDateTime) -> Value {
        let centrifuge = draw + Duration::minutes(rng.gen_range(5..45));
        let freezer = centrifuge + Duration::minutes(rng.gen_range(5..40));
        let (deviation, reason) = if rng.gen_bool(0.1) {
            ("1", rng.gen_range(1..=3).to_string())
        } else {
            ("0", String::new())
        };
        let format = |t: NaiveDateTime| t.format("%Y-%m-%d %H:%M").to_string();

        json!({
            "bscp_time_blood_draw": format(draw),
            "bscp_time_centrifuge": format(centrifuge),
            "bscp_aliquot_freezer_time": format(freezer),
            "bscp_aliq_cnt": rng.gen_range(0..=8).to_string(),
            "bscp_deg_of_hemolysis": rng.gen_range(0..=4).to_string(),
            "bscp_protocol_dev": deviation,
            "bscp_protocol_dev_reason": reason,
        })
    }

    fn write_imaging_logs(
        rng: &mut StdRng,
        subjects: &[ExampleSubject],
        output_dir: &Path,
        reports: &ImagingReports,
    ) -> Result<()> {
        let mut imaging = File::create(output_dir.join(IMAGING_DIR).join(&reports.imaging))?;
        let mut qc = File::create(output_dir.join(IMAGING_DIR).join(&reports.qc))?;
        writeln!(imaging, "site,subject_id,visit,acquisition_week,T1 Indicated,T1 Received,DWI Indicated,DWI Received")?;
        writeln!(qc, "site,sub,ses,scan,rating")?;

        for subject in subjects {
            for visit in ["V1", "V3"] {
                if visit == "V3" && rng.gen_bool(0.4) {
                    continue;
                }
                let t1 = u8::from(rng.gen_bool(0.95));
                let dwi = u8::from(rng.gen_bool(0.9));
                writeln!(
                    imaging,
                    "{},{},{},{},1,{},1,{}",
                    subject.group,
                    subject.record_id,
                    visit,
                    rng.gen_range(1..=52),
                    t1,
                    dwi
                )?;
                for scan in ["T1w", "dwi"] {
                    let rating = ["green", "yellow", "red"][rng.gen_range(0..3)];
                    writeln!(qc, "{},{},{},{},{}", subject.group, subject.record_id, visit, scan, rating)?;
                }
            }
        }
        Ok(())
    }

    fn write_display_terms(path: &Path) -> Result<()> {
        let mut file = File::create(path)?;
        writeln!(file, "api_field,api_value,display_text,multi")?;
        for (group, name) in SITE_NAMES {
            writeln!(file, "redcap_data_access_group,{},{},0", group, name)?;
            writeln!(file, "sp_data_site,{},{},0", group, name)?;
        }
        for (value, text) in [("1", "Male"), ("2", "Female")] {
            writeln!(file, "sex,{},{},0", value, text)?;
        }
        for (value, text) in [("1", "Hispanic or Latino"), ("2", "Not Hispanic or Latino")] {
            writeln!(file, "ethnic,{},{},0", value, text)?;
        }
        let races = [
            "American Indian or Alaska Native",
            "Asian",
            "Black or African American",
            "Native Hawaiian or Other Pacific Islander",
            "White",
            "Unknown",
        ];
        for (i, race) in races.iter().enumerate() {
            writeln!(file, "dem_race,{},{},0", i + 1, race)?;
        }
        writeln!(file, "dem_race,8,Multiple Races,0")?;
        for (value, text) in [("1", "Mild"), ("2", "Moderate"), ("3", "Severe")] {
            writeln!(file, "erep_ae_severity,{},{},1", value, text)?;
        }
        for (value, text) in [
            ("1", "Not related"),
            ("2", "Unlikely related"),
            ("3", "Possibly related"),
            ("4", "Probably related"),
            ("5", "Definitely related"),
        ] {
            writeln!(file, "erep_ae_relation,{},{},1", value, text)?;
        }
        Ok(())
    }

    fn write_screening_sites(path: &Path) -> Result<()> {
        let mut file = File::create(path)?;
        writeln!(file, "record_id_start,record_id_end,screening_site")?;
        for (_, group, start, end) in SITES {
            writeln!(file, "{},{},{}", start, end, Self::site_name(group))?;
        }
        Ok(())
    }

    fn site_name(group: &str) -> &'static str {
        SITE_NAMES
            .iter()
            .find(|(g, _)| *g == group)
            .map_or("Unknown", |(_, name)| *name)
    }

    fn write_json(path: &Path, payload: &Value) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(payload)?)?;
        Ok(())
    }
}

struct ExampleSubject {
    record_id: u32,
    mcc: &'static str,
    group: &'static str,
    surgery_site: Option<&'static str>,
}
