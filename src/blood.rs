use crate::coercion::Coercion;
use crate::frame_utils::{self, duration_components, durations, filled_text, frame_from_records, has_column, text_column};
use crate::screening_sites::SCREENING_SITE;
use crate::unnest::Unnester;
use crate::{errors::DatastoreError, Result};
use polars::prelude::*;
use serde_json::Value;

pub const VISITS: [&str; 3] = ["Baseline Visit", "6-Wks Post-Op", "3-Mo Post-Op"];
pub const VISIT: &str = "Visit";
pub const MCC: &str = "MCC";

const NUMERIC_COLUMNS: [&str; 3] = ["bscp_aliq_cnt", "bscp_protocol_dev", "bscp_protocol_dev_reason"];
const BLOOD_DRAW: &str = "bscp_time_blood_draw";
const FREEZER: &str = "bscp_aliquot_freezer_time";
const CENTRIFUGE: &str = "bscp_time_centrifuge";
const TIME_TO_FREEZER: &str = "time_to_freezer";
const TIME_TO_CENTRIFUGE: &str = "time_to_centrifuge";
const DEVIATION_CODE: &str = "bscp_protocol_dev_reason";
pub const DEVIATION_REASON: &str = "Deviation Reason";

const DEVIATION_REASONS: [(i64, &str); 3] = [
    (1, "Unable to obtain blood sample -technical reason"),
    (2, "Unable to obtain blood sample -patient related"),
    (3, "Sample handling/processing error"),
];

const RENAMES: [(&str, &str); 3] = [
    ("index", "ID"),
    (SCREENING_SITE, "Screening Site"),
    ("bscp_deg_of_hemolysis", "Hemolysis"),
];

/// Protocol window from blood draw to centrifuge, in minutes.
pub const CENTRIFUGE_WINDOW_MINUTES: i64 = 30;
/// Protocol window from blood draw to freezer, in minutes.
pub const FREEZER_WINDOW_MINUTES: i64 = 60;

pub struct BloodCleaner;

impl BloodCleaner {
    /// Unnest per-centre blood payloads into one row per (subject, centre, visit).
    ///
    /// Subjects without a screening site are dropped. Each visit dictionary becomes rows tagged
    /// with `Visit`, its nested fields flattened into dotted column names.
    pub fn bloodjson_to_df(payloads: &[(String, Value)]) -> Result<DataFrame> {
        let mut visits = Vec::new();

        for (mcc, payload) in payloads {
            let object = match payload {
                Value::Object(map) if !map.is_empty() => map,
                Value::Null | Value::Object(_) => {
                    log::warn!("No blood data for MCC {}", mcc);
                    continue;
                }
                _ => {
                    return Err(DatastoreError::ParseError(format!(
                        "Blood payload for MCC {} is not an object",
                        mcc
                    )))
                }
            };

            let subjects = Unnester::object_of_objects(object, "index")?;
            if !has_column(&subjects, SCREENING_SITE) {
                log::warn!("Blood data for MCC {} has no screening sites", mcc);
                continue;
            }
            let mut subjects = frame_utils::drop_null_rows(&subjects, SCREENING_SITE)?;
            let n = subjects.height();
            subjects.with_column(filled_text(MCC, mcc, n))?;

            for visit in VISITS.iter().filter(|v| has_column(&subjects, v)) {
                visits.push(Self::visit_rows(&subjects, visit)?);
            }
        }

        frame_utils::stack(visits)
    }

    fn visit_rows(subjects: &DataFrame, visit: &str) -> Result<DataFrame> {
        let selected = subjects.select(["index", MCC, SCREENING_SITE, visit])?;
        let mut rows = frame_utils::drop_null_rows(&selected, visit)?;
        let n = rows.height();
        rows.with_column(filled_text(VISIT, visit, n))?;

        let mut records = Vec::with_capacity(n);
        for text in rows.column(visit)?.str()?.iter().flatten() {
            let object = serde_json::from_str::<Value>(text)
                .ok()
                .and_then(|v| v.as_object().cloned())
                .ok_or_else(|| {
                    DatastoreError::ParseError(format!("Expected an object for visit {}", visit))
                })?;
            records.push(Unnester::flatten_object(&object));
        }

        let fields = frame_from_records(&records)?;
        for column in fields.get_columns() {
            if has_column(&rows, column.name()) {
                log::debug!("Visit field {} shadows an identifying column, skipped", column.name());
                continue;
            }
            rows.with_column(column.clone())?;
        }
        Ok(rows)
    }

    /// Drop the nested visit dictionaries and move `Visit` next to the identifying columns.
    pub fn simplify_blooddata(mut blood: DataFrame) -> Result<DataFrame> {
        frame_utils::drop_columns(&mut blood, &VISITS)?;
        if has_column(&blood, VISIT) {
            frame_utils::move_column(&mut blood, VISIT, 2)?;
        }
        Ok(blood)
    }

    /// Type the sample columns, derive processing-time QC fields, and relabel for display.
    pub fn clean_blooddata(mut blood: DataFrame) -> Result<DataFrame> {
        let n = blood.height();

        for name in NUMERIC_COLUMNS {
            let column = match blood.column(name) {
                Ok(column) => Coercion::force_numeric(column)?,
                Err(_) => Column::full_null(name.into(), n, &DataType::Float64),
            };
            blood.with_column(column)?;
        }

        for name in [BLOOD_DRAW, FREEZER, CENTRIFUGE] {
            let column = match blood.column(name) {
                Ok(column) => Coercion::force_timestamp(column)?,
                Err(_) => Column::full_null(name.into(), n, &DataType::Datetime(TimeUnit::Microseconds, None)),
            };
            blood.with_column(column)?;
        }

        let mut blood = blood
            .lazy()
            .with_columns([
                (col(FREEZER) - col(BLOOD_DRAW)).alias(TIME_TO_FREEZER),
                (col(CENTRIFUGE) - col(BLOOD_DRAW)).alias(TIME_TO_CENTRIFUGE),
            ])
            .collect()?;

        let freezer_minutes = Self::minutes(blood.column(TIME_TO_FREEZER)?)?;
        let centrifuge_minutes = Self::minutes(blood.column(TIME_TO_CENTRIFUGE)?)?;
        let checks: Vec<bool> = centrifuge_minutes
            .iter()
            .zip(&freezer_minutes)
            .map(|(c, f)| Self::time_values_check(*c, *f))
            .collect();

        blood.with_column(Series::new("time_to_freezer_minutes".into(), freezer_minutes))?;
        blood.with_column(Series::new("time_to_centrifuge_minutes".into(), centrifuge_minutes))?;
        blood.with_column(Series::new("time_values_check".into(), checks))?;
        blood.with_column(Self::site_labels(&blood)?)?;

        let mut blood = frame_utils::left_join(&blood, &Self::deviation_table()?, DEVIATION_CODE)?;
        for (from, to) in RENAMES {
            frame_utils::rename(&mut blood, from, to)?;
        }
        Ok(blood)
    }

    fn minutes(column: &Column) -> Result<Vec<Option<i64>>> {
        Ok(durations(column)?
            .iter()
            .map(|d| d.as_ref().map(Self::interval_minutes))
            .collect())
    }

    /// Hours and minutes of the day-normalised interval; whole days are discarded, so negative
    /// or multi-day intervals wrap rather than being rejected.
    pub fn interval_minutes(duration: &chrono::Duration) -> i64 {
        let components = duration_components(duration);
        components.hours * 60 + components.minutes
    }

    /// Centrifuged before freezing, and both within their protocol windows.
    pub fn time_values_check(centrifuge_minutes: Option<i64>, freezer_minutes: Option<i64>) -> bool {
        match (centrifuge_minutes, freezer_minutes) {
            (Some(c), Some(f)) => c < f && c <= CENTRIFUGE_WINDOW_MINUTES && f <= FREEZER_WINDOW_MINUTES,
            _ => false,
        }
    }

    /// `MCC<centre>: <screening site>`, null when either part is missing.
    fn site_labels(blood: &DataFrame) -> Result<Column> {
        let mcc = frame_utils::require(blood, MCC)?.cast(&DataType::String)?;
        let site = frame_utils::require(blood, SCREENING_SITE)?.cast(&DataType::String)?;
        let labels = mcc
            .str()?
            .iter()
            .zip(site.str()?.iter())
            .map(|pair| match pair {
                (Some(mcc), Some(site)) => Some(format!("MCC{}: {}", mcc, site)),
                _ => None,
            })
            .collect();
        Ok(text_column("Site", labels))
    }

    fn deviation_table() -> Result<DataFrame> {
        Ok(DataFrame::new(vec![
            Column::new(
                DEVIATION_CODE.into(),
                DEVIATION_REASONS.iter().map(|(code, _)| *code).collect::<Vec<i64>>(),
            ),
            Column::new(
                DEVIATION_REASON.into(),
                DEVIATION_REASONS.iter().map(|(_, text)| *text).collect::<Vec<&str>>(),
            ),
        ])?)
    }
}
