use crate::coercion::Coercion;
use crate::display_terms::DisplayDictionary;
use crate::frame_utils::{self, filled_text, text_column};
use crate::screening_sites::ScreeningSiteIndex;
use crate::unnest::Unnester;
use crate::{errors::DatastoreError, Result};
use polars::prelude::*;
use serde_json::Value;

pub const RECORD_ID: &str = "record_id";
pub const ADVERSE_EFFECTS: &str = "adverse_effects";
pub const RACE: &str = "dem_race";
pub const RACE_ORIGINAL: &str = "dem_race_original";
/// Race code meaning "more than one race selected".
pub const MULTIPLE_RACES: &str = "8";
pub const TREATMENT_SITE: &str = "treatment_site";
const SURGERY_SITE_DISPLAY: &str = "sp_data_site_display";
const ACCESS_GROUP_DISPLAY: &str = "redcap_data_access_group_display";

pub struct SubjectsCleaner;

impl SubjectsCleaner {
    /// Combine per-centre subject payloads (`{record id: {field: value}}`) into one frame with
    /// an `index` column holding the record id and an `mcc` column holding the centre.
    pub fn combine_mcc_json(payloads: &[(String, Value)]) -> Result<DataFrame> {
        let mut frames = Vec::with_capacity(payloads.len());
        for (mcc, payload) in payloads {
            let object = payload.as_object().ok_or_else(|| {
                DatastoreError::ParseError(format!("Subjects payload for MCC {} is not an object", mcc))
            })?;
            let mut frame = Unnester::object_of_objects(object, "index")?;
            let n = frame.height();
            frame.with_column(filled_text("mcc", mcc, n))?;
            log::debug!("MCC {}: {} subject records", mcc, n);
            frames.push(frame);
        }
        frame_utils::stack(frames)
    }

    /// Rename, normalise and type the raw subjects frame, then add display columns.
    pub fn clean_subjects_data(raw: &DataFrame, display: &DisplayDictionary) -> Result<DataFrame> {
        let mut subjects = raw.clone();

        frame_utils::rename(&mut subjects, "index", RECORD_ID)?;
        frame_utils::drop_columns(&mut subjects, &[ADVERSE_EFFECTS])?;

        frame_utils::null_text_where(&mut subjects, |s| s == "N/A")?;

        Self::collapse_multiple_races(&mut subjects)?;

        Coercion::best_effort_frame(&mut subjects)?;

        display.apply(subjects)
    }

    /// Multi-select race answers (`"2|5"`) become the single "more than one" code; the raw answer
    /// is kept in `dem_race_original`. Purely numeric race columns are left alone.
    fn collapse_multiple_races(subjects: &mut DataFrame) -> Result<()> {
        let race = match subjects.column(RACE) {
            Ok(column) if column.dtype() == &DataType::String => column.clone(),
            _ => return Ok(()),
        };
        if Coercion::best_effort_numeric(&mut race.clone())?.converted {
            return Ok(());
        }

        let collapsed: Vec<Option<String>> = race
            .str()?
            .iter()
            .map(|value| {
                value.map(|s| {
                    if s.contains('|') {
                        MULTIPLE_RACES.to_string()
                    } else {
                        s.to_string()
                    }
                })
            })
            .collect();

        subjects.with_column(race.clone().with_name(RACE_ORIGINAL.into()))?;
        subjects.with_column(text_column(RACE, collapsed))?;
        Ok(())
    }

    pub fn add_screening_site(
        sites: &ScreeningSiteIndex,
        subjects: &DataFrame,
        id_col: &str,
    ) -> Result<DataFrame> {
        sites.attach(subjects, id_col)
    }

    /// Subjects with `treatment_site`: the surgery site if known, else the data access group.
    pub fn get_consented_subjects(subjects: &DataFrame) -> Result<DataFrame> {
        let height = subjects.height();
        let surgery = Self::display_text(subjects, SURGERY_SITE_DISPLAY)?;
        let access_group = Self::display_text(subjects, ACCESS_GROUP_DISPLAY)?;

        let treatment_site: Vec<Option<String>> = (0..height)
            .map(|row| {
                surgery
                    .get(row)
                    .cloned()
                    .flatten()
                    .or_else(|| access_group.get(row).cloned().flatten())
            })
            .collect();

        let mut consented = subjects.clone();
        consented.with_column(text_column(TREATMENT_SITE, treatment_site))?;
        Ok(consented)
    }

    /// A display column as text; all null when the column is absent.
    fn display_text(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
        let column = match df.column(name) {
            Ok(column) => column.cast(&DataType::String)?,
            Err(_) => return Ok(vec![None; df.height()]),
        };
        Ok(column
            .str()?
            .iter()
            .map(|v| v.map(str::to_string))
            .collect())
    }
}
