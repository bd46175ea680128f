use crate::coercion::Coercion;
use crate::display_terms::DisplayDictionary;
use crate::frame_utils::{self, has_column, require};
use crate::subjects::{ADVERSE_EFFECTS, RECORD_ID};
use crate::unnest::Unnester;
use crate::Result;
use polars::prelude::*;

pub const MAIN_RECORD_ID: &str = "main_record_id";
pub const MCC: &str = "mcc";
pub const INSTANCE: &str = "instance";

pub struct AdverseEventsExtractor;

impl AdverseEventsExtractor {
    /// Unnest the `adverse_effects` cells of the raw subjects frame into one row per event
    /// instance, led by `record_id, main_record_id, mcc, instance`.
    pub fn extract_adverse_effects_data(subjects_raw: &DataFrame) -> Result<DataFrame> {
        let events = require(subjects_raw, ADVERSE_EFFECTS)?;

        // raw frames carry the record id as `index`
        let id_source = if has_column(subjects_raw, "index") { "index" } else { RECORD_ID };
        let height = subjects_raw.height();
        let parents = DataFrame::new(
            [(RECORD_ID, id_source), (MAIN_RECORD_ID, MAIN_RECORD_ID), (MCC, MCC)]
                .iter()
                .map(|(name, source)| match subjects_raw.column(source) {
                    Ok(column) => column.clone().with_name((*name).into()),
                    Err(_) => Column::full_null((*name).into(), height, &DataType::String),
                })
                .collect(),
        )?;

        let entries = Unnester::explode_long(events)?;
        let mut adverse_events =
            Unnester::widen(&entries, &parents, &[RECORD_ID, MAIN_RECORD_ID, MCC], INSTANCE)?;

        frame_utils::null_text_where(&mut adverse_events, |s| s.trim().is_empty())?;

        log::debug!(
            "Extracted {} adverse event instances from {} subjects",
            adverse_events.height(),
            height
        );
        Ok(adverse_events)
    }

    pub fn clean_adverse_events(mut adverse_events: DataFrame, multi: &DisplayDictionary) -> Result<DataFrame> {
        Coercion::best_effort_frame(&mut adverse_events)?;
        multi.apply(adverse_events)
    }

    /// Extract and clean; any failure is logged and yields `None`, which callers must treat as
    /// fatal for the run.
    pub fn extract_and_clean(subjects_raw: &DataFrame, multi: &DisplayDictionary) -> Option<DataFrame> {
        let result = Self::extract_adverse_effects_data(subjects_raw)
            .and_then(|events| Self::clean_adverse_events(events, multi));
        match result {
            Ok(df) => Some(df),
            Err(e) => {
                log::error!("Failed to extract adverse events: {:?}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_utils::{cell, column_names};
    use crate::models::DisplayTerm;
    use crate::subjects::SubjectsCleaner;
    use serde_json::{json, Value};

    fn raw() -> DataFrame {
        SubjectsCleaner::combine_mcc_json(&[(
            "1".to_string(),
            json!({
                "300": {
                    "main_record_id": "300",
                    "adverse_effects": {
                        "0": {"erep_ae_yn": "1", "erep_ae_severity": "2", "erep_ae_desc": "nausea"},
                        "1": {"erep_ae_yn": "1", "erep_ae_severity": " ", "erep_ae_desc": "rash"}
                    }
                },
                "301": {"main_record_id": "301", "adverse_effects": null}
            }),
        )])
        .unwrap()
    }

    #[test]
    fn test_two_instances_three_fields() {
        let events = AdverseEventsExtractor::extract_adverse_effects_data(&raw()).unwrap();

        assert_eq!(events.height(), 2);
        assert_eq!(events.width(), 7);
        assert_eq!(
            column_names(&events)[..4],
            [RECORD_ID, MAIN_RECORD_ID, MCC, INSTANCE]
        );
        assert_eq!(cell(&events, 1, "erep_ae_severity"), Value::Null);
        assert_eq!(cell(&events, 1, INSTANCE), json!("1"));
        assert_eq!(cell(&events, 0, MCC), json!("1"));
    }

    #[test]
    fn test_clean_adds_multi_display_terms() {
        let multi = DisplayDictionary::build(&[DisplayTerm {
            api_field: "erep_ae_severity".to_string(),
            api_value: "2".to_string(),
            display_text: "Moderate".to_string(),
            multi: true,
        }])
        .unwrap();

        let events = AdverseEventsExtractor::extract_and_clean(&raw(), &multi).unwrap();
        assert_eq!(cell(&events, 0, RECORD_ID), json!(300));
        assert_eq!(cell(&events, 0, "erep_ae_severity_display"), json!("Moderate"));
        assert_eq!(cell(&events, 1, "erep_ae_severity_display"), Value::Null);
    }

    #[test]
    fn test_malformed_events_yield_none() {
        let raw = SubjectsCleaner::combine_mcc_json(&[(
            "1".to_string(),
            json!({"300": {"adverse_effects": "not nested"}}),
        )])
        .unwrap();
        assert!(AdverseEventsExtractor::extract_and_clean(&raw, &DisplayDictionary::default()).is_none());
    }
}
