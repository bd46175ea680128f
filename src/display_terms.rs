use crate::coercion::Coercion;
use crate::frame_utils::{self, has_column, text_column};
use crate::{models::DisplayTerm, Result};
use csv::ReaderBuilder;
use itertools::Itertools;
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Lookup frame for one API field: columns `<field>` and `<field>_display`.
#[derive(Debug, Clone)]
pub struct DisplayLookup {
    pub field: String,
    pub frame: DataFrame,
}

/// Per-field lookup frames translating raw API values into display text.
#[derive(Debug, Clone, Default)]
pub struct DisplayDictionary {
    lookups: Vec<DisplayLookup>,
}

impl DisplayDictionary {
    /// Build one lookup frame per distinct field, in order of first appearance.
    pub fn build(terms: &[DisplayTerm]) -> Result<Self> {
        let fields: Vec<&str> = terms.iter().map(|t| t.api_field.as_str()).unique().collect();

        let mut lookups = Vec::with_capacity(fields.len());
        for field in fields {
            let mut seen = HashSet::new();
            let mut values = Vec::new();
            let mut display = Vec::new();

            for term in terms.iter().filter(|t| t.api_field == field) {
                if !seen.insert(term.api_value.as_str()) {
                    log::warn!(
                        "Duplicate display term for {}={}, keeping the first",
                        field,
                        term.api_value
                    );
                    continue;
                }
                values.push(Some(term.api_value.clone()));
                display.push(Some(term.display_text.clone()));
            }

            let mut frame = DataFrame::new(vec![
                text_column(field, values),
                text_column(&format!("{}_display", field), display),
            ])?;
            Coercion::best_effort_frame(&mut frame)?;

            lookups.push(DisplayLookup {
                field: field.to_string(),
                frame,
            });
        }

        Ok(Self { lookups })
    }

    pub fn get(&self, field: &str) -> Option<&DataFrame> {
        self.lookups.iter().find(|l| l.field == field).map(|l| &l.frame)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.lookups.iter().map(|l| l.field.as_str())
    }

    pub fn len(&self) -> usize {
        self.lookups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookups.is_empty()
    }

    /// Left-join every dictionary field present in `df`, adding `<field>_display` columns.
    ///
    /// Lookup keys take the type of the frame's column, so float codes with missing values
    /// still match and text never matches a number.
    pub fn apply(&self, mut df: DataFrame) -> Result<DataFrame> {
        for lookup in self.lookups.iter() {
            if has_column(&df, &lookup.field) {
                df = frame_utils::left_join(&df, &lookup.frame, &lookup.field)?;
            }
        }
        Ok(df)
    }
}

/// The raw terms plus the single-valued and multi-valued dictionaries built from them.
#[derive(Debug, Clone, Default)]
pub struct DisplayTerms {
    pub terms: Vec<DisplayTerm>,
    pub single: DisplayDictionary,
    pub multi: DisplayDictionary,
}

pub struct DisplayTermLoader;

impl DisplayTermLoader {
    pub fn load<P: AsRef<Path>>(assets_path: P, file_name: &str) -> Result<DisplayTerms> {
        let path = assets_path.as_ref().join(file_name);
        log::info!("Loading display terms from {}", path.display());
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<DisplayTerms> {
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(reader);
        let mut terms = Vec::new();
        for result in reader.deserialize() {
            let term: DisplayTerm = result?;
            terms.push(term);
        }
        Self::from_terms(terms)
    }

    pub fn from_terms(terms: Vec<DisplayTerm>) -> Result<DisplayTerms> {
        let (multi, single): (Vec<DisplayTerm>, Vec<DisplayTerm>) =
            terms.iter().cloned().partition(|t| t.multi);

        let single = DisplayDictionary::build(&single)?;
        let multi = DisplayDictionary::build(&multi)?;
        log::info!(
            "Built display dictionaries: {} single-valued fields, {} multi-valued fields",
            single.len(),
            multi.len()
        );

        Ok(DisplayTerms { terms, single, multi })
    }
}
