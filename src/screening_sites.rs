use crate::frame_utils::{self, require, text_column};
use crate::{models::ScreeningSiteRange, Result};
use csv::ReaderBuilder;
use polars::prelude::*;
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub const SCREENING_SITE: &str = "screening_site";

/// Record-id ranges sorted by start, for resolving a subject's screening site.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScreeningSiteIndex {
    ranges: Vec<ScreeningSiteRange>,
    overlapping: bool,
}

impl ScreeningSiteIndex {
    pub fn new(mut ranges: Vec<ScreeningSiteRange>) -> Self {
        ranges.sort_by(|a, b| a.record_id_start.total_cmp(&b.record_id_start));

        let overlapping = ranges
            .windows(2)
            .any(|pair| pair[1].record_id_start <= pair[0].record_id_end);
        if overlapping {
            log::warn!("Screening site ranges overlap; subjects in shared ranges will be duplicated");
        }

        Self { ranges, overlapping }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        log::info!("Loading screening site ranges from {}", path.as_ref().display());
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(reader);
        let mut ranges = Vec::new();
        for result in reader.deserialize() {
            let range: ScreeningSiteRange = result?;
            ranges.push(range);
        }
        Ok(Self::new(ranges))
    }

    pub fn ranges(&self) -> &[ScreeningSiteRange] {
        &self.ranges
    }

    pub fn is_overlapping(&self) -> bool {
        self.overlapping
    }

    /// Every site whose closed range contains `id`.
    pub fn sites_for(&self, id: f64) -> Vec<&str> {
        // ranges starting after id can never contain it
        let candidates = self.ranges.partition_point(|r| r.record_id_start <= id);
        if candidates == 0 {
            return Vec::new();
        }

        if self.overlapping {
            self.ranges[..candidates]
                .iter()
                .filter(|r| id <= r.record_id_end)
                .map(|r| r.screening_site.as_str())
                .collect()
        } else {
            let range = &self.ranges[candidates - 1];
            if id <= range.record_id_end {
                vec![range.screening_site.as_str()]
            } else {
                Vec::new()
            }
        }
    }

    /// Attach `screening_site` to each row of `df` by range containment on `id_col`.
    ///
    /// Output columns are `id_col`, `screening_site`, then the remaining columns. Rows whose id
    /// lies in no range are dropped; rows in several ranges appear once per range.
    pub fn attach(&self, df: &DataFrame, id_col: &str) -> Result<DataFrame> {
        let ids = require(df, id_col)?.cast(&DataType::Float64)?;

        let mut rows = Vec::with_capacity(df.height());
        let mut sites = Vec::with_capacity(df.height());
        let mut unmatched = 0usize;
        let mut duplicated = 0usize;

        for (row, id) in ids.f64()?.iter().enumerate() {
            let matches = id.map(|id| self.sites_for(id)).unwrap_or_default();
            match matches.len() {
                0 => unmatched += 1,
                1 => {}
                _ => duplicated += 1,
            }
            for site in matches {
                rows.push(row);
                sites.push(Some(site.to_string()));
            }
        }

        if unmatched > 0 {
            log::warn!("{} rows matched no screening site range and were dropped", unmatched);
        }
        if duplicated > 0 {
            log::warn!("{} rows matched more than one screening site range", duplicated);
        }

        let mut joined = frame_utils::take_rows(df, &rows)?;
        frame_utils::move_column(&mut joined, id_col, 0)?;
        joined.insert_column(1, text_column(SCREENING_SITE, sites))?;
        Ok(joined)
    }
}
