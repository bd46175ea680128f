//! Clinical trial report datastore
//!
//! Fetches subject, adverse event, blood sample and imaging reports from the trial reporting
//! API and cleans them into flat, display-ready datasets for the dashboard.

pub mod frame_utils;
pub mod coercion;
pub mod models;
pub mod display_terms;
pub mod screening_sites;
pub mod unnest;
pub mod subjects;
pub mod adverse_events;
pub mod blood;
pub mod parser;
pub mod http;
pub mod fetch;
pub mod pipeline;
pub mod output;
pub mod example_data;
pub mod errors;

pub use models::*;
pub use pipeline::*;
pub use errors::*;

/// Re-export commonly used types
pub type Result<T> = std::result::Result<T, DatastoreError>;
