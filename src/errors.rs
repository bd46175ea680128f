use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatastoreError {
    /// Non-200 response for one report file; carries the file name.
    #[error("Report unavailable: {source_file} (HTTP {status})")]
    Unavailable { source_file: String, status: u16 },

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Data parsing error: {0}")]
    ParseError(String),

    #[error("Transformation error: {0}")]
    TransformError(String),

    #[error("File I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Dataframe error: {0}")]
    FrameError(#[from] polars::prelude::PolarsError),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Missing column: {0}")]
    MissingColumn(String),
}
