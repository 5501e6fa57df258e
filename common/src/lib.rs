use arrow::error::ArrowError;
use parquet::errors::ParquetError;
use datafusion::error::DataFusionError;
use thiserror::Error;
use url::ParseError;

pub mod config;
pub mod storage;
pub mod telemetry;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Network or HTTP failure after the retry budget is spent.
    #[error("Fetch error: {message} (last status: {status:?})")]
    Fetch { status: Option<u16>, message: String },

    /// Page and manifest bookkeeping disagree.
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// The raw source could not be read or the cleaned table could not be written.
    #[error("Transform error: {0}")]
    Transform(String),

    /// The cleaned table could not be read or an aggregate failed conservation.
    #[error("Aggregation error: {0}")]
    Aggregation(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("DataFusion error: {0}")]
    DataFusion(#[from] DataFusionError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn fetch(status: Option<u16>, message: impl Into<String>) -> Self {
        Error::Fetch {
            status,
            message: message.into(),
        }
    }

    /// Last HTTP status observed before a fetch gave up, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Fetch { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<object_store::Error> for Error {
    fn from(err: object_store::Error) -> Self {
        Error::Storage(format!("Object store error: {}", err))
    }
}

impl From<object_store::path::Error> for Error {
    fn from(err: object_store::path::Error) -> Self {
        Error::InvalidInput(format!("Invalid object path: {}", err))
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Error::InvalidInput(format!("URL parse error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_reports_last_status() {
        let err = Error::fetch(Some(503), "service unavailable");
        assert_eq!(err.status(), Some(503));
        assert!(err.to_string().contains("503"));

        let err = Error::fetch(None, "timed out");
        assert_eq!(err.status(), None);
        assert!(err.to_string().contains("None"));
    }
}
