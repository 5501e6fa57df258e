use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one ingestion run. Ordering is by date, then run id, which for
/// the `YYYYMMDD_HHMMSS` format is chronological.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunRef {
    pub ingestion_date: String,
    pub run_id: String,
}

impl RunRef {
    pub fn new(ingestion_date: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            ingestion_date: ingestion_date.into(),
            run_id: run_id.into(),
        }
    }

    pub fn from_timestamp(ts: DateTime<Utc>) -> Self {
        Self {
            ingestion_date: ts.format("%Y-%m-%d").to_string(),
            run_id: ts.format("%Y%m%d_%H%M%S").to_string(),
        }
    }
}

impl fmt::Display for RunRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ingestion_date, self.run_id)
    }
}
