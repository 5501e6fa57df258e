use chrono::{DateTime, Utc};
use common::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::page::{parse_count, Filters};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageEntry {
    pub page: u32,
    /// File name relative to the run directory.
    pub file: String,
    pub record_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// What one ingestion run wrote. Serialized as `_manifest.json` next to the
/// pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub ingestion_date: String,
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub pages: Vec<PageEntry>,
    pub total_pages: usize,
    pub total_records: u64,
    #[serde(default, with = "expected_total")]
    pub expected_total: Option<u64>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub filters: Filters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u32>,
}

/// Caller-supplied manifest fields the writer cannot know on its own.
#[derive(Debug, Clone, Default)]
pub struct ManifestExtra {
    pub expected_total: Option<u64>,
    pub source: Option<String>,
    pub filters: Filters,
    pub per_page: Option<u32>,
}

impl Manifest {
    /// Checks the bookkeeping invariants a reader relies on.
    pub fn verify(&self) -> Result<()> {
        let summed: u64 = self.pages.iter().map(|p| p.record_count).sum();
        if summed != self.total_records {
            return Err(Error::Manifest(format!(
                "run {}: total_records is {} but pages sum to {}",
                self.run_id, self.total_records, summed
            )));
        }
        if self.pages.len() != self.total_pages {
            return Err(Error::Manifest(format!(
                "run {}: total_pages is {} but {} pages are listed",
                self.run_id,
                self.total_pages,
                self.pages.len()
            )));
        }
        if self.pages.windows(2).any(|w| w[0].page >= w[1].page) {
            return Err(Error::Manifest(format!(
                "run {}: pages are not in ascending page order",
                self.run_id
            )));
        }
        Ok(())
    }

    /// Whether the run wrote what the API announced. Unknown totals count as a
    /// match.
    pub fn matches_expected(&self) -> bool {
        self.expected_total
            .map_or(true, |expected| expected == self.total_records)
    }

    pub fn is_complete(&self) -> bool {
        self.end_time.is_some()
    }
}

/// `None` is written as the string `"unknown"`; reading accepts that, `null`,
/// a number, or a numeric string.
mod expected_total {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<u64>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match value {
            Some(total) => serializer.serialize_u64(*total),
            None => serializer.serialize_str("unknown"),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<u64>, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(parse_count(&value))
    }
}
