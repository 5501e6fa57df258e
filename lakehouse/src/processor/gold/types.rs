use chrono::{DateTime, Utc};
use common::config::GoldWriteMode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::schema::{BREWERY_TYPE, COUNTRY, REGION};
use crate::processor::table::COUNT_COLUMN;

/// The grouped views written to the aggregate layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateView {
    ByTypeAndLocation,
    ByType,
    ByCountry,
    ByRegion,
}

impl AggregateView {
    pub const ALL: [AggregateView; 4] = [
        AggregateView::ByTypeAndLocation,
        AggregateView::ByType,
        AggregateView::ByCountry,
        AggregateView::ByRegion,
    ];

    /// The full-grain view every other view must agree with.
    pub const MAIN: AggregateView = AggregateView::ByTypeAndLocation;

    pub fn table_name(&self) -> &'static str {
        match self {
            AggregateView::ByTypeAndLocation => "breweries_by_type_and_location",
            AggregateView::ByType => "breweries_by_type",
            AggregateView::ByCountry => "breweries_by_country",
            AggregateView::ByRegion => "breweries_by_region",
        }
    }

    pub fn keys(&self) -> &'static [&'static str] {
        match self {
            AggregateView::ByTypeAndLocation => &[COUNTRY, REGION, BREWERY_TYPE],
            AggregateView::ByType => &[BREWERY_TYPE],
            AggregateView::ByCountry => &[COUNTRY],
            AggregateView::ByRegion => &[COUNTRY, REGION],
        }
    }
}

/// One group and its size. `group` follows the order of the grouping keys;
/// a `None` entry is the null group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateRow {
    pub group: Vec<Option<String>>,
    pub count: u64,
}

impl AggregateRow {
    pub fn new(group: Vec<Option<String>>, count: u64) -> Self {
        Self { group, count }
    }

    pub fn key(&self, index: usize) -> Option<&str> {
        self.group.get(index).and_then(|v| v.as_deref())
    }

    pub fn to_json(&self, keys: &[&str]) -> Value {
        let mut row = Map::new();
        for (key, value) in keys.iter().zip(&self.group) {
            row.insert(key.to_string(), value.clone().map_or(Value::Null, Value::String));
        }
        row.insert(COUNT_COLUMN.to_string(), Value::from(self.count));
        Value::Object(row)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateTable {
    pub view: AggregateView,
    pub rows: Vec<AggregateRow>,
}

impl AggregateTable {
    pub fn total(&self) -> u64 {
        self.rows.iter().map(|r| r.count).sum()
    }

    pub fn to_json_rows(&self) -> Vec<Value> {
        self.rows.iter().map(|r| r.to_json(self.view.keys())).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCount {
    pub brewery_type: Option<String>,
    pub brewery_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryCount {
    pub country: String,
    pub brewery_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionCount {
    pub country: String,
    pub state_province: String,
    pub brewery_count: u64,
}

/// `_summary.json` of the aggregate layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldSummary {
    pub total_records: u64,
    pub total_countries: usize,
    pub total_regions: usize,
    pub total_types: usize,
    pub by_type: Vec<TypeCount>,
    pub by_country: Vec<CountryCount>,
    pub top_regions: Vec<RegionCount>,
    pub generated_at: DateTime<Utc>,
}

/// Shape of the full-grain view, reported with each aggregation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationStats {
    pub total_rows: usize,
    pub total_breweries: u64,
    pub unique_countries: usize,
    pub unique_regions: usize,
    pub unique_types: usize,
    pub avg_breweries_per_group: f64,
    pub max_breweries_in_group: u64,
    pub min_breweries_in_group: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewWrite {
    pub view: AggregateView,
    pub table_name: String,
    pub version: u64,
    pub key: String,
    pub rows: usize,
    pub total: u64,
}

/// One write of a view, kept in `_log/<view>/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewCommit {
    pub version: u64,
    pub view: AggregateView,
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub write_mode: GoldWriteMode,
    pub rows: usize,
    pub total: u64,
    pub files: Vec<String>,
}

/// What the aggregation stage hands to the validator.
#[derive(Debug, Clone, Serialize)]
pub struct GoldOutcome {
    pub run_id: String,
    pub gold_prefix: String,
    pub cleaned_record_count: usize,
    pub views: Vec<ViewWrite>,
    pub summary_key: String,
    pub summary: GoldSummary,
    pub stats: AggregationStats,
}
