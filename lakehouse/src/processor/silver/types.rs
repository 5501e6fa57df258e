use arrow::array::{ArrayRef, Float64Array, StringArray};
use arrow::record_batch::RecordBatch;
use common::config::SilverWriteMode;
use common::Result;
use etl::models::RunRef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::models::schema::{self, silver_schema, Brewery};
use crate::utils::arrow::{f64_column, opt_f64, opt_str, string_column};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub country: String,
    pub state_province: String,
}

impl PartitionKey {
    pub fn new(country: impl Into<String>, state_province: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            state_province: state_province.into(),
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.country, self.state_province)
    }
}

/// Deduplicated, validated records, held sorted by `id`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanedTable {
    records: Vec<Brewery>,
}

impl CleanedTable {
    /// Sorts by `id`. Callers are expected to pass unique ids.
    pub fn new(mut records: Vec<Brewery>) -> Self {
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Self { records }
    }

    pub fn records(&self) -> &[Brewery] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Brewery> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn partitions(&self) -> BTreeMap<PartitionKey, Vec<&Brewery>> {
        let mut partitions: BTreeMap<PartitionKey, Vec<&Brewery>> = BTreeMap::new();
        for record in &self.records {
            partitions
                .entry(PartitionKey::new(&record.country, &record.state_province))
                .or_default()
                .push(record);
        }
        partitions
    }

    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let refs: Vec<&Brewery> = self.records.iter().collect();
        records_to_batch(&refs)
    }

    /// Rebuilds a table from stored batches, merging and re-sorting by `id`.
    pub fn from_batches(batches: &[RecordBatch]) -> Result<Self> {
        let mut records = Vec::new();
        for batch in batches {
            records.extend(batch_to_records(batch)?);
        }
        Ok(Self::new(records))
    }

    pub fn unique_countries(&self) -> usize {
        self.records.iter().map(|r| &r.country).collect::<HashSet<_>>().len()
    }

    pub fn unique_regions(&self) -> usize {
        self.records
            .iter()
            .map(|r| (&r.country, &r.state_province))
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn unique_types(&self) -> usize {
        self.records
            .iter()
            .filter_map(|r| r.brewery_type.as_ref())
            .collect::<HashSet<_>>()
            .len()
    }
}

pub fn records_to_batch(records: &[&Brewery]) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = schema::SILVER_COLUMNS
        .iter()
        .map(|column| -> ArrayRef {
            match *column {
                schema::LATITUDE => Arc::new(Float64Array::from(
                    records.iter().map(|r| r.latitude).collect::<Vec<_>>(),
                )),
                schema::LONGITUDE => Arc::new(Float64Array::from(
                    records.iter().map(|r| r.longitude).collect::<Vec<_>>(),
                )),
                name => Arc::new(StringArray::from(
                    records.iter().map(|r| r.text(name)).collect::<Vec<_>>(),
                )),
            }
        })
        .collect();

    Ok(RecordBatch::try_new(silver_schema(), columns)?)
}

pub fn batch_to_records(batch: &RecordBatch) -> Result<Vec<Brewery>> {
    let text = |name: &str| string_column(batch, name);
    let ids = text(schema::ID)?;
    let names = text(schema::NAME)?;
    let types = text(schema::BREWERY_TYPE)?;
    let address_1 = text("address_1")?;
    let address_2 = text("address_2")?;
    let address_3 = text("address_3")?;
    let cities = text("city")?;
    let regions = text(schema::REGION)?;
    let postal_codes = text("postal_code")?;
    let countries = text(schema::COUNTRY)?;
    let longitudes = f64_column(batch, schema::LONGITUDE)?;
    let latitudes = f64_column(batch, schema::LATITUDE)?;
    let phones = text("phone")?;
    let websites = text("website_url")?;

    let mut records = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        // Stored rows were cleaned, so keys are present; guard anyway.
        let Some(id) = opt_str(&ids, row) else { continue };
        records.push(Brewery {
            id,
            name: opt_str(&names, row),
            brewery_type: opt_str(&types, row),
            address_1: opt_str(&address_1, row),
            address_2: opt_str(&address_2, row),
            address_3: opt_str(&address_3, row),
            city: opt_str(&cities, row),
            state_province: opt_str(&regions, row).unwrap_or_else(|| schema::UNKNOWN.to_string()),
            postal_code: opt_str(&postal_codes, row),
            country: opt_str(&countries, row).unwrap_or_else(|| schema::UNKNOWN.to_string()),
            longitude: opt_f64(&longitudes, row),
            latitude: opt_f64(&latitudes, row),
            phone: opt_str(&phones, row),
            website_url: opt_str(&websites, row),
        });
    }
    Ok(records)
}

/// Counts kept while cleaning one raw batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransformSummary {
    pub raw_record_count: usize,
    pub cleaned_record_count: usize,
    /// Raw minus cleaned.
    pub records_removed: usize,
    pub null_ids_dropped: usize,
    pub duplicates_removed: usize,
    /// Coordinate fields nulled for being out of range.
    pub coordinates_nulled: usize,
    pub unparsable_coordinates: usize,
    /// Country or region fields replaced with the sentinel.
    pub partition_keys_defaulted: usize,
    pub unrecognized_types: usize,
    pub unique_countries: usize,
    pub unique_regions: usize,
    pub unique_types: usize,
}

/// `_SUCCESS` contents of the cleaned table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SilverMarker {
    #[serde(default)]
    pub version: u64,
    pub run_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub record_count: usize,
    pub partitions: Vec<PartitionKey>,
    pub write_mode: SilverWriteMode,
}

/// One committed write of the cleaned table, kept in its `_log`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableCommit {
    pub version: u64,
    pub run_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub write_mode: SilverWriteMode,
    pub records_written: usize,
    pub partitions: Vec<PartitionKey>,
    pub added: Vec<String>,
    pub retired: Vec<String>,
    /// Every data file of the table as of this version.
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SilverWriteResult {
    pub version: u64,
    pub files: Vec<String>,
    pub partitions_written: usize,
    pub files_retired: usize,
    pub marker_key: String,
    pub commit_key: String,
}

/// What the transformation stage hands to the next stage.
#[derive(Debug, Clone, Serialize)]
pub struct SilverOutcome {
    pub run: RunRef,
    pub silver_prefix: String,
    pub summary: TransformSummary,
    pub write: SilverWriteResult,
}
