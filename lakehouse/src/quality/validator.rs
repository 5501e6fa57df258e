use arrow::record_batch::RecordBatch;
use common::config::{Settings, StorageConfig, ValidationConfig};
use common::storage::ObjectStorage;
use common::{Error, Result};
use datafusion::functions_aggregate::expr_fn::count;
use datafusion::prelude::{col, lit, SessionContext};
use etl::raw::RawReader;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::checks::{count_check, retention_check, sum_check, zero_check};
use super::{CheckResult, Layer, PipelineValidation, ValidationReport};
use crate::models::schema::{ID, LATITUDE, LATITUDE_RANGE, LONGITUDE, LONGITUDE_RANGE, REQUIRED_COLUMNS};
use crate::processor::gold::storage::GoldStorage;
use crate::processor::gold::types::AggregateView;
use crate::processor::silver::storage::StorageManager;
use crate::utils::arrow::decode_parquet;

/// Counts over the stored cleaned table, computed without the typed reader so
/// that rows the reader would skip are still seen.
#[derive(Debug, Default)]
struct CleanedStats {
    rows: u64,
    null_ids: u64,
    duplicate_ids: u64,
    invalid_coordinates: u64,
    missing_columns: Vec<String>,
}

/// Read-only checks over each layer and between neighbouring layers.
pub struct DataQualityValidator {
    storage: Arc<dyn ObjectStorage>,
    raw_prefix: String,
    silver_prefix: String,
    gold_prefix: String,
    min_retention: f64,
    sum_tolerance: u64,
    ctx: SessionContext,
}

impl DataQualityValidator {
    pub fn new(storage: Arc<dyn ObjectStorage>, paths: &StorageConfig, thresholds: &ValidationConfig) -> Self {
        Self {
            storage,
            raw_prefix: paths.raw_prefix.clone(),
            silver_prefix: paths.silver_prefix.clone(),
            gold_prefix: paths.gold_prefix.clone(),
            min_retention: thresholds.min_retention,
            sum_tolerance: thresholds.sum_tolerance,
            ctx: SessionContext::new(),
        }
    }

    pub fn from_settings(settings: &Settings, storage: Arc<dyn ObjectStorage>) -> Self {
        Self::new(storage, &settings.storage, &settings.validation)
    }

    /// Checks the layer stored under `prefix`. `reference` is the record count
    /// of the layer upstream of it; when absent it is read from storage. The
    /// raw layer has no upstream and ignores it.
    pub async fn validate_layer(&self, layer: Layer, prefix: &str, reference: Option<u64>) -> Result<ValidationReport> {
        let report = match layer {
            Layer::Raw => self.check_raw(prefix).await?,
            Layer::Cleaned => self.check_cleaned(prefix, reference).await?,
            Layer::Aggregated => self.check_aggregated(prefix, reference).await?,
        };

        if report.passed {
            info!(layer = %layer, records = report.record_count, "Validation passed");
        } else {
            warn!(
                layer = %layer,
                records = report.record_count,
                failed = ?report.failed_checks,
                "Validation failed"
            );
        }
        Ok(report)
    }

    pub async fn validate_raw(&self) -> Result<ValidationReport> {
        self.validate_layer(Layer::Raw, &self.raw_prefix, None).await
    }

    pub async fn validate_cleaned(&self, raw_count: Option<u64>) -> Result<ValidationReport> {
        self.validate_layer(Layer::Cleaned, &self.silver_prefix, raw_count).await
    }

    pub async fn validate_aggregated(&self, cleaned_count: Option<u64>) -> Result<ValidationReport> {
        self.validate_layer(Layer::Aggregated, &self.gold_prefix, cleaned_count).await
    }

    /// Each layer's count feeds the next layer's cross-check.
    pub async fn validate_all(&self) -> Result<PipelineValidation> {
        let raw = self.validate_raw().await?;
        let cleaned = self.validate_cleaned(Some(raw.record_count)).await?;
        let aggregated = self.validate_aggregated(Some(cleaned.record_count)).await?;
        Ok(PipelineValidation {
            passed: raw.passed && cleaned.passed && aggregated.passed,
            raw,
            cleaned,
            aggregated,
        })
    }

    async fn directory_check(&self, prefix: &str) -> Result<CheckResult> {
        let exists = self.storage.prefix_exists(prefix).await?;
        Ok(CheckResult::new(
            "directory_exists",
            exists,
            if exists {
                format!("{} exists", prefix)
            } else {
                format!("nothing stored under {}", prefix)
            },
        ))
    }

    async fn check_raw(&self, prefix: &str) -> Result<ValidationReport> {
        let mut report = ValidationReport::new(Layer::Raw);
        if !report.push(self.directory_check(prefix).await?) {
            return Ok(report);
        }

        let reader = RawReader::new(self.storage.clone(), prefix);
        let Some(run) = reader.latest_run().await? else {
            report.push(CheckResult::new("has_runs", false, "no ingestion runs found"));
            return Ok(report);
        };
        report.push(CheckResult::new("has_runs", true, format!("latest run {}", run)));

        let manifest_exists = reader.manifest_exists(&run).await?;
        if !report.push(CheckResult::new(
            "manifest_exists",
            manifest_exists,
            if manifest_exists {
                reader.paths(&run).manifest_key()
            } else {
                format!("run {} has no manifest", run)
            },
        )) {
            return Ok(report);
        }

        let manifest = match reader.read_manifest(&run).await {
            Ok(manifest) => manifest,
            Err(Error::Manifest(message)) => {
                report.push(CheckResult::new("manifest_consistent", false, message));
                return Ok(report);
            }
            Err(e) => return Err(e),
        };
        report.record_count = manifest.total_records;

        let mut missing_pages = Vec::new();
        let paths = reader.paths(&run);
        for entry in &manifest.pages {
            if !self.storage.check_file_exists(&paths.file_key(&entry.file)).await? {
                missing_pages.push(entry.page);
            }
        }
        let consistency = match manifest.verify() {
            Err(e) => CheckResult::new("manifest_consistent", false, e.to_string()),
            Ok(()) if !missing_pages.is_empty() => CheckResult::new(
                "manifest_consistent",
                false,
                format!("pages {:?} are listed but missing", missing_pages),
            ),
            Ok(()) => CheckResult::new(
                "manifest_consistent",
                true,
                format!("{} pages, {} records", manifest.total_pages, manifest.total_records),
            ),
        };
        report.push(consistency);

        let has_records = report.push(count_check("has_records", manifest.total_records, "records ingested"));

        let matches = manifest.matches_expected();
        report.push(CheckResult::new(
            "matches_expected_total",
            matches,
            match manifest.expected_total {
                Some(expected) => format!("expected {}, ingested {}", expected, manifest.total_records),
                None => "expected total unknown".to_string(),
            },
        ));

        let complete = manifest.is_complete();
        report.push(CheckResult::new(
            "ingestion_completed",
            has_records && matches && complete,
            if complete {
                "manifest records an end time".to_string()
            } else {
                "manifest has no end time".to_string()
            },
        ));
        Ok(report)
    }

    async fn check_cleaned(&self, prefix: &str, reference: Option<u64>) -> Result<ValidationReport> {
        let mut report = ValidationReport::new(Layer::Cleaned);
        if !report.push(self.directory_check(prefix).await?) {
            return Ok(report);
        }

        let manager = StorageManager::new(self.storage.clone(), prefix);
        let table_check = match manager.read_marker().await {
            Ok(Some(marker)) => CheckResult::new(
                "table_exists",
                true,
                format!("written by run {} with {} partitions", marker.run_id, marker.partitions.len()),
            ),
            Ok(None) => CheckResult::new("table_exists", false, format!("{} is missing", manager.marker_key())),
            Err(e) => CheckResult::new("table_exists", false, format!("unreadable marker: {}", e)),
        };
        if !report.push(table_check) {
            return Ok(report);
        }

        let mut batches = Vec::new();
        for key in manager.data_files().await? {
            batches.extend(decode_parquet(self.storage.get_object(&key).await?)?);
        }
        let stats = self.cleaned_stats(batches).await?;
        report.record_count = stats.rows;

        report.push(count_check("has_records", stats.rows, "cleaned records"));

        let raw_count = match reference {
            Some(count) => Some(count),
            None => self.latest_raw_count().await?,
        };
        report.push(match raw_count {
            Some(raw) => retention_check(raw, stats.rows, self.min_retention),
            None => CheckResult::new("no_major_data_loss", false, "no raw manifest to compare against"),
        });

        report.push(CheckResult::new(
            "required_columns",
            stats.missing_columns.is_empty(),
            if stats.missing_columns.is_empty() {
                "all required columns present".to_string()
            } else {
                format!("missing {:?}", stats.missing_columns)
            },
        ));
        report.push(zero_check("no_null_ids", stats.null_ids, "null ids"));
        report.push(zero_check("no_duplicate_ids", stats.duplicate_ids, "duplicated ids"));
        report.push(zero_check(
            "valid_coordinates",
            stats.invalid_coordinates,
            "records with out-of-range coordinates",
        ));
        Ok(report)
    }

    async fn cleaned_stats(&self, batches: Vec<RecordBatch>) -> Result<CleanedStats> {
        let Some(first) = batches.first() else {
            return Ok(CleanedStats {
                missing_columns: REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect(),
                ..CleanedStats::default()
            });
        };
        let schema = first.schema();
        let missing_columns: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|c| schema.field_with_name(c).is_err())
            .map(|c| c.to_string())
            .collect();

        let df = self.ctx.read_batches(batches)?;
        let rows = df.clone().count().await? as u64;
        if schema.field_with_name(ID).is_err() {
            return Ok(CleanedStats {
                rows,
                missing_columns,
                ..CleanedStats::default()
            });
        }

        let null_ids = df.clone().filter(col(ID).is_null())?.count().await? as u64;
        let duplicate_ids = df
            .clone()
            .filter(col(ID).is_not_null())?
            .aggregate(vec![col(ID)], vec![count(lit(1)).alias("occurrences")])?
            .filter(col("occurrences").gt(lit(1_i64)))?
            .count()
            .await? as u64;

        let mut out_of_range = Vec::new();
        for (column, (low, high)) in [(LATITUDE, LATITUDE_RANGE), (LONGITUDE, LONGITUDE_RANGE)] {
            if schema.field_with_name(column).is_ok() {
                out_of_range.push(col(column).lt(lit(low)).or(col(column).gt(lit(high))));
            }
        }
        let invalid_coordinates = match out_of_range.into_iter().reduce(|a, b| a.or(b)) {
            Some(predicate) => df.filter(predicate)?.count().await? as u64,
            None => 0,
        };

        debug!(rows, null_ids, duplicate_ids, invalid_coordinates, "Cleaned table statistics");
        Ok(CleanedStats {
            rows,
            null_ids,
            duplicate_ids,
            invalid_coordinates,
            missing_columns,
        })
    }

    async fn latest_raw_count(&self) -> Result<Option<u64>> {
        let reader = RawReader::new(self.storage.clone(), &self.raw_prefix);
        let Some(run) = reader.latest_run().await? else {
            return Ok(None);
        };
        match reader.read_manifest(&run).await {
            Ok(manifest) => Ok(Some(manifest.total_records)),
            Err(Error::Manifest(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Rows the cleaned table holds now, partitions left by earlier runs
    /// included. `None` when no table has been committed.
    async fn stored_cleaned_count(&self) -> Result<Option<u64>> {
        let manager = StorageManager::new(self.storage.clone(), &self.silver_prefix);
        if !manager.is_ready().await? {
            return Ok(None);
        }
        let mut rows = 0u64;
        for key in manager.data_files().await? {
            rows += decode_parquet(self.storage.get_object(&key).await?)?
                .iter()
                .map(|batch| batch.num_rows() as u64)
                .sum::<u64>();
        }
        Ok(Some(rows))
    }

    async fn check_aggregated(&self, prefix: &str, reference: Option<u64>) -> Result<ValidationReport> {
        let mut report = ValidationReport::new(Layer::Aggregated);
        if !report.push(self.directory_check(prefix).await?) {
            return Ok(report);
        }

        let gold = GoldStorage::new(self.storage.clone(), prefix);
        let main_exists = gold.view_exists(AggregateView::MAIN).await?;
        if !report.push(CheckResult::new(
            "main_table_exists",
            main_exists,
            if main_exists {
                gold.view_dir(AggregateView::MAIN)
            } else {
                format!("{} has no data files", gold.view_dir(AggregateView::MAIN))
            },
        )) {
            return Ok(report);
        }

        let main = gold.read_view(AggregateView::MAIN).await?;
        let total = main.total();
        report.record_count = total;

        report.push(count_check("has_aggregations", main.rows.len() as u64, "aggregation rows"));

        let cleaned_count = match reference {
            Some(count) => Some(count),
            None => self.stored_cleaned_count().await?,
        };
        report.push(match cleaned_count {
            Some(cleaned) => sum_check(total, cleaned, self.sum_tolerance),
            None => CheckResult::new("total_matches", false, "no cleaned record count to compare against"),
        });

        let zero_rows = main.rows.iter().filter(|r| r.count == 0).count() as u64;
        report.push(zero_check("no_zero_counts", zero_rows, "groups with a non-positive count"));

        let summary_exists = gold.summary_exists().await?;
        report.push(CheckResult::new(
            "summary_exists",
            summary_exists,
            gold.summary_key(),
        ));

        let summary_total = if summary_exists {
            gold.read_summary_json()
                .await
                .ok()
                .flatten()
                .and_then(|summary| summary.get("total_records").and_then(|v| v.as_u64()))
        } else {
            None
        };
        report.push(CheckResult::new(
            "summary_has_total",
            summary_total.is_some(),
            match summary_total {
                Some(total) => format!("summary total_records {}", total),
                None => "summary has no total_records".to_string(),
            },
        ));
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Brewery;
    use crate::processor::gold::types::{AggregateRow, AggregateTable};
    use crate::processor::silver::types::CleanedTable;
    use arrow::array::{Float64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use common::config::{GoldWriteMode, SilverWriteMode};
    use crate::utils::arrow::encode_parquet;
    use common::storage::ObjectStoreStorage;

    fn brewery(id: &str) -> Brewery {
        Brewery {
            id: id.to_string(),
            name: Some(format!("Brewery {}", id)),
            brewery_type: Some("micro".to_string()),
            address_1: None,
            address_2: None,
            address_3: None,
            city: None,
            state_province: "R1".to_string(),
            postal_code: None,
            country: "A".to_string(),
            longitude: Some(180.0),
            latitude: Some(-90.0),
            phone: None,
            website_url: None,
        }
    }

    fn validator(storage: Arc<dyn ObjectStorage>) -> DataQualityValidator {
        let paths = StorageConfig {
            raw_prefix: "raw".to_string(),
            silver_prefix: "silver".to_string(),
            gold_prefix: "gold".to_string(),
            ..StorageConfig::default()
        };
        DataQualityValidator::new(storage, &paths, &ValidationConfig::default())
    }

    async fn write_cleaned(storage: &Arc<dyn ObjectStorage>, n: usize) {
        let table = CleanedTable::new((0..n).map(|i| brewery(&format!("{:03}", i))).collect());
        StorageManager::new(storage.clone(), "silver")
            .write_table(&table, "run1", SilverWriteMode::OverwritePartitions)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_layers_fail_at_the_directory_check() {
        let storage: Arc<dyn ObjectStorage> = Arc::new(ObjectStoreStorage::in_memory());
        let validation = validator(storage).validate_all().await.unwrap();
        assert!(!validation.passed);
        for report in [&validation.raw, &validation.cleaned, &validation.aggregated] {
            assert_eq!(report.failed_checks, vec!["directory_exists".to_string()]);
            assert_eq!(report.checks.len(), 1);
        }
        assert_eq!(validation.failed_layers().len(), 3);
    }

    #[tokio::test]
    async fn retention_gate_on_cleaned_layer() {
        let storage: Arc<dyn ObjectStorage> = Arc::new(ObjectStoreStorage::in_memory());
        write_cleaned(&storage, 85).await;
        let validator = validator(storage.clone());

        let report = validator.validate_cleaned(Some(100)).await.unwrap();
        assert_eq!(report.record_count, 85);
        assert!(!report.check("no_major_data_loss").unwrap().passed);
        assert_eq!(report.failed_checks, vec!["no_major_data_loss".to_string()]);

        write_cleaned(&storage, 90).await;
        let report = validator.validate_cleaned(Some(100)).await.unwrap();
        assert!(report.passed, "{:?}", report.failed_checks);
    }

    #[tokio::test]
    async fn cleaned_checks_see_null_duplicate_and_out_of_range_rows() {
        let storage: Arc<dyn ObjectStorage> = Arc::new(ObjectStoreStorage::in_memory());
        // Marker only; the data file below bypasses the typed writer.
        write_cleaned(&storage, 0).await;

        let schema = Arc::new(Schema::new(vec![
            Field::new(ID, DataType::Utf8, true),
            Field::new(LATITUDE, DataType::Float64, true),
            Field::new(LONGITUDE, DataType::Float64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec![Some("a"), Some("a"), None, Some("b")])),
                Arc::new(Float64Array::from(vec![Some(10.0), Some(95.0), None, Some(90.0)])),
                Arc::new(Float64Array::from(vec![Some(1.0), None, None, Some(-180.0001)])),
            ],
        )
        .unwrap();
        let bytes = encode_parquet(&batch, &[]).unwrap();
        storage
            .put_object("silver/country=A/state_province=R1/part-run1.parquet", &bytes)
            .await
            .unwrap();

        let report = validator(storage).validate_cleaned(Some(4)).await.unwrap();
        assert_eq!(report.record_count, 4);
        assert!(!report.passed);
        for name in ["required_columns", "no_null_ids", "no_duplicate_ids", "valid_coordinates"] {
            assert!(!report.check(name).unwrap().passed, "{} should fail", name);
        }
        assert!(report.check("no_major_data_loss").unwrap().passed);
    }

    #[tokio::test]
    async fn aggregate_layer_tolerates_small_differences() {
        let storage: Arc<dyn ObjectStorage> = Arc::new(ObjectStoreStorage::in_memory());
        let gold = GoldStorage::new(storage.clone(), "gold");
        let main = AggregateTable {
            view: AggregateView::MAIN,
            rows: vec![
                AggregateRow::new(vec![Some("A".into()), Some("R1".into()), Some("micro".into())], 60),
                AggregateRow::new(vec![Some("A".into()), Some("R2".into()), None], 40),
            ],
        };
        gold.write_view(&main, "run1", GoldWriteMode::Overwrite).await.unwrap();
        storage
            .put_object("gold/_summary.json", br#"{"total_records": 100}"#)
            .await
            .unwrap();

        let validator = validator(storage);
        let report = validator.validate_aggregated(Some(104)).await.unwrap();
        assert!(report.passed, "{:?}", report.failed_checks);
        assert_eq!(report.record_count, 100);

        let report = validator.validate_aggregated(Some(106)).await.unwrap();
        assert_eq!(report.failed_checks, vec!["total_matches".to_string()]);
    }

    #[tokio::test]
    async fn aggregate_summary_without_total_fails() {
        let storage: Arc<dyn ObjectStorage> = Arc::new(ObjectStoreStorage::in_memory());
        let gold = GoldStorage::new(storage.clone(), "gold");
        let main = AggregateTable {
            view: AggregateView::MAIN,
            rows: vec![AggregateRow::new(vec![Some("A".into()), Some("R1".into()), None], 3)],
        };
        gold.write_view(&main, "run1", GoldWriteMode::Overwrite).await.unwrap();
        storage.put_object("gold/_summary.json", b"{}").await.unwrap();

        let report = validator(storage).validate_aggregated(Some(3)).await.unwrap();
        assert_eq!(report.failed_checks, vec!["summary_has_total".to_string()]);
    }
}
