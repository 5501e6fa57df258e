pub mod models;
pub mod processor;
pub mod quality;
pub mod utils;

use chrono::{DateTime, Utc};
use common::config::Settings;
use common::storage::{build_storage, ObjectStorage};
use common::{Error, Result};
use etl::client::{BreweryApiClient, Transport};
use etl::models::RunRef;
use etl::{BronzeOutcome, BronzePipeline};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use processor::gold::storage::GoldStorage;
use processor::gold::aggregate::AggregationEngine;
use processor::gold::types::{AggregateTable, AggregateView, GoldOutcome, ViewCommit};
use processor::gold::GoldProcessor;
use processor::silver::storage::StorageManager;
use processor::silver::types::{CleanedTable, SilverOutcome, TableCommit};
use processor::silver::SilverProcessor;
use quality::{DataQualityValidator, PipelineValidation, ValidationReport};

/// Result of one full run, stage by stage.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub bronze: BronzeOutcome,
    pub silver: SilverOutcome,
    pub gold: GoldOutcome,
    pub validation: PipelineValidation,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
}

/// Runs the stages over one storage backend. Each stage can run on its own;
/// `run` sequences them and checks every layer before moving on.
pub struct Lakehouse {
    settings: Settings,
    storage: Arc<dyn ObjectStorage>,
}

impl Lakehouse {
    pub fn new(settings: Settings, storage: Arc<dyn ObjectStorage>) -> Self {
        Self { settings, storage }
    }

    pub fn from_settings(settings: Settings) -> Result<Self> {
        let storage = build_storage(&settings.storage)?;
        Ok(Self::new(settings, storage))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn storage(&self) -> Arc<dyn ObjectStorage> {
        self.storage.clone()
    }

    pub async fn bronze(&self) -> Result<BronzeOutcome> {
        BronzePipeline::from_settings(&self.settings, self.storage.clone())?
            .run()
            .await
    }

    pub async fn bronze_with<T: Transport>(&self, transport: T) -> Result<BronzeOutcome> {
        self.bronze_at(transport, Utc::now()).await
    }

    /// Ingests with a fixed start time, which fixes the run identity.
    pub async fn bronze_at<T: Transport>(
        &self,
        transport: T,
        started_at: DateTime<Utc>,
    ) -> Result<BronzeOutcome> {
        let client = BreweryApiClient::new(transport, &self.settings.api)?;
        BronzePipeline::new(
            client,
            self.storage.clone(),
            &self.settings.storage.raw_prefix,
            self.settings.api.filters.clone(),
        )
        .run_at(started_at)
        .await
    }

    pub async fn silver(&self, run: Option<RunRef>) -> Result<SilverOutcome> {
        SilverProcessor::from_settings(&self.settings, self.storage.clone())
            .process_to_silver(run)
            .await
    }

    pub async fn gold(&self, run_id: Option<String>) -> Result<GoldOutcome> {
        GoldProcessor::from_settings(&self.settings, self.storage.clone())
            .process_to_gold(run_id)
            .await
    }

    /// Commits of the cleaned table, newest first.
    pub async fn cleaned_history(&self, limit: usize) -> Result<Vec<TableCommit>> {
        self.cleaned_table().history(limit).await
    }

    pub async fn read_cleaned_version(&self, version: u64) -> Result<CleanedTable> {
        self.cleaned_table().read_version(version).await
    }

    pub async fn view_history(&self, view: AggregateView, limit: usize) -> Result<Vec<ViewCommit>> {
        GoldStorage::new(self.storage.clone(), &self.settings.storage.gold_prefix)
            .table_history(view, limit)
            .await
    }

    /// Region counts over the stored cleaned table, optionally for one country.
    pub async fn region_counts(&self, country: Option<&str>) -> Result<AggregateTable> {
        let table = self.cleaned_table().read_table().await?;
        AggregationEngine::new().regions(&table, country).await
    }

    fn cleaned_table(&self) -> StorageManager {
        StorageManager::new(self.storage.clone(), &self.settings.storage.silver_prefix)
    }

    pub fn validator(&self) -> DataQualityValidator {
        DataQualityValidator::from_settings(&self.settings, self.storage.clone())
    }

    pub async fn validate(&self) -> Result<PipelineValidation> {
        self.validator().validate_all().await
    }

    /// Full run against the configured API.
    pub async fn run(&self) -> Result<PipelineOutcome> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let bronze = self.bronze().await?;
        self.finish(bronze, started_at, timer).await
    }

    pub async fn run_with<T: Transport>(&self, transport: T) -> Result<PipelineOutcome> {
        self.run_at(transport, Utc::now()).await
    }

    pub async fn run_at<T: Transport>(
        &self,
        transport: T,
        started_at: DateTime<Utc>,
    ) -> Result<PipelineOutcome> {
        let timer = Instant::now();
        let bronze = self.bronze_at(transport, started_at).await?;
        self.finish(bronze, started_at, timer).await
    }

    async fn finish(
        &self,
        bronze: BronzeOutcome,
        started_at: DateTime<Utc>,
        timer: Instant,
    ) -> Result<PipelineOutcome> {
        let validator = self.validator();

        let raw = validator.validate_raw().await?;
        self.gate(&raw)?;

        let silver = self.silver(Some(bronze.run.clone())).await?;
        let cleaned = validator.validate_cleaned(Some(bronze.total_records)).await?;
        self.gate(&cleaned)?;

        let gold = self.gold(Some(bronze.run.run_id.clone())).await?;
        // Gold aggregates the stored table, partitions from earlier runs included.
        let aggregated = validator
            .validate_aggregated(Some(cleaned.record_count))
            .await?;
        self.gate(&aggregated)?;

        let validation = PipelineValidation {
            passed: raw.passed && cleaned.passed && aggregated.passed,
            raw,
            cleaned,
            aggregated,
        };
        let outcome = PipelineOutcome {
            bronze,
            silver,
            gold,
            validation,
            started_at,
            duration_secs: timer.elapsed().as_secs_f64(),
        };
        info!(
            run = %outcome.bronze.run,
            raw = outcome.bronze.total_records,
            cleaned = outcome.silver.summary.cleaned_record_count,
            groups = outcome.gold.stats.total_rows,
            passed = outcome.validation.passed,
            duration_secs = outcome.duration_secs,
            "Pipeline run complete"
        );
        Ok(outcome)
    }

    fn gate(&self, report: &ValidationReport) -> Result<()> {
        if report.passed {
            return Ok(());
        }
        let message = format!("{} layer failed checks {:?}", report.layer, report.failed_checks);
        if self.settings.pipeline.fail_on_validation {
            return Err(Error::ValidationFailed(message));
        }
        warn!("{}; continuing because fail_on_validation is off", message);
        Ok(())
    }
}

pub async fn run_pipeline(settings: &Settings) -> Result<PipelineOutcome> {
    Lakehouse::from_settings(settings.clone())?.run().await
}

/// Loads settings, installs logging and runs every stage once.
pub async fn run_lakehouse_pipeline(config_path: &str) -> Result<PipelineOutcome> {
    let settings = Settings::new(config_path)?;
    common::telemetry::init_tracing(&settings.logging)?;
    run_pipeline(&settings).await
}
