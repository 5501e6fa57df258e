use chrono::{DateTime, Utc};
use common::config::Settings;
use common::storage::ObjectStorage;
use common::Result;
use futures::TryStreamExt;
use serde::Serialize;
use std::pin::pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::client::{BreweryApiClient, HttpTransport, Transport};
use crate::models::{Filters, ManifestExtra, RunRef};
use crate::raw::RawWriter;

/// What the ingestion stage hands to the next stage.
#[derive(Debug, Clone, Serialize)]
pub struct BronzeOutcome {
    pub run: RunRef,
    pub run_dir: String,
    pub manifest_key: String,
    pub total_pages: usize,
    pub total_records: u64,
    pub expected_total: Option<u64>,
    pub duration_secs: f64,
}

/// Fetch then write raw: metadata, every page, then the manifest.
pub struct BronzePipeline<T: Transport = HttpTransport> {
    client: BreweryApiClient<T>,
    storage: Arc<dyn ObjectStorage>,
    raw_prefix: String,
    filters: Filters,
}

impl BronzePipeline<HttpTransport> {
    pub fn from_settings(settings: &Settings, storage: Arc<dyn ObjectStorage>) -> Result<Self> {
        Ok(Self::new(
            BreweryApiClient::from_config(&settings.api)?,
            storage,
            &settings.storage.raw_prefix,
            settings.api.filters.clone(),
        ))
    }
}

impl<T: Transport> BronzePipeline<T> {
    pub fn new(
        client: BreweryApiClient<T>,
        storage: Arc<dyn ObjectStorage>,
        raw_prefix: &str,
        filters: Filters,
    ) -> Self {
        Self {
            client,
            storage,
            raw_prefix: raw_prefix.to_string(),
            filters,
        }
    }

    pub async fn run(&self) -> Result<BronzeOutcome> {
        self.run_at(Utc::now()).await
    }

    /// Runs with an explicit start time, which also fixes the run identity.
    /// Pages already written stay in place if a later page fails.
    pub async fn run_at(&self, started_at: DateTime<Utc>) -> Result<BronzeOutcome> {
        let timer = Instant::now();
        let metadata = self.client.fetch_metadata(&self.filters).await;

        let mut writer = RawWriter::starting_at(self.storage.clone(), &self.raw_prefix, started_at);
        let run = writer.run().clone();

        let mut pages = pin!(self.client.fetch_all(&self.filters));
        while let Some(page) = pages.try_next().await? {
            writer.write_page(page.number, &page.records).await?;
        }

        let run_dir = writer.run_dir();
        let (manifest, manifest_key) = writer
            .write_manifest(ManifestExtra {
                expected_total: metadata.total,
                source: Some(self.client.source()),
                filters: self.filters.clone(),
                per_page: Some(self.client.per_page()),
            })
            .await?;

        if !manifest.matches_expected() {
            warn!(
                expected = ?manifest.expected_total,
                actual = manifest.total_records,
                "Fetched record count differs from API metadata"
            );
        }

        let outcome = BronzeOutcome {
            run,
            run_dir,
            manifest_key,
            total_pages: manifest.total_pages,
            total_records: manifest.total_records,
            expected_total: manifest.expected_total,
            duration_secs: timer.elapsed().as_secs_f64(),
        };
        info!(
            run = %outcome.run,
            pages = outcome.total_pages,
            records = outcome.total_records,
            "Bronze ingestion complete"
        );
        Ok(outcome)
    }
}
