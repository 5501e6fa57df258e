use chrono::{DateTime, Utc};
use common::storage::ObjectStorage;
use common::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::models::{Manifest, ManifestExtra, PageEntry, RunRef};
use crate::utils::paths::PathBuilder;

pub const INGESTION_DATE_FIELD: &str = "_ingestion_date";
pub const RUN_ID_FIELD: &str = "_run_id";
pub const INGESTED_AT_FIELD: &str = "_ingested_at";

#[derive(Debug, Clone, Serialize)]
pub struct WriterSummary {
    pub run_dir: String,
    pub total_pages: usize,
    pub total_records: u64,
}

/// Persists the pages of one run. Date and run id are fixed for the writer's
/// lifetime, so a run never shares a directory with another.
pub struct RawWriter {
    storage: Arc<dyn ObjectStorage>,
    paths: PathBuilder,
    run: RunRef,
    started_at: DateTime<Utc>,
    pages: BTreeMap<u32, PageEntry>,
    claimed: bool,
}

impl RawWriter {
    pub fn new(storage: Arc<dyn ObjectStorage>, base_prefix: &str, run: RunRef, started_at: DateTime<Utc>) -> Self {
        info!(run = %run, "Starting raw run");
        Self {
            storage,
            paths: PathBuilder::new(base_prefix, &run),
            run,
            started_at,
            pages: BTreeMap::new(),
            claimed: false,
        }
    }

    /// Run identity derived from `started_at`.
    pub fn starting_at(storage: Arc<dyn ObjectStorage>, base_prefix: &str, started_at: DateTime<Utc>) -> Self {
        Self::new(storage, base_prefix, RunRef::from_timestamp(started_at), started_at)
    }

    pub fn run(&self) -> &RunRef {
        &self.run
    }

    pub fn run_dir(&self) -> String {
        self.paths.run_dir()
    }

    /// Refuses a run directory that already holds objects. Two runs started in
    /// the same second share an id and would otherwise overwrite each other.
    async fn claim(&mut self) -> Result<()> {
        if self.claimed {
            return Ok(());
        }
        let run_dir = self.run_dir();
        if self.storage.prefix_exists(&run_dir).await? {
            return Err(Error::Manifest(format!(
                "run {} already exists at {}",
                self.run, run_dir
            )));
        }
        self.claimed = true;
        Ok(())
    }

    /// Stamps each record with the run's ingestion fields and stores the page
    /// as JSON lines. Existing fields are never overwritten.
    pub async fn write_page(&mut self, page: u32, records: &[Value]) -> Result<String> {
        if self.pages.contains_key(&page) {
            return Err(Error::Manifest(format!(
                "page {} already written in run {}",
                page, self.run
            )));
        }
        self.claim().await?;

        let ingested_at = Utc::now().to_rfc3339();
        let mut buffer = Vec::new();
        for record in records {
            let mut record = record.clone();
            if let Value::Object(fields) = &mut record {
                fields
                    .entry(INGESTION_DATE_FIELD)
                    .or_insert_with(|| Value::String(self.run.ingestion_date.clone()));
                fields
                    .entry(RUN_ID_FIELD)
                    .or_insert_with(|| Value::String(self.run.run_id.clone()));
                fields
                    .entry(INGESTED_AT_FIELD)
                    .or_insert_with(|| Value::String(ingested_at.clone()));
            }
            serde_json::to_writer(&mut buffer, &record)?;
            buffer.push(b'\n');
        }

        let file = PathBuilder::page_file_name(page);
        let key = self.paths.file_key(&file);
        self.storage.put_object(&key, &buffer).await?;

        self.pages.insert(
            page,
            PageEntry {
                page,
                file,
                record_count: records.len() as u64,
                sha256: Some(sha256_hex(&buffer)),
            },
        );
        info!(page, records = records.len(), key = %key, "Wrote raw page");
        Ok(key)
    }

    pub fn summary(&self) -> WriterSummary {
        WriterSummary {
            run_dir: self.run_dir(),
            total_pages: self.pages.len(),
            total_records: self.pages.values().map(|p| p.record_count).sum(),
        }
    }

    /// Writes `_manifest.json` from the pages written in this session. Takes
    /// the writer by value so it can happen only once.
    pub async fn write_manifest(mut self, extra: ManifestExtra) -> Result<(Manifest, String)> {
        if self.pages.is_empty() && extra.expected_total.is_some_and(|t| t > 0) {
            return Err(Error::Manifest(format!(
                "run {} wrote no pages but the source reported {} records",
                self.run,
                extra.expected_total.unwrap_or_default()
            )));
        }
        self.claim().await?;

        let pages: Vec<PageEntry> = self.pages.into_values().collect();
        let now = Utc::now();
        let manifest = Manifest {
            ingestion_date: self.run.ingestion_date.clone(),
            run_id: self.run.run_id.clone(),
            created_at: now,
            total_pages: pages.len(),
            total_records: pages.iter().map(|p| p.record_count).sum(),
            pages,
            expected_total: extra.expected_total,
            start_time: self.started_at,
            end_time: Some(now),
            source: extra.source,
            filters: extra.filters,
            per_page: extra.per_page,
        };
        manifest.verify()?;

        let key = self.paths.manifest_key();
        self.storage
            .put_object(&key, &serde_json::to_vec_pretty(&manifest)?)
            .await?;

        info!(
            run = %self.run,
            total_pages = manifest.total_pages,
            total_records = manifest.total_records,
            expected_total = ?manifest.expected_total,
            "Wrote manifest"
        );
        Ok((manifest, key))
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::ObjectStoreStorage;
    use serde_json::json;

    fn writer(storage: Arc<dyn ObjectStorage>) -> RawWriter {
        RawWriter::new(
            storage,
            "bronze/breweries",
            RunRef::new("2024-05-01", "20240501_120000"),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn stamping_is_additive() {
        let storage: Arc<dyn ObjectStorage> = Arc::new(ObjectStoreStorage::in_memory());
        let mut w = writer(storage.clone());
        let key = w
            .write_page(1, &[json!({"id": "a", "_run_id": "upstream"}), json!({"id": "b"})])
            .await
            .unwrap();

        let body = String::from_utf8(storage.get_object(&key).await.unwrap()).unwrap();
        let lines: Vec<Value> = body.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["_run_id"], json!("upstream"));
        assert_eq!(lines[1]["_run_id"], json!("20240501_120000"));
        assert_eq!(lines[1]["_ingestion_date"], json!("2024-05-01"));
        assert!(lines[1]["_ingested_at"].is_string());
        assert_eq!(lines[1]["id"], json!("b"));
    }

    #[tokio::test]
    async fn duplicate_page_number_is_rejected() {
        let storage: Arc<dyn ObjectStorage> = Arc::new(ObjectStoreStorage::in_memory());
        let mut w = writer(storage);
        w.write_page(1, &[json!({"id": "a"})]).await.unwrap();
        let err = w.write_page(1, &[json!({"id": "b"})]).await.unwrap_err();
        assert!(matches!(err, Error::Manifest(_)));
    }

    #[tokio::test]
    async fn second_writer_for_the_same_run_is_refused() {
        let storage: Arc<dyn ObjectStorage> = Arc::new(ObjectStoreStorage::in_memory());
        let started_at = Utc::now();

        let mut first = RawWriter::starting_at(storage.clone(), "bronze/breweries", started_at);
        let first_key = first.write_page(1, &[json!({"id": "a"})]).await.unwrap();
        first.write_page(2, &[json!({"id": "b"})]).await.unwrap();
        first.write_manifest(ManifestExtra::default()).await.unwrap();
        let original = storage.get_object(&first_key).await.unwrap();

        let mut second = RawWriter::starting_at(storage.clone(), "bronze/breweries", started_at);
        let err = second.write_page(1, &[json!({"id": "z"})]).await.unwrap_err();
        assert!(matches!(err, Error::Manifest(_)), "{}", err);
        assert_eq!(storage.get_object(&first_key).await.unwrap(), original);

        let empty = RawWriter::starting_at(storage.clone(), "bronze/breweries", started_at);
        let err = empty.write_manifest(ManifestExtra::default()).await.unwrap_err();
        assert!(matches!(err, Error::Manifest(_)), "{}", err);
        assert_eq!(storage.list_objects("bronze/breweries").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn manifest_without_pages_fails_when_records_were_expected() {
        let storage: Arc<dyn ObjectStorage> = Arc::new(ObjectStoreStorage::in_memory());
        let err = writer(storage.clone())
            .write_manifest(ManifestExtra {
                expected_total: Some(10),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Manifest(_)));

        let (manifest, _) = writer(storage).write_manifest(ManifestExtra::default()).await.unwrap();
        assert_eq!(manifest.total_records, 0);
    }
}
