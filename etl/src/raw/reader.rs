use common::storage::ObjectStorage;
use common::{Error, Result};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use super::writer::sha256_hex;
use crate::models::{Manifest, RunRef};
use crate::utils::paths::{parse_run_ref, PathBuilder};

/// Records of one run, read through its manifest.
#[derive(Debug, Clone)]
pub struct RawBatch {
    pub run: RunRef,
    pub manifest: Manifest,
    pub records: Vec<Value>,
}

pub struct RawReader {
    storage: Arc<dyn ObjectStorage>,
    base_prefix: String,
}

impl RawReader {
    pub fn new(storage: Arc<dyn ObjectStorage>, base_prefix: &str) -> Self {
        Self {
            storage,
            base_prefix: base_prefix.trim_matches('/').to_string(),
        }
    }

    pub fn base_prefix(&self) -> &str {
        &self.base_prefix
    }

    pub fn paths(&self, run: &RunRef) -> PathBuilder {
        PathBuilder::new(&self.base_prefix, run)
    }

    /// Runs found under the base prefix, newest first.
    pub async fn list_runs(&self) -> Result<Vec<RunRef>> {
        let keys = self.storage.list_objects(&self.base_prefix).await?;
        let runs: BTreeSet<RunRef> = keys.iter().filter_map(|k| parse_run_ref(k)).collect();
        Ok(runs.into_iter().rev().collect())
    }

    pub async fn latest_run(&self) -> Result<Option<RunRef>> {
        Ok(self.list_runs().await?.into_iter().next())
    }

    pub async fn manifest_exists(&self, run: &RunRef) -> Result<bool> {
        self.storage.check_file_exists(&self.paths(run).manifest_key()).await
    }

    pub async fn read_manifest(&self, run: &RunRef) -> Result<Manifest> {
        let key = self.paths(run).manifest_key();
        if !self.storage.check_file_exists(&key).await? {
            return Err(Error::Manifest(format!("manifest missing for run {}: {}", run, key)));
        }
        let bytes = self.storage.get_object(&key).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Manifest(format!("malformed manifest {}: {}", key, e)))
    }

    /// Reads every page listed in the manifest, in page order, and checks each
    /// page against its recorded count and checksum.
    pub async fn read_run(&self, run: &RunRef) -> Result<RawBatch> {
        let manifest = self.read_manifest(run).await?;
        manifest.verify()?;

        let paths = self.paths(run);
        let mut records = Vec::with_capacity(manifest.total_records as usize);
        for entry in &manifest.pages {
            let key = paths.file_key(&entry.file);
            if !self.storage.check_file_exists(&key).await? {
                return Err(Error::Manifest(format!(
                    "page {} listed in manifest but missing: {}",
                    entry.page, key
                )));
            }
            let bytes = self.storage.get_object(&key).await?;

            if let Some(expected) = &entry.sha256 {
                let actual = sha256_hex(&bytes);
                if &actual != expected {
                    return Err(Error::Manifest(format!(
                        "checksum mismatch for {}: manifest {} but file {}",
                        key, expected, actual
                    )));
                }
            }

            let page_records = parse_json_lines(&bytes)
                .map_err(|e| Error::Manifest(format!("unreadable page {}: {}", key, e)))?;
            if page_records.len() as u64 != entry.record_count {
                return Err(Error::Manifest(format!(
                    "page {} has {} records but manifest says {}",
                    entry.page,
                    page_records.len(),
                    entry.record_count
                )));
            }
            debug!(page = entry.page, records = page_records.len(), "Read raw page");
            records.extend(page_records);
        }

        info!(run = %run, pages = manifest.total_pages, records = records.len(), "Read raw run");
        Ok(RawBatch {
            run: run.clone(),
            manifest,
            records,
        })
    }
}

fn parse_json_lines(bytes: &[u8]) -> Result<Vec<Value>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::InvalidInput(format!("page is not UTF-8: {}", e)))?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(Error::from))
        .collect()
}
