use common::storage::{join_key, ObjectStorage};
use common::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Append-only JSON entries, one object per version: `<dir>/<version>.json`.
/// Versions start at 0 and are zero-padded so key order is version order.
pub struct CommitLog {
    storage: Arc<dyn ObjectStorage>,
    dir: String,
}

fn entry_name(version: u64) -> String {
    format!("{:020}.json", version)
}

fn parse_version(key: &str) -> Option<u64> {
    key.rsplit('/').next()?.strip_suffix(".json")?.parse().ok()
}

impl CommitLog {
    pub fn new(storage: Arc<dyn ObjectStorage>, dir: String) -> Self {
        Self { storage, dir }
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }

    pub fn entry_key(&self, version: u64) -> String {
        join_key(&[&self.dir, &entry_name(version)])
    }

    /// Committed versions, ascending.
    pub async fn versions(&self) -> Result<Vec<u64>> {
        let mut versions: Vec<u64> = self
            .storage
            .list_objects(&self.dir)
            .await?
            .iter()
            .filter_map(|key| parse_version(key))
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    pub async fn latest_version(&self) -> Result<Option<u64>> {
        Ok(self.versions().await?.last().copied())
    }

    pub async fn next_version(&self) -> Result<u64> {
        Ok(self.latest_version().await?.map_or(0, |v| v + 1))
    }

    /// Writes `entry` as `version`. An existing entry is never replaced.
    pub async fn append<T: Serialize>(&self, version: u64, entry: &T) -> Result<String> {
        let key = self.entry_key(version);
        if self.storage.check_file_exists(&key).await? {
            return Err(Error::Storage(format!(
                "version {} is already committed at {}",
                version, key
            )));
        }
        self.storage
            .put_object(&key, &serde_json::to_vec_pretty(entry)?)
            .await?;
        debug!(version, key = %key, "Committed log entry");
        Ok(key)
    }

    pub async fn read<T: DeserializeOwned>(&self, version: u64) -> Result<Option<T>> {
        let key = self.entry_key(version);
        if !self.storage.check_file_exists(&key).await? {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&self.storage.get_object(&key).await?)?))
    }

    /// Up to `limit` entries, newest first.
    pub async fn history<T: DeserializeOwned>(&self, limit: usize) -> Result<Vec<T>> {
        let mut entries = Vec::new();
        for version in self.versions().await?.into_iter().rev().take(limit) {
            if let Some(entry) = self.read(version).await? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}
