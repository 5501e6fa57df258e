use chrono::Utc;
use common::config::SilverWriteMode;
use common::storage::ObjectStorage;
use common::{Error, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use super::types::{
    records_to_batch, CleanedTable, PartitionKey, SilverMarker, SilverWriteResult, TableCommit,
};
use crate::processor::log::CommitLog;
use crate::utils::arrow::{decode_parquet, encode_parquet};
use crate::utils::paths::{is_parquet, parse_partition, PathBuilder};

/// Reads and writes the cleaned table, partitioned by country and region.
/// Every write is a new version in the table's commit log; files it replaces
/// are retired under `_history/` so earlier versions stay readable.
pub struct StorageManager {
    storage: Arc<dyn ObjectStorage>,
    paths: PathBuilder,
    log: CommitLog,
}

struct EncodedPartition {
    key: PartitionKey,
    object_key: String,
    bytes: Vec<u8>,
}

impl StorageManager {
    pub fn new(storage: Arc<dyn ObjectStorage>, silver_prefix: &str) -> Self {
        let paths = PathBuilder::new(silver_prefix);
        let log = CommitLog::new(storage.clone(), paths.log_dir());
        Self { storage, paths, log }
    }

    pub fn prefix(&self) -> &str {
        self.paths.base()
    }

    pub fn marker_key(&self) -> String {
        self.paths.marker_key()
    }

    /// Writes one file per partition as the next version. Every partition is
    /// encoded before anything is moved, so an encoding failure leaves the
    /// table as it was.
    pub async fn write_table(
        &self,
        table: &CleanedTable,
        run_id: &str,
        mode: SilverWriteMode,
    ) -> Result<SilverWriteResult> {
        let version = self.log.next_version().await?;

        let mut encoded = Vec::new();
        for (key, records) in table.partitions() {
            let batch = records_to_batch(&records)?;
            let bytes = encode_parquet(
                &batch,
                &[
                    ("layer", "silver".to_string()),
                    ("run_id", run_id.to_string()),
                    ("version", version.to_string()),
                    ("record_count", records.len().to_string()),
                    ("partition", key.to_string()),
                ],
            )?;
            encoded.push(EncodedPartition {
                object_key: self
                    .paths
                    .part_file(&key.country, &key.state_province, run_id, version),
                key,
                bytes,
            });
        }

        let marker_key = self.paths.marker_key();
        self.storage.delete_object(&marker_key).await?;

        let live = self.data_files().await?;
        let retiring: Vec<String> = match mode {
            SilverWriteMode::OverwriteTable => live,
            SilverWriteMode::OverwritePartitions => {
                let dirs: Vec<String> = encoded
                    .iter()
                    .map(|p| {
                        format!(
                            "{}/",
                            self.paths.partition_dir(&p.key.country, &p.key.state_province)
                        )
                    })
                    .collect();
                live.into_iter()
                    .filter(|file| dirs.iter().any(|dir| file.starts_with(dir.as_str())))
                    .collect()
            }
        };
        for file in &retiring {
            self.retire(file).await?;
        }
        debug!(files_retired = retiring.len(), ?mode, version, "Retired replaced files");

        let mut added = Vec::with_capacity(encoded.len());
        for partition in &encoded {
            self.storage
                .put_object(&partition.object_key, &partition.bytes)
                .await?;
            debug!(partition = %partition.key, key = %partition.object_key, "Wrote partition");
            added.push(partition.object_key.clone());
        }

        let created_at = Utc::now();
        let partitions: Vec<PartitionKey> = encoded.iter().map(|p| p.key.clone()).collect();
        let commit = TableCommit {
            version,
            run_id: run_id.to_string(),
            created_at,
            write_mode: mode,
            records_written: table.len(),
            partitions: partitions.clone(),
            added: added.clone(),
            retired: retiring.clone(),
            files: self.data_files().await?,
        };
        let commit_key = self.log.append(version, &commit).await?;

        let marker = SilverMarker {
            version,
            run_id: run_id.to_string(),
            created_at,
            record_count: table.len(),
            partitions,
            write_mode: mode,
        };
        self.storage
            .put_object(&marker_key, &serde_json::to_vec_pretty(&marker)?)
            .await?;

        info!(
            version,
            partitions = added.len(),
            records = table.len(),
            files_retired = retiring.len(),
            "Silver table written"
        );
        Ok(SilverWriteResult {
            version,
            partitions_written: added.len(),
            files: added,
            files_retired: retiring.len(),
            marker_key,
            commit_key,
        })
    }

    /// Moves a data file out of the live table into `_history/`.
    async fn retire(&self, key: &str) -> Result<()> {
        let bytes = self.storage.get_object(key).await?;
        self.storage
            .put_object(&self.paths.history_key(key), &bytes)
            .await?;
        self.storage.delete_object(key).await
    }

    pub async fn is_ready(&self) -> Result<bool> {
        self.storage.check_file_exists(&self.paths.marker_key()).await
    }

    pub async fn read_marker(&self) -> Result<Option<SilverMarker>> {
        let key = self.paths.marker_key();
        if !self.storage.check_file_exists(&key).await? {
            return Ok(None);
        }
        let bytes = self.storage.get_object(&key).await?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Data files of the current table, read from the directory layout.
    pub async fn data_files(&self) -> Result<Vec<String>> {
        Ok(self
            .storage
            .list_objects(self.paths.base())
            .await?
            .into_iter()
            .filter(|k| is_parquet(k) && !self.paths.is_history(k))
            .collect())
    }

    /// Up to `limit` commits, newest first.
    pub async fn history(&self, limit: usize) -> Result<Vec<TableCommit>> {
        self.log.history(limit).await
    }

    pub async fn current_version(&self) -> Result<Option<u64>> {
        self.log.latest_version().await
    }

    pub async fn read_commit(&self, version: u64) -> Result<TableCommit> {
        self.log
            .read(version)
            .await?
            .ok_or_else(|| Error::InvalidInput(format!("cleaned table has no version {}", version)))
    }

    /// The table as it was after `version` was committed.
    pub async fn read_version(&self, version: u64) -> Result<CleanedTable> {
        let commit = self.read_commit(version).await?;
        let mut keys = Vec::with_capacity(commit.files.len());
        for file in &commit.files {
            if self.storage.check_file_exists(file).await? {
                keys.push(file.clone());
                continue;
            }
            let retired = self.paths.history_key(file);
            if !self.storage.check_file_exists(&retired).await? {
                return Err(Error::Storage(format!(
                    "file {} of version {} is gone",
                    file, version
                )));
            }
            keys.push(retired);
        }
        self.read_files(&keys).await
    }

    async fn read_files(&self, keys: &[String]) -> Result<CleanedTable> {
        let mut batches = Vec::new();
        for key in keys {
            let bytes = self.storage.get_object(key).await?;
            batches.extend(decode_parquet(bytes)?);
        }
        CleanedTable::from_batches(&batches)
    }

    async fn read_prefix(&self, prefix: &str) -> Result<CleanedTable> {
        let keys: Vec<String> = self
            .storage
            .list_objects(prefix)
            .await?
            .into_iter()
            .filter(|k| is_parquet(k) && !self.paths.is_history(k))
            .collect();
        self.read_files(&keys).await
    }

    pub async fn read_table(&self) -> Result<CleanedTable> {
        self.read_prefix(self.paths.base()).await
    }

    pub async fn read_country(&self, country: &str) -> Result<CleanedTable> {
        self.read_prefix(&self.paths.country_dir(country)).await
    }

    pub async fn read_partition(&self, country: &str, region: &str) -> Result<CleanedTable> {
        self.read_prefix(&self.paths.partition_dir(country, region)).await
    }

    /// Partitions currently present, read from the directory layout.
    pub async fn list_partitions(&self) -> Result<Vec<PartitionKey>> {
        let partitions: BTreeSet<PartitionKey> = self
            .data_files()
            .await?
            .iter()
            .map(|key| {
                parse_partition(key)
                    .map(|(country, region)| PartitionKey::new(country, region))
                    .ok_or_else(|| Error::Storage(format!("Unpartitioned file in cleaned table: {}", key)))
            })
            .collect::<Result<_>>()?;
        Ok(partitions.into_iter().collect())
    }

    pub async fn list_countries(&self) -> Result<Vec<String>> {
        let countries: BTreeSet<String> = self
            .list_partitions()
            .await?
            .into_iter()
            .map(|p| p.country)
            .collect();
        Ok(countries.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Brewery;
    use common::storage::ObjectStoreStorage;

    fn brewery(id: &str, country: &str, region: &str) -> Brewery {
        Brewery {
            id: id.to_string(),
            name: Some(format!("Brewery {}", id)),
            brewery_type: Some("micro".to_string()),
            address_1: None,
            address_2: None,
            address_3: None,
            city: None,
            state_province: region.to_string(),
            postal_code: None,
            country: country.to_string(),
            longitude: Some(1.5),
            latitude: None,
            phone: None,
            website_url: None,
        }
    }

    fn manager() -> (Arc<dyn ObjectStorage>, StorageManager) {
        let storage: Arc<dyn ObjectStorage> = Arc::new(ObjectStoreStorage::in_memory());
        let manager = StorageManager::new(storage.clone(), "silver/breweries");
        (storage, manager)
    }

    #[tokio::test]
    async fn writes_one_file_per_partition_and_reads_back() {
        let (_, manager) = manager();
        let table = CleanedTable::new(vec![
            brewery("3", "A", "R1"),
            brewery("1", "A", "R1"),
            brewery("2", "B", "R2"),
        ]);

        let result = manager
            .write_table(&table, "20240101_000000", SilverWriteMode::OverwritePartitions)
            .await
            .unwrap();
        assert_eq!(result.partitions_written, 2);
        assert!(manager.is_ready().await.unwrap());

        assert_eq!(manager.read_table().await.unwrap(), table);
        assert_eq!(manager.read_partition("A", "R1").await.unwrap().len(), 2);
        assert_eq!(manager.read_country("B").await.unwrap().len(), 1);
        assert_eq!(manager.list_countries().await.unwrap(), vec!["A".to_string(), "B".to_string()]);
    }

    #[tokio::test]
    async fn rerun_replaces_partitions_but_keeps_untouched_ones() {
        let (_, manager) = manager();
        let first = CleanedTable::new(vec![brewery("1", "A", "R1"), brewery("2", "B", "R2")]);
        manager
            .write_table(&first, "run1", SilverWriteMode::OverwritePartitions)
            .await
            .unwrap();

        let second = CleanedTable::new(vec![brewery("1", "A", "R1"), brewery("9", "A", "R1")]);
        manager
            .write_table(&second, "run2", SilverWriteMode::OverwritePartitions)
            .await
            .unwrap();

        let ids: Vec<String> = manager
            .read_table()
            .await
            .unwrap()
            .records()
            .iter()
            .map(|r| r.id.clone())
            .collect();
        // B/R2 is stale but survives partition overwrite.
        assert_eq!(ids, vec!["1", "2", "9"]);
        assert_eq!(manager.data_files().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn table_overwrite_drops_stale_partitions() {
        let (_, manager) = manager();
        let first = CleanedTable::new(vec![brewery("1", "A", "R1"), brewery("2", "B", "R2")]);
        manager
            .write_table(&first, "run1", SilverWriteMode::OverwriteTable)
            .await
            .unwrap();
        let second = CleanedTable::new(vec![brewery("1", "A", "R1")]);
        manager
            .write_table(&second, "run2", SilverWriteMode::OverwriteTable)
            .await
            .unwrap();

        assert_eq!(manager.read_table().await.unwrap(), second);
        let marker = manager.read_marker().await.unwrap().unwrap();
        assert_eq!(marker.run_id, "run2");
        assert_eq!(marker.partitions, vec![PartitionKey::new("A", "R1")]);
    }

    #[tokio::test]
    async fn awkward_partition_values_survive_the_layout() {
        let (_, manager) = manager();
        let table = CleanedTable::new(vec![
            brewery("1", "Deutschland", "Baden-Württemberg"),
            brewery("2", "Canada", "St. John's"),
            brewery("3", "a/b", ".."),
        ]);
        manager
            .write_table(&table, "run1", SilverWriteMode::OverwritePartitions)
            .await
            .unwrap();

        assert_eq!(
            manager.list_partitions().await.unwrap(),
            vec![
                PartitionKey::new("Canada", "St. John's"),
                PartitionKey::new("Deutschland", "Baden-Württemberg"),
                PartitionKey::new("a/b", ".."),
            ]
        );
        assert_eq!(manager.read_partition("Deutschland", "Baden-Württemberg").await.unwrap().len(), 1);
        assert_eq!(manager.read_country("a/b").await.unwrap().records()[0].id, "3");
    }

    #[tokio::test]
    async fn rewriting_same_run_is_idempotent() {
        let (storage, manager) = manager();
        let table = CleanedTable::new(vec![brewery("1", "A", "R1"), brewery("2", "A", "R2")]);
        for _ in 0..2 {
            manager
                .write_table(&table, "run1", SilverWriteMode::OverwritePartitions)
                .await
                .unwrap();
        }
        assert_eq!(manager.read_table().await.unwrap(), table);
        assert_eq!(manager.data_files().await.unwrap().len(), 2);
        assert_eq!(
            storage.list_objects("silver/breweries/_history").await.unwrap().len(),
            2
        );
        assert_eq!(manager.current_version().await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn earlier_versions_stay_readable() {
        let (_, manager) = manager();
        let first = CleanedTable::new(vec![brewery("1", "A", "R1"), brewery("2", "B", "R2")]);
        let second = CleanedTable::new(vec![brewery("1", "A", "R1"), brewery("9", "A", "R1")]);
        let third = CleanedTable::new(vec![brewery("5", "C", "R3")]);
        manager
            .write_table(&first, "run1", SilverWriteMode::OverwritePartitions)
            .await
            .unwrap();
        let write = manager
            .write_table(&second, "run2", SilverWriteMode::OverwritePartitions)
            .await
            .unwrap();
        assert_eq!(write.version, 1);
        assert_eq!(write.files_retired, 1);
        manager
            .write_table(&third, "run3", SilverWriteMode::OverwriteTable)
            .await
            .unwrap();

        let history = manager.history(10).await.unwrap();
        let versions: Vec<(u64, &str)> = history.iter().map(|c| (c.version, c.run_id.as_str())).collect();
        assert_eq!(versions, vec![(2, "run3"), (1, "run2"), (0, "run1")]);
        assert_eq!(history[0].retired.len(), 2);
        assert_eq!(history[1].files.len(), 2);
        assert_eq!(manager.history(1).await.unwrap().len(), 1);

        assert_eq!(manager.read_version(0).await.unwrap(), first);
        let ids: Vec<String> = manager
            .read_version(1)
            .await
            .unwrap()
            .records()
            .iter()
            .map(|r| r.id.clone())
            .collect();
        assert_eq!(ids, vec!["1", "2", "9"]);
        assert_eq!(manager.read_version(2).await.unwrap(), third);
        assert_eq!(manager.read_table().await.unwrap(), third);
        assert_eq!(manager.list_partitions().await.unwrap(), vec![PartitionKey::new("C", "R3")]);
        assert_eq!(manager.read_marker().await.unwrap().unwrap().version, 2);

        assert!(matches!(manager.read_version(7).await, Err(Error::InvalidInput(_))));
    }
}
