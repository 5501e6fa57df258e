pub mod storage;
pub mod transform;
pub mod types;

use common::config::{Settings, SilverWriteMode};
use common::storage::ObjectStorage;
use common::{Error, Result};
use etl::models::RunRef;
use etl::raw::RawReader;
use std::sync::Arc;
use tracing::info;

use storage::StorageManager;
use types::SilverOutcome;

/// Raw run in, partitioned cleaned table out.
pub struct SilverProcessor {
    reader: RawReader,
    storage_manager: StorageManager,
    write_mode: SilverWriteMode,
}

impl SilverProcessor {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        raw_prefix: &str,
        silver_prefix: &str,
        write_mode: SilverWriteMode,
    ) -> Self {
        Self {
            reader: RawReader::new(storage.clone(), raw_prefix),
            storage_manager: StorageManager::new(storage, silver_prefix),
            write_mode,
        }
    }

    pub fn from_settings(settings: &Settings, storage: Arc<dyn ObjectStorage>) -> Self {
        Self::new(
            storage,
            &settings.storage.raw_prefix,
            &settings.storage.silver_prefix,
            settings.pipeline.silver_write_mode,
        )
    }

    pub fn storage_manager(&self) -> &StorageManager {
        &self.storage_manager
    }

    /// Cleans `run`, or the latest raw run when `None`. Unreadable input
    /// aborts before anything is written.
    pub async fn process_to_silver(&self, run: Option<RunRef>) -> Result<SilverOutcome> {
        let run = match run {
            Some(run) => run,
            None => self
                .reader
                .latest_run()
                .await
                .map_err(|e| Error::Transform(format!("cannot list raw runs: {}", e)))?
                .ok_or_else(|| {
                    Error::Transform(format!("no raw runs under {}", self.reader.base_prefix()))
                })?,
        };
        info!(run = %run, "Silver: reading raw run");

        let batch = self.reader.read_run(&run).await.map_err(|e| match e {
            Error::Manifest(_) => e,
            other => Error::Transform(format!("cannot read raw run {}: {}", run, other)),
        })?;

        let (table, summary) = transform::transform(&batch.records);

        let write = self
            .storage_manager
            .write_table(&table, &run.run_id, self.write_mode)
            .await
            .map_err(|e| Error::Transform(format!("cannot write cleaned table: {}", e)))?;

        info!(
            run = %run,
            raw = summary.raw_record_count,
            cleaned = summary.cleaned_record_count,
            removed = summary.records_removed,
            partitions = write.partitions_written,
            "Silver transformation complete"
        );
        Ok(SilverOutcome {
            run,
            silver_prefix: self.storage_manager.prefix().to_string(),
            summary,
            write,
        })
    }
}
