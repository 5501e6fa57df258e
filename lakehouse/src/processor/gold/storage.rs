use arrow::array::{ArrayRef, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use chrono::Utc;
use common::config::GoldWriteMode;
use common::storage::ObjectStorage;
use common::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info};

use super::types::{AggregateRow, AggregateTable, AggregateView, GoldSummary, ViewCommit, ViewWrite};
use crate::processor::log::CommitLog;
use crate::processor::table::COUNT_COLUMN;
use crate::utils::arrow::{decode_parquet, encode_parquet, i64_column, opt_str, string_column};
use crate::utils::paths::{is_parquet, PathBuilder};

pub fn view_schema(view: AggregateView) -> SchemaRef {
    let mut fields: Vec<Field> = view
        .keys()
        .iter()
        .map(|k| Field::new(*k, DataType::Utf8, true))
        .collect();
    fields.push(Field::new(COUNT_COLUMN, DataType::Int64, false));
    Arc::new(Schema::new(fields))
}

pub fn view_to_batch(table: &AggregateTable) -> Result<RecordBatch> {
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(table.view.keys().len() + 1);
    for index in 0..table.view.keys().len() {
        columns.push(Arc::new(StringArray::from(
            table.rows.iter().map(|r| r.key(index)).collect::<Vec<_>>(),
        )));
    }
    columns.push(Arc::new(Int64Array::from(
        table.rows.iter().map(|r| r.count as i64).collect::<Vec<_>>(),
    )));
    Ok(RecordBatch::try_new(view_schema(table.view), columns)?)
}

fn batch_to_rows(view: AggregateView, batch: &RecordBatch) -> Result<Vec<AggregateRow>> {
    let keys = view
        .keys()
        .iter()
        .map(|k| string_column(batch, k))
        .collect::<Result<Vec<_>>>()?;
    let counts = i64_column(batch, COUNT_COLUMN)?;
    Ok((0..batch.num_rows())
        .map(|row| {
            AggregateRow::new(
                keys.iter().map(|c| opt_str(c, row)).collect(),
                counts.value(row).max(0) as u64,
            )
        })
        .collect())
}

/// The aggregate layer: one directory per view plus `_summary.json`.
pub struct GoldStorage {
    storage: Arc<dyn ObjectStorage>,
    paths: PathBuilder,
}

impl GoldStorage {
    pub fn new(storage: Arc<dyn ObjectStorage>, gold_prefix: &str) -> Self {
        Self {
            storage,
            paths: PathBuilder::new(gold_prefix),
        }
    }

    pub fn prefix(&self) -> &str {
        self.paths.base()
    }

    pub fn summary_key(&self) -> String {
        self.paths.summary_key()
    }

    pub fn view_dir(&self, view: AggregateView) -> String {
        self.paths.view_dir(view.table_name())
    }

    fn view_log(&self, view: AggregateView) -> CommitLog {
        CommitLog::new(self.storage.clone(), self.paths.view_log_dir(view.table_name()))
    }

    pub async fn write_view(
        &self,
        table: &AggregateTable,
        run_id: &str,
        mode: GoldWriteMode,
    ) -> Result<ViewWrite> {
        let name = table.view.table_name();
        let bytes = encode_parquet(
            &view_to_batch(table)?,
            &[
                ("layer", "gold".to_string()),
                ("view", name.to_string()),
                ("run_id", run_id.to_string()),
                ("total", table.total().to_string()),
            ],
        )?;

        if mode == GoldWriteMode::Overwrite {
            let deleted = self.storage.delete_prefix(&self.view_dir(table.view)).await?;
            debug!(view = name, deleted, "Cleared view before write");
        }

        let key = self.paths.view_file(name, run_id);
        self.storage.put_object(&key, &bytes).await?;

        let log = self.view_log(table.view);
        let version = log.next_version().await?;
        let commit = ViewCommit {
            version,
            view: table.view,
            run_id: run_id.to_string(),
            created_at: Utc::now(),
            write_mode: mode,
            rows: table.rows.len(),
            total: table.total(),
            files: self.view_files(table.view).await?,
        };
        log.append(version, &commit).await?;
        info!(
            view = name,
            version,
            rows = table.rows.len(),
            total = table.total(),
            key = %key,
            "Gold view written"
        );

        Ok(ViewWrite {
            view: table.view,
            table_name: name.to_string(),
            version,
            key,
            rows: table.rows.len(),
            total: table.total(),
        })
    }

    /// Up to `limit` writes of `view`, newest first.
    pub async fn table_history(&self, view: AggregateView, limit: usize) -> Result<Vec<ViewCommit>> {
        self.view_log(view).history(limit).await
    }

    pub async fn current_version(&self, view: AggregateView) -> Result<Option<u64>> {
        self.view_log(view).latest_version().await
    }

    pub async fn view_files(&self, view: AggregateView) -> Result<Vec<String>> {
        Ok(self
            .storage
            .list_objects(&self.view_dir(view))
            .await?
            .into_iter()
            .filter(|k| is_parquet(k))
            .collect())
    }

    pub async fn view_exists(&self, view: AggregateView) -> Result<bool> {
        Ok(!self.view_files(view).await?.is_empty())
    }

    /// Concatenates every file of the view in key order.
    pub async fn read_view(&self, view: AggregateView) -> Result<AggregateTable> {
        let mut rows = Vec::new();
        for key in self.view_files(view).await? {
            for batch in decode_parquet(self.storage.get_object(&key).await?)? {
                rows.extend(batch_to_rows(view, &batch)?);
            }
        }
        Ok(AggregateTable { view, rows })
    }

    pub async fn write_summary(&self, summary: &GoldSummary) -> Result<String> {
        let key = self.paths.summary_key();
        self.storage
            .put_object(&key, &serde_json::to_vec_pretty(summary)?)
            .await?;
        Ok(key)
    }

    pub async fn summary_exists(&self) -> Result<bool> {
        self.storage.check_file_exists(&self.paths.summary_key()).await
    }

    /// The summary as raw JSON, so a partial document can still be inspected.
    pub async fn read_summary_json(&self) -> Result<Option<serde_json::Value>> {
        let key = self.paths.summary_key();
        if !self.storage.check_file_exists(&key).await? {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&self.storage.get_object(&key).await?)?))
    }

    pub async fn read_summary(&self) -> Result<Option<GoldSummary>> {
        match self.read_summary_json().await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| Error::Aggregation(format!("malformed summary: {}", e))),
            None => Ok(None),
        }
    }
}
