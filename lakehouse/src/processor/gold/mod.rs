pub mod aggregate;
pub mod storage;
pub mod types;

use common::config::{GoldWriteMode, Settings};
use common::storage::ObjectStorage;
use common::{Error, Result};
use std::sync::Arc;
use tracing::info;

use crate::processor::silver::storage::StorageManager;
use aggregate::{aggregation_stats, summarize_views, AggregationEngine};
use storage::GoldStorage;
use types::{AggregateView, GoldOutcome};

/// Cleaned table in, grouped views and summary out.
pub struct GoldProcessor {
    silver: StorageManager,
    gold: GoldStorage,
    engine: AggregationEngine,
    write_mode: GoldWriteMode,
    top_n: usize,
}

impl GoldProcessor {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        silver_prefix: &str,
        gold_prefix: &str,
        write_mode: GoldWriteMode,
        top_n: usize,
    ) -> Self {
        Self {
            silver: StorageManager::new(storage.clone(), silver_prefix),
            gold: GoldStorage::new(storage, gold_prefix),
            engine: AggregationEngine::new(),
            write_mode,
            top_n,
        }
    }

    pub fn from_settings(settings: &Settings, storage: Arc<dyn ObjectStorage>) -> Self {
        Self::new(
            storage,
            &settings.storage.silver_prefix,
            &settings.storage.gold_prefix,
            settings.pipeline.gold_write_mode,
            settings.pipeline.top_n,
        )
    }

    pub fn gold_storage(&self) -> &GoldStorage {
        &self.gold
    }

    /// Aggregates the current cleaned table. `run_id` labels the output
    /// files and defaults to the run recorded in the cleaned table's marker.
    pub async fn process_to_gold(&self, run_id: Option<String>) -> Result<GoldOutcome> {
        let marker = self
            .silver
            .read_marker()
            .await
            .map_err(|e| Error::Aggregation(format!("cannot read cleaned table marker: {}", e)))?
            .ok_or_else(|| {
                Error::Aggregation(format!("cleaned table at {} is not complete", self.silver.prefix()))
            })?;
        let run_id = run_id.unwrap_or(marker.run_id);

        let table = self
            .silver
            .read_table()
            .await
            .map_err(|e| Error::Aggregation(format!("cannot read cleaned table: {}", e)))?;
        info!(run_id = %run_id, records = table.len(), "Gold: aggregating cleaned table");

        let views = self.engine.aggregate_all(&table).await?;
        let summary = summarize_views(table.len() as u64, &views, self.top_n)?;
        let main = views
            .iter()
            .find(|v| v.view == AggregateView::MAIN)
            .ok_or_else(|| Error::Aggregation("main view missing".to_string()))?;
        let stats = aggregation_stats(&table, main);

        let mut writes = Vec::with_capacity(views.len());
        for view in &views {
            writes.push(self.gold.write_view(view, &run_id, self.write_mode).await?);
        }
        let summary_key = self.gold.write_summary(&summary).await?;

        info!(
            run_id = %run_id,
            views = writes.len(),
            groups = stats.total_rows,
            total = stats.total_breweries,
            "Gold aggregation complete"
        );
        Ok(GoldOutcome {
            run_id,
            gold_prefix: self.gold.prefix().to_string(),
            cleaned_record_count: table.len(),
            views: writes,
            summary_key,
            summary,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Brewery;
    use crate::processor::silver::types::CleanedTable;
    use common::config::SilverWriteMode;
    use common::storage::ObjectStoreStorage;

    fn brewery(id: &str, country: &str, region: &str, kind: &str) -> Brewery {
        Brewery {
            id: id.to_string(),
            name: None,
            brewery_type: Some(kind.to_string()),
            address_1: None,
            address_2: None,
            address_3: None,
            city: None,
            state_province: region.to_string(),
            postal_code: None,
            country: country.to_string(),
            longitude: None,
            latitude: None,
            phone: None,
            website_url: None,
        }
    }

    #[tokio::test]
    async fn missing_cleaned_table_is_an_aggregation_error() {
        let storage: Arc<dyn ObjectStorage> = Arc::new(ObjectStoreStorage::in_memory());
        let gold = GoldProcessor::new(storage, "silver", "gold", GoldWriteMode::Overwrite, 10);
        assert!(matches!(gold.process_to_gold(None).await, Err(Error::Aggregation(_))));
    }

    #[tokio::test]
    async fn counts_by_country_and_type() {
        let storage: Arc<dyn ObjectStorage> = Arc::new(ObjectStoreStorage::in_memory());
        let mut records = Vec::new();
        for i in 0..5 {
            records.push(brewery(&format!("a{}", i), "A", "R1", if i < 4 { "x" } else { "y" }));
        }
        records.push(brewery("b0", "B", "R2", "y"));
        records.push(brewery("b1", "B", "R2", "z"));
        StorageManager::new(storage.clone(), "silver")
            .write_table(&CleanedTable::new(records), "run7", SilverWriteMode::OverwritePartitions)
            .await
            .unwrap();

        let gold = GoldProcessor::new(storage, "silver", "gold", GoldWriteMode::Overwrite, 10);
        let outcome = gold.process_to_gold(None).await.unwrap();
        assert_eq!(outcome.run_id, "run7");
        assert_eq!(outcome.summary.total_records, 7);

        let countries: Vec<(String, u64)> = outcome
            .summary
            .by_country
            .iter()
            .map(|c| (c.country.clone(), c.brewery_count))
            .collect();
        assert_eq!(countries, vec![("A".to_string(), 5), ("B".to_string(), 2)]);

        let types: Vec<(Option<String>, u64)> = outcome
            .summary
            .by_type
            .iter()
            .map(|t| (t.brewery_type.clone(), t.brewery_count))
            .collect();
        assert_eq!(
            types,
            vec![
                (Some("x".to_string()), 4),
                (Some("y".to_string()), 2),
                (Some("z".to_string()), 1)
            ]
        );

        for view in AggregateView::ALL {
            assert_eq!(gold.gold_storage().read_view(view).await.unwrap().total(), 7);
        }
        assert_eq!(outcome.views.len(), 4);
    }
}
