use chrono::Utc;
use common::{Error, Result};
use datafusion::prelude::SessionContext;
use tracing::debug;

use super::types::{
    AggregateRow, AggregateTable, AggregateView, AggregationStats, CountryCount, GoldSummary,
    RegionCount, TypeCount,
};
use crate::models::schema::{LATITUDE, LONGITUDE, SILVER_COLUMNS};
use crate::processor::silver::types::CleanedTable;
use crate::processor::table::{run_step, GroupCount, COUNT_COLUMN};
use crate::utils::arrow::{i64_column, opt_str, string_column};

/// Grouped counts over a cleaned table. Every result is checked to account
/// for each input record exactly once.
pub struct AggregationEngine {
    ctx: SessionContext,
}

impl Default for AggregationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregationEngine {
    pub fn new() -> Self {
        Self {
            ctx: SessionContext::new(),
        }
    }

    pub async fn aggregate(&self, table: &CleanedTable, keys: &[&str]) -> Result<Vec<AggregateRow>> {
        if keys.is_empty() {
            return Err(Error::Aggregation("at least one grouping key is required".to_string()));
        }
        if let Some(bad) = keys
            .iter()
            .find(|k| !SILVER_COLUMNS.contains(k) || **k == LATITUDE || **k == LONGITUDE)
        {
            return Err(Error::Aggregation(format!("cannot group by '{}'", bad)));
        }

        let step = GroupCount::new(keys);
        let batches = run_step(&self.ctx, &step, vec![table.to_record_batch()?]).await?;

        let mut rows = Vec::new();
        for batch in &batches {
            let key_columns = keys
                .iter()
                .map(|k| string_column(batch, k))
                .collect::<Result<Vec<_>>>()?;
            let counts = i64_column(batch, COUNT_COLUMN)?;
            for row in 0..batch.num_rows() {
                let group = key_columns.iter().map(|c| opt_str(c, row)).collect();
                rows.push(AggregateRow::new(group, counts.value(row).max(0) as u64));
            }
        }

        let total: u64 = rows.iter().map(|r| r.count).sum();
        if total != table.len() as u64 {
            return Err(Error::Aggregation(format!(
                "grouping by {:?} accounts for {} records but the table has {}",
                keys,
                total,
                table.len()
            )));
        }
        debug!(?keys, groups = rows.len(), total, "Aggregated");
        Ok(rows)
    }

    pub async fn aggregate_view(&self, table: &CleanedTable, view: AggregateView) -> Result<AggregateTable> {
        Ok(AggregateTable {
            view,
            rows: self.aggregate(table, view.keys()).await?,
        })
    }

    /// Region counts, restricted to one country when `country` is given.
    /// The country must match exactly.
    pub async fn regions(&self, table: &CleanedTable, country: Option<&str>) -> Result<AggregateTable> {
        let Some(country) = country else {
            return self.aggregate_view(table, AggregateView::ByRegion).await;
        };
        let subset = CleanedTable::new(
            table
                .records()
                .iter()
                .filter(|r| r.country == country)
                .cloned()
                .collect(),
        );
        debug!(country, records = subset.len(), "Filtered regions by country");
        self.aggregate_view(&subset, AggregateView::ByRegion).await
    }

    pub async fn aggregate_all(&self, table: &CleanedTable) -> Result<Vec<AggregateTable>> {
        let mut views = Vec::with_capacity(AggregateView::ALL.len());
        for view in AggregateView::ALL {
            views.push(self.aggregate_view(table, view).await?);
        }
        Ok(views)
    }

    pub async fn summarize(&self, table: &CleanedTable, top_n: usize) -> Result<GoldSummary> {
        let views = self.aggregate_all(table).await?;
        summarize_views(table.len() as u64, &views, top_n)
    }
}

fn find_view(views: &[AggregateTable], view: AggregateView) -> Result<&AggregateTable> {
    views
        .iter()
        .find(|v| v.view == view)
        .ok_or_else(|| Error::Aggregation(format!("view {} was not computed", view.table_name())))
}

/// Builds the summary from already computed views.
pub fn summarize_views(total_records: u64, views: &[AggregateTable], top_n: usize) -> Result<GoldSummary> {
    let by_type: Vec<TypeCount> = find_view(views, AggregateView::ByType)?
        .rows
        .iter()
        .map(|r| TypeCount {
            brewery_type: r.key(0).map(str::to_string),
            brewery_count: r.count,
        })
        .collect();

    let by_country: Vec<CountryCount> = find_view(views, AggregateView::ByCountry)?
        .rows
        .iter()
        .map(|r| CountryCount {
            country: r.key(0).unwrap_or_default().to_string(),
            brewery_count: r.count,
        })
        .collect();

    let regions = &find_view(views, AggregateView::ByRegion)?.rows;
    let top_regions: Vec<RegionCount> = regions
        .iter()
        .take(top_n)
        .map(|r| RegionCount {
            country: r.key(0).unwrap_or_default().to_string(),
            state_province: r.key(1).unwrap_or_default().to_string(),
            brewery_count: r.count,
        })
        .collect();

    Ok(GoldSummary {
        total_records,
        total_countries: by_country.len(),
        total_regions: regions.len(),
        total_types: by_type.iter().filter(|t| t.brewery_type.is_some()).count(),
        by_type,
        by_country,
        top_regions,
        generated_at: Utc::now(),
    })
}

pub fn aggregation_stats(table: &CleanedTable, main: &AggregateTable) -> AggregationStats {
    let counts: Vec<u64> = main.rows.iter().map(|r| r.count).collect();
    let total = main.total();
    AggregationStats {
        total_rows: counts.len(),
        total_breweries: total,
        unique_countries: table.unique_countries(),
        unique_regions: table.unique_regions(),
        unique_types: table.unique_types(),
        avg_breweries_per_group: if counts.is_empty() {
            0.0
        } else {
            total as f64 / counts.len() as f64
        },
        max_breweries_in_group: counts.iter().copied().max().unwrap_or(0),
        min_breweries_in_group: counts.iter().copied().min().unwrap_or(0),
    }
}
