pub mod client;
pub mod models;
pub mod pipeline;
pub mod raw;
pub mod utils;

use common::config::Settings;
use common::storage::build_storage;
use common::Result;

pub use pipeline::{BronzeOutcome, BronzePipeline};

/// Loads settings and runs the ingestion stage once.
pub async fn run_etl_pipeline(config_path: &str) -> Result<BronzeOutcome> {
    let settings = Settings::new(config_path)?;
    common::telemetry::init_tracing(&settings.logging)?;

    let storage = build_storage(&settings.storage)?;
    BronzePipeline::from_settings(&settings, storage)?.run().await
}
