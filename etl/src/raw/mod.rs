mod reader;
mod writer;

pub use reader::{RawBatch, RawReader};
pub use writer::{
    sha256_hex, RawWriter, WriterSummary, INGESTED_AT_FIELD, INGESTION_DATE_FIELD, RUN_ID_FIELD,
};
