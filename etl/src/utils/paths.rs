use common::storage::join_key;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::RunRef;

pub const MANIFEST_FILE: &str = "_manifest.json";

static RUN_PATH_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"ingestion_date=(?P<date>\d{4}-\d{2}-\d{2})/run_id=(?P<run_id>\d{8}_\d{6})(/|$)")
        .expect("Invalid run path regex")
});

/// Raw layer keys: `<base>/ingestion_date=YYYY-MM-DD/run_id=YYYYMMDD_HHMMSS/...`.
#[derive(Debug, Clone)]
pub struct PathBuilder {
    base: String,
    ingestion_date: String,
    run_id: String,
}

impl PathBuilder {
    pub fn new(base: &str, run: &RunRef) -> Self {
        Self {
            base: base.trim_matches('/').to_string(),
            ingestion_date: run.ingestion_date.clone(),
            run_id: run.run_id.clone(),
        }
    }

    pub fn run_dir(&self) -> String {
        join_key(&[
            &self.base,
            &format!("ingestion_date={}", self.ingestion_date),
            &format!("run_id={}", self.run_id),
        ])
    }

    pub fn page_file_name(page: u32) -> String {
        format!("page={:04}.jsonl", page)
    }

    pub fn file_key(&self, file_name: &str) -> String {
        join_key(&[&self.run_dir(), file_name])
    }

    pub fn page_key(&self, page: u32) -> String {
        self.file_key(&Self::page_file_name(page))
    }

    pub fn manifest_key(&self) -> String {
        self.file_key(MANIFEST_FILE)
    }
}

/// Extracts the run a raw key belongs to.
pub fn parse_run_ref(key: &str) -> Option<RunRef> {
    RUN_PATH_REGEX.captures(key).and_then(|caps| {
        let date = caps.name("date")?.as_str();
        let run_id = caps.name("run_id")?.as_str();
        Some(RunRef::new(date, run_id))
    })
}
