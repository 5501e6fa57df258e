#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use common::config::{ApiConfig, Settings};
use etl::client::{Transport, TransportError, TransportResponse};
use serde_json::{json, Value};
use std::sync::Mutex;
use url::Url;

/// Serves a fixed catalogue the way the brewery API pages it.
pub struct CatalogueTransport {
    records: Vec<Value>,
    total: Option<u64>,
    requests: Mutex<Vec<String>>,
}

impl CatalogueTransport {
    /// Metadata reports the true record count.
    pub fn new(records: Vec<Value>) -> Self {
        let total = Some(records.len() as u64);
        Self {
            records,
            total,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Metadata reports `total`, or fails with 404 when `None`.
    pub fn with_total(mut self, total: Option<u64>) -> Self {
        self.total = total;
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn query(url: &Url, key: &str) -> Option<usize> {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.parse().ok())
    }
}

fn respond(status: u16, body: Value) -> Result<TransportResponse, TransportError> {
    Ok(TransportResponse {
        status,
        body: Bytes::from(body.to_string()),
    })
}

#[async_trait]
impl Transport for CatalogueTransport {
    async fn get(&self, url: &Url) -> Result<TransportResponse, TransportError> {
        self.requests.lock().unwrap().push(url.to_string());

        if url.path().ends_with("/meta") {
            return match self.total {
                Some(total) => respond(200, json!({"total": total.to_string(), "page": 1, "per_page": 50})),
                None => respond(404, json!({"message": "not found"})),
            };
        }

        let page = Self::query(url, "page").unwrap_or(1).max(1);
        let per_page = Self::query(url, "per_page").unwrap_or(50);
        let start = (page - 1) * per_page;
        let slice: Vec<Value> = self.records.iter().skip(start).take(per_page).cloned().collect();
        respond(200, Value::Array(slice))
    }
}

pub fn brewery(id: &str, country: &str, region: &str, kind: &str) -> Value {
    json!({
        "id": id,
        "name": format!("Brewery {}", id),
        "brewery_type": kind,
        "city": "Springfield",
        "state_province": region,
        "country": country,
        "latitude": "45.0",
        "longitude": -93.5,
        "phone": null,
    })
}

/// Country A: three of type x and two of type y. Country B: one x, one z.
pub fn seven_breweries() -> Vec<Value> {
    vec![
        brewery("a1", "A", "North", "x"),
        brewery("a2", "A", "North", "x"),
        brewery("a3", "A", "South", "x"),
        brewery("a4", "A", "South", "y"),
        brewery("a5", "A", "North", "y"),
        brewery("b1", "B", "East", "x"),
        brewery("b2", "B", "East", "z"),
    ]
}

pub fn many_breweries(n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| brewery(&format!("id-{:03}", i), "United States", "Oregon", "micro"))
        .collect()
}

pub fn api_config(per_page: u32) -> ApiConfig {
    ApiConfig {
        per_page,
        max_retries: 1,
        backoff_factor: 0.0,
        page_delay_ms: 0,
        max_pages: 100,
        ..ApiConfig::default()
    }
}

pub fn settings(per_page: u32) -> Settings {
    Settings {
        api: api_config(per_page),
        ..Settings::default()
    }
}
