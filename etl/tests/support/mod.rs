#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use common::config::ApiConfig;
use etl::client::{Transport, TransportError, TransportResponse};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use url::Url;

pub type Reply = Result<TransportResponse, TransportError>;

pub fn ok_json(value: Value) -> Reply {
    Ok(TransportResponse {
        status: 200,
        body: Bytes::from(value.to_string()),
    })
}

pub fn status(code: u16) -> Reply {
    Ok(TransportResponse {
        status: code,
        body: Bytes::from_static(b"{}"),
    })
}

pub fn timeout() -> Reply {
    Err(TransportError::Timeout("operation timed out".to_string()))
}

pub fn records(prefix: &str, n: usize) -> Value {
    Value::Array(
        (0..n)
            .map(|i| json!({"id": format!("{}-{}", prefix, i), "name": format!("Brewery {}", i)}))
            .collect(),
    )
}

/// Replays canned replies per route. A route's last reply repeats once its
/// queue is down to one entry. Unscripted pages answer with an empty array;
/// unscripted metadata and records answer 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn meta(self, replies: Vec<Reply>) -> Self {
        self.route("meta", replies)
    }

    pub fn page(self, number: u32, replies: Vec<Reply>) -> Self {
        self.route(&format!("page={}", number), replies)
    }

    pub fn record(self, id: &str, replies: Vec<Reply>) -> Self {
        self.route(&format!("id={}", id), replies)
    }

    fn route(self, key: &str, replies: Vec<Reply>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(key.to_string(), replies.into_iter().collect());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn page_calls(&self) -> Vec<String> {
        self.calls().into_iter().filter(|c| c.starts_with("page=")).collect()
    }

    fn route_key(url: &Url) -> String {
        if url.path().ends_with("/meta") {
            return "meta".to_string();
        }
        if let Some(id) = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|last| *last != "breweries")
        {
            return format!("id={}", id);
        }
        let page = url
            .query_pairs()
            .find(|(k, _)| k == "page")
            .map(|(_, v)| v.to_string())
            .unwrap_or_default();
        format!("page={}", page)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &Url) -> Result<TransportResponse, TransportError> {
        let key = Self::route_key(url);
        self.calls.lock().unwrap().push(key.clone());

        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if queue.len() == 1 => queue[0].clone(),
            _ if key == "meta" || key.starts_with("id=") => status(404),
            _ => ok_json(json!([])),
        }
    }
}

pub fn api_config(per_page: u32) -> ApiConfig {
    ApiConfig {
        per_page,
        max_retries: 3,
        backoff_factor: 0.0,
        page_delay_ms: 0,
        max_pages: 50,
        ..ApiConfig::default()
    }
}
