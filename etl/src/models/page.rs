use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Domain filters sent as query parameters, kept sorted so URLs are stable.
pub type Filters = BTreeMap<String, String>;

/// One API response worth of untyped records.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// 1-based page number as requested.
    pub number: u32,
    pub records: Vec<Value>,
}

impl Page {
    pub fn new(number: u32, records: Vec<Value>) -> Self {
        Self { number, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiMetadata {
    /// `None` when the metadata call failed or the figure was unreadable.
    pub total: Option<u64>,
}

impl ApiMetadata {
    pub fn unknown() -> Self {
        Self { total: None }
    }

    /// Reads `total` from a metadata body; the API sends it either as a
    /// number or as a numeric string.
    pub fn from_json(body: &Value) -> Self {
        Self {
            total: body.get("total").and_then(parse_count),
        }
    }
}

pub(crate) fn parse_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_total_accepts_number_or_string() {
        assert_eq!(ApiMetadata::from_json(&json!({"total": 8234})).total, Some(8234));
        assert_eq!(ApiMetadata::from_json(&json!({"total": "8234"})).total, Some(8234));
        assert_eq!(ApiMetadata::from_json(&json!({"total": "lots"})).total, None);
        assert_eq!(ApiMetadata::from_json(&json!({"page": 1})).total, None);
    }
}
