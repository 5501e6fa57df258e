use common::storage::join_key;

pub const SUCCESS_MARKER: &str = "_SUCCESS";
pub const SUMMARY_FILE: &str = "_summary.json";
pub const HISTORY_DIR: &str = "_history";
pub const LOG_DIR: &str = "_log";

/// Encodes a partition value as one path segment. ASCII alphanumerics, space,
/// `-` and `_` pass through; every other byte becomes `.HH`, `.` included, so
/// decoding is unambiguous and object stores never re-encode the key.
pub fn escape_partition_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_ascii_alphanumeric() || c == ' ' || c == '-' || c == '_' {
            out.push(c);
        } else {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!(".{:02X}", byte));
            }
        }
    }
    out
}

pub fn unescape_partition_value(segment: &str) -> Option<String> {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'.' {
            let hex = segment.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Keys of the cleaned table: `<base>/country=<c>/state_province=<r>/part-<run>-v<version>.parquet`.
/// Files retired by a later version move under `<base>/_history/` with the same relative key.
#[derive(Debug, Clone)]
pub struct PathBuilder {
    base: String,
}

impl PathBuilder {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn country_dir(&self, country: &str) -> String {
        join_key(&[&self.base, &format!("country={}", escape_partition_value(country))])
    }

    pub fn partition_dir(&self, country: &str, region: &str) -> String {
        join_key(&[
            &self.country_dir(country),
            &format!("state_province={}", escape_partition_value(region)),
        ])
    }

    pub fn part_file(&self, country: &str, region: &str, run_id: &str, version: u64) -> String {
        join_key(&[
            &self.partition_dir(country, region),
            &format!("part-{}-v{}.parquet", run_id, version),
        ])
    }

    pub fn history_dir(&self) -> String {
        join_key(&[&self.base, HISTORY_DIR])
    }

    /// Where `key` lives once retired.
    pub fn history_key(&self, key: &str) -> String {
        let relative = key
            .strip_prefix(self.base.as_str())
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(key);
        join_key(&[&self.history_dir(), relative])
    }

    pub fn is_history(&self, key: &str) -> bool {
        key.strip_prefix(self.history_dir().as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    pub fn log_dir(&self) -> String {
        join_key(&[&self.base, LOG_DIR])
    }

    pub fn view_log_dir(&self, view: &str) -> String {
        join_key(&[&self.log_dir(), view])
    }

    pub fn view_dir(&self, view: &str) -> String {
        join_key(&[&self.base, view])
    }

    pub fn view_file(&self, view: &str, run_id: &str) -> String {
        join_key(&[&self.view_dir(view), &format!("part-{}.parquet", run_id)])
    }

    pub fn marker_key(&self) -> String {
        join_key(&[&self.base, SUCCESS_MARKER])
    }

    pub fn summary_key(&self) -> String {
        join_key(&[&self.base, SUMMARY_FILE])
    }
}

/// Recovers `(country, region)` from a partition file key.
pub fn parse_partition(key: &str) -> Option<(String, String)> {
    let mut country = None;
    let mut region = None;
    for segment in key.split('/') {
        if let Some(value) = segment.strip_prefix("country=") {
            country = unescape_partition_value(value);
        } else if let Some(value) = segment.strip_prefix("state_province=") {
            region = unescape_partition_value(value);
        }
    }
    Some((country?, region?))
}

pub fn is_parquet(key: &str) -> bool {
    key.ends_with(".parquet")
}
