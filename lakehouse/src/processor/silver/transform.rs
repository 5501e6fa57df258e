//! Record-level cleaning. Each step is a plain function so the ordering
//! project, normalize, validate coordinates, default partition keys,
//! deduplicate, drop null ids can be tested one step at a time.

use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::{debug, info};

use super::types::{CleanedTable, TransformSummary};
use crate::models::schema::{
    self, is_known_brewery_type, Brewery, LATITUDE_RANGE, LONGITUDE_RANGE, SILVER_COLUMNS, UNKNOWN,
};

/// Raw object restricted to the canonical fields. Absent fields are `Null`.
#[derive(Debug, Clone, PartialEq)]
pub struct Projected(Map<String, Value>);

impl Projected {
    pub fn get(&self, field: &str) -> &Value {
        self.0.get(field).unwrap_or(&Value::Null)
    }
}

/// A record between normalization and the final null-id drop. Every field
/// may still be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StagedRecord {
    pub id: Option<String>,
    pub name: Option<String>,
    pub brewery_type: Option<String>,
    pub address_1: Option<String>,
    pub address_2: Option<String>,
    pub address_3: Option<String>,
    pub city: Option<String>,
    pub state_province: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub phone: Option<String>,
    pub website_url: Option<String>,
}

pub fn project(raw: &Value) -> Projected {
    let mut fields = Map::new();
    for column in SILVER_COLUMNS {
        let value = raw.get(column).cloned().unwrap_or(Value::Null);
        fields.insert(column.to_string(), value);
    }
    Projected(fields)
}

/// Trimmed text; blank becomes `None`. Scalars are rendered, containers dropped.
fn text(value: &Value) -> Option<String> {
    let rendered = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    if rendered.is_empty() { None } else { Some(rendered) }
}

/// `Ok(None)` for a missing value, `Err(())` for one that is present but not
/// a finite number.
fn coordinate(value: &Value) -> Result<Option<f64>, ()> {
    let parsed = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_f64(),
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(()),
    }
}

pub fn normalize(projected: &Projected, summary: &mut TransformSummary) -> StagedRecord {
    let mut parse_coordinate = |field: &str| match coordinate(projected.get(field)) {
        Ok(v) => v,
        Err(()) => {
            summary.unparsable_coordinates += 1;
            None
        }
    };
    let longitude = parse_coordinate(schema::LONGITUDE);
    let latitude = parse_coordinate(schema::LATITUDE);

    let brewery_type = text(projected.get(schema::BREWERY_TYPE)).map(|t| t.to_lowercase());
    if let Some(kind) = &brewery_type {
        if !is_known_brewery_type(kind) {
            summary.unrecognized_types += 1;
        }
    }

    StagedRecord {
        id: text(projected.get(schema::ID)),
        name: text(projected.get(schema::NAME)),
        brewery_type,
        address_1: text(projected.get("address_1")),
        address_2: text(projected.get("address_2")),
        address_3: text(projected.get("address_3")),
        city: text(projected.get("city")),
        state_province: text(projected.get(schema::REGION)),
        postal_code: text(projected.get("postal_code")),
        country: text(projected.get(schema::COUNTRY)),
        longitude,
        latitude,
        phone: text(projected.get("phone")),
        website_url: text(projected.get("website_url")),
    }
}

fn within((low, high): (f64, f64), value: f64) -> bool {
    (low..=high).contains(&value)
}

/// Nulls out-of-range coordinates. The bounds themselves are valid.
pub fn validate_coordinates(record: &mut StagedRecord, summary: &mut TransformSummary) {
    if record.latitude.is_some_and(|v| !within(LATITUDE_RANGE, v)) {
        record.latitude = None;
        summary.coordinates_nulled += 1;
    }
    if record.longitude.is_some_and(|v| !within(LONGITUDE_RANGE, v)) {
        record.longitude = None;
        summary.coordinates_nulled += 1;
    }
}

pub fn default_partition_keys(record: &mut StagedRecord, summary: &mut TransformSummary) {
    for key in [&mut record.country, &mut record.state_province] {
        if key.is_none() {
            *key = Some(UNKNOWN.to_string());
            summary.partition_keys_defaulted += 1;
        }
    }
}

/// Keeps the first record seen for each id, in input order, then sorts the
/// survivors by id. Records without an id are all kept for the drop step.
/// Returns the survivors and how many duplicates were removed.
pub fn deduplicate(records: Vec<StagedRecord>) -> (Vec<StagedRecord>, usize) {
    let before = records.len();
    let mut seen: HashSet<String> = HashSet::with_capacity(before);
    let mut survivors: Vec<StagedRecord> = records
        .into_iter()
        .filter(|record| match &record.id {
            Some(id) => seen.insert(id.clone()),
            None => true,
        })
        .collect();
    survivors.sort_by(|a, b| a.id.cmp(&b.id));
    let removed = before - survivors.len();
    (survivors, removed)
}

/// Drops records whose id is missing. Returns the cleaned records and the
/// number dropped.
pub fn drop_null_ids(records: Vec<StagedRecord>) -> (Vec<Brewery>, usize) {
    let before = records.len();
    let kept: Vec<Brewery> = records
        .into_iter()
        .filter_map(|r| {
            Some(Brewery {
                id: r.id?,
                name: r.name,
                brewery_type: r.brewery_type,
                address_1: r.address_1,
                address_2: r.address_2,
                address_3: r.address_3,
                city: r.city,
                state_province: r.state_province.unwrap_or_else(|| UNKNOWN.to_string()),
                postal_code: r.postal_code,
                country: r.country.unwrap_or_else(|| UNKNOWN.to_string()),
                longitude: r.longitude,
                latitude: r.latitude,
                phone: r.phone,
                website_url: r.website_url,
            })
        })
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

/// Cleans one raw batch. Field-level problems never fail the batch; they are
/// nulled and counted in the summary.
pub fn transform(raw: &[Value]) -> (CleanedTable, TransformSummary) {
    let mut summary = TransformSummary {
        raw_record_count: raw.len(),
        ..Default::default()
    };

    let staged: Vec<StagedRecord> = raw
        .iter()
        .map(|value| {
            let projected = project(value);
            let mut record = normalize(&projected, &mut summary);
            validate_coordinates(&mut record, &mut summary);
            default_partition_keys(&mut record, &mut summary);
            record
        })
        .collect();

    let (unique, duplicates) = deduplicate(staged);
    let (cleaned, null_ids) = drop_null_ids(unique);
    let table = CleanedTable::new(cleaned);

    summary.duplicates_removed = duplicates;
    summary.null_ids_dropped = null_ids;
    summary.cleaned_record_count = table.len();
    summary.records_removed = summary.raw_record_count - summary.cleaned_record_count;
    summary.unique_countries = table.unique_countries();
    summary.unique_regions = table.unique_regions();
    summary.unique_types = table.unique_types();

    debug!(?summary, "Transformation summary");
    info!(
        raw = summary.raw_record_count,
        cleaned = summary.cleaned_record_count,
        removed = summary.records_removed,
        "Cleaned raw batch"
    );
    (table, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn staged(id: Option<&str>, name: &str) -> StagedRecord {
        StagedRecord {
            id: id.map(str::to_string),
            name: Some(name.to_string()),
            country: Some("A".to_string()),
            state_province: Some("R".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn projection_keeps_only_canonical_fields() {
        let projected = project(&json!({"id": "1", "extra": "x", "_run_id": "r"}));
        assert_eq!(projected.get("id"), &json!("1"));
        assert_eq!(projected.get("city"), &Value::Null);
        assert_eq!(projected.0.len(), SILVER_COLUMNS.len());
        assert!(!projected.0.contains_key("extra"));
    }

    #[test]
    fn normalization_trims_and_coerces_per_field() {
        let mut summary = TransformSummary::default();
        let projected = project(&json!({
            "id": "  b-1 ",
            "name": " Brew ",
            "brewery_type": " MICRO ",
            "latitude": "45.5",
            "longitude": "east",
            "postal_code": 12345,
            "phone": {"nested": true},
        }));
        let record = normalize(&projected, &mut summary);

        assert_eq!(record.id.as_deref(), Some("b-1"));
        assert_eq!(record.name.as_deref(), Some("Brew"));
        assert_eq!(record.brewery_type.as_deref(), Some("micro"));
        assert_eq!(record.latitude, Some(45.5));
        assert_eq!(record.longitude, None);
        assert_eq!(record.postal_code.as_deref(), Some("12345"));
        assert_eq!(record.phone, None);
        assert_eq!(summary.unparsable_coordinates, 1);
        assert_eq!(summary.unrecognized_types, 0);
    }

    #[test]
    fn non_finite_coordinates_are_unparsable() {
        let mut summary = TransformSummary::default();
        let record = normalize(&project(&json!({"latitude": "NaN", "longitude": "inf"})), &mut summary);
        assert_eq!(record.latitude, None);
        assert_eq!(record.longitude, None);
        assert_eq!(summary.unparsable_coordinates, 2);
    }

    #[test]
    fn coordinate_bounds_are_inclusive() {
        let mut summary = TransformSummary::default();
        for (lat, lon) in [(90.0, 180.0), (-90.0, -180.0)] {
            let mut record = StagedRecord {
                latitude: Some(lat),
                longitude: Some(lon),
                ..Default::default()
            };
            validate_coordinates(&mut record, &mut summary);
            assert_eq!((record.latitude, record.longitude), (Some(lat), Some(lon)));
        }
        assert_eq!(summary.coordinates_nulled, 0);

        let mut record = StagedRecord {
            latitude: Some(90.0001),
            longitude: Some(-180.0001),
            ..Default::default()
        };
        validate_coordinates(&mut record, &mut summary);
        assert_eq!((record.latitude, record.longitude), (None, None));
        assert_eq!(summary.coordinates_nulled, 2);
    }

    #[test]
    fn blank_partition_keys_become_unknown() {
        let mut summary = TransformSummary::default();
        let mut record = normalize(&project(&json!({"id": "x", "country": "   "})), &mut summary);
        default_partition_keys(&mut record, &mut summary);
        assert_eq!(record.country.as_deref(), Some(UNKNOWN));
        assert_eq!(record.state_province.as_deref(), Some(UNKNOWN));
        assert_eq!(summary.partition_keys_defaulted, 2);
    }

    #[test]
    fn dedup_keeps_first_seen_and_sorts_by_id() {
        let input = vec![
            staged(Some("b"), "first b"),
            staged(Some("a"), "first a"),
            staged(Some("b"), "second b"),
            staged(None, "anonymous"),
            staged(Some("a"), "second a"),
        ];
        let (out, removed) = deduplicate(input);

        assert_eq!(removed, 2);
        let view: Vec<(Option<&str>, &str)> = out
            .iter()
            .map(|r| (r.id.as_deref(), r.name.as_deref().unwrap()))
            .collect();
        assert_eq!(
            view,
            vec![(None, "anonymous"), (Some("a"), "first a"), (Some("b"), "first b")]
        );
    }

    #[test]
    fn dedup_is_idempotent() {
        let input = vec![
            staged(Some("c"), "1"),
            staged(Some("a"), "2"),
            staged(Some("c"), "3"),
            staged(None, "4"),
            staged(None, "5"),
        ];
        let (once, _) = deduplicate(input);
        let (twice, removed) = deduplicate(once.clone());
        assert_eq!(once, twice);
        assert_eq!(removed, 0);
    }

    #[test]
    fn null_ids_are_excluded_and_counted() {
        let raw: Vec<Value> = (0..10)
            .map(|i| {
                if i % 3 == 0 {
                    json!({"id": null, "name": "no id"})
                } else {
                    json!({"id": format!("id-{}", i), "name": "ok"})
                }
            })
            .chain(std::iter::once(json!({"id": "   ", "name": "blank id"})))
            .collect();

        let (table, summary) = transform(&raw);
        // 4 null ids among the first 10, plus the blank one.
        assert_eq!(table.len(), 11 - 5);
        assert_eq!(summary.null_ids_dropped, 5);
        assert_eq!(summary.records_removed, 5);
    }

    #[test]
    fn cleaned_table_satisfies_its_invariants() {
        let raw = vec![
            json!({"id": "2", "latitude": 91, "longitude": 10, "country": "A", "state_province": "R"}),
            json!({"id": "1", "latitude": "-12.5", "country": null}),
            json!({"id": "2", "latitude": 0}),
        ];
        let (table, summary) = transform(&raw);

        let ids: Vec<&str> = table.records().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(table.records()[0].country, UNKNOWN);
        assert_eq!(table.records()[1].latitude, None);
        assert_eq!(table.records()[1].longitude, Some(10.0));
        assert_eq!(summary.duplicates_removed, 1);
        assert_eq!(summary.coordinates_nulled, 1);
        assert_eq!(summary.unique_countries, 2);
    }
}
