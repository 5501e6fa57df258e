use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const ID: &str = "id";
pub const NAME: &str = "name";
pub const BREWERY_TYPE: &str = "brewery_type";
pub const COUNTRY: &str = "country";
pub const REGION: &str = "state_province";
pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";

/// Canonical field set of a cleaned record, in storage order.
pub const SILVER_COLUMNS: [&str; 14] = [
    ID,
    NAME,
    BREWERY_TYPE,
    "address_1",
    "address_2",
    "address_3",
    "city",
    REGION,
    "postal_code",
    COUNTRY,
    LONGITUDE,
    LATITUDE,
    "phone",
    "website_url",
];

/// Columns a cleaned table cannot do without.
pub const REQUIRED_COLUMNS: [&str; 5] = [ID, NAME, BREWERY_TYPE, COUNTRY, REGION];

pub const VALID_BREWERY_TYPES: [&str; 10] = [
    "micro",
    "nano",
    "regional",
    "brewpub",
    "large",
    "planning",
    "bar",
    "contract",
    "proprietor",
    "closed",
];

/// Stand-in for an absent country or region.
pub const UNKNOWN: &str = "Unknown";

pub const LATITUDE_RANGE: (f64, f64) = (-90.0, 90.0);
pub const LONGITUDE_RANGE: (f64, f64) = (-180.0, 180.0);

lazy_static! {
    static ref SILVER_SCHEMA: SchemaRef = Arc::new(build_silver_schema());
}

fn build_silver_schema() -> Schema {
    let fields: Vec<Field> = SILVER_COLUMNS
        .iter()
        .map(|name| match *name {
            LATITUDE | LONGITUDE => Field::new(*name, DataType::Float64, true),
            ID | COUNTRY | REGION => Field::new(*name, DataType::Utf8, false),
            _ => Field::new(*name, DataType::Utf8, true),
        })
        .collect();
    Schema::new(fields)
}

pub fn silver_schema() -> SchemaRef {
    SILVER_SCHEMA.clone()
}

pub fn is_known_brewery_type(value: &str) -> bool {
    VALID_BREWERY_TYPES.contains(&value)
}

/// A cleaned record. `id`, `country` and `state_province` are always set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Brewery {
    pub id: String,
    pub name: Option<String>,
    pub brewery_type: Option<String>,
    pub address_1: Option<String>,
    pub address_2: Option<String>,
    pub address_3: Option<String>,
    pub city: Option<String>,
    pub state_province: String,
    pub postal_code: Option<String>,
    pub country: String,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub phone: Option<String>,
    pub website_url: Option<String>,
}

impl Brewery {
    /// Value of a nullable text column by name; `None` for unknown names and
    /// the coordinate columns.
    pub fn text(&self, column: &str) -> Option<&str> {
        match column {
            ID => Some(&self.id),
            NAME => self.name.as_deref(),
            BREWERY_TYPE => self.brewery_type.as_deref(),
            "address_1" => self.address_1.as_deref(),
            "address_2" => self.address_2.as_deref(),
            "address_3" => self.address_3.as_deref(),
            "city" => self.city.as_deref(),
            REGION => Some(&self.state_province),
            "postal_code" => self.postal_code.as_deref(),
            COUNTRY => Some(&self.country),
            "phone" => self.phone.as_deref(),
            "website_url" => self.website_url.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_follows_column_order_and_nullability() {
        let schema = silver_schema();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, SILVER_COLUMNS.to_vec());
        assert!(!schema.field_with_name(ID).unwrap().is_nullable());
        assert!(!schema.field_with_name(COUNTRY).unwrap().is_nullable());
        assert_eq!(schema.field_with_name(LATITUDE).unwrap().data_type(), &DataType::Float64);
        assert!(schema.field_with_name(NAME).unwrap().is_nullable());
    }
}
