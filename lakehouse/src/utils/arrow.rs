use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use common::{Error, Result};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;
use std::collections::HashMap;
use std::sync::Arc;

/// Encodes one batch as a snappy Parquet file with key/value metadata.
pub fn encode_parquet(batch: &RecordBatch, metadata: &[(&str, String)]) -> Result<Vec<u8>> {
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_key_value_metadata(Some(
            metadata
                .iter()
                .map(|(key, value)| KeyValue {
                    key: key.to_string(),
                    value: Some(value.clone()),
                })
                .collect(),
        ))
        .build();

    let mut buffer: Vec<u8> = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(buffer)
}

/// Decodes every batch of a Parquet file. Footer metadata is dropped from the
/// batch schema so batches from different files can be combined.
pub fn decode_parquet(bytes: Vec<u8>) -> Result<Vec<RecordBatch>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes))?.build()?;
    let mut batches = Vec::new();
    for batch in reader {
        let batch = batch?;
        let schema = Arc::new(batch.schema().as_ref().clone().with_metadata(HashMap::new()));
        batches.push(batch.with_schema(schema)?);
    }
    Ok(batches)
}

/// Key/value metadata stored in a Parquet footer.
pub fn parquet_metadata(bytes: Vec<u8>) -> Result<Vec<(String, Option<String>)>> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes))?;
    Ok(builder
        .metadata()
        .file_metadata()
        .key_value_metadata()
        .map(|kvs| kvs.iter().map(|kv| (kv.key.clone(), kv.value.clone())).collect())
        .unwrap_or_default())
}

fn column_as(batch: &RecordBatch, name: &str, data_type: &DataType) -> Result<ArrayRef> {
    let column = batch
        .column_by_name(name)
        .ok_or_else(|| Error::InvalidInput(format!("Column '{}' not found in batch", name)))?;
    if column.data_type() == data_type {
        Ok(column.clone())
    } else {
        Ok(cast(column, data_type)?)
    }
}

pub fn string_column(batch: &RecordBatch, name: &str) -> Result<StringArray> {
    let array = column_as(batch, name, &DataType::Utf8)?;
    array
        .as_any()
        .downcast_ref::<StringArray>()
        .cloned()
        .ok_or_else(|| Error::Other(format!("Failed to downcast '{}' to StringArray", name)))
}

pub fn f64_column(batch: &RecordBatch, name: &str) -> Result<Float64Array> {
    let array = column_as(batch, name, &DataType::Float64)?;
    array
        .as_any()
        .downcast_ref::<Float64Array>()
        .cloned()
        .ok_or_else(|| Error::Other(format!("Failed to downcast '{}' to Float64Array", name)))
}

pub fn i64_column(batch: &RecordBatch, name: &str) -> Result<Int64Array> {
    let array = column_as(batch, name, &DataType::Int64)?;
    array
        .as_any()
        .downcast_ref::<Int64Array>()
        .cloned()
        .ok_or_else(|| Error::Other(format!("Failed to downcast '{}' to Int64Array", name)))
}

pub fn opt_str(array: &StringArray, row: usize) -> Option<String> {
    if array.is_null(row) {
        None
    } else {
        Some(array.value(row).to_string())
    }
}

pub fn opt_f64(array: &Float64Array, row: usize) -> Option<f64> {
    if array.is_null(row) {
        None
    } else {
        Some(array.value(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::{Field, Schema};

    #[test]
    fn parquet_keeps_rows_and_metadata() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("country", DataType::Utf8, true),
            Field::new("brewery_count", DataType::Int64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec![Some("A"), None])),
                Arc::new(Int64Array::from(vec![5, 2])),
            ],
        )
        .unwrap();

        let bytes = encode_parquet(&batch, &[("layer", "gold".to_string())]).unwrap();
        let meta = parquet_metadata(bytes.clone()).unwrap();
        assert!(meta.contains(&("layer".to_string(), Some("gold".to_string()))));

        let batches = decode_parquet(bytes).unwrap();
        assert!(batches[0].schema().metadata().is_empty());
        let countries = string_column(&batches[0], "country").unwrap();
        assert_eq!(opt_str(&countries, 0), Some("A".to_string()));
        assert_eq!(opt_str(&countries, 1), None);
        assert_eq!(i64_column(&batches[0], "brewery_count").unwrap().value(0), 5);
    }

    #[test]
    fn missing_column_is_an_error() {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Utf8, false)]));
        let batch = RecordBatch::try_new(schema, vec![Arc::new(StringArray::from(vec!["x"]))]).unwrap();
        assert!(matches!(string_column(&batch, "name"), Err(Error::InvalidInput(_))));
    }
}
