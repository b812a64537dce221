//! Dataset <-> Parquet conversion through Arrow record batches.

use crate::domain::model::{Dataset, Row};
use crate::utils::error::Result;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::json::reader::infer_json_schema_from_iterator;
use arrow::json::{ArrayWriter, ReaderBuilder};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde_json::Value;
use std::sync::Arc;

const BATCH_SIZE: usize = 1024;

/// Arrow schema for the dataset, fields in dataset column order.
/// Columns with no non-null value are typed as strings.
pub fn arrow_schema(data: &Dataset) -> Result<Schema> {
    let inferred = infer_json_schema_from_iterator(
        data.rows
            .iter()
            .map(|row| Ok::<_, arrow::error::ArrowError>(Value::Object(row.clone()))),
    )?;

    let fields: Vec<Field> = data
        .columns
        .iter()
        .map(|column| {
            let data_type = inferred
                .field_with_name(column)
                .map(|f| f.data_type().clone())
                .unwrap_or(DataType::Utf8);
            let data_type = match data_type {
                DataType::Null => DataType::Utf8,
                other => other,
            };
            Field::new(column, data_type, true)
        })
        .collect();

    Ok(Schema::new(fields))
}

pub fn to_record_batches(data: &Dataset) -> Result<(Arc<Schema>, Vec<RecordBatch>)> {
    let schema = Arc::new(arrow_schema(data)?);
    let mut decoder = ReaderBuilder::new(schema.clone())
        .with_batch_size(BATCH_SIZE)
        .with_coerce_primitive(true)
        .build_decoder()?;

    let mut batches = Vec::new();
    for chunk in data.rows.chunks(BATCH_SIZE) {
        decoder.serialize(chunk)?;
        if let Some(batch) = decoder.flush()? {
            batches.push(batch);
        }
    }
    Ok((schema, batches))
}

/// Snappy-compressed Parquet file contents
pub fn to_parquet(data: &Dataset) -> Result<Vec<u8>> {
    let (schema, batches) = to_record_batches(data)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut writer = ArrowWriter::try_new(Vec::new(), schema, Some(props))?;
    for batch in &batches {
        writer.write(batch)?;
    }
    Ok(writer.into_inner()?)
}

pub fn from_parquet(contents: Vec<u8>) -> Result<Dataset> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(contents))?;
    let columns: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let reader = builder.with_batch_size(BATCH_SIZE).build()?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch?;
        rows.extend(batch_to_rows(&batch, &columns)?);
    }
    Ok(Dataset::new(columns, rows))
}

fn batch_to_rows(batch: &RecordBatch, columns: &[String]) -> Result<Vec<Row>> {
    let mut writer = ArrayWriter::new(Vec::new());
    writer.write_batches(&[batch])?;
    writer.finish()?;
    let buffer = writer.into_inner();
    if buffer.is_empty() {
        return Ok(Vec::new());
    }

    let parsed: Vec<Row> = serde_json::from_slice(&buffer)?;
    // 寫出時略過的 null 欄位補回來
    Ok(parsed
        .into_iter()
        .map(|row| {
            columns
                .iter()
                .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
                .collect()
        })
        .collect())
}
