//! Raw JSON observation to single-row Parquet.
//!
//! The column order and types of [`observation_schema`] are the contract with
//! the destination table; an append only succeeds while they line up.

use std::path::Path;
use std::sync::{Arc, LazyLock};

use arrow_array::{Array, ArrayRef, Float64Array, RecordBatch, TimestampSecondArray};
use arrow_schema::{ArrowError, DataType, Field, Schema, SchemaRef, TimeUnit};
use bytes::Bytes;
use chrono::DateTime;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};
use crate::model::{ObservationRow, RawObservation};

const FLOAT_COLUMNS_BEFORE_TS: [&str; 6] =
    ["temp", "feels_like", "temp_min", "temp_max", "pressure", "humidity"];
const FLOAT_COLUMNS_AFTER_TS: [&str; 2] = ["lon", "lat"];
const TIMESTAMP_COLUMN: &str = "timestamp";
const TIMEZONE: &str = "UTC";

static SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    let float = |name: &str| Field::new(name, DataType::Float64, false);

    let mut fields: Vec<Field> = FLOAT_COLUMNS_BEFORE_TS.into_iter().map(float).collect();
    fields.push(Field::new(
        TIMESTAMP_COLUMN,
        DataType::Timestamp(TimeUnit::Second, Some(TIMEZONE.into())),
        false,
    ));
    fields.extend(FLOAT_COLUMNS_AFTER_TS.into_iter().map(float));

    Arc::new(Schema::new(fields))
});

/// `temp, feels_like, temp_min, temp_max, pressure, humidity, timestamp, lon, lat`.
pub fn observation_schema() -> SchemaRef {
    SCHEMA.clone()
}

/// Parse a raw API response into a flattened row.
///
/// `source` only labels errors.
pub fn parse_observation(raw: &[u8], source: &Path) -> PipelineResult<ObservationRow> {
    let raw: RawObservation =
        serde_json::from_slice(raw).map_err(|e| PipelineError::json(source, e))?;
    ObservationRow::try_from(raw).map_err(|dt| PipelineError::InvalidTimestamp { dt })
}

pub fn rows_to_batch(rows: &[ObservationRow]) -> PipelineResult<RecordBatch> {
    let col = |f: fn(&ObservationRow) -> f64| -> ArrayRef {
        Arc::new(Float64Array::from_iter_values(rows.iter().map(f)))
    };

    let columns: Vec<ArrayRef> = vec![
        col(|r| r.temp),
        col(|r| r.feels_like),
        col(|r| r.temp_min),
        col(|r| r.temp_max),
        col(|r| r.pressure),
        col(|r| r.humidity),
        Arc::new(
            TimestampSecondArray::from_iter_values(rows.iter().map(|r| r.timestamp.timestamp()))
                .with_timezone(TIMEZONE),
        ),
        col(|r| r.lon),
        col(|r| r.lat),
    ];

    Ok(RecordBatch::try_new(observation_schema(), columns)?)
}

/// Inverse of [`rows_to_batch`]. Fails when the batch schema differs.
pub fn rows_from_batch(batch: &RecordBatch) -> PipelineResult<Vec<ObservationRow>> {
    if batch.schema().fields() != observation_schema().fields() {
        return Err(ArrowError::SchemaError(format!(
            "expected observation schema, found {}",
            batch.schema()
        ))
        .into());
    }

    let (temp, feels_like, temp_min, temp_max, pressure, humidity) = (
        float_column(batch, 0)?,
        float_column(batch, 1)?,
        float_column(batch, 2)?,
        float_column(batch, 3)?,
        float_column(batch, 4)?,
        float_column(batch, 5)?,
    );
    let timestamp = downcast::<TimestampSecondArray>(batch.column(6).as_ref())?;
    let (lon, lat) = (float_column(batch, 7)?, float_column(batch, 8)?);

    (0..batch.num_rows())
        .map(|i| -> PipelineResult<ObservationRow> {
            let secs = timestamp.value(i);
            Ok(ObservationRow {
                temp: temp.value(i),
                feels_like: feels_like.value(i),
                temp_min: temp_min.value(i),
                temp_max: temp_max.value(i),
                pressure: pressure.value(i),
                humidity: humidity.value(i),
                timestamp: DateTime::from_timestamp(secs, 0)
                    .ok_or(PipelineError::InvalidTimestamp { dt: secs })?,
                lon: lon.value(i),
                lat: lat.value(i),
            })
        })
        .collect()
}

fn float_column(batch: &RecordBatch, idx: usize) -> PipelineResult<&Float64Array> {
    downcast::<Float64Array>(batch.column(idx).as_ref())
}

fn downcast<T: 'static>(array: &dyn Array) -> PipelineResult<&T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        ArrowError::CastError(format!("unexpected column type {}", array.data_type())).into()
    })
}

/// Serialize batches into an in-memory Parquet file (snappy).
pub fn encode_parquet(batches: &[RecordBatch]) -> PipelineResult<Bytes> {
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, observation_schema(), Some(props))?;
    for batch in batches {
        writer.write(batch)?;
    }
    writer.close()?;

    Ok(Bytes::from(buffer))
}

pub fn decode_parquet(bytes: Bytes) -> PipelineResult<Vec<RecordBatch>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)?.build()?;
    Ok(reader.collect::<Result<Vec<_>, _>>()?)
}

pub fn read_parquet_rows(bytes: Bytes) -> PipelineResult<Vec<ObservationRow>> {
    let mut rows = Vec::new();
    for batch in decode_parquet(bytes)? {
        rows.extend(rows_from_batch(&batch)?);
    }
    Ok(rows)
}

/// Read the raw file, flatten it and write the Parquet file.
///
/// The output file is only created once encoding has succeeded.
pub async fn transform_file(raw_path: &Path, parquet_path: &Path) -> PipelineResult<ObservationRow> {
    let raw = tokio::fs::read(raw_path)
        .await
        .map_err(|e| PipelineError::io(raw_path, e))?;

    let row = parse_observation(&raw, raw_path)?;
    debug!(?row, "Flattened observation");

    let batch = rows_to_batch(std::slice::from_ref(&row))?;
    let encoded = encode_parquet(&[batch])?;

    tokio::fs::write(parquet_path, &encoded)
        .await
        .map_err(|e| PipelineError::io(parquet_path, e))?;

    info!(
        path = %parquet_path.display(),
        bytes = encoded.len(),
        "Parquet file written"
    );
    Ok(row)
}
