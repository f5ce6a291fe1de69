use arrow::array::{
    Array, ArrayRef, Float64Array, Float64Builder, Int64Array, Int64Builder, StringArray,
    StringBuilder,
};
use arrow::compute::{can_cast_types, cast};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::{ArrowWriter, ProjectionMask};
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tc_types::series::TS_COLUMN;
use tc_types::{Column, ColumnData, FieldKind, TickSeries};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParquetError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("parquet: {0}")]
    Pq(#[from] parquet::errors::ParquetError),
    #[error("arrow: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
    #[error("schema: {0}")]
    Schema(String),
}

/// Header spellings recognised as the timestamp column, compared case-insensitively.
const TS_CANDIDATES: &[&str] = &[TS_COLUMN, "date", "datetime", "timestamp", "time", "index"];

/// Index of the timestamp column among `names`; falls back to the first column.
pub fn timestamp_column_index<S: AsRef<str>>(names: &[S]) -> usize {
    TS_CANDIDATES
        .iter()
        .find_map(|cand| {
            names
                .iter()
                .position(|n| n.as_ref().trim().eq_ignore_ascii_case(cand))
        })
        .unwrap_or(0)
}

fn zstd_props(level: i32) -> WriterProperties {
    WriterProperties::builder()
        .set_compression(Compression::ZSTD(
            ZstdLevel::try_new(level).unwrap_or(ZstdLevel::default()),
        ))
        .set_dictionary_enabled(true)
        .set_data_page_size_limit(128 * 1024)
        .set_write_batch_size(32 * 1024)
        .build()
}

fn series_schema(series: &TickSeries) -> SchemaRef {
    let mut fields = Vec::with_capacity(series.columns().len() + 1);
    fields.push(Field::new(TS_COLUMN, DataType::Int64, false));
    for col in series.columns() {
        let dt = match col.data.kind() {
            FieldKind::Float => DataType::Float64,
            FieldKind::Text => DataType::Utf8,
        };
        fields.push(Field::new(col.name.as_str(), dt, true));
    }
    Arc::new(Schema::new(fields))
}

fn to_batch(series: &TickSeries) -> Result<RecordBatch, ParquetError> {
    let schema = series_schema(series);
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());

    let mut ts = Int64Builder::with_capacity(series.len());
    ts.append_slice(series.timestamps());
    arrays.push(Arc::new(ts.finish()));

    for col in series.columns() {
        match &col.data {
            ColumnData::Float(values) => {
                let mut b = Float64Builder::with_capacity(values.len());
                for v in values {
                    b.append_option(*v);
                }
                arrays.push(Arc::new(b.finish()));
            }
            ColumnData::Text(values) => {
                let mut b = StringBuilder::new();
                for v in values {
                    b.append_option(v.as_deref());
                }
                arrays.push(Arc::new(b.finish()));
            }
        }
    }
    Ok(RecordBatch::try_new(schema, arrays)?)
}

/// Writes `series` as a single ZSTD-compressed Parquet stream with `ts_ns` as the first column.
pub fn write_series<W: Write + Send>(
    writer: W,
    series: &TickSeries,
    zstd_level: i32,
) -> Result<(), ParquetError> {
    let mut writer = ArrowWriter::try_new(writer, series_schema(series), Some(zstd_props(zstd_level)))?;
    if !series.is_empty() {
        writer.write(&to_batch(series)?)?;
    }
    writer.close()?;
    Ok(())
}

/// Writes to a temp file next to `path` and renames it into place, so readers see
/// either the previous file or the complete new one. Returns the file size in bytes.
pub fn write_series_file(
    path: &Path,
    series: &TickSeries,
    zstd_level: i32,
) -> Result<u64, ParquetError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".incoming-")
        .suffix(".parquet")
        .tempfile_in(dir)?;
    write_series(tmp.as_file_mut(), series, zstd_level)?;
    tmp.as_file().sync_all()?;
    let file = tmp.persist(path).map_err(|e| e.error)?;
    Ok(file.metadata()?.len())
}

fn timestamps_from(array: &ArrayRef) -> Result<Vec<i64>, ParquetError> {
    let scale: i64 = match array.data_type() {
        DataType::Int64 | DataType::Timestamp(TimeUnit::Nanosecond, _) => 1,
        DataType::Timestamp(TimeUnit::Microsecond, _) => 1_000,
        DataType::Timestamp(TimeUnit::Millisecond, _) => 1_000_000,
        DataType::Timestamp(TimeUnit::Second, _) => 1_000_000_000,
        other => {
            return Err(ParquetError::Schema(format!(
                "timestamp column has unsupported type {other}"
            )))
        }
    };
    let ints = cast(array, &DataType::Int64)?;
    let ints = ints
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| ParquetError::Schema("timestamp column did not cast to Int64".into()))?;
    if ints.null_count() > 0 {
        return Err(ParquetError::Schema("timestamp column contains nulls".into()));
    }
    Ok(ints.values().iter().map(|v| v.saturating_mul(scale)).collect())
}

fn column_from(name: &str, array: &ArrayRef) -> Result<Column, ParquetError> {
    let dt = array.data_type();
    let is_text = matches!(dt, DataType::Utf8 | DataType::LargeUtf8)
        || matches!(dt, DataType::Dictionary(_, v) if matches!(v.as_ref(), DataType::Utf8 | DataType::LargeUtf8));
    if is_text {
        let arr = cast(array, &DataType::Utf8)?;
        let arr = arr
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| ParquetError::Schema(format!("column {name} did not cast to Utf8")))?;
        let values = (0..arr.len())
            .map(|i| (!arr.is_null(i)).then(|| arr.value(i).to_string()))
            .collect();
        return Ok(Column::texts(name, values));
    }
    if !can_cast_types(dt, &DataType::Float64) {
        return Err(ParquetError::Schema(format!(
            "column {name} has unsupported type {dt}"
        )));
    }
    let arr = cast(array, &DataType::Float64)?;
    let arr = arr
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| ParquetError::Schema(format!("column {name} did not cast to Float64")))?;
    let values = (0..arr.len())
        .map(|i| (!arr.is_null(i)).then(|| arr.value(i)))
        .collect();
    Ok(Column::floats(name, values))
}

fn empty_from_schema(schema: &Schema, ts_idx: usize) -> Result<TickSeries, ParquetError> {
    let fields: Vec<(String, FieldKind)> = schema
        .fields()
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != ts_idx)
        .map(|(_, f)| {
            let kind = match f.data_type() {
                DataType::Utf8 | DataType::LargeUtf8 | DataType::Dictionary(_, _) => FieldKind::Text,
                _ => FieldKind::Float,
            };
            (f.name().clone(), kind)
        })
        .collect();
    Ok(TickSeries::empty_with_schema(&fields))
}

fn batch_to_series(batch: &RecordBatch, ts_idx: usize) -> Result<TickSeries, ParquetError> {
    let schema = batch.schema();
    let timestamps = timestamps_from(batch.column(ts_idx))?;
    let mut columns = Vec::with_capacity(batch.num_columns().saturating_sub(1));
    for (i, field) in schema.fields().iter().enumerate() {
        if i == ts_idx {
            continue;
        }
        columns.push(column_from(field.name(), batch.column(i))?);
    }
    TickSeries::new(timestamps, columns).map_err(|e| ParquetError::Schema(e.to_string()))
}

fn batches_to_series(schema: &Schema, batches: &[RecordBatch]) -> Result<TickSeries, ParquetError> {
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    let ts_idx = timestamp_column_index(&names);
    if batches.is_empty() {
        return empty_from_schema(schema, ts_idx);
    }
    let parts = batches
        .iter()
        .map(|b| batch_to_series(b, ts_idx))
        .collect::<Result<Vec<_>, _>>()?;
    TickSeries::concat(parts).map_err(|e| ParquetError::Schema(e.to_string()))
}

pub fn read_series_file(path: &Path) -> Result<TickSeries, ParquetError> {
    read_series_rows(path, 0, None)
}

/// Reads `limit` rows starting at row `offset` (all remaining rows when `limit` is `None`).
pub fn read_series_rows(
    path: &Path,
    offset: usize,
    limit: Option<usize>,
) -> Result<TickSeries, ParquetError> {
    let file = fs::File::open(path)?;
    let mut builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    if offset > 0 {
        builder = builder.with_offset(offset);
    }
    if let Some(limit) = limit {
        builder = builder.with_limit(limit);
    }
    let schema = builder.schema().clone();
    let reader = builder.build()?;
    let batches = reader.collect::<Result<Vec<RecordBatch>, _>>()?;
    batches_to_series(&schema, &batches)
}

/// Field names and kinds of a file, from its footer only.
pub fn file_schema(path: &Path) -> Result<Vec<(String, FieldKind)>, ParquetError> {
    let file = fs::File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema();
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    let ts_idx = timestamp_column_index(&names);
    Ok(empty_from_schema(schema, ts_idx)?.schema())
}

pub fn row_count(path: &Path) -> Result<usize, ParquetError> {
    let file = fs::File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    Ok(builder.metadata().file_metadata().num_rows().max(0) as usize)
}

// --------- Stats readers ---------

/// `(rows, min_ts, max_ts)` of the timestamp column, reading only that column.
pub fn ts_extent(path: &Path) -> Result<Option<(i64, i64, i64)>, ParquetError> {
    let file = fs::File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let names: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let idx = timestamp_column_index(&names);
    let mask = ProjectionMask::leaves(builder.parquet_schema(), [idx]);
    let reader = builder.with_projection(mask).build()?;

    let mut count: i64 = 0;
    let mut min_ts: i64 = i64::MAX;
    let mut max_ts: i64 = i64::MIN;
    for batch in reader {
        let batch = batch?;
        count += batch.num_rows() as i64;
        for v in timestamps_from(batch.column(0))? {
            min_ts = min_ts.min(v);
            max_ts = max_ts.max(v);
        }
    }
    if count == 0 {
        Ok(None)
    } else {
        Ok(Some((count, min_ts, max_ts)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_and_null_cells_survive_a_file_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("t.parquet");
        let series = TickSeries::new(
            vec![10, 20, 30],
            vec![
                Column::floats("mid", vec![Some(1.5), None, Some(2.5)]),
                Column::texts("side", vec![Some("buy".into()), None, Some("sell".into())]),
            ],
        )
        .expect("series");
        let bytes = write_series_file(&path, &series, 3).expect("write");
        assert!(bytes > 0);
        assert_eq!(read_series_file(&path).expect("read"), series);
        assert_eq!(ts_extent(&path).expect("extent"), Some((3, 10, 30)));
        assert_eq!(
            read_series_rows(&path, 1, Some(1)).expect("rows").timestamps(),
            &[20]
        );
    }

    #[test]
    fn empty_series_keeps_its_schema() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("empty.parquet");
        let series = TickSeries::empty_with_schema(&[("mid".into(), FieldKind::Float)]);
        write_series_file(&path, &series, 3).expect("write");
        let back = read_series_file(&path).expect("read");
        assert!(back.is_empty());
        assert!(back.has_column("mid"));
        assert_eq!(ts_extent(&path).expect("extent"), None);
    }

    #[test]
    fn timestamp_column_detection() {
        assert_eq!(timestamp_column_index(&["mid", "Date"]), 1);
        assert_eq!(timestamp_column_index(&["", "mid"]), 0);
        assert_eq!(timestamp_column_index(&["a", "ts_ns"]), 1);
    }
}
