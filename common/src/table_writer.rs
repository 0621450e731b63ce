// Columnar table persistence: query results to Parquet files

use crate::decimal::{parse_scaled, MAX_PRECISION};
use crate::errors::ExecutionError;
use crate::models::QueryResult;
use arrow::array::{
    ArrayRef, BooleanArray, Decimal128Array, Float64Array, Int64Array, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde_json::Value;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

pub const PARQUET_EXTENSION: &str = "parquet";

/// File produced by a table write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFileInfo {
    pub path: PathBuf,
    pub rows: usize,
    pub cols: usize,
    pub bytes: u64,
}

/// Persists one tabular result as a self-describing file
pub trait TableWriter: Send + Sync {
    /// File extension without the leading dot
    fn extension(&self) -> &str;

    /// Write `table` to `path`, replacing any previous file atomically
    fn write_table(&self, table: &QueryResult, path: &Path)
        -> Result<TableFileInfo, ExecutionError>;

    /// `<dir>/<name>.<extension>`
    fn file_path(&self, dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{}.{}", name, self.extension()))
    }
}

/// Parquet writer with per-column type inference
#[derive(Debug, Clone, Copy)]
pub struct ParquetTableWriter {
    compression: Compression,
}

impl ParquetTableWriter {
    pub fn new(compression: Compression) -> Self {
        Self { compression }
    }

    /// Codec by configured name; unknown names fall back to snappy
    pub fn from_codec_name(name: &str) -> Self {
        let compression = match name.to_lowercase().as_str() {
            "none" | "uncompressed" => Compression::UNCOMPRESSED,
            "snappy" => Compression::SNAPPY,
            other => {
                tracing::warn!(codec = %other, "Unsupported compression codec, using snappy");
                Compression::SNAPPY
            }
        };
        Self::new(compression)
    }

    fn write_file(&self, batch: &RecordBatch, path: &Path) -> Result<(), ExecutionError> {
        let file = File::create(path)?;
        let props = WriterProperties::builder()
            .set_compression(self.compression)
            .build();

        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))
            .map_err(|e| ExecutionError::TableWriteFailed(e.to_string()))?;
        if batch.num_rows() > 0 {
            writer
                .write(batch)
                .map_err(|e| ExecutionError::TableWriteFailed(e.to_string()))?;
        }
        writer
            .close()
            .map_err(|e| ExecutionError::TableWriteFailed(e.to_string()))?;
        Ok(())
    }
}

impl Default for ParquetTableWriter {
    fn default() -> Self {
        Self::new(Compression::SNAPPY)
    }
}

impl TableWriter for ParquetTableWriter {
    fn extension(&self) -> &str {
        PARQUET_EXTENSION
    }

    #[instrument(skip(self, table), fields(path = %path.display(), rows = table.row_count()))]
    fn write_table(
        &self,
        table: &QueryResult,
        path: &Path,
    ) -> Result<TableFileInfo, ExecutionError> {
        if table.columns.is_empty() {
            return Err(ExecutionError::TableWriteFailed(
                "Query produced no result set".to_string(),
            ));
        }

        let batch = to_record_batch(table)?;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        if let Err(e) = self.write_file(&batch, &tmp) {
            error!(error = %e, "Failed to write table file");
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        fs::rename(&tmp, path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            ExecutionError::TableWriteFailed(format!(
                "Failed to move {} into place: {}",
                tmp.display(),
                e
            ))
        })?;

        let bytes = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        debug!(bytes = bytes, "Table file written");

        Ok(TableFileInfo {
            path: path.to_path_buf(),
            rows: table.row_count(),
            cols: table.column_count(),
            bytes,
        })
    }
}

/// Narrowest type that holds every non-null value of the column
fn infer_column_type(table: &QueryResult, index: usize) -> DataType {
    let mut values = table
        .rows
        .iter()
        .filter_map(|row| row.get(index))
        .filter(|v| !v.is_null())
        .peekable();

    if values.peek().is_none() {
        return DataType::Utf8;
    }

    let (mut all_bool, mut all_int, mut all_number) = (true, true, true);
    for value in values {
        all_bool &= value.is_boolean();
        all_int &= value.is_i64();
        all_number &= value.is_number();
    }

    if all_bool {
        DataType::Boolean
    } else if all_int {
        DataType::Int64
    } else if all_number {
        DataType::Float64
    } else {
        DataType::Utf8
    }
}

fn cells<'a>(table: &'a QueryResult, index: usize) -> impl Iterator<Item = Option<&'a Value>> {
    table
        .rows
        .iter()
        .map(move |row| row.get(index).filter(|v| !v.is_null()))
}

/// Decimal128 column at the hinted scale, or `None` when a value does not fit
fn decimal_array(
    table: &QueryResult,
    index: usize,
    scale: u8,
) -> Option<(DataType, ArrayRef)> {
    let mut values = Vec::with_capacity(table.row_count());
    for cell in cells(table, index) {
        let parsed = match cell {
            None => None,
            Some(Value::String(text)) => Some(parse_scaled(text, scale)?),
            Some(Value::Number(number)) => Some(parse_scaled(&number.to_string(), scale)?),
            Some(_) => return None,
        };
        values.push(parsed);
    }

    let array = Decimal128Array::from(values)
        .with_precision_and_scale(MAX_PRECISION, scale as i8)
        .ok()?;
    Some((
        DataType::Decimal128(MAX_PRECISION, scale as i8),
        Arc::new(array),
    ))
}

fn to_record_batch(table: &QueryResult) -> Result<RecordBatch, ExecutionError> {
    let mut fields = Vec::with_capacity(table.column_count());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(table.column_count());

    for (index, name) in table.columns.iter().enumerate() {
        if let Some(scale) = table.decimal_scale(index) {
            match decimal_array(table, index, scale) {
                Some((data_type, array)) => {
                    fields.push(Field::new(name, data_type, true));
                    arrays.push(array);
                    continue;
                }
                None => warn!(
                    column = %name,
                    scale = scale,
                    "Decimal column does not fit Decimal128, storing inferred type"
                ),
            }
        }

        let data_type = infer_column_type(table, index);
        let array: ArrayRef = match data_type {
            DataType::Boolean => Arc::new(BooleanArray::from(
                cells(table, index)
                    .map(|v| v.and_then(Value::as_bool))
                    .collect::<Vec<_>>(),
            )),
            DataType::Int64 => Arc::new(Int64Array::from(
                cells(table, index)
                    .map(|v| v.and_then(Value::as_i64))
                    .collect::<Vec<_>>(),
            )),
            DataType::Float64 => Arc::new(Float64Array::from(
                cells(table, index)
                    .map(|v| v.and_then(Value::as_f64))
                    .collect::<Vec<_>>(),
            )),
            _ => Arc::new(StringArray::from(
                cells(table, index)
                    .map(|v| {
                        v.map(|value| match value {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                    })
                    .collect::<Vec<_>>(),
            )),
        };
        fields.push(Field::new(name, data_type, true));
        arrays.push(array);
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
        .map_err(|e| ExecutionError::TableWriteFailed(e.to_string()))
}
