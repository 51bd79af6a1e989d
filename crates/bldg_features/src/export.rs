//! Persisting the finished feature table.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::csv::Writer;
use arrow_array::{ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use log::{info, warn};

use staging::{ColumnData, StagingTable};

use crate::error::PipelineResult;

/// Convert the table to an Arrow batch, `entity_id` first.
///
/// Geometry columns have no CSV representation and are left out (logged).
/// Tag sets become `;`-joined strings.
pub fn to_record_batch(table: &StagingTable) -> PipelineResult<RecordBatch> {
    let mut fields = vec![Field::new(StagingTable::ID_COLUMN, DataType::Utf8, false)];
    let mut arrays: Vec<ArrayRef> = vec![Arc::new(StringArray::from_iter_values(table.ids()))];
    let mut skipped = Vec::new();

    for column in table.columns() {
        let (ty, array): (DataType, ArrayRef) = match column.data() {
            ColumnData::Text(values) => (
                DataType::Utf8,
                Arc::new(values.iter().map(|v| v.as_deref()).collect::<StringArray>()),
            ),
            ColumnData::Tags(values) => (
                DataType::Utf8,
                Arc::new(
                    values
                        .iter()
                        .map(|v| {
                            v.as_ref()
                                .map(|tags| tags.iter().map(String::as_str).collect::<Vec<_>>().join(";"))
                        })
                        .collect::<StringArray>(),
                ),
            ),
            ColumnData::Int(values) => (DataType::Int64, Arc::new(Int64Array::from(values.clone()))),
            ColumnData::Float(values) => {
                (DataType::Float64, Arc::new(Float64Array::from(values.clone())))
            }
            ColumnData::Polygon(_) | ColumnData::MultiPolygon(_) | ColumnData::Point(_) => {
                skipped.push(column.name());
                continue;
            }
        };
        fields.push(Field::new(column.name(), ty, true));
        arrays.push(array);
    }

    if !skipped.is_empty() {
        warn!("{}: geometry columns not exported: {:?}", table.name(), skipped);
    }

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
}

/// Write the table as CSV to `dest`, replacing any previous file
/// atomically: the data goes to a sibling temporary file first.
pub fn commit(table: &StagingTable, dest: impl AsRef<Path>) -> PipelineResult<usize> {
    let dest = dest.as_ref();
    let batch = to_record_batch(table)?;

    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp = temp_sibling(dest);
    {
        let file = File::create(&tmp)?;
        let mut writer = Writer::new(BufWriter::new(file));
        writer.write(&batch)?;
        let mut inner = writer.into_inner();
        inner.flush()?;
    }
    fs::rename(&tmp, dest)?;

    info!(
        "{}: committed {} rows x {} columns to {}",
        table.name(),
        batch.num_rows(),
        batch.num_columns(),
        dest.display()
    );
    Ok(batch.num_rows())
}

fn temp_sibling(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "features.csv".into());
    name.push(".tmp");
    dest.with_file_name(name)
}
