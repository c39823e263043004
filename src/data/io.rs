//! Parquet reading and writing for [`Dataset`]s.

use super::*;
use arrow::{
    array::{Array, Float32Array, Float64Array, Int32Array, Int64Array},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use parquet::arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter};
use std::{
    fs::File,
    path::{Path, PathBuf},
};

const DEFAULT_WRITE_BATCH_SIZE: usize = 10_000;

pub(crate) fn canonicalize_path(file_path: &str) -> StackhistResult<PathBuf> {
    Ok(Path::new(&*shellexpand::full(file_path)?).canonicalize()?)
}

pub(crate) fn expand_output_path(file_path: &str) -> StackhistResult<PathBuf> {
    Ok(PathBuf::from(&*shellexpand::full(file_path)?))
}

enum NumericColumn<'a> {
    F32(&'a Float32Array),
    F64(&'a Float64Array),
    I32(&'a Int32Array),
    I64(&'a Int64Array),
}

impl NumericColumn<'_> {
    fn value(&self, row: usize) -> f64 {
        match self {
            Self::F32(array) => array.value(row) as f64,
            Self::F64(array) => array.value(row),
            Self::I32(array) => array.value(row) as f64,
            Self::I64(array) => array.value(row) as f64,
        }
    }
}

fn is_numeric(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Float32 | DataType::Float64 | DataType::Int32 | DataType::Int64
    )
}

fn prepare_numeric_column<'a>(
    batch: &'a RecordBatch,
    name: &str,
) -> StackhistResult<NumericColumn<'a>> {
    let column = batch.column_by_name(name).ok_or_else(|| StackhistError::MissingField {
        sample: String::from("<parquet batch>"),
        field: name.to_string(),
    })?;
    let any = column.as_any();
    let downcast_failed = || StackhistError::InvalidColumnType {
        name: name.to_string(),
        datatype: column.data_type().to_string(),
    };
    Ok(match column.data_type() {
        DataType::Float32 => NumericColumn::F32(any.downcast_ref().ok_or_else(downcast_failed)?),
        DataType::Float64 => NumericColumn::F64(any.downcast_ref().ok_or_else(downcast_failed)?),
        DataType::Int32 => NumericColumn::I32(any.downcast_ref().ok_or_else(downcast_failed)?),
        DataType::Int64 => NumericColumn::I64(any.downcast_ref().ok_or_else(downcast_failed)?),
        _ => return Err(downcast_failed()),
    })
}

/// Load a [`Dataset`] from a Parquet file.
///
/// Every floating-point or 32/64-bit integer column is read and widened to `f64`; columns of
/// other types (for instance nested four-vectors) are skipped. The dataset is given the name
/// `name`, which is what [`StackhistError::MissingField`] reports later.
pub fn read_parquet(file_path: &str, name: &str) -> StackhistResult<Dataset> {
    let path = canonicalize_path(file_path)?;
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let column_names: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .filter(|f| is_numeric(f.data_type()))
        .map(|f| f.name().clone())
        .collect();
    let total_rows = builder.metadata().file_metadata().num_rows() as usize;
    let reader = builder.build()?;

    let mut columns: Vec<Vec<f64>> = column_names
        .iter()
        .map(|_| Vec::with_capacity(total_rows))
        .collect();
    for batch in reader {
        let batch = batch?;
        let sources = column_names
            .iter()
            .map(|column| prepare_numeric_column(&batch, column))
            .collect::<StackhistResult<Vec<_>>>()?;
        for (target, source) in columns.iter_mut().zip(&sources) {
            target.extend((0..batch.num_rows()).map(|row| source.value(row)));
        }
    }

    let mut dataset = Dataset::new(name);
    for (column_name, values) in column_names.into_iter().zip(columns) {
        dataset.insert_column(column_name, values)?;
    }
    Ok(dataset)
}

/// Persist a [`Dataset`] to a Parquet file with one `Float64` column per dataset column.
pub fn write_parquet(dataset: &Dataset, file_path: &str) -> StackhistResult<()> {
    let path = expand_output_path(file_path)?;
    let schema = Arc::new(Schema::new(
        dataset
            .column_names()
            .map(|name| Field::new(name, DataType::Float64, false))
            .collect::<Vec<_>>(),
    ));
    let file = File::create(&path)?;
    let mut writer = ArrowWriter::try_new(file, schema.clone(), None)?;

    let n_rows = dataset.n_events();
    let mut start = 0usize;
    while start < n_rows {
        let end = (start + DEFAULT_WRITE_BATCH_SIZE).min(n_rows);
        let arrays: Vec<arrow::array::ArrayRef> = dataset
            .columns
            .values()
            .map(|values| Arc::new(Float64Array::from(values[start..end].to_vec())) as _)
            .collect();
        let batch = RecordBatch::try_new(schema.clone(), arrays)?;
        writer.write(&batch)?;
        start = end;
    }
    writer.close()?;
    Ok(())
}
