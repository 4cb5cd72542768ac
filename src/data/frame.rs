//! Table helpers over polars `DataFrame`
//!
//! Every table the pipeline touches is a [`DataFrame`]. Persisted tables carry
//! a leading unnamed positional index column; it is written on save and
//! dropped again on load.

use crate::{CfbError, Result};
use polars::prelude::*;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

/// Read a CSV file, dropping a leading index column if present
pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<DataFrame> {
    let frame = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .try_into_reader_with_file_path(Some(path.as_ref().to_path_buf()))?
        .finish()?;

    let first = frame.get_column_names().first().map(|c| c.to_string());
    match first {
        Some(name) if is_index_header(&name) => Ok(frame.drop(&name)?),
        _ => Ok(frame),
    }
}

/// Empty, `Unnamed: 0` and the reader's generated `column_1` all mark an index
fn is_index_header(name: &str) -> bool {
    name.is_empty() || name == "column_1" || name.starts_with("Unnamed:")
}

/// Write with an unnamed 0..n index column, creating parent directories
pub fn write_csv<P: AsRef<Path>>(frame: &DataFrame, path: P) -> Result<()> {
    let mut indexed = frame.with_row_index("".into(), None)?;
    write_frame(&mut indexed, path.as_ref())
}

/// Write with `column` moved to the front as the index
pub fn write_csv_indexed_by<P: AsRef<Path>>(frame: &DataFrame, path: P, column: &str) -> Result<()> {
    require_columns(frame, &[column])?;
    let order: Vec<String> = std::iter::once(column.to_string())
        .chain(column_names(frame).into_iter().filter(|c| c != column))
        .collect();
    let mut reordered = frame.select(order)?;
    write_frame(&mut reordered, path.as_ref())
}

fn write_frame(frame: &mut DataFrame, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(frame)?;
    Ok(())
}

pub fn column_names(frame: &DataFrame) -> Vec<String> {
    frame.get_column_names().iter().map(|c| c.to_string()).collect()
}

pub fn has_column(frame: &DataFrame, name: &str) -> bool {
    frame.get_column_index(name).is_some()
}

/// Fail with a schema error naming every absent column
pub fn require_columns<S: AsRef<str>>(frame: &DataFrame, names: &[S]) -> Result<()> {
    let missing: Vec<&str> = names
        .iter()
        .map(|n| n.as_ref())
        .filter(|n| !has_column(frame, n))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(CfbError::Schema(format!(
        "missing column(s) {} (have: {})",
        missing.join(", "),
        column_names(frame).join(", ")
    )))
}

/// Column values as floats; anything that does not cast is None
pub fn float_values(frame: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    require_columns(frame, &[name])?;
    let cast = frame.column(name)?.cast(&DataType::Float64)?;
    Ok(cast.f64()?.into_iter().collect())
}

/// Column values rendered as text
pub fn text_values(frame: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    require_columns(frame, &[name])?;
    let cast = frame.column(name)?.cast(&DataType::String)?;
    Ok(cast.str()?.into_iter().map(|v| v.map(str::to_string)).collect())
}

/// Integer and float columns; everything else is treated as text
pub fn is_numeric(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int32 | DataType::Int64 | DataType::UInt32 | DataType::UInt64 | DataType::Float32 | DataType::Float64
    )
}

/// Rename columns present in `mapping`; unknown names are ignored
pub fn rename_columns(frame: &DataFrame, mapping: &BTreeMap<String, String>) -> Result<DataFrame> {
    let mut renamed = frame.clone();
    for (from, to) in mapping {
        if has_column(&renamed, from) {
            renamed.rename(from, to.as_str().into())?;
        }
    }
    Ok(renamed)
}

/// Stack `bottom` under `top`, aligning columns by name. Columns only one
/// side has are null on the other.
pub fn append_rows(top: &DataFrame, bottom: &DataFrame) -> Result<DataFrame> {
    if top.width() == 0 {
        return Ok(bottom.clone());
    }
    if bottom.width() == 0 {
        return Ok(top.clone());
    }
    let args = UnionArgs {
        to_supertypes: true,
        ..Default::default()
    };
    Ok(concat_lf_diagonal([top.clone().lazy(), bottom.clone().lazy()], args)?.collect()?)
}
