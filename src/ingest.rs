use crate::error::AppError;
use crate::models::{CostRow, UsageRecord, UsageRow};
use crate::table::{MergedLayout, RawTable};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// CSV files in `dir` whose names start with `prefix`, in name order.
pub fn discover(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, AppError> {
    let pattern = format!(
        "{}/{}*.csv",
        glob::Pattern::escape(&dir.to_string_lossy()),
        glob::Pattern::escape(prefix)
    );
    let mut paths = Vec::new();
    for entry in glob::glob(&pattern)? {
        let path = entry.map_err(glob::GlobError::into_error)?;
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

pub fn read_table(path: &Path) -> Result<RawTable, AppError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::Headers).from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        rows.push(record?.iter().map(str::to_string).collect());
    }
    Ok(RawTable::new(display_name(path), headers, rows))
}

pub fn read_usage_rows(paths: &[PathBuf]) -> Result<Vec<UsageRow>, AppError> {
    let mut rows = Vec::new();
    for path in paths {
        rows.extend(read_table(path)?.usage_rows()?);
    }
    Ok(rows)
}

pub fn read_cost_rows(paths: &[PathBuf]) -> Result<Vec<CostRow>, AppError> {
    let mut rows = Vec::new();
    for path in paths {
        rows.extend(read_table(path)?.cost_rows()?);
    }
    Ok(rows)
}

pub fn read_merged(path: &Path) -> Result<Vec<UsageRecord>, AppError> {
    if !path.is_file() {
        return Err(AppError::NoInput(format!(
            "{} does not exist. Run `llm-tally merge` first.",
            path.display()
        )));
    }
    read_table(path)?.merged_records()
}

/// Writes records in the merged artifact layout. The header comes from the
/// layout because the extra columns vary with the input files.
pub fn write_records<W: Write>(writer: W, records: &[UsageRecord]) -> Result<(), AppError> {
    let layout = MergedLayout::of(records);
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    wtr.write_record(layout.headers())?;
    for record in records {
        wtr.serialize(layout.row(record))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Replaces the merged artifact in one step so an interrupted run never
/// leaves a half-written file behind.
pub fn write_merged(path: &Path, records: &[UsageRecord]) -> Result<(), AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let staging = path.with_extension("csv.partial");
    write_records(fs::File::create(&staging)?, records)?;
    fs::rename(&staging, path)?;
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
