//! Row sources for tabular input
//!
//! A [`RowSource`] names a file and its format. Every call to
//! [`RowSource::for_each_row`] reopens the file and streams it, so the rows
//! can be walked as many times as needed (count first, then process) without
//! holding a whole sheet in memory. Spreadsheet rows end at their last
//! non-empty cell and blank rows are skipped.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use calamine::{open_workbook, DataRef, Reader, Xlsx};

use super::{ensure_exists, suffix_of, ProcessingError, Result};

/// Tabular input, tagged by format
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowSource {
    /// Comma-separated text
    Delimited(PathBuf),
    /// First worksheet of an `.xlsx` workbook
    Spreadsheet(PathBuf),
}

impl RowSource {
    /// Pick the variant from the file suffix
    pub fn open(path: &Path) -> Result<Self> {
        ensure_exists(path)?;
        match suffix_of(path).as_str() {
            ".csv" => Ok(RowSource::Delimited(path.to_path_buf())),
            ".xlsx" => Ok(RowSource::Spreadsheet(path.to_path_buf())),
            other => Err(ProcessingError::UnsupportedFileType(other.to_string())),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            RowSource::Delimited(p) | RowSource::Spreadsheet(p) => p,
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            RowSource::Delimited(_) => ".csv",
            RowSource::Spreadsheet(_) => ".xlsx",
        }
    }

    /// Count rows with a full pass over the file
    pub fn count(&self) -> Result<u64> {
        let mut total = 0u64;
        self.for_each_row(|_, _| {
            total += 1;
            Ok(())
        })?;
        Ok(total)
    }

    /// Stream every row, header included, to `visit` with its 0-based index.
    ///
    /// An error returned by `visit` stops the walk and is passed through.
    pub fn for_each_row<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(u64, Vec<String>) -> Result<()>,
    {
        match self {
            RowSource::Delimited(path) => {
                let mut reader = csv::ReaderBuilder::new()
                    .has_headers(false)
                    .flexible(true)
                    .from_path(path)?;
                let mut record = csv::StringRecord::new();
                let mut index = 0u64;
                while reader.read_record(&mut record)? {
                    visit(index, record.iter().map(str::to_string).collect())?;
                    index += 1;
                }
                Ok(())
            }
            RowSource::Spreadsheet(path) => visit_sheet_rows(path, visit),
        }
    }
}

/// Walk the first worksheet cell by cell, grouping cells into rows
fn visit_sheet_rows<F>(path: &Path, mut visit: F) -> Result<()>
where
    F: FnMut(u64, Vec<String>) -> Result<()>,
{
    let mut workbook: Xlsx<BufReader<File>> = open_workbook(path).map_err(spreadsheet_error)?;
    let Some(sheet) = workbook.sheet_names().first().cloned() else {
        return Ok(());
    };
    let mut cells = workbook
        .worksheet_cells_reader(&sheet)
        .map_err(spreadsheet_error)?;

    let mut index = 0u64;
    let mut open_row: Option<(u32, Vec<String>)> = None;

    while let Some(cell) = cells.next_cell().map_err(spreadsheet_error)? {
        let value = cell.get_value();
        if matches!(value, DataRef::Empty) {
            continue;
        }
        let (row, col) = cell.get_position();

        if open_row.as_ref().is_some_and(|(current, _)| *current != row) {
            if let Some((_, values)) = open_row.take() {
                visit(index, values)?;
                index += 1;
            }
        }

        let (_, values) = open_row.get_or_insert_with(|| (row, Vec::new()));
        let col = col as usize;
        if values.len() <= col {
            values.resize(col + 1, String::new());
        }
        values[col] = cell_text(value);
    }

    if let Some((_, values)) = open_row {
        visit(index, values)?;
    }
    Ok(())
}

fn cell_text(cell: &DataRef<'_>) -> String {
    match cell {
        DataRef::Empty => String::new(),
        DataRef::String(s) => s.clone(),
        DataRef::SharedString(s) => s.to_string(),
        DataRef::Float(f) => f.to_string(),
        DataRef::Int(i) => i.to_string(),
        DataRef::Bool(b) => b.to_string(),
        DataRef::DateTime(dt) => dt.as_f64().to_string(),
        DataRef::DateTimeIso(s) | DataRef::DurationIso(s) => s.clone(),
        _ => String::new(),
    }
}

fn spreadsheet_error(err: impl std::fmt::Display) -> ProcessingError {
    ProcessingError::Spreadsheet(err.to_string())
}
