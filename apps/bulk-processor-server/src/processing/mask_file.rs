//! Masked copy of a tabular file
//!
//! Reads the header row, derives [`ColumnRules`] once, then writes every data
//! row masked to `<output_dir>/<task_id>_desensitized.<ext>` in the source
//! format.

use std::fs::File;
use std::path::{Path, PathBuf};

use rust_xlsxwriter::Workbook;
use uuid::Uuid;

use super::masking::ColumnRules;
use super::rows::RowSource;
use super::{Checkpoint, ProcessingError, Result};
use crate::tasks::TaskOutcome;

/// Output file name for a mask task
pub fn output_name(task_id: Uuid, suffix: &str) -> String {
    format!("{}_desensitized{}", task_id, suffix)
}

/// Write a masked copy of `path` and report the produced file name
pub fn mask_file(
    path: &Path,
    output_dir: &Path,
    task_id: Uuid,
    checkpoint: &dyn Checkpoint,
) -> Result<TaskOutcome> {
    let source = RowSource::open(path)?;
    let total_rows = source.count()?;
    if total_rows == 0 {
        return Ok(TaskOutcome::no_rows());
    }
    let data_total = total_rows - 1;

    std::fs::create_dir_all(output_dir)?;
    let name = output_name(task_id, source.suffix());
    let output_path = output_dir.join(&name);

    let written = write_masked(&source, &output_path, task_id, data_total, checkpoint);
    if let Err(e) = written {
        let _ = std::fs::remove_file(&output_path);
        return Err(e);
    }

    Ok(TaskOutcome::completed(data_total, Some(name)))
}

fn write_masked(
    source: &RowSource,
    output_path: &Path,
    task_id: Uuid,
    data_total: u64,
    checkpoint: &dyn Checkpoint,
) -> Result<()> {
    let mut writer = MaskedWriter::create(source, output_path)?;
    let mut rules: Option<ColumnRules> = None;

    source.for_each_row(|index, row| {
        if let Some(rules) = &rules {
            writer.write_row(&rules.apply(&row))?;
            return checkpoint.checkpoint(index, data_total, "Desensitizing row");
        }

        // First row is the header
        let header_rules = ColumnRules::from_header(&row);
        tracing::debug!(
            task_id = %task_id,
            columns = row.len(),
            masked_columns = header_rules.masked_columns(),
            rows = data_total,
            "Masking file"
        );
        writer.write_row(&row)?;
        rules = Some(header_rules);
        Ok(())
    })?;

    writer.finish()
}

/// Format-specific sink for masked rows. Spreadsheet rows are flushed to a
/// temp file as they are written instead of being held until save.
enum MaskedWriter {
    Csv(csv::Writer<File>),
    Xlsx {
        workbook: Workbook,
        next_row: u32,
        path: PathBuf,
    },
}

impl MaskedWriter {
    fn create(source: &RowSource, path: &Path) -> Result<Self> {
        match source {
            RowSource::Delimited(_) => Ok(MaskedWriter::Csv(
                csv::WriterBuilder::new().flexible(true).from_path(path)?,
            )),
            RowSource::Spreadsheet(_) => {
                let mut workbook = Workbook::new();
                workbook.add_worksheet_with_constant_memory();
                Ok(MaskedWriter::Xlsx {
                    workbook,
                    next_row: 0,
                    path: path.to_path_buf(),
                })
            }
        }
    }

    fn write_row(&mut self, row: &[String]) -> Result<()> {
        match self {
            MaskedWriter::Csv(writer) => writer.write_record(row)?,
            MaskedWriter::Xlsx {
                workbook, next_row, ..
            } => {
                let sheet = workbook.worksheet_from_index(0).map_err(xlsx_error)?;
                for (col, value) in row.iter().enumerate() {
                    sheet
                        .write_string(*next_row, col as u16, value)
                        .map_err(xlsx_error)?;
                }
                *next_row += 1;
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<()> {
        match self {
            MaskedWriter::Csv(mut writer) => writer.flush()?,
            MaskedWriter::Xlsx { mut workbook, path, .. } => {
                workbook.save(&path).map_err(xlsx_error)?;
            }
        }
        Ok(())
    }
}

fn xlsx_error(err: rust_xlsxwriter::XlsxError) -> ProcessingError {
    ProcessingError::Spreadsheet(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::ingest::tests::RecordingCheckpoint;
    use crate::processing::rows::tests::{read_rows, write_xlsx};
    use crate::processing::NoopCheckpoint;
    use tempfile::TempDir;

    #[test]
    fn test_mask_csv_file() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("people.csv");
        std::fs::write(
            &source,
            "name,email,phone,city\nAlice,alice@example.com,138-1234-5678,Paris\nBob,,13812345678\n",
        )
        .unwrap();

        let task_id = Uuid::new_v4();
        let out_dir = dir.path().join("outputs");
        let checkpoint = RecordingCheckpoint::default();
        let outcome = mask_file(&source, &out_dir, task_id, &checkpoint).unwrap();

        let name = format!("{}_desensitized.csv", task_id);
        assert_eq!(outcome.output_file.as_deref(), Some(name.as_str()));
        assert_eq!((outcome.current, outcome.total), (2, 2));

        let written = std::fs::read_to_string(out_dir.join(&name)).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines[0], "name,email,phone,city");
        assert_eq!(lines[1], "A****,a***@example.com,***-****-5678,Paris");
        assert_eq!(lines[2], "B**,,*******5678");

        let reports = checkpoint.reports.lock();
        assert_eq!(reports.last().unwrap().2, "Desensitizing row 2/2");
    }

    #[test]
    fn test_mask_xlsx_file() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("people.xlsx");
        write_xlsx(&source, &[&["姓名", "id_card"], &["张三丰", "110101199001011234"]]);

        let task_id = Uuid::new_v4();
        let outcome = mask_file(&source, dir.path(), task_id, &NoopCheckpoint).unwrap();
        let output = dir.path().join(outcome.output_file.unwrap());

        let rows = read_rows(&output);
        assert_eq!(rows[0], vec!["姓名", "id_card"]);
        assert_eq!(rows[1], vec!["张**", "11**************34"]);
    }

    #[test]
    fn test_mask_large_xlsx_streams_every_row() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("contacts.xlsx");
        let bodies: Vec<[String; 2]> = (0..250)
            .map(|i| [format!("user{}", i), format!("1380000{:04}", i)])
            .collect();
        let mut rows: Vec<Vec<&str>> = vec![vec!["name", "mobile"]];
        rows.extend(bodies.iter().map(|r| vec![r[0].as_str(), r[1].as_str()]));
        let rows: Vec<&[&str]> = rows.iter().map(Vec::as_slice).collect();
        write_xlsx(&source, &rows);

        let checkpoint = RecordingCheckpoint::default();
        let outcome = mask_file(&source, dir.path(), Uuid::new_v4(), &checkpoint).unwrap();
        assert_eq!((outcome.current, outcome.total), (250, 250));

        let masked = read_rows(&dir.path().join(outcome.output_file.unwrap()));
        assert_eq!(masked.len(), 251);
        assert_eq!(masked[250], vec!["u******", "*******0249"]);
        assert_eq!(checkpoint.reports.lock().len(), 25);
    }

    #[test]
    fn test_empty_file_has_no_output() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("empty.csv");
        std::fs::write(&source, "").unwrap();

        let outcome = mask_file(&source, dir.path(), Uuid::new_v4(), &NoopCheckpoint).unwrap();
        assert_eq!(outcome, TaskOutcome::no_rows());
    }

    #[test]
    fn test_cancelled_mask_removes_partial_output() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("rows.csv");
        let body: String = std::iter::once("name\n".to_string())
            .chain((0..50).map(|i| format!("person{}\n", i)))
            .collect();
        std::fs::write(&source, body).unwrap();

        let task_id = Uuid::new_v4();
        let checkpoint = RecordingCheckpoint {
            cancel_at: Some(20),
            ..Default::default()
        };
        let result = mask_file(&source, dir.path(), task_id, &checkpoint);
        assert!(matches!(result, Err(ProcessingError::Cancelled)));
        assert!(!dir.path().join(output_name(task_id, ".csv")).exists());
    }
}
