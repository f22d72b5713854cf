// src/process/extract.rs
use anyhow::{anyhow, Context, Result};
use calamine::{Data, Reader, Xlsx};
use csv::ReaderBuilder;
use std::io::Cursor;
use tracing::{debug, info, instrument};

use super::RawRow;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const UTF8_BOM: char = '\u{feff}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Csv,
    Xlsx,
}

impl InputFormat {
    /// Spreadsheets are recognised by their ZIP container or `.xlsx` name;
    /// everything else is read as delimited text.
    pub fn detect(file_name: &str, bytes: &[u8]) -> Self {
        if bytes.starts_with(ZIP_MAGIC) || file_name.to_lowercase().ends_with(".xlsx") {
            InputFormat::Xlsx
        } else {
            InputFormat::Csv
        }
    }
}

/// Parse an uploaded file into rows keyed by the header row.
#[instrument(level = "info", skip(bytes), fields(len = bytes.len()))]
pub fn extract_rows(file_name: &str, bytes: &[u8]) -> Result<Vec<RawRow>> {
    let format = InputFormat::detect(file_name, bytes);
    let rows = match format {
        InputFormat::Csv => rows_from_csv(bytes),
        InputFormat::Xlsx => rows_from_xlsx(bytes),
    }
    .with_context(|| format!("reading {file_name} as {format:?}"))?;
    info!(rows = rows.len(), ?format, "extracted rows");
    Ok(rows)
}

fn zip_headers(headers: &[String], values: impl Iterator<Item = String>) -> RawRow {
    // values past the last header are dropped
    headers.iter().cloned().zip(values).collect()
}

fn lossy(field: &[u8]) -> String {
    String::from_utf8_lossy(field).into_owned()
}

/// Fields that are not valid UTF-8 are decoded with replacement characters.
pub fn rows_from_csv(bytes: &[u8]) -> Result<Vec<RawRow>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(Cursor::new(bytes));

    let headers: Vec<String> = rdr
        .byte_headers()
        .context("reading CSV header row")?
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let h = lossy(h);
            if i == 0 {
                h.trim_start_matches(UTF8_BOM).to_string()
            } else {
                h
            }
        })
        .collect();

    let mut rows = Vec::new();
    for (idx, result) in rdr.byte_records().enumerate() {
        let record = result.with_context(|| format!("CSV parse error at record {idx}"))?;
        if record.len() == 1 && record.get(0).is_some_and(|v| lossy(v).trim().is_empty()) {
            debug!(idx, "skipping blank line");
            continue;
        }
        rows.push(zip_headers(&headers, record.iter().map(lossy)));
    }
    Ok(rows)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string(),
    }
}

pub fn rows_from_xlsx(bytes: &[u8]) -> Result<Vec<RawRow>> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes)).context("opening workbook")?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| anyhow!("workbook has no worksheets"))?
        .context("reading first worksheet")?;

    let mut sheet_rows = range.rows();
    let headers: Vec<String> = match sheet_rows.next() {
        Some(cells) => cells.iter().map(cell_text).collect(),
        None => return Ok(Vec::new()),
    };

    let rows = sheet_rows
        .filter(|cells| cells.iter().any(|c| !cell_text(c).trim().is_empty()))
        .map(|cells| zip_headers(&headers, cells.iter().map(cell_text)))
        .collect();
    Ok(rows)
}
