// src/process/workbook.rs
use anyhow::{Context, Result};
use rust_xlsxwriter::{Color, Format, Workbook};
use tracing::debug;

use super::batch::{MergedRow, MERGED_COLUMNS};

pub const OUTPUT_FILENAME: &str = "verified_addresses.xlsx";
pub const SHEET_NAME: &str = "Verified Addresses";
const HEADER_FILL: u32 = 0xEDF2F7;

/// A finished file ready for the dispatchers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Header row: the fixed merged columns, then any extra input columns in
/// first-seen order.
fn header_row(rows: &[MergedRow]) -> Vec<&str> {
    let mut headers: Vec<&str> = MERGED_COLUMNS.to_vec();
    for row in rows {
        for (key, _) in &row.extra {
            if !headers.contains(&key.as_str()) {
                headers.push(key);
            }
        }
    }
    headers
}

/// Serialize `rows` into a single-sheet workbook with a bold, shaded header.
pub fn write_workbook(rows: &[MergedRow]) -> Result<Artifact> {
    let headers = header_row(rows);
    let extra_headers = &headers[MERGED_COLUMNS.len()..];

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME).context("naming worksheet")?;

    let header_format = Format::new()
        .set_bold()
        .set_background_color(Color::RGB(HEADER_FILL));

    for (col, name) in headers.iter().enumerate() {
        sheet
            .write_string_with_format(0, col as u16, *name, &header_format)
            .with_context(|| format!("writing header {name}"))?;
    }

    for (idx, row) in rows.iter().enumerate() {
        let r = idx as u32 + 1;
        for (col, value) in row.values().iter().enumerate() {
            if !value.is_empty() {
                sheet.write_string(r, col as u16, *value)?;
            }
        }
        for (offset, name) in extra_headers.iter().enumerate() {
            let col = (MERGED_COLUMNS.len() + offset) as u16;
            if let Some((_, value)) = row.extra.iter().find(|(k, _)| k == name) {
                if !value.is_empty() {
                    sheet.write_string(r, col, value)?;
                }
            }
        }
    }
    sheet.set_freeze_panes(1, 0)?;

    let bytes = workbook
        .save_to_buffer()
        .context("serializing workbook")?;
    debug!(rows = rows.len(), bytes = bytes.len(), "workbook written");

    Ok(Artifact {
        filename: OUTPUT_FILENAME.to_string(),
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::VerifiedAddress;
    use crate::process::columns;
    use calamine::{Data, Reader, Xlsx};
    use std::io::Cursor;

    fn merged(name: &str, address: &str, extra: &[(&str, &str)]) -> MergedRow {
        let mut row = MergedRow::default();
        row.original[0] = name.to_string();
        row.original_address = address.to_string();
        row.verified = VerifiedAddress::fallback(address);
        row.extra = extra
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        row
    }

    fn cell(range: &calamine::Range<Data>, row: u32, col: u32) -> String {
        match range.get_value((row, col)) {
            Some(Data::String(s)) => s.clone(),
            _ => String::new(),
        }
    }

    #[test]
    fn test_header_and_rows_in_order() -> Result<()> {
        let rows = vec![
            merged("Ann", "1 Main St", &[("Gift Note", "hi")]),
            merged("", "", &[]),
            merged("Cat", "3 Main St", &[("Priority", "high")]),
        ];
        let artifact = write_workbook(&rows)?;
        assert_eq!(artifact.filename, "verified_addresses.xlsx");

        let mut wb: Xlsx<_> = Xlsx::new(Cursor::new(artifact.bytes))?;
        let range = wb.worksheet_range(SHEET_NAME)?;

        assert_eq!(cell(&range, 0, 0), columns::NAME);
        assert_eq!(cell(&range, 0, 12), columns::ORIGINAL_ADDRESS);
        assert_eq!(cell(&range, 0, 13), columns::VERIFIED_ADDRESS);
        assert_eq!(cell(&range, 0, 23), "verified Ship To - Country");
        assert_eq!(cell(&range, 0, 24), "Gift Note");
        assert_eq!(cell(&range, 0, 25), "Priority");

        assert_eq!(cell(&range, 1, 0), "Ann");
        assert_eq!(cell(&range, 1, 13), "1 Main St");
        assert_eq!(cell(&range, 1, 24), "hi");
        assert_eq!(cell(&range, 2, 12), "");
        assert_eq!(cell(&range, 3, 0), "Cat");
        assert_eq!(cell(&range, 3, 25), "high");
        assert_eq!(range.height(), 4);
        Ok(())
    }

    #[test]
    fn test_empty_batch_has_header_only() -> Result<()> {
        let artifact = write_workbook(&[])?;
        let mut wb: Xlsx<_> = Xlsx::new(Cursor::new(artifact.bytes))?;
        let range = wb.worksheet_range(SHEET_NAME)?;
        assert_eq!(range.height(), 1);
        assert_eq!(range.width(), MERGED_COLUMNS.len());
        Ok(())
    }
}
