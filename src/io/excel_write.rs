use std::collections::HashSet;
use std::path::Path;

use rust_xlsxwriter::{Table as ExcelTable, Workbook, Worksheet};
use tracing::debug;

use crate::config::Config;
use crate::error::{Result, ToolError};
use crate::io::table::{read_table, table_path};
use crate::model::{IDENTITY_COLUMN, Table};

/// Sheet mapping worksheet names back to section keys.
pub const TABLES_SHEET: &str = "Tables";

const SHEET_NAME_LIMIT: usize = 31;

/// Writes the tables of one document directory into a workbook, one sheet
/// per section, plus a [`TABLES_SHEET`] listing which sheet holds which
/// section. Returns the number of section sheets written.
pub fn export_workbook(config: &Config, document_dir: &Path, path: &Path) -> Result<usize> {
    if !document_dir.is_dir() {
        return Err(ToolError::not_found("table directory", document_dir));
    }

    let mut sheet_names = SheetNameRegistry::default();
    sheet_names.claim(TABLES_SHEET);

    let mut sheets: Vec<(String, String, Table)> = Vec::new();
    for section in &config.schema.sections {
        let table_file = table_path(document_dir, &section.key);
        if !table_file.is_file() {
            continue;
        }
        let table = read_table(&table_file, config.table.delimiter_byte())?;
        sheets.push((sheet_names.assign(&section.key), section.key.clone(), table));
    }

    let mut workbook = Workbook::new();
    let index = workbook.add_worksheet();
    index.set_name(TABLES_SHEET)?;
    index.write_string(0, 0, "sheet")?;
    index.write_string(0, 1, "section")?;
    for (row, (sheet, section, _)) in sheets.iter().enumerate() {
        index.write_string(row as u32 + 1, 0, sheet)?;
        index.write_string(row as u32 + 1, 1, section)?;
    }

    for (sheet, section, table) in &sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(sheet)?;
        write_sheet(worksheet, table)?;
        debug!(%sheet, %section, rows = table.rows.len(), "sheet written");
    }

    workbook.save(path)?;
    Ok(sheets.len())
}

fn write_sheet(worksheet: &mut Worksheet, table: &Table) -> Result<()> {
    let columns: Vec<&str> = table
        .headers
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(IDENTITY_COLUMN))
        .collect();
    for (col, header) in columns.iter().enumerate() {
        worksheet.write_string(0, col as u16, *header)?;
    }

    for (row_idx, row) in table.rows.iter().enumerate() {
        let excel_row = row_idx as u32 + 1;
        for (col, header) in table.headers.iter().enumerate() {
            if let Some(value) = row.get(header) {
                worksheet.write_string(excel_row, col as u16, value)?;
            }
        }
        if !row.identity.is_empty() {
            worksheet.write_string(excel_row, table.headers.len() as u16, &row.identity)?;
        }
    }

    // A worksheet table needs at least one data row.
    if !table.rows.is_empty() {
        let mut excel_table = ExcelTable::new();
        excel_table.set_autofilter(true);
        let col_end = (columns.len() as u16).saturating_sub(1);
        worksheet.add_table(0, 0, table.rows.len() as u32, col_end, &excel_table)?;
    }
    Ok(())
}

#[derive(Debug, Default)]
struct SheetNameRegistry {
    used: HashSet<String>,
}

impl SheetNameRegistry {
    fn claim(&mut self, name: &str) {
        self.used.insert(name.to_lowercase());
    }

    /// Returns a unique, valid sheet name for `raw`. Sheet names compare
    /// case-insensitively in workbooks.
    fn assign(&mut self, raw: &str) -> String {
        let base = sanitize_sheet_name(raw);
        if self.used.insert(base.to_lowercase()) {
            return base;
        }

        let mut counter = 1;
        loop {
            let suffix = format!("_{counter}");
            let prefix: String = base
                .chars()
                .take(SHEET_NAME_LIMIT - suffix.len())
                .collect();
            let candidate = format!("{prefix}{suffix}");
            if self.used.insert(candidate.to_lowercase()) {
                return candidate;
            }
            counter += 1;
        }
    }
}

fn sanitize_sheet_name(raw: &str) -> String {
    let invalid = [':', '\\', '/', '?', '*', '[', ']', '\'', '"'];
    let sanitized: String = raw
        .chars()
        .map(|ch| {
            if invalid.contains(&ch) || ch.is_control() {
                '_'
            } else {
                ch
            }
        })
        .collect();

    let trimmed = sanitized.trim();
    if trimmed.is_empty() {
        return "Sheet".to_string();
    }
    trimmed.chars().take(SHEET_NAME_LIMIT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_and_colliding_names_stay_unique() {
        let mut registry = SheetNameRegistry::default();
        registry.claim(TABLES_SHEET);

        let long = "customMetadataTypeAccessesWithSuffix";
        let first = registry.assign(long);
        let second = registry.assign(long);
        assert_eq!(first.chars().count(), 31);
        assert_eq!(second.chars().count(), 31);
        assert!(second.ends_with("_1"));
        assert_ne!(first, second);

        assert_eq!(registry.assign("tables"), "tables_1");
    }

    #[test]
    fn invalid_characters_are_replaced() {
        assert_eq!(sanitize_sheet_name("a/b:c"), "a_b_c");
        assert_eq!(sanitize_sheet_name("  "), "Sheet");
    }
}
