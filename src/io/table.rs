use std::path::{Path, PathBuf};

use csv::{QuoteStyle, ReaderBuilder, WriterBuilder};

use crate::error::{Result, ToolError};
use crate::model::{Cells, IDENTITY_COLUMN, Row, Table};

/// Extension of persisted tables.
pub const TABLE_EXTENSION: &str = "csv";

/// Location of the table holding `section` inside a document directory.
pub fn table_path(document_dir: &Path, section: &str) -> PathBuf {
    document_dir.join(format!("{section}.{TABLE_EXTENSION}"))
}

/// Writes a table with a header row. Every field is quoted, carriage
/// returns are dropped from values, and the identity is the last column.
pub fn write_table(path: &Path, table: &Table, delimiter: u8) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Always)
        .from_path(path)?;

    writer.write_record(
        table
            .headers
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(IDENTITY_COLUMN)),
    )?;

    for row in &table.rows {
        let mut record: Vec<String> = table
            .headers
            .iter()
            .map(|header| row.get(header).map(strip_carriage_returns).unwrap_or_default())
            .collect();
        record.push(strip_carriage_returns(&row.identity));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

/// Reads a table written by [`write_table`] (or edited by hand). Empty cells
/// are read back as null.
pub fn read_table(path: &Path, delimiter: u8) -> Result<Table> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_path(path)?;

    let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let identity_index = columns
        .iter()
        .position(|column| column == IDENTITY_COLUMN)
        .ok_or_else(|| {
            ToolError::InvalidTable(format!(
                "{} has no '{IDENTITY_COLUMN}' column",
                path.display()
            ))
        })?;

    let headers: Vec<String> = columns
        .iter()
        .filter(|column| column.as_str() != IDENTITY_COLUMN)
        .cloned()
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut cells = Cells::new();
        let mut identity = String::new();
        for (index, field) in record.iter().enumerate() {
            if index == identity_index {
                identity = field.to_string();
                continue;
            }
            let Some(column) = columns.get(index) else {
                continue;
            };
            let cell = (!field.is_empty()).then(|| field.to_string());
            cells.insert(column.clone(), cell);
        }
        rows.push(Row { identity, cells });
    }

    Ok(Table { headers, rows })
}

fn strip_carriage_returns(value: &str) -> String {
    value.replace('\r', "")
}
