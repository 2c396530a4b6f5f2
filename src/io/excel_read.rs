use std::fs;
use std::path::Path;

use calamine::{DataType, Range, Reader, Xlsx, open_workbook};
use tracing::debug;

use crate::config::Config;
use crate::error::{Result, ToolError};
use crate::io::excel_write::TABLES_SHEET;
use crate::io::table::{table_path, write_table};
use crate::model::{Cells, IDENTITY_COLUMN, Row, Table};

/// Reads a workbook produced by
/// [`export_workbook`](crate::io::excel_write::export_workbook) and writes
/// every listed sheet back as a section table of `document_dir`.
///
/// Returns the number of tables written. Sections unknown to the schema are
/// rejected before any table is touched.
pub fn import_workbook(config: &Config, path: &Path, document_dir: &Path) -> Result<usize> {
    if !path.is_file() {
        return Err(ToolError::MissingInput(path.to_path_buf()));
    }
    let mut workbook: Xlsx<_> = open_workbook(path)?;

    let index = read_required_sheet(&mut workbook, TABLES_SHEET)?;
    let listed = parse_index(&index)?;
    if let Some((_, section)) = listed
        .iter()
        .find(|(_, section)| !config.schema.is_managed(section))
    {
        return Err(ToolError::InvalidWorkbook(format!(
            "sheet list names unknown section '{section}'"
        )));
    }

    let mut tables = Vec::with_capacity(listed.len());
    for (sheet, section) in listed {
        let range = read_required_sheet(&mut workbook, &sheet)?;
        tables.push((section, sheet_table(&range, &sheet)?));
    }

    fs::create_dir_all(document_dir)?;
    for (section, table) in &tables {
        debug!(%section, rows = table.rows.len(), "importing sheet");
        write_table(
            &table_path(document_dir, section),
            table,
            config.table.delimiter_byte(),
        )?;
    }
    Ok(tables.len())
}

fn read_required_sheet<R: std::io::Read + std::io::Seek>(
    workbook: &mut Xlsx<R>,
    name: &str,
) -> Result<Range<DataType>> {
    let range = workbook
        .worksheet_range(name)
        .ok_or_else(|| ToolError::InvalidWorkbook(format!("missing sheet '{name}'")))??;
    Ok(range)
}

fn parse_index(range: &Range<DataType>) -> Result<Vec<(String, String)>> {
    let mut listed = Vec::new();
    for row in range.rows().skip(1) {
        let sheet = cell_to_string(row.first());
        if sheet.is_empty() {
            continue;
        }
        let section = cell_to_string(row.get(1));
        if section.is_empty() {
            return Err(ToolError::InvalidWorkbook(format!(
                "sheet '{sheet}' is not mapped to a section"
            )));
        }
        listed.push((sheet, section));
    }
    Ok(listed)
}

fn sheet_table(range: &Range<DataType>, sheet: &str) -> Result<Table> {
    let mut rows = range.rows();
    let columns: Vec<String> = rows
        .next()
        .map(|header| header.iter().map(|cell| cell_to_string(Some(cell))).collect())
        .unwrap_or_default();
    let identity_index = columns
        .iter()
        .position(|column| column == IDENTITY_COLUMN)
        .ok_or_else(|| {
            ToolError::InvalidWorkbook(format!("sheet '{sheet}' has no '{IDENTITY_COLUMN}' column"))
        })?;

    let mut table = Table::new(
        columns
            .iter()
            .filter(|column| !column.is_empty() && column.as_str() != IDENTITY_COLUMN)
            .cloned()
            .collect(),
    );

    for row in rows {
        if row.iter().all(|cell| matches!(cell, DataType::Empty)) {
            continue;
        }
        let mut cells = Cells::new();
        for (index, column) in columns.iter().enumerate() {
            if index == identity_index || column.is_empty() {
                continue;
            }
            let value = cell_to_string(row.get(index));
            cells.insert(column.clone(), (!value.is_empty()).then_some(value));
        }
        table.rows.push(Row {
            identity: cell_to_string(row.get(identity_index)),
            cells,
        });
    }
    Ok(table)
}

fn cell_to_string(cell: Option<&DataType>) -> String {
    match cell {
        Some(DataType::String(value)) => value.clone(),
        Some(DataType::Float(value)) => value.to_string(),
        Some(DataType::Int(value)) => value.to_string(),
        Some(DataType::Bool(value)) => value.to_string(),
        Some(DataType::Empty) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SectionSchema;
    use crate::io::excel_write::export_workbook;
    use crate::io::table::read_table;
    use tempfile::tempdir;

    fn config() -> Config {
        let mut config = Config::default();
        config.schema.sections.push(SectionSchema {
            key: "fieldPermissions".into(),
            key_fields: vec!["field".into()],
            columns: vec!["editable".into(), "field".into()],
        });
        config
    }

    #[test]
    fn exported_tables_import_unchanged() {
        let dir = tempdir().expect("temp dir");
        let source_dir = dir.path().join("Admin");
        fs::create_dir_all(&source_dir).expect("source dir");

        let mut table = Table::new(vec!["editable".into(), "field".into()]);
        table.rows.push(Row {
            identity: "Account.Name".into(),
            cells: [
                ("editable".to_string(), Some("true".to_string())),
                ("field".to_string(), Some("Account.Name".to_string())),
            ]
            .into_iter()
            .collect(),
        });
        table.rows.push(Row {
            identity: "Contact.Email".into(),
            cells: [
                ("editable".to_string(), None),
                ("field".to_string(), Some("Contact.Email".to_string())),
            ]
            .into_iter()
            .collect(),
        });
        write_table(&table_path(&source_dir, "fieldPermissions"), &table, b',')
            .expect("table written");

        let workbook = dir.path().join("Admin.xlsx");
        let written = export_workbook(&config(), &source_dir, &workbook).expect("exported");
        assert_eq!(written, 1);

        let target_dir = dir.path().join("imported");
        let imported = import_workbook(&config(), &workbook, &target_dir).expect("imported");
        assert_eq!(imported, 1);

        let read_back =
            read_table(&table_path(&target_dir, "fieldPermissions"), b',').expect("table read");
        assert_eq!(read_back, table);
    }

    #[test]
    fn missing_workbook_is_reported() {
        let dir = tempdir().expect("temp dir");
        let result = import_workbook(&config(), &dir.path().join("none.xlsx"), dir.path());
        assert!(matches!(result, Err(ToolError::MissingInput(_))));
    }
}
