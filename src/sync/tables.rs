//! Row-level helpers shared by the reconciliation operations: building a
//! section's table from a document, merging rows by identity, and turning
//! tables back into records.

use indexmap::IndexMap;
use tracing::warn;

use crate::config::{Config, SectionSchema};
use crate::error::Result;
use crate::flatten::{self, Tabular};
use crate::identity::{self, IdentityPattern};
use crate::model::{Cells, Document, Record, Row, Table};

/// Key of a row in a [`RowMap`]. Rows without an identity never match each
/// other, so each one gets its own slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RowKey {
    Identity(String),
    Anonymous(usize),
}

/// Identity → row map iterated in insertion order.
#[derive(Debug, Default)]
pub(crate) struct RowMap {
    rows: IndexMap<RowKey, Row>,
    anonymous: usize,
}

impl RowMap {
    pub(crate) fn from_rows(rows: Vec<Row>) -> Self {
        let mut map = Self::default();
        for row in rows {
            map.upsert(row);
        }
        map
    }

    /// Inserts a row, replacing the value (but not the position) of a row
    /// with the same identity. Returns `true` when a row was replaced.
    pub(crate) fn upsert(&mut self, row: Row) -> bool {
        let key = if row.identity.is_empty() {
            self.anonymous += 1;
            RowKey::Anonymous(self.anonymous)
        } else {
            RowKey::Identity(row.identity.clone())
        };
        self.rows.insert(key, row).is_some()
    }

    pub(crate) fn into_rows(self, sort: bool) -> Vec<Row> {
        let mut rows: Vec<Row> = self.rows.into_values().collect();
        if sort {
            rows.sort_by(|lhs, rhs| lhs.identity.cmp(&rhs.identity));
        }
        rows
    }
}

/// Builds the table of one section from a document: flatten, assign
/// identities, keep only rows matching `patterns` (all rows when empty), and
/// collapse duplicate identities so the last row wins.
pub(crate) fn section_table(
    config: &Config,
    document: &Document,
    section: &SectionSchema,
    patterns: &[IdentityPattern],
    sort: bool,
) -> Result<Table> {
    let records = document.section_records(&section.key)?;
    let cells = Record::flatten(&records, &config.table.qualifier);
    let rows = tag_rows(cells, section, &document.name);

    let mut table = Table::new(section.columns.clone());
    for row in &rows {
        let extra: Vec<&String> = row
            .cells
            .keys()
            .filter(|column| !table.headers.contains(column))
            .collect();
        if !extra.is_empty() {
            warn!(
                document = %document.name,
                section = %section.key,
                columns = ?extra,
                "row holds columns missing from the schema; appending them"
            );
            table.extend_headers(extra);
        }
    }

    let mut map = RowMap::default();
    for row in rows {
        if !patterns.is_empty() && !identity::matches_any(patterns, &row.identity) {
            continue;
        }
        let identity = row.identity.clone();
        if map.upsert(row) {
            warn!(
                document = %document.name,
                section = %section.key,
                %identity,
                "duplicate identity; keeping the last row"
            );
        }
    }
    table.rows = map.into_rows(sort);
    Ok(table)
}

/// Assigns identities to flattened rows of a section, warning about rows
/// whose key fields are all empty.
pub(crate) fn tag_rows(cells: Vec<Cells>, section: &SectionSchema, document: &str) -> Vec<Row> {
    let rows = identity::assign_identity(cells, &section.key_fields, &section.columns);
    for (index, row) in rows.iter().enumerate() {
        if row.identity.is_empty() {
            warn!(
                %document,
                section = %section.key,
                row = index,
                "row has no key field value; it will never be matched on upsert"
            );
        }
    }
    rows
}

/// Overwrites or inserts every incoming row into `existing`, by identity.
/// Rows of `existing` whose identity is not part of `incoming` are kept.
pub(crate) fn merge_rows(existing: Table, incoming: Table, sort: bool) -> Table {
    let mut headers = existing.headers;
    for header in incoming.headers {
        if !headers.contains(&header) {
            headers.push(header);
        }
    }

    let mut map = RowMap::from_rows(existing.rows);
    for row in incoming.rows {
        map.upsert(row);
    }

    Table {
        headers,
        rows: map.into_rows(sort),
    }
}

/// Turns a table back into section records. Tables whose headers carry the
/// qualifier are unflattened; flat tables map one row to one record.
pub(crate) fn table_records(table: Table, qualifier: &str) -> Vec<Record> {
    let nested = table.headers.iter().any(|header| header.contains(qualifier));
    let rows: Vec<Cells> = table.rows.into_iter().map(|row| row.cells).collect();
    if nested {
        Record::unflatten(rows, qualifier)
    } else {
        rows.into_iter().map(flatten::record_from_cells).collect()
    }
}
