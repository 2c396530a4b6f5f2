//! Reconciliation of XML documents with their tables.
//!
//! Every batch operation takes the engine [`Config`] and a [`Request`]
//! selecting documents, sections, identities and locations, and returns a
//! [`BatchReport`]. A failure on one document is recorded in the report and
//! the batch moves on; only invalid invocation parameters abort the call.

pub mod retrieve;
pub(crate) mod tables;

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, SectionSchema};
use crate::error::{Result, ToolError};
use crate::flatten::{self, Tabular};
use crate::identity::{self, IdentityPattern};
use crate::io::table::{read_table, table_path, write_table};
use crate::io::xml::{self, PARTIAL_SUFFIX, XmlStyle};
use crate::model::{Cells, Document, Record, Table, Value};

use self::tables::{merge_rows, section_table, table_records, tag_rows};

/// Selection and location overrides shared by every batch operation.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// Document names to process; all documents when empty.
    pub documents: Vec<String>,
    /// Section keys to process; all schema sections when empty.
    pub sections: Vec<String>,
    /// Identity patterns (`Foo`, `Foo*`, `*Foo`, `*Foo*`).
    pub identities: Vec<String>,
    /// Overrides `table.sort` from the configuration.
    pub sort: Option<bool>,
    /// Overrides `paths.source` from the configuration.
    pub source_dir: Option<PathBuf>,
    /// Overrides `paths.tables` from the configuration.
    pub table_dir: Option<PathBuf>,
}

impl Request {
    pub fn for_documents<I, S>(documents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            documents: documents.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// A selector narrows an operation to existing tables.
    pub fn has_selector(&self) -> bool {
        !self.sections.is_empty() || !self.identities.is_empty()
    }
}

/// Result of one item or of a whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Ok,
    Ko,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemReport {
    pub result: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-document outcome of a batch operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub result: Outcome,
    pub items: IndexMap<String, ItemReport>,
}

impl Default for BatchReport {
    fn default() -> Self {
        Self {
            result: Outcome::Ok,
            items: IndexMap::new(),
        }
    }
}

impl BatchReport {
    /// Records the outcome of one item. Any failure turns the batch result
    /// into [`Outcome::Ko`].
    pub fn record(&mut self, name: &str, outcome: Result<()>) {
        let item = match outcome {
            Ok(()) => ItemReport {
                result: Outcome::Ok,
                error: None,
            },
            Err(error) => {
                warn!(item = %name, %error, "item failed");
                self.result = Outcome::Ko;
                ItemReport {
                    result: Outcome::Ko,
                    error: Some(error.to_string()),
                }
            }
        };
        self.items.insert(name.to_string(), item);
    }

    pub fn is_ok(&self) -> bool {
        self.result == Outcome::Ok
    }
}

/// A request resolved against the configuration.
pub(crate) struct Plan<'a> {
    pub(crate) config: &'a Config,
    pub(crate) source: PathBuf,
    pub(crate) tables: PathBuf,
    pub(crate) sections: Vec<&'a SectionSchema>,
    pub(crate) patterns: Vec<IdentityPattern>,
    pub(crate) sort: bool,
    pub(crate) selective: bool,
}

impl<'a> Plan<'a> {
    pub(crate) fn resolve(config: &'a Config, request: &Request) -> Result<Self> {
        let sections = if request.sections.is_empty() {
            config.schema.sections.iter().collect()
        } else {
            request
                .sections
                .iter()
                .map(|key| {
                    config.schema.section(key).ok_or_else(|| {
                        ToolError::Configuration(format!("unknown section '{key}'"))
                    })
                })
                .collect::<Result<Vec<_>>>()?
        };

        if let Some(pattern) = request.identities.iter().find(|pattern| pattern.is_empty()) {
            return Err(ToolError::Configuration(format!(
                "identity pattern '{pattern}' is empty"
            )));
        }

        Ok(Self {
            config,
            source: request
                .source_dir
                .clone()
                .unwrap_or_else(|| config.paths.source.clone()),
            tables: request
                .table_dir
                .clone()
                .unwrap_or_else(|| config.paths.tables.clone()),
            sections,
            patterns: request
                .identities
                .iter()
                .map(|pattern| IdentityPattern::parse(pattern))
                .collect(),
            sort: request.sort.unwrap_or(config.table.sort),
            selective: request.has_selector(),
        })
    }

    pub(crate) fn document_dir(&self, name: &str) -> PathBuf {
        self.config.document_dir(&self.tables, name)
    }

    pub(crate) fn source_file(&self, name: &str) -> PathBuf {
        self.config.source_file(&self.source, name)
    }

    fn delimiter(&self) -> u8 {
        self.config.table.delimiter_byte()
    }

    /// Documents named in the request, or every document in the source
    /// directory.
    pub(crate) fn source_documents(&self, request: &Request) -> Result<Vec<String>> {
        if !request.documents.is_empty() {
            return Ok(request.documents.clone());
        }
        let suffix = &self.config.schema.suffix;
        list_dir(&self.source, "source directory", |entry| {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let is_file = entry.file_type().map(|kind| kind.is_file()).unwrap_or(false);
            match file_name.strip_suffix(suffix.as_str()) {
                Some(name) if is_file && !suffix.is_empty() && !name.is_empty() => {
                    Some(name.to_string())
                }
                _ => None,
            }
        })
    }

    /// Documents named in the request, or every document directory below
    /// the table directory.
    pub(crate) fn table_documents(&self, request: &Request) -> Result<Vec<String>> {
        if !request.documents.is_empty() {
            return Ok(request.documents.clone());
        }
        list_dir(&self.tables, "table directory", |entry| {
            let is_dir = entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false);
            is_dir.then(|| entry.file_name().to_string_lossy().into_owned())
        })
    }

    pub(crate) fn read_source(&self, name: &str) -> Result<Document> {
        let path = self.source_file(name);
        if !path.is_file() {
            return Err(ToolError::not_found("source document", path));
        }
        xml::read_document(&path, &self.config.schema.suffix)
    }
}

fn list_dir<F>(dir: &Path, what: &'static str, mut select: F) -> Result<Vec<String>>
where
    F: FnMut(&fs::DirEntry) -> Option<String>,
{
    if !dir.is_dir() {
        return Err(ToolError::not_found(what, dir));
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        if let Some(name) = select(&entry?) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Regenerates every table of the selected documents from scratch.
///
/// The document's table directory is removed first, so manual edits are
/// discarded. Each managed section is nulled in the document and the residue
/// is stored as the partial document.
#[instrument(level = "info", skip_all, fields(documents = request.documents.len()))]
pub fn split(config: &Config, request: &Request) -> Result<BatchReport> {
    if request.has_selector() {
        return Err(ToolError::Configuration(
            "split regenerates every section; section and identity selectors are not accepted"
                .into(),
        ));
    }
    let plan = Plan::resolve(config, request)?;
    let mut report = BatchReport::default();

    for name in plan.source_documents(request)? {
        let outcome = plan
            .read_source(&name)
            .and_then(|document| split_document(&plan, &document));
        report.record(&name, outcome);
    }

    info!(items = report.items.len(), ok = report.is_ok(), "split finished");
    Ok(report)
}

pub(crate) fn split_document(plan: &Plan<'_>, document: &Document) -> Result<()> {
    let dir = plan.document_dir(&document.name);
    if dir.exists() {
        fs::remove_dir_all(&dir)?;
    }
    fs::create_dir_all(&dir)?;

    let mut partial = document.clone();
    for section in &plan.config.schema.sections {
        let table = section_table(plan.config, document, section, &[], plan.sort)?;
        debug!(
            document = %document.name,
            section = %section.key,
            rows = table.rows.len(),
            "writing table"
        );
        write_table(&table_path(&dir, &section.key), &table, plan.delimiter())?;
        if partial.body.contains(&section.key) {
            partial.body.insert(section.key.clone(), Value::Null);
        }
    }

    let partial_path = dir.join(format!("{}{PARTIAL_SUFFIX}", document.name));
    xml::write_document(&partial_path, &partial, XmlStyle::Partial)
}

/// Merges the selected documents into their existing tables by identity.
///
/// Rows whose identity appears in the incoming document are overwritten or
/// inserted; every other row is left untouched. A document without tables is
/// split instead, unless the request carries a selector, in which case the
/// document is reported as not found.
#[instrument(level = "info", skip_all, fields(documents = request.documents.len()))]
pub fn upsert(config: &Config, request: &Request) -> Result<BatchReport> {
    let plan = Plan::resolve(config, request)?;
    let mut report = BatchReport::default();

    for name in plan.source_documents(request)? {
        let outcome = plan
            .read_source(&name)
            .and_then(|document| upsert_document(&plan, &document));
        report.record(&name, outcome);
    }

    info!(items = report.items.len(), ok = report.is_ok(), "upsert finished");
    Ok(report)
}

pub(crate) fn upsert_document(plan: &Plan<'_>, document: &Document) -> Result<()> {
    let dir = plan.document_dir(&document.name);
    if !dir.is_dir() {
        if plan.selective {
            return Err(ToolError::not_found("table directory", dir));
        }
        info!(document = %document.name, "no tables yet; splitting instead");
        return split_document(plan, document);
    }

    for section in &plan.sections {
        let incoming = section_table(plan.config, document, section, &plan.patterns, false)?;
        let path = table_path(&dir, &section.key);
        let existing = if path.is_file() {
            read_table(&path, plan.delimiter())?
        } else {
            Table::new(section.columns.clone())
        };
        let merged = merge_rows(existing, incoming, plan.sort);
        debug!(
            document = %document.name,
            section = %section.key,
            rows = merged.rows.len(),
            "writing merged table"
        );
        write_table(&path, &merged, plan.delimiter())?;
    }
    Ok(())
}

/// Rebuilds the full document stored in `document_dir` from its partial
/// document and tables.
///
/// Sections with a table replace their null placeholder; sections whose
/// table is missing or empty are removed.
pub fn merge_document(config: &Config, document_dir: &Path) -> Result<Document> {
    let name = document_dir
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            ToolError::InvalidDocument(format!("invalid table directory {}", document_dir.display()))
        })?;
    let partial_path = document_dir.join(format!("{name}{PARTIAL_SUFFIX}"));
    if !partial_path.is_file() {
        return Err(ToolError::not_found("partial document", partial_path));
    }
    let mut document = xml::read_document(&partial_path, PARTIAL_SUFFIX)?;

    for section in &config.schema.sections {
        let path = table_path(document_dir, &section.key);
        if !path.is_file() {
            document.body.remove(&section.key);
            continue;
        }
        let table = read_table(&path, config.table.delimiter_byte())?;
        let records = table_records(table, &config.table.qualifier);
        if records.is_empty() {
            document.body.remove(&section.key);
        } else {
            let items = records.into_iter().map(Value::Record).collect();
            document.body.insert(section.key.clone(), Value::List(items));
        }
    }
    Ok(document)
}

/// Rebuilds the selected documents from their tables and writes them to the
/// source directory.
#[instrument(level = "info", skip_all, fields(documents = request.documents.len()))]
pub fn merge(config: &Config, request: &Request) -> Result<BatchReport> {
    let plan = Plan::resolve(config, request)?;
    let mut report = BatchReport::default();
    if !plan.source.exists() {
        fs::create_dir_all(&plan.source)?;
    }

    for name in plan.table_documents(request)? {
        let dir = plan.document_dir(&name);
        let outcome = if dir.is_dir() {
            merge_document(config, &dir).and_then(|document| {
                xml::write_document(&plan.source_file(&name), &document, XmlStyle::Full)
            })
        } else {
            Err(ToolError::not_found("table directory", dir))
        };
        report.record(&name, outcome);
    }

    info!(items = report.items.len(), ok = report.is_ok(), "merge finished");
    Ok(report)
}

/// Removes the rows whose identity matches any of the request's patterns
/// from the selected sections.
#[instrument(level = "info", skip_all, fields(documents = request.documents.len()))]
pub fn delete(config: &Config, request: &Request) -> Result<BatchReport> {
    if request.sections.is_empty() || request.identities.is_empty() {
        return Err(ToolError::Configuration(
            "delete needs at least one section and one identity pattern".into(),
        ));
    }
    let plan = Plan::resolve(config, request)?;
    let mut report = BatchReport::default();

    for name in plan.table_documents(request)? {
        let outcome = delete_rows(&plan, &name);
        report.record(&name, outcome);
    }

    info!(items = report.items.len(), ok = report.is_ok(), "delete finished");
    Ok(report)
}

fn delete_rows(plan: &Plan<'_>, name: &str) -> Result<()> {
    let dir = plan.document_dir(name);
    if !dir.is_dir() {
        return Err(ToolError::not_found("table directory", dir));
    }
    for section in &plan.sections {
        let path = table_path(&dir, &section.key);
        if !path.is_file() {
            return Err(ToolError::not_found("table", path));
        }
        let mut table = read_table(&path, plan.delimiter())?;
        let before = table.rows.len();
        table
            .rows
            .retain(|row| !identity::matches_any(&plan.patterns, &row.identity));
        info!(
            document = %name,
            section = %section.key,
            removed = before - table.rows.len(),
            "deleted rows"
        );
        write_table(&path, &table, plan.delimiter())?;
    }
    Ok(())
}

/// Merges caller supplied records into one section of the selected
/// documents, exactly like the map-merge step of [`upsert`].
///
/// Every record must carry a value for at least one key field of the
/// section; otherwise the call fails before anything is written.
#[instrument(level = "info", skip_all, fields(records = records.len()))]
pub fn custom_upsert(config: &Config, request: &Request, records: &[Record]) -> Result<BatchReport> {
    let [section_key] = request.sections.as_slice() else {
        return Err(ToolError::Configuration(
            "custom upsert needs exactly one section".into(),
        ));
    };
    if request.documents.is_empty() {
        return Err(ToolError::Configuration(
            "custom upsert needs at least one document".into(),
        ));
    }
    let plan = Plan::resolve(config, request)?;
    let section = plan.sections[0];

    let cells = flatten::flatten(records, &config.table.qualifier);
    for (index, row) in cells.iter().enumerate() {
        if Record::identity(row, &section.key_fields).is_empty() {
            return Err(ToolError::Validation(format!(
                "record {index} has none of the key fields {:?} of section '{section_key}'",
                section.key_fields
            )));
        }
    }

    let mut report = BatchReport::default();
    for name in &request.documents {
        let outcome = custom_upsert_document(&plan, section, name, cells.clone());
        report.record(name, outcome);
    }
    Ok(report)
}

fn custom_upsert_document(
    plan: &Plan<'_>,
    section: &SectionSchema,
    name: &str,
    cells: Vec<Cells>,
) -> Result<()> {
    let dir = plan.document_dir(name);
    if !dir.is_dir() {
        return Err(ToolError::not_found("table directory", dir));
    }
    let path = table_path(&dir, &section.key);
    let existing = if path.is_file() {
        read_table(&path, plan.delimiter())?
    } else {
        Table::new(section.columns.clone())
    };

    let mut incoming = Table::new(section.columns.clone());
    incoming.rows = tag_rows(cells, section, name);
    let columns: Vec<String> = incoming
        .rows
        .iter()
        .flat_map(|row| row.cells.keys().cloned())
        .collect();
    incoming.extend_headers(&columns);

    let merged = merge_rows(existing, incoming, plan.sort);
    write_table(&path, &merged, plan.delimiter())
}
