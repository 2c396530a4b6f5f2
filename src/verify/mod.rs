//! Checks that tables still rebuild the documents they were split from.
//!
//! Two comparisons are available. The logic comparison rebuilds each
//! document and compares it structurally with the source, ignoring element
//! order and null fields. The string comparison serialises the rebuilt
//! document and compares it with the source text line by line, ignoring
//! indentation and blank lines.

use std::fs;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::error::{Result, ToolError};
use crate::io::xml::{XmlStyle, document_to_string};
use crate::model::{Document, Record, Value};
use crate::sync::{Plan, Request, merge_document};

/// Which comparisons [`verify`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyModes {
    pub logic: bool,
    pub string: bool,
}

impl Default for VerifyModes {
    fn default() -> Self {
        Self {
            logic: true,
            string: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Alignment {
    Ok,
    Ko,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignmentItem {
    pub status: Alignment,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

/// Per-document alignment of sources and tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlignmentReport {
    pub total: usize,
    pub aligned: usize,
    pub misaligned: usize,
    pub items: IndexMap<String, AlignmentItem>,
}

impl AlignmentReport {
    fn record(&mut self, name: &str, details: Vec<String>) {
        self.total += 1;
        let status = if details.is_empty() {
            self.aligned += 1;
            Alignment::Ok
        } else {
            self.misaligned += 1;
            Alignment::Ko
        };
        self.items
            .insert(name.to_string(), AlignmentItem { status, details });
    }

    pub fn is_aligned(&self) -> bool {
        self.misaligned == 0
    }
}

/// Compares every selected source document with its rebuilt form.
///
/// A misalignment is reported in the returned value; only invalid modes or
/// request parameters produce an error.
#[instrument(level = "info", skip_all, fields(logic = modes.logic, string = modes.string))]
pub fn verify(config: &Config, request: &Request, modes: VerifyModes) -> Result<AlignmentReport> {
    if !modes.logic && !modes.string {
        return Err(ToolError::Configuration(
            "verify needs the logic mode, the string mode, or both".into(),
        ));
    }
    let plan = Plan::resolve(config, request)?;
    let mut report = AlignmentReport::default();

    for name in plan.source_documents(request)? {
        let details = match verify_document(&plan, &name, modes) {
            Ok(details) => details,
            Err(error) => vec![error.to_string()],
        };
        debug!(document = %name, differences = details.len(), "document verified");
        report.record(&name, details);
    }

    info!(
        total = report.total,
        aligned = report.aligned,
        misaligned = report.misaligned,
        "verification finished"
    );
    Ok(report)
}

fn verify_document(plan: &Plan<'_>, name: &str, modes: VerifyModes) -> Result<Vec<String>> {
    let source = plan.read_source(name)?;
    let dir = plan.document_dir(name);

    if !dir.is_dir() {
        return Ok(plan
            .config
            .schema
            .sections
            .iter()
            .filter(|section| source.section(&section.key).is_some_and(|value| !value.is_empty()))
            .map(|section| format!("section '{}' has content but no tables exist", section.key))
            .collect());
    }

    let rebuilt = merge_document(plan.config, &dir)?;
    let mut details = Vec::new();
    if modes.logic {
        details.extend(logic_differences(plan.config, &source, &rebuilt));
    }
    if modes.string {
        let text = fs::read_to_string(plan.source_file(name))?;
        let expected = document_to_string(&rebuilt, XmlStyle::Full)?;
        if let Some(difference) = first_line_difference(&text, &expected) {
            details.push(difference);
        }
    }
    Ok(details)
}

fn logic_differences(config: &Config, source: &Document, rebuilt: &Document) -> Vec<String> {
    let mut details = Vec::new();

    for section in &config.schema.sections {
        let expected = canonical_items(source.section(&section.key));
        let actual = canonical_items(rebuilt.section(&section.key));
        if expected == actual {
            continue;
        }
        details.push(format!(
            "section '{}': {} record(s) in source, {} in tables",
            section.key,
            expected.len(),
            actual.len()
        ));
        let (missing, extra) = multiset_difference(&expected, &actual);
        details.extend(
            missing
                .iter()
                .map(|item| format!("section '{}': missing from tables: {item}", section.key)),
        );
        details.extend(
            extra
                .iter()
                .map(|item| format!("section '{}': not in source: {item}", section.key)),
        );
    }

    let residue = |document: &Document| -> JsonValue {
        let fields: Record = document
            .body
            .fields()
            .filter(|(name, _)| !config.schema.is_managed(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        canonical_record(&fields)
    };
    if source.root_tag != rebuilt.root_tag {
        details.push(format!(
            "root element <{}> rebuilt as <{}>",
            source.root_tag, rebuilt.root_tag
        ));
    }
    if residue(source) != residue(rebuilt) {
        details.push("fields outside the table sections differ".to_string());
    }
    details
}

/// Canonical items of a field, sorted so that element order is irrelevant.
/// A lone value is the same as a one-element list; nulls are dropped.
fn canonical_items(value: Option<&Value>) -> Vec<JsonValue> {
    let mut items: Vec<JsonValue> = match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::List(values)) => values.iter().filter_map(canonical).collect(),
        Some(other) => canonical(other).into_iter().collect(),
    };
    items.sort_by_key(JsonValue::to_string);
    items
}

fn canonical(value: &Value) -> Option<JsonValue> {
    match value {
        Value::Null => None,
        Value::Text(text) => Some(JsonValue::String(text.clone())),
        Value::Record(record) => Some(canonical_record(record)),
        Value::List(_) => Some(JsonValue::Array(canonical_items(Some(value)))),
    }
}

fn canonical_record(record: &Record) -> JsonValue {
    let mut fields: Vec<(String, JsonValue)> = record
        .fields()
        .filter_map(|(name, value)| {
            let items = canonical_items(Some(value));
            (!items.is_empty()).then(|| (name.clone(), JsonValue::Array(items)))
        })
        .collect();
    fields.sort_by(|lhs, rhs| lhs.0.cmp(&rhs.0));
    JsonValue::Object(fields.into_iter().collect())
}

fn multiset_difference(expected: &[JsonValue], actual: &[JsonValue]) -> (Vec<String>, Vec<String>) {
    let mut remaining: Vec<Option<&JsonValue>> = actual.iter().map(Some).collect();
    let mut missing = Vec::new();
    for item in expected {
        match remaining.iter_mut().find(|slot| **slot == Some(item)) {
            Some(slot) => *slot = None,
            None => missing.push(item.to_string()),
        }
    }
    let extra = remaining
        .into_iter()
        .flatten()
        .map(JsonValue::to_string)
        .collect();
    (missing, extra)
}

fn normalized_lines(text: &str) -> Vec<&str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

fn first_line_difference(source: &str, rebuilt: &str) -> Option<String> {
    let expected = normalized_lines(source);
    let actual = normalized_lines(rebuilt);
    let length = expected.len().max(actual.len());
    (0..length).find_map(|index| {
        let lhs = expected.get(index).copied();
        let rhs = actual.get(index).copied();
        (lhs != rhs).then(|| {
            format!(
                "line {}: source has `{}`, rebuilt document has `{}`",
                index + 1,
                lhs.unwrap_or("<end of file>"),
                rhs.unwrap_or("<end of file>")
            )
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::xml::parse_document;

    fn record(pairs: &[(&str, &str)]) -> Value {
        Value::Record(
            pairs
                .iter()
                .map(|(name, text)| (name.to_string(), Value::text(*text)))
                .collect(),
        )
    }

    #[test]
    fn element_order_and_nulls_are_ignored() {
        let lhs = Value::List(vec![
            record(&[("field", "A"), ("editable", "true")]),
            record(&[("field", "B")]),
        ]);
        let mut with_null = Record::new();
        with_null.insert("field", Value::text("B"));
        with_null.insert("description", Value::Null);
        let rhs = Value::List(vec![
            Value::Record(with_null),
            record(&[("editable", "true"), ("field", "A")]),
        ]);
        assert_eq!(canonical_items(Some(&lhs)), canonical_items(Some(&rhs)));
    }

    #[test]
    fn lone_record_equals_single_element_list() {
        let lone = record(&[("field", "A")]);
        let listed = Value::List(vec![record(&[("field", "A")])]);
        assert_eq!(canonical_items(Some(&lone)), canonical_items(Some(&listed)));
    }

    #[test]
    fn counts_and_missing_elements_are_reported() {
        let mut config = Config::default();
        config.schema.sections.push(crate::config::SectionSchema {
            key: "fieldPermissions".into(),
            key_fields: vec!["field".into()],
            columns: vec!["field".into()],
        });
        let source = parse_document(
            "Admin",
            "<Profile><fieldPermissions><field>A</field></fieldPermissions>\
             <fieldPermissions><field>B</field></fieldPermissions></Profile>",
        )
        .expect("source parsed");
        let rebuilt = parse_document(
            "Admin",
            "<Profile><fieldPermissions><field>A</field></fieldPermissions></Profile>",
        )
        .expect("rebuilt parsed");

        let details = logic_differences(&config, &source, &rebuilt);
        assert_eq!(
            details,
            vec![
                "section 'fieldPermissions': 2 record(s) in source, 1 in tables".to_string(),
                r#"section 'fieldPermissions': missing from tables: {"field":["B"]}"#.to_string(),
            ]
        );
    }

    #[test]
    fn string_comparison_ignores_indentation_and_blank_lines() {
        let source = "<a>\r\n  <b>1</b>\r\n\r\n</a>\r\n";
        let rebuilt = "<a>\n    <b>1</b>\n</a>\n";
        assert_eq!(first_line_difference(source, rebuilt), None);

        let changed = "<a>\n    <b>2</b>\n</a>\n";
        assert_eq!(
            first_line_difference(source, changed).as_deref(),
            Some("line 2: source has `<b>1</b>`, rebuilt document has `<b>2</b>`")
        );
    }
}
