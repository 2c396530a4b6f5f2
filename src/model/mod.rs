use indexmap::IndexMap;
use serde_json::{Map, Value as JsonValue};

use crate::error::{Result, ToolError};

/// Name of the synthetic column carrying a row's identity in persisted tables.
pub const IDENTITY_COLUMN: &str = "_tagid";

/// A value stored under a field of a [`Record`].
///
/// XML elements map onto this shape directly: an element holding only text
/// is `Text`, an element holding child elements is a `Record`, an empty
/// element is `Null`, and an element name repeated under the same parent is
/// collected into a `List`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Record(Record),
    List(Vec<Value>),
}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Value::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns `true` when the value holds no content at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(_) | Value::Record(_) => false,
            Value::List(items) => items.iter().all(Value::is_empty),
        }
    }

    /// Returns `true` when the value is (or contains) nested records.
    pub fn is_nested(&self) -> bool {
        match self {
            Value::Record(_) => true,
            Value::List(items) => items.iter().any(|item| matches!(item, Value::Record(_))),
            Value::Null | Value::Text(_) => false,
        }
    }

    /// Number of elements the value contributes to a section.
    pub fn len(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::List(items) => items.len(),
            Value::Text(_) | Value::Record(_) => 1,
        }
    }

    /// Converts the value into the JSON representation used in diagnostics
    /// and in caller supplied record files.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Text(text) => JsonValue::String(text.clone()),
            Value::Record(record) => record.to_json(),
            Value::List(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
        }
    }

    pub fn from_json(json: &JsonValue) -> Result<Self> {
        Ok(match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(value) => Value::Text(value.to_string()),
            JsonValue::Number(number) => Value::Text(number.to_string()),
            JsonValue::String(text) => Value::Text(text.clone()),
            JsonValue::Array(items) => Value::List(
                items
                    .iter()
                    .map(Value::from_json)
                    .collect::<Result<Vec<_>>>()?,
            ),
            JsonValue::Object(map) => Value::Record(Record::from_json_map(map)?),
        })
    }
}

/// An ordered set of named fields. Field order is the order of insertion and
/// is preserved through serialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: IndexMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields.get_mut(name)
    }

    /// Inserts or replaces a field. A replaced field keeps its position.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    /// Removes a field while keeping the order of the remaining ones.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.shift_remove(name)
    }

    /// Appends a value under `name`, turning an existing field into a list
    /// when the name repeats.
    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.fields.get_mut(&name) {
            Some(Value::List(items)) => items.push(value),
            Some(existing) => {
                let first = std::mem::replace(existing, Value::Null);
                *existing = Value::List(vec![first, value]);
            }
            None => {
                self.fields.insert(name, value);
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Value> {
        self.fields.values_mut()
    }

    pub fn into_fields(self) -> impl Iterator<Item = (String, Value)> {
        self.fields.into_iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_json(&self) -> JsonValue {
        let mut map = Map::new();
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.to_json());
        }
        JsonValue::Object(map)
    }

    /// Builds a record from a JSON object. Nested objects and arrays become
    /// nested records and lists.
    pub fn from_json(json: &JsonValue) -> Result<Self> {
        match json {
            JsonValue::Object(map) => Self::from_json_map(map),
            other => Err(ToolError::Validation(format!(
                "expected a JSON object for a record, found {other}"
            ))),
        }
    }

    fn from_json_map(map: &Map<String, JsonValue>) -> Result<Self> {
        let mut record = Record::new();
        for (name, value) in map {
            record.insert(name.clone(), Value::from_json(value)?);
        }
        Ok(record)
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// A metadata document: the root element of one XML file.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Entity name, derived from the file name (e.g. `Admin` for
    /// `Admin.profile-meta.xml`).
    pub name: String,
    /// Root element name.
    pub root_tag: String,
    /// Root element attributes, namespace declarations included.
    pub attributes: Vec<(String, String)>,
    /// Top-level fields. Each field is a section.
    pub body: Record,
}

impl Document {
    pub fn new(name: impl Into<String>, root_tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root_tag: root_tag.into(),
            attributes: Vec::new(),
            body: Record::new(),
        }
    }

    pub fn section(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    /// Returns the records held by a section. Missing or null sections are
    /// empty; a section holding plain text is rejected.
    pub fn section_records(&self, key: &str) -> Result<Vec<Record>> {
        let Some(value) = self.body.get(key) else {
            return Ok(Vec::new());
        };
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Record(record) => Ok(vec![record.clone()]),
            Value::List(items) => items
                .iter()
                .filter(|item| !item.is_null())
                .map(|item| match item {
                    Value::Record(record) => Ok(record.clone()),
                    _ => Err(ToolError::InvalidDocument(format!(
                        "section '{key}' of document '{}' mixes text and records",
                        self.name
                    ))),
                })
                .collect(),
            Value::Text(_) => Err(ToolError::InvalidDocument(format!(
                "section '{key}' of document '{}' holds text, not records",
                self.name
            ))),
        }
    }
}

/// Flat cells of a row before an identity has been assigned. `None` marks a
/// null cell.
pub type Cells = IndexMap<String, Option<String>>;

/// One flat row of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub identity: String,
    pub cells: Cells,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells.get(column).and_then(|cell| cell.as_deref())
    }
}

/// The flat form of one section of one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    /// Column names in output order. The identity column is not included.
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    /// Adds any column that is not yet part of the headers, keeping the
    /// existing order.
    pub fn extend_headers<'a>(&mut self, columns: impl IntoIterator<Item = &'a String>) {
        for column in columns {
            if column != IDENTITY_COLUMN && !self.headers.contains(column) {
                self.headers.push(column.clone());
            }
        }
    }
}
