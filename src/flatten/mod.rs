use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::identity;
use crate::model::{Cells, Record, Value};

/// Separator placed between a collection field and its child field when a
/// nested record is flattened (`children` + `v` → `children_v`).
pub const DEFAULT_QUALIFIER: &str = "_";

/// Leading mark of a cell holding literal text. Texts starting with `[` or
/// with the mark itself are written behind it so they never read back as a
/// list. The mark alone stands for an element that is present but empty.
pub const LITERAL_MARK: char = '\\';

/// Capability shared by record types that can be stored as table rows.
pub trait Tabular: Sized {
    /// Turns nested records into flat cells, one entry per output row.
    fn flatten(records: &[Self], qualifier: &str) -> Vec<Cells>;

    /// Rebuilds nested records from flat cells.
    fn unflatten(rows: Vec<Cells>, qualifier: &str) -> Vec<Self>;

    /// Computes the identity of one flat row.
    fn identity(cells: &Cells, key_fields: &[String]) -> String;
}

impl Tabular for Record {
    fn flatten(records: &[Self], qualifier: &str) -> Vec<Cells> {
        flatten(records, qualifier)
    }

    fn unflatten(rows: Vec<Cells>, qualifier: &str) -> Vec<Self> {
        unflatten(rows, qualifier)
    }

    fn identity(cells: &Cells, key_fields: &[String]) -> String {
        identity::identity_of(cells, key_fields)
    }
}

/// Flattens the provided records into rows.
///
/// Scalar fields become cells; nested collections fan out so that a parent
/// with N children yields N rows with the parent cells repeated. Child
/// columns are named `parent{qualifier}child`, recursively.
pub fn flatten(records: &[Record], qualifier: &str) -> Vec<Cells> {
    records
        .iter()
        .flat_map(|record| flatten_record(record, "", qualifier))
        .collect()
}

fn flatten_record(record: &Record, prefix: &str, qualifier: &str) -> Vec<Cells> {
    let mut rows = vec![Cells::new()];

    for (name, value) in record.fields() {
        let column = format!("{prefix}{name}");
        if value.is_nested() {
            let child_prefix = format!("{column}{qualifier}");
            let children = flatten_collection(value, &column, &child_prefix, qualifier);
            rows = cross_concat(rows, &children);
        } else {
            let cell = scalar_cell(value);
            for row in &mut rows {
                row.insert(column.clone(), cell.clone());
            }
        }
    }

    rows
}

fn flatten_collection(value: &Value, column: &str, prefix: &str, qualifier: &str) -> Vec<Cells> {
    let items: Vec<&Value> = match value {
        Value::List(items) => items.iter().collect(),
        other => vec![other],
    };

    let mut rows = Vec::new();
    for item in items {
        match item {
            Value::Record(record) => rows.extend(flatten_record(record, prefix, qualifier)),
            Value::Null => rows.push(Cells::new()),
            other => {
                let mut cells = Cells::new();
                cells.insert(column.to_string(), scalar_cell(other));
                rows.push(cells);
            }
        }
    }

    // An empty collection still keeps its parent row.
    if rows.is_empty() {
        rows.push(Cells::new());
    }
    rows
}

fn cross_concat(parents: Vec<Cells>, children: &[Cells]) -> Vec<Cells> {
    let mut rows = Vec::with_capacity(parents.len() * children.len());
    for parent in parents {
        for child in children {
            let mut row = parent.clone();
            row.extend(child.iter().map(|(column, cell)| (column.clone(), cell.clone())));
            rows.push(row);
        }
    }
    rows
}

/// Lists of plain values are kept in a single cell as a JSON array.
fn scalar_cell(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(LITERAL_MARK.to_string()),
        Value::Text(text) if text.is_empty() => Some(LITERAL_MARK.to_string()),
        Value::Text(text) if text.starts_with(['[', LITERAL_MARK]) => {
            Some(format!("{LITERAL_MARK}{text}"))
        }
        Value::Text(text) => Some(text.clone()),
        Value::List(items) if items.is_empty() => None,
        other => Some(other.to_json().to_string()),
    }
}

fn decode_cell(text: String) -> Value {
    if let Some(literal) = text.strip_prefix(LITERAL_MARK) {
        return match literal {
            "" => Value::Null,
            literal => Value::Text(literal.to_string()),
        };
    }
    if text.starts_with('[') {
        if let Ok(JsonValue::Array(items)) = serde_json::from_str::<JsonValue>(&text) {
            let decoded: Option<Vec<Value>> = items
                .into_iter()
                .map(|item| match item {
                    JsonValue::String(text) => Some(Value::Text(text)),
                    JsonValue::Null => Some(Value::Null),
                    _ => None,
                })
                .collect();
            if let Some(values) = decoded {
                return Value::List(values);
            }
        }
    }
    Value::Text(text)
}

/// Text a cell stands for once the literal mark is removed. Empty for an
/// empty element.
pub fn cell_text(cell: &str) -> &str {
    cell.strip_prefix(LITERAL_MARK).unwrap_or(cell)
}

/// Rebuilds one record from cells without splitting qualified columns.
/// Absent cells are left out; empty-element cells are kept as nulls.
pub fn record_from_cells(cells: Cells) -> Record {
    cells
        .into_iter()
        .filter_map(|(column, cell)| cell.map(|text| (column, decode_cell(text))))
        .collect()
}

/// Rebuilds nested records from flat rows.
///
/// Qualified columns are turned back into one-element child lists, then
/// contiguous rows sharing every scalar value are folded into one parent.
/// Rows of the same parent that are not adjacent stay separate parents.
/// Absent cells are left out of the rebuilt records.
pub fn unflatten(rows: Vec<Cells>, qualifier: &str) -> Vec<Record> {
    let records = rows
        .into_iter()
        .map(|cells| cells_to_record(cells, qualifier))
        .collect();
    fold_contiguous(records)
}

fn cells_to_record(cells: Cells, qualifier: &str) -> Record {
    let mut record = Record::new();
    let mut groups: IndexMap<String, Cells> = IndexMap::new();

    for (column, cell) in cells {
        match column.split_once(qualifier) {
            Some((list, child)) if !list.is_empty() && !child.is_empty() => {
                if !groups.contains_key(list) {
                    // Reserve the field position of the collection.
                    record.insert(list, Value::Null);
                }
                groups
                    .entry(list.to_string())
                    .or_default()
                    .insert(child.to_string(), cell);
            }
            _ => {
                if let Some(text) = cell {
                    record.insert(column, decode_cell(text));
                }
            }
        }
    }

    for (list, child_cells) in groups {
        if child_cells.values().all(Option::is_none) {
            record.remove(&list);
            continue;
        }
        let child = cells_to_record(child_cells, qualifier);
        record.insert(list, Value::List(vec![Value::Record(child)]));
    }

    record
}

fn fold_contiguous(records: Vec<Record>) -> Vec<Record> {
    let mut folded: Vec<Record> = Vec::new();

    for record in records {
        match folded.last_mut() {
            Some(parent) if same_scalars(parent, &record) => absorb(parent, record),
            _ => folded.push(record),
        }
    }

    for parent in &mut folded {
        fold_children(parent);
    }
    folded
}

fn same_scalars(lhs: &Record, rhs: &Record) -> bool {
    let scalars = |record: &Record| -> Vec<(String, Value)> {
        let mut fields: Vec<(String, Value)> = record
            .fields()
            .filter(|(_, value)| !value.is_nested())
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        fields
    };
    scalars(lhs) == scalars(rhs)
}

fn absorb(parent: &mut Record, record: Record) {
    for (name, value) in record.into_fields() {
        if !value.is_nested() {
            continue;
        }
        let incoming = match value {
            Value::List(items) => items,
            other => vec![other],
        };
        match parent.get_mut(&name) {
            Some(Value::List(items)) => {
                for item in incoming {
                    if !items.contains(&item) {
                        items.push(item);
                    }
                }
            }
            Some(existing) => {
                let mut items = vec![std::mem::replace(existing, Value::Null)];
                for item in incoming {
                    if !items.contains(&item) {
                        items.push(item);
                    }
                }
                *existing = Value::List(items);
            }
            None => parent.insert(name, Value::List(incoming)),
        }
    }
}

fn fold_children(record: &mut Record) {
    for value in record.values_mut() {
        let Value::List(items) = value else {
            continue;
        };
        if items.is_empty() || !items.iter().all(|item| matches!(item, Value::Record(_))) {
            continue;
        }
        let children: Vec<Record> = std::mem::take(items)
            .into_iter()
            .filter_map(|item| match item {
                Value::Record(child) => Some(child),
                _ => None,
            })
            .collect();
        *items = fold_contiguous(children)
            .into_iter()
            .map(Value::Record)
            .collect();
    }
}
