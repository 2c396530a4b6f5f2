//! Identity keys for table rows.
//!
//! A row's identity is derived purely from its key-field values, so the same
//! logical row gets the same identity on every run regardless of row order.
//! Reconciliation relies on that to match rows across regenerations.

use crate::flatten::cell_text;
use crate::model::{Cells, Row};

/// Separator placed between key-field values in a composite identity.
pub const IDENTITY_SEPARATOR: &str = "/";

/// Computes the identity of one row: the present, non-empty key-field values
/// joined with [`IDENTITY_SEPARATOR`]. Returns an empty string when no key
/// field has a value. Empty elements count as no value.
pub fn identity_of(cells: &Cells, key_fields: &[String]) -> String {
    key_fields
        .iter()
        .filter_map(|field| cells.get(field).and_then(|cell| cell.as_deref()))
        .map(cell_text)
        .filter(|value| !value.is_empty())
        .collect::<Vec<_>>()
        .join(IDENTITY_SEPARATOR)
}

/// Tags every row with its identity after backfilling the columns of
/// `all_columns` that the row lacks, so every row has the same column set.
pub fn assign_identity(rows: Vec<Cells>, key_fields: &[String], all_columns: &[String]) -> Vec<Row> {
    rows.into_iter()
        .map(|mut cells| {
            for column in all_columns {
                if !cells.contains_key(column) {
                    cells.insert(column.clone(), None);
                }
            }
            let identity = identity_of(&cells, key_fields);
            Row { identity, cells }
        })
        .collect()
}

/// A selector over row identities. `*` at either end acts as a wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityPattern {
    Exact(String),
    Prefix(String),
    Suffix(String),
    Contains(String),
    Any,
}

impl IdentityPattern {
    pub fn parse(pattern: &str) -> Self {
        let (leading, rest) = match pattern.strip_prefix('*') {
            Some(rest) => (true, rest),
            None => (false, pattern),
        };
        let (trailing, core) = match rest.strip_suffix('*') {
            Some(core) => (true, core),
            None => (false, rest),
        };

        match (leading, trailing) {
            _ if core.is_empty() => IdentityPattern::Any,
            (true, true) => IdentityPattern::Contains(core.to_string()),
            (true, false) => IdentityPattern::Suffix(core.to_string()),
            (false, true) => IdentityPattern::Prefix(core.to_string()),
            (false, false) => IdentityPattern::Exact(core.to_string()),
        }
    }

    pub fn matches(&self, identity: &str) -> bool {
        match self {
            IdentityPattern::Exact(value) => identity == value,
            IdentityPattern::Prefix(value) => identity.starts_with(value.as_str()),
            IdentityPattern::Suffix(value) => identity.ends_with(value.as_str()),
            IdentityPattern::Contains(value) => identity.contains(value.as_str()),
            IdentityPattern::Any => true,
        }
    }
}

/// Returns `true` when any of the patterns matches the identity.
pub fn matches_any(patterns: &[IdentityPattern], identity: &str) -> bool {
    patterns.iter().any(|pattern| pattern.matches(identity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cells(pairs: &[(&str, Option<&str>)]) -> Cells {
        pairs
            .iter()
            .map(|(column, cell)| (column.to_string(), cell.map(str::to_string)))
            .collect()
    }

    fn keys(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|field| field.to_string()).collect()
    }

    #[test]
    fn identity_joins_present_key_fields() {
        let row = cells(&[
            ("application", Some("Sales")),
            ("recordType", None),
            ("profile", Some("")),
            ("visible", Some("true")),
        ]);
        assert_eq!(
            identity_of(&row, &keys(&["application", "recordType", "profile", "visible"])),
            "Sales/true"
        );
        assert_eq!(identity_of(&row, &keys(&["recordType"])), "");
    }

    #[test]
    fn identity_reads_marked_cells_as_text() {
        let row = cells(&[("label", Some(r"\[draft]")), ("flow", Some("\\")), ("name", Some("X"))]);
        assert_eq!(identity_of(&row, &keys(&["label", "flow", "name"])), "[draft]/X");
    }

    #[test]
    fn assign_identity_backfills_missing_columns() {
        let rows = vec![cells(&[("field", Some("Account.Name"))])];
        let tagged = assign_identity(rows, &keys(&["field"]), &keys(&["editable", "field"]));

        assert_eq!(tagged[0].identity, "Account.Name");
        assert_eq!(tagged[0].cells.get("editable"), Some(&None));
    }

    #[test]
    fn patterns_follow_wildcard_position() {
        assert_eq!(IdentityPattern::parse("Foo"), IdentityPattern::Exact("Foo".into()));
        assert_eq!(IdentityPattern::parse("Foo*"), IdentityPattern::Prefix("Foo".into()));
        assert_eq!(IdentityPattern::parse("*Foo"), IdentityPattern::Suffix("Foo".into()));
        assert_eq!(IdentityPattern::parse("*Foo*"), IdentityPattern::Contains("Foo".into()));
        assert_eq!(IdentityPattern::parse("*"), IdentityPattern::Any);
        assert_eq!(IdentityPattern::parse("**"), IdentityPattern::Any);

        assert!(IdentityPattern::parse("Foo").matches("Foo"));
        assert!(!IdentityPattern::parse("Foo").matches("Foo2"));
        assert!(IdentityPattern::parse("Foo*").matches("Foo2"));
        assert!(!IdentityPattern::parse("Foo*").matches("AFoo"));
        assert!(IdentityPattern::parse("*Foo").matches("AFoo"));
        assert!(IdentityPattern::parse("*oo*").matches("AFooB"));
    }

    proptest! {
        #[test]
        fn identity_depends_only_on_key_values(
            values in proptest::collection::vec("[a-zA-Z0-9.]{0,8}", 3),
            noise in proptest::collection::vec("[a-z]{0,5}", 3),
        ) {
            let key_fields = keys(&["k0", "k1", "k2"]);
            let forward: Cells = values
                .iter()
                .enumerate()
                .map(|(idx, value)| (format!("k{idx}"), Some(value.clone())))
                .chain(noise.iter().enumerate().map(|(idx, value)| (format!("n{idx}"), Some(value.clone()))))
                .collect();
            let mut reversed: Cells = forward.clone();
            reversed.reverse();

            let first = identity_of(&forward, &key_fields);
            prop_assert_eq!(&first, &identity_of(&reversed, &key_fields));
            prop_assert_eq!(&first, &identity_of(&forward, &key_fields));

            let tagged = assign_identity(vec![reversed, forward], &key_fields, &[]);
            prop_assert_eq!(&tagged[0].identity, &tagged[1].identity);
        }
    }
}
