//! Retrieval manifests and their packing into budget-bounded chunks.

mod packer;

use std::path::Path;

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::{Result, ToolError};
use crate::io::xml::{self, XmlStyle};
use crate::model::{Document, Record, Value};

pub use packer::{Chunk, Packager};

/// Root element of manifest documents.
pub const MANIFEST_ROOT: &str = "Package";
/// Namespace written on manifest documents.
pub const METADATA_NAMESPACE: &str = "http://soap.sforce.com/2006/04/metadata";

/// Type name → member names, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub types: IndexMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a member to a type, creating the type entry when needed.
    pub fn add(&mut self, type_name: &str, member: &str) {
        self.types
            .entry(type_name.to_string())
            .or_default()
            .push(member.to_string());
    }

    pub fn members(&self, type_name: &str) -> &[String] {
        self.types
            .get(type_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn member_count(&self) -> usize {
        self.types.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.member_count() == 0
    }

    /// Reads a manifest from its `package.xml` form.
    pub fn from_document(document: &Document) -> Result<Self> {
        if document.root_tag != MANIFEST_ROOT {
            return Err(ToolError::InvalidDocument(format!(
                "expected a <{MANIFEST_ROOT}> manifest, found <{}>",
                document.root_tag
            )));
        }

        let mut manifest = Manifest::new();
        let entries: Vec<&Value> = match document.section("types") {
            Some(Value::List(items)) => items.iter().collect(),
            Some(other) => vec![other],
            None => Vec::new(),
        };
        for entry in entries {
            let Value::Record(record) = entry else {
                return Err(ToolError::InvalidDocument(
                    "manifest <types> entries must hold <members> and <name>".into(),
                ));
            };
            let Some(Value::Text(type_name)) = record.get("name") else {
                return Err(ToolError::InvalidDocument(
                    "manifest <types> entry without <name>".into(),
                ));
            };
            let members: Vec<&Value> = match record.get("members") {
                Some(Value::List(items)) => items.iter().collect(),
                Some(other) => vec![other],
                None => Vec::new(),
            };
            manifest.types.entry(type_name.clone()).or_default();
            for member in members {
                if let Value::Text(member) = member {
                    manifest.add(type_name, member);
                }
            }
        }

        manifest.version = match document.section("version") {
            Some(Value::Text(version)) => Some(version.clone()),
            _ => None,
        };
        Ok(manifest)
    }

    /// Builds the `package.xml` form of the manifest.
    pub fn to_document(&self, name: &str) -> Document {
        let mut document = Document::new(name, MANIFEST_ROOT);
        document
            .attributes
            .push(("xmlns".to_string(), METADATA_NAMESPACE.to_string()));

        let entries: Vec<Value> = self
            .types
            .iter()
            .map(|(type_name, members)| {
                let mut record = Record::new();
                for member in members {
                    record.push("members", Value::text(member.as_str()));
                }
                record.insert("name", Value::text(type_name.as_str()));
                Value::Record(record)
            })
            .collect();
        if !entries.is_empty() {
            document.body.insert("types", Value::List(entries));
        }
        if let Some(version) = &self.version {
            document.body.insert("version", Value::text(version.as_str()));
        }
        document
    }
}

/// Reads a `package.xml` manifest.
pub fn read_manifest(path: &Path) -> Result<Manifest> {
    if !path.is_file() {
        return Err(ToolError::MissingInput(path.to_path_buf()));
    }
    let document = xml::read_document(path, ".xml")?;
    Manifest::from_document(&document)
}

/// Writes a manifest as `package.xml`.
pub fn write_manifest(path: &Path, manifest: &Manifest) -> Result<()> {
    xml::write_document(path, &manifest.to_document("package"), XmlStyle::Full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::xml::{document_to_string, parse_document};

    const PACKAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Package xmlns="http://soap.sforce.com/2006/04/metadata">
    <types>
        <members>A</members>
        <members>B</members>
        <name>ApexClass</name>
    </types>
    <types>
        <members>Admin</members>
        <name>Profile</name>
    </types>
    <version>58.0</version>
</Package>
"#;

    #[test]
    fn reads_types_and_version() {
        let document = parse_document("package", PACKAGE).expect("manifest parsed");
        let manifest = Manifest::from_document(&document).expect("manifest read");

        assert_eq!(manifest.members("ApexClass"), ["A", "B"]);
        assert_eq!(manifest.members("Profile"), ["Admin"]);
        assert_eq!(manifest.version.as_deref(), Some("58.0"));
        assert_eq!(manifest.member_count(), 3);
    }

    #[test]
    fn writes_the_same_package_layout() {
        let document = parse_document("package", PACKAGE).expect("manifest parsed");
        let manifest = Manifest::from_document(&document).expect("manifest read");
        let written = document_to_string(&manifest.to_document("package"), XmlStyle::Full)
            .expect("manifest written");
        assert_eq!(written, PACKAGE);
    }

    #[test]
    fn rejects_other_documents() {
        let document = parse_document("Admin", "<Profile><custom>true</custom></Profile>")
            .expect("document parsed");
        assert!(Manifest::from_document(&document).is_err());
    }
}
