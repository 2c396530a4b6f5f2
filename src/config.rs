//! Configuration for the table engine.
//!
//! Everything the engine needs (paths, table format, the document schema and
//! packager settings) is loaded once into a [`Config`] value which is passed
//! explicitly to every operation.
//!
//! # Example
//!
//! ```toml
//! [paths]
//! source = "force-app/main/default/profiles"
//! tables = "tables/profiles"
//!
//! [table]
//! delimiter = ","
//! qualifier = "_"
//! sort = true
//!
//! [schema]
//! root_tag = "Profile"
//! suffix = ".profile-meta.xml"
//!
//! [[schema.sections]]
//! key = "fieldPermissions"
//! key_fields = ["field"]
//! columns = ["editable", "field", "readable"]
//!
//! [packager]
//! budget = 10000
//! fixed_types = ["Profile"]
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ToolError};
use crate::flatten::DEFAULT_QUALIFIER;

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub paths: PathsConfig,
    pub table: TableConfig,
    pub schema: DocumentSchema,
    pub packager: PackagerConfig,
}

/// Locations of source documents and generated tables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// Directory holding the source XML documents.
    pub source: PathBuf,
    /// Directory receiving one sub-directory of tables per document.
    pub tables: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("."),
            tables: PathBuf::from("tables"),
        }
    }
}

/// Format of persisted tables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TableConfig {
    /// Field delimiter; must be a single ASCII character.
    pub delimiter: char,
    /// Separator joining collection and child field names in column headers.
    pub qualifier: String,
    /// Sort rows by identity when writing tables.
    pub sort: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            delimiter: ',',
            qualifier: DEFAULT_QUALIFIER.to_string(),
            sort: false,
        }
    }
}

impl TableConfig {
    pub fn delimiter_byte(&self) -> u8 {
        // Validated to be ASCII by `Config::validate`.
        self.delimiter as u8
    }
}

/// Describes how documents of one metadata type are split into tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DocumentSchema {
    /// Root element name of the documents.
    pub root_tag: String,
    /// File name suffix of the documents, e.g. `.profile-meta.xml`.
    pub suffix: String,
    /// Sections managed as tables.
    pub sections: Vec<SectionSchema>,
}

impl DocumentSchema {
    pub fn section(&self, key: &str) -> Option<&SectionSchema> {
        self.sections.iter().find(|section| section.key == key)
    }

    pub fn is_managed(&self, key: &str) -> bool {
        self.section(key).is_some()
    }
}

/// One table-managed section of a document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SectionSchema {
    /// Element name of the section below the document root.
    pub key: String,
    /// Fields whose values form the row identity.
    pub key_fields: Vec<String>,
    /// Table columns, in output order.
    pub columns: Vec<String>,
}

/// Settings for packing retrieval manifests into chunks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PackagerConfig {
    /// Maximum weighted member count per chunk.
    pub budget: usize,
    /// Types whose members are replicated into every chunk.
    pub fixed_types: Vec<String>,
    /// Types distributed alongside a fixed type that has a single member.
    pub related_types: IndexMap<String, Vec<String>>,
    /// Weight applied to every member of a type.
    pub type_weights: IndexMap<String, usize>,
    /// Weight applied to specific members, keyed by type then member.
    pub member_weights: IndexMap<String, IndexMap<String, usize>>,
}

impl Default for PackagerConfig {
    fn default() -> Self {
        Self {
            budget: 10_000,
            fixed_types: Vec::new(),
            related_types: IndexMap::new(),
            type_weights: IndexMap::new(),
            member_weights: IndexMap::new(),
        }
    }
}

impl Config {
    /// Reads and validates a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ToolError::MissingInput(path.to_path_buf()));
        }
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::Configuration` describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if !self.table.delimiter.is_ascii() || self.table.delimiter == '"' {
            return Err(ToolError::Configuration(format!(
                "delimiter '{}' must be a single ASCII character other than a quote",
                self.table.delimiter
            )));
        }
        if self.table.qualifier.is_empty() {
            return Err(ToolError::Configuration(
                "column qualifier must not be empty".into(),
            ));
        }
        if self.packager.budget == 0 {
            return Err(ToolError::Configuration(
                "packager budget must be greater than zero".into(),
            ));
        }

        let mut seen = HashSet::new();
        for section in &self.schema.sections {
            if section.key.is_empty() {
                return Err(ToolError::Configuration("section key must not be empty".into()));
            }
            if !seen.insert(section.key.as_str()) {
                return Err(ToolError::Configuration(format!(
                    "section '{}' is declared more than once",
                    section.key
                )));
            }
            if section.key_fields.iter().all(|field| field.is_empty()) {
                return Err(ToolError::Configuration(format!(
                    "section '{}' needs at least one key field",
                    section.key
                )));
            }
        }
        Ok(())
    }

    /// Directory holding the tables of one document.
    pub fn document_dir(&self, tables: &Path, name: &str) -> PathBuf {
        tables.join(name)
    }

    /// Path of the source document called `name`.
    pub fn source_file(&self, source: &Path, name: &str) -> PathBuf {
        source.join(format!("{name}{}", self.schema.suffix))
    }
}
