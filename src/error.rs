use std::path::PathBuf;

use thiserror::Error;

/// Convenient alias for fallible results returned throughout the crate.
pub type Result<T> = std::result::Result<T, ToolError>;

/// Error type covering the different failure cases that can occur when the
/// tool splits, merges, verifies, or packages metadata.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Wrapper for IO failures such as reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Raised when JSON parsing or serialization fails.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Raised when a delimited table cannot be read or written.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Raised when an XML document is malformed.
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Raised when an XML attribute is malformed.
    #[error("XML attribute error: {0}")]
    XmlAttribute(#[from] quick_xml::events::attributes::AttrError),

    /// Raised when the configuration file cannot be parsed.
    #[error("configuration parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Errors bubbled up from the Excel writer implementation.
    #[error("Excel write error: {0}")]
    ExcelWrite(#[from] rust_xlsxwriter::XlsxError),

    /// Errors bubbled up from the Excel reader implementation.
    #[error("Excel read error: {0}")]
    ExcelRead(#[from] calamine::XlsxError),

    /// Invalid invocation parameters: unknown section, missing key fields,
    /// bad delimiter. Returned before any per-document work starts.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Raised when a source document, table directory, or table is missing.
    #[error("{what} not found: {}", path.display())]
    NotFound { what: &'static str, path: PathBuf },

    /// Raised when caller supplied records cannot be keyed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Raised when a table file does not follow the expected layout.
    #[error("invalid table: {0}")]
    InvalidTable(String),

    /// Raised when an XML document does not have the expected shape.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// Raised when a sheet does not follow the expected conventions.
    #[error("invalid workbook structure: {0}")]
    InvalidWorkbook(String),

    /// Raised when the user provides a path that does not exist.
    #[error("input file not found: {0}")]
    MissingInput(PathBuf),

    /// Raised when the tracing subscriber fails to initialise.
    #[error("failed to initialise logging: {0}")]
    Logging(String),
}

impl ToolError {
    pub(crate) fn not_found(what: &'static str, path: impl Into<PathBuf>) -> Self {
        ToolError::NotFound {
            what,
            path: path.into(),
        }
    }
}
