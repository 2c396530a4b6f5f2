//! File formats: XML documents, delimited tables and spreadsheet workbooks.

pub mod excel_read;
pub mod excel_write;
pub mod table;
pub mod xml;
