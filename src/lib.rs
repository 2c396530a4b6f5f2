//! Core library for the metadata-tables command line application.
//!
//! XML metadata documents are split into one delimited table per managed
//! section so they can be edited and diffed as rows, and rebuilt from those
//! tables afterwards. File formats live under [`io`], the tree types inside
//! [`model`], the tree/table transcoding in [`flatten`] and [`identity`], the
//! reconciliation operations under [`sync`], the alignment checks in
//! [`verify`], and manifest chunking in [`package`].

pub mod config;
pub mod error;
pub mod flatten;
pub mod identity;
pub mod io;
pub mod model;
pub mod package;
pub mod sync;
pub mod verify;

pub use config::Config;
pub use error::{Result, ToolError};
