//! Chunked retrieval followed by table reconciliation.
//!
//! Retrieval itself is delegated to a [`Retriever`]; this module only drives
//! it chunk by chunk and feeds what lands in the source directory into the
//! reconciler.

use std::collections::HashSet;
use std::path::Path;

use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::error::Result;
use crate::package::Chunk;

use super::{BatchReport, Plan, Request, split_document, upsert_document};

/// Fetches the documents listed in a chunk into a directory.
pub trait Retriever {
    fn retrieve(&self, target: &str, chunk: &Chunk, destination: &Path) -> Result<()>;
}

/// Retrieves every chunk in order and reconciles the documents it brings.
///
/// The first successful chunk of a document splits it; later chunks upsert
/// into the tables written so far, so a document spread across chunks ends up
/// with the union of its rows. A chunk that cannot be retrieved is reported
/// and the remaining chunks are still processed.
#[instrument(level = "info", skip_all, fields(target = %target, chunks = chunks.len()))]
pub fn retrieve_chunks<R: Retriever + ?Sized>(
    config: &Config,
    request: &Request,
    retriever: &R,
    target: &str,
    chunks: &[Chunk],
) -> Result<BatchReport> {
    let plan = Plan::resolve(config, request)?;
    let mut report = BatchReport::default();
    let mut split_done: HashSet<String> = HashSet::new();

    for chunk in chunks {
        let label = format!("chunk-{}", chunk.index);
        if let Err(error) = retriever.retrieve(target, chunk, &plan.source) {
            warn!(chunk = chunk.index, %error, "retrieval failed");
            report.record(&label, Err(error));
            continue;
        }

        for name in chunk.manifest.members(&config.schema.root_tag) {
            if !request.documents.is_empty() && !request.documents.contains(name) {
                continue;
            }
            let outcome = plan.read_source(name).and_then(|document| {
                if split_done.contains(name) {
                    upsert_document(&plan, &document)
                } else {
                    split_document(&plan, &document)
                }
            });
            if outcome.is_ok() {
                split_done.insert(name.clone());
            }
            report.record(&format!("{label}/{name}"), outcome);
        }
    }

    info!(items = report.items.len(), ok = report.is_ok(), "retrieval finished");
    Ok(report)
}
