//! Paging envelope and signature filter helpers

use crate::error::{PyxisError, Result};
use serde::Deserialize;
use serde_json::Value;

/// `{"data": [...], "total": N, "page_size": M}` wrapper of list endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub data: Vec<Value>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub page_size: u64,
}

impl Envelope {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| PyxisError::Protocol(format!("invalid paging envelope: {}", e)))
    }

    /// Number of pages the whole result spans, the first page included.
    pub fn total_pages(&self) -> u64 {
        if (self.data.len() as u64) >= self.total || self.page_size == 0 {
            return 1;
        }
        self.total.div_ceil(self.page_size)
    }
}

/// Build the `filter` clause for the signatures endpoint, e.g.
/// `manifest_digest=in=(a,b),reference=in=(c)`.
pub fn signature_filter<S: AsRef<str>>(
    manifest_digests: Option<&[S]>,
    references: Option<&[S]>,
) -> Option<String> {
    let mut clauses = Vec::new();
    if let Some(digests) = manifest_digests.filter(|d| !d.is_empty()) {
        clauses.push(format!("manifest_digest=in=({})", join(digests)));
    }
    if let Some(references) = references.filter(|r| !r.is_empty()) {
        clauses.push(format!("reference=in=({})", join(references)));
    }
    if clauses.is_empty() {
        None
    } else {
        Some(clauses.join(","))
    }
}

fn join<S: AsRef<str>>(items: &[S]) -> String {
    items.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(",")
}
