//! Resolution of list-valued arguments
//!
//! A value starting with `@` names a file whose JSON content is used, like
//! `curl -d @file`. Anything else is parsed inline.

use crate::error::{PyxisError, Result};
use serde_json::Value;
use std::path::Path;

/// Inline format of an argument that is not an `@file` reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineFormat {
    Json,
    /// Comma separated values
    Csv,
}

/// Load the list an argument refers to.
pub async fn deserialize_list(value: &str, format: InlineFormat) -> Result<Vec<Value>> {
    let parsed = match value.strip_prefix('@') {
        Some(path) => read_json_file(Path::new(path)).await?,
        None => match format {
            InlineFormat::Csv => {
                return Ok(value
                    .split(',')
                    .map(|item| Value::String(item.to_string()))
                    .collect());
            }
            InlineFormat::Json => serde_json::from_str(value)
                .map_err(|e| PyxisError::Input(format!("Invalid JSON argument: {}", e)))?,
        },
    };

    match parsed {
        Value::Array(items) => Ok(items),
        other => Err(PyxisError::Input(format!(
            "Expected a JSON list, got: {}",
            other
        ))),
    }
}

/// Load a list of strings, as used for digests, references and ids.
pub async fn deserialize_strings(value: &str) -> Result<Vec<String>> {
    deserialize_list(value, InlineFormat::Csv)
        .await?
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Ok(s),
            other => Err(PyxisError::Input(format!(
                "Expected a list of strings, got item: {}",
                other
            ))),
        })
        .collect()
}

async fn read_json_file(path: &Path) -> Result<Value> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        PyxisError::Input(format!("Cannot read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content)
        .map_err(|e| PyxisError::Input(format!("Invalid JSON in {}: {}", path.display(), e)))
}
