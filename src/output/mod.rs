//! Command output: JSON results on stdout, failures on stderr

use crate::error::Result;
use serde::Serialize;
use serde_json::Value;
use serde_json::ser::{PrettyFormatter, Serializer};
use std::io::{self, Write};

#[derive(Clone, Debug, Default)]
pub struct OutputManager;

impl OutputManager {
    pub fn new() -> Self {
        Self
    }

    /// Render a result with sorted keys and 4-space indentation.
    pub fn render(value: &Value) -> Result<String> {
        let mut buf = Vec::new();
        let mut serializer = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
        sort_keys(value).serialize(&mut serializer)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Write a result to stdout. Logging verbosity never suppresses it.
    pub fn print_json(&self, value: &Value) -> Result<()> {
        let rendered = Self::render(value)?;
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", rendered)?;
        stdout.flush()?;
        Ok(())
    }

    /// Report a failed command as `Error <action>: <error>`.
    pub fn error(&self, action: &str, err: &dyn std::fmt::Display) {
        eprintln!("Error {}: {}", action, err);
    }
}

/// Copy of `value` with every object's keys in lexicographic order,
/// independent of how serde_json orders maps.
fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sort_keys(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_sorts_and_indents() {
        let value = json!([{"b": 1, "a": {"d": true, "c": null}}]);
        let rendered = OutputManager::render(&value).unwrap();
        let expected = "[\n    {\n        \"a\": {\n            \"c\": null,\n            \"d\": true\n        },\n        \"b\": 1\n    }\n]";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn test_render_empty_list() {
        assert_eq!(OutputManager::render(&json!([])).unwrap(), "[]");
    }
}
