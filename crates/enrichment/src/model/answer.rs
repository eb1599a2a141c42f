//! Structured view of a per-row enrichment result.
//!
//! Results arrive in a few shapes depending on the research processor:
//! a plain JSON object with `answer` and `citations`, the provider's native
//! object whose sources live under `basis[*].citations`, a string with such
//! an object embedded in prose, or just prose.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

static RE_EMBEDDED_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[\s\S]*\}").expect("static regex"));

/// Keys that never contribute to an answer assembled from loose fields.
const METADATA_KEYS: [&str; 4] = ["basis", "citations", "confidence", "type"];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub snippet: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EnrichmentAnswer {
    pub answer: Option<String>,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl EnrichmentAnswer {
    /// Parses a raw result string, extracting an embedded JSON object if present.
    pub fn parse_str(raw: &str) -> Self {
        if let Some(found) = RE_EMBEDDED_OBJECT.find(raw) {
            if let Ok(value) = serde_json::from_str::<Value>(found.as_str()) {
                return Self::from_value(&value);
            }
        }
        Self {
            answer: Some(raw.to_string()),
            ..Default::default()
        }
    }

    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Self::default(),
            Value::String(s) => Self::parse_str(s),
            Value::Object(map) if matches!(map.get("basis"), Some(Value::Array(_))) => {
                Self::from_basis_object(map)
            }
            Value::Object(map) => Self::from_plain_object(map),
            other => Self {
                answer: Some(other.to_string()),
                ..Default::default()
            },
        }
    }

    fn from_plain_object(map: &Map<String, Value>) -> Self {
        let answer = first_present(map, &["answer", "output", "result"])
            .unwrap_or_else(|| Value::Object(map.clone()).to_string());

        let citations = map
            .get("citations")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value::<Citation>(item.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            answer: Some(answer),
            citations,
            confidence: map.get("confidence").and_then(Value::as_f64),
        }
    }

    fn from_basis_object(map: &Map<String, Value>) -> Self {
        let citations = map
            .get("basis")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|basis| basis.get("citations").and_then(Value::as_array))
            .flatten()
            .map(|cit| Citation {
                url: string_field(cit, "url"),
                title: string_field(cit, "title"),
                snippet: cit
                    .get("excerpts")
                    .and_then(Value::as_array)
                    .and_then(|excerpts| excerpts.first())
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            })
            .collect();

        let answer = first_present(map, &["output", "answer", "result", "content"])
            .unwrap_or_else(|| {
                let loose: Vec<&str> = map
                    .iter()
                    .filter(|(key, _)| !METADATA_KEYS.contains(&key.as_str()))
                    .filter_map(|(_, value)| value.as_str())
                    .collect();
                if loose.is_empty() {
                    Value::Object(map.clone()).to_string()
                } else {
                    loose.join(" ")
                }
            });

        Self {
            answer: Some(answer),
            citations,
            confidence: None,
        }
    }
}

/// First of `keys` holding a non-empty value, rendered as text.
fn first_present(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match map.get(*key) {
        None | Some(Value::Null) | Some(Value::Bool(false)) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    })
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
