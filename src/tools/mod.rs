//! Retrieval tool set: a closed family of interchangeable strategies the
//! agent dispatches per question. Every tool is read-only against the store
//! and reports failures as typed values, not exceptions.

pub mod graph;
pub mod hybrid;
pub mod keyword;
pub mod vector;

use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of retrieval strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    VectorSearch,
    GraphQuery,
    HybridSearch,
}

impl ToolKind {
    pub const ALL: [ToolKind; 3] = [
        ToolKind::VectorSearch,
        ToolKind::GraphQuery,
        ToolKind::HybridSearch,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::VectorSearch => "vector_search",
            ToolKind::GraphQuery => "graph_query",
            ToolKind::HybridSearch => "hybrid_search",
        }
    }

    pub fn parse(name: &str) -> Option<ToolKind> {
        match name {
            "vector_search" => Some(ToolKind::VectorSearch),
            "graph_query" => Some(ToolKind::GraphQuery),
            "hybrid_search" => Some(ToolKind::HybridSearch),
            _ => None,
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One retrieved, store-backed item.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedItem {
    pub entity_id: String,
    pub label: String,
    /// Human-readable rendering used for synthesis and transparency.
    pub snippet: String,
    pub score: f32,
    pub rank: usize,
}

/// Locally-recoverable retrieval failures.
#[derive(Debug, Clone)]
pub enum RetrievalFailure {
    /// The model could not produce a usable query plan.
    GenerationFailed(String),
    /// A generated plan was invalid against the live schema or failed to
    /// execute.
    ExecutionFailed(String),
}

impl fmt::Display for RetrievalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalFailure::GenerationFailed(reason) => {
                write!(f, "generation failed: {}", reason)
            }
            RetrievalFailure::ExecutionFailed(reason) => {
                write!(f, "execution failed: {}", reason)
            }
        }
    }
}

/// Outcome of one tool invocation.
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub items: Vec<RetrievedItem>,
    /// True when the result is usable but incomplete (e.g. one hybrid leg
    /// failed).
    pub partial: bool,
    pub error: Option<RetrievalFailure>,
}

impl RetrievalResult {
    pub fn ok(items: Vec<RetrievedItem>) -> Self {
        Self {
            items,
            partial: false,
            error: None,
        }
    }

    pub fn failed(failure: RetrievalFailure) -> Self {
        Self {
            items: Vec::new(),
            partial: false,
            error: Some(failure),
        }
    }

    pub fn is_grounded(&self) -> bool {
        !self.items.is_empty()
    }
}

/// Audit entry for one tool call, attached to the final response for
/// transparency. Immutable after creation.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInvocationRecord {
    #[serde(rename = "name")]
    pub tool: ToolKind,
    pub args: serde_json::Value,
    pub result_summary: String,
    pub item_count: usize,
    pub succeeded: bool,
}

impl ToolInvocationRecord {
    pub fn from_result(tool: ToolKind, args: serde_json::Value, result: &RetrievalResult) -> Self {
        let result_summary = match &result.error {
            Some(failure) => failure.to_string(),
            None if result.items.is_empty() => "no matches".to_string(),
            None => {
                let mut summary = format!("{} items", result.items.len());
                if result.partial {
                    summary.push_str(" (partial)");
                }
                summary
            }
        };
        Self {
            tool,
            args,
            result_summary,
            item_count: result.items.len(),
            succeeded: result.error.is_none(),
        }
    }
}

/// Render an entity's label and JSON properties as a one-line snippet,
/// name-like keys first.
pub fn render_entity(label: &str, properties_json: &str) -> String {
    let parsed: serde_json::Value = match serde_json::from_str(properties_json) {
        Ok(value) => value,
        Err(_) => return label.to_string(),
    };
    let map = match parsed.as_object() {
        Some(map) if !map.is_empty() => map,
        _ => return label.to_string(),
    };

    let name = map
        .get("name")
        .or_else(|| map.get("title"))
        .and_then(|v| v.as_str())
        .map(String::from);

    let mut pairs: Vec<String> = map
        .iter()
        .filter(|(key, _)| name.is_none() || (key.as_str() != "name" && key.as_str() != "title"))
        .take(6)
        .map(|(key, value)| match value.as_str() {
            Some(s) => format!("{}: {}", key, s),
            None => format!("{}: {}", key, value),
        })
        .collect();
    pairs.sort();

    match name {
        Some(name) if pairs.is_empty() => format!("{} \"{}\"", label, name),
        Some(name) => format!("{} \"{}\" ({})", label, name, pairs.join(", ")),
        None => format!("{} ({})", label, pairs.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_kind_names_round_trip() {
        for tool in ToolKind::ALL {
            assert_eq!(ToolKind::parse(tool.name()), Some(tool));
        }
        assert_eq!(ToolKind::parse("telepathy"), None);
    }

    #[test]
    fn test_tool_kind_serde_names() {
        let json = serde_json::to_string(&ToolKind::VectorSearch).unwrap();
        assert_eq!(json, r#""vector_search""#);
    }

    #[test]
    fn test_render_entity_with_name() {
        let snippet = render_entity(
            "Customer",
            r#"{"name": "Acme Corp", "region": "US", "subscription_value": 6000000}"#,
        );
        assert!(snippet.starts_with("Customer \"Acme Corp\""));
        assert!(snippet.contains("region: US"));
        assert!(snippet.contains("subscription_value: 6000000"));
    }

    #[test]
    fn test_render_entity_without_properties() {
        assert_eq!(render_entity("Risk", "{}"), "Risk");
        assert_eq!(render_entity("Risk", "not json"), "Risk");
    }

    #[test]
    fn test_invocation_record_summaries() {
        let ok = RetrievalResult::ok(vec![RetrievedItem {
            entity_id: "c1".to_string(),
            label: "Customer".to_string(),
            snippet: "Customer \"Acme\"".to_string(),
            score: 0.9,
            rank: 1,
        }]);
        let record = ToolInvocationRecord::from_result(ToolKind::VectorSearch, json!({}), &ok);
        assert!(record.succeeded);
        assert_eq!(record.item_count, 1);
        assert_eq!(record.result_summary, "1 items");

        let failed = RetrievalResult::failed(RetrievalFailure::ExecutionFailed(
            "unknown property".to_string(),
        ));
        let record = ToolInvocationRecord::from_result(ToolKind::GraphQuery, json!({}), &failed);
        assert!(!record.succeeded);
        assert!(record.result_summary.contains("execution failed"));

        let empty = RetrievalResult::ok(vec![]);
        let record = ToolInvocationRecord::from_result(ToolKind::HybridSearch, json!({}), &empty);
        assert!(record.succeeded);
        assert_eq!(record.result_summary, "no matches");
    }
}
