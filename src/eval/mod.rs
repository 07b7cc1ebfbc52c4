//! Evaluation framework: run a question set through the agent and score it
//! against one explicit grounding criterion.
//!
//! An answer counts as grounded iff at least one tool invocation returned at
//! least one store-backed item. That is exactly the `grounded` flag the
//! agent computes; the eval harness never re-judges groundedness.

pub mod metrics;

pub use metrics::{grounded_rate, tool_selection_accuracy, EvalOutcome, EvalReport};

use crate::tools::ToolKind;
use serde::Deserialize;

/// One evaluation question with its expectations.
#[derive(Debug, Clone, Deserialize)]
pub struct EvalQuestion {
    pub question: String,
    /// Category for reporting (e.g. relational, conceptual, fallback).
    pub category: String,
    /// Whether a grounded answer is expected (default true).
    #[serde(default = "default_expect_grounded")]
    pub expect_grounded: bool,
    /// Optional: the tool the planner is expected to select.
    #[serde(default)]
    pub expected_tool: Option<ToolKind>,
}

fn default_expect_grounded() -> bool {
    true
}
