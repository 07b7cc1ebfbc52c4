//! Tool selection: a lexical-cue classifier over the question, with
//! success-statistics tie-breaking.
//!
//! Relational/aggregation language prefers the graph query tool; conceptual/
//! descriptive language prefers vector search; a mix of both cue families
//! runs graph and vector in parallel; quoted exact terms push toward hybrid.
//! Ties go to the historically most successful tool, then cheapest-first
//! (vector before graph before hybrid, since structured query generation is
//! the most failure-prone step).

use crate::tools::ToolKind;
use regex::RegexSet;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

fn relational_cues() -> &'static RegexSet {
    static CUES: OnceLock<RegexSet> = OnceLock::new();
    CUES.get_or_init(|| {
        RegexSet::new([
            r"(?i)\bhow many\b",
            r"(?i)\bcount\b",
            r"(?i)\btotal\b",
            r"(?i)\bsum\b",
            r"(?i)\baverage\b",
            r"(?i)\bmore than\b",
            r"(?i)\bless than\b",
            r"(?i)\bat least\b",
            r"(?i)\bbetween\b",
            r"(?i)\bover [\$€£]?\d",
            r"(?i)\bunder [\$€£]?\d",
            r"(?i)\btop \d+",
            r"(?i)\bhighest\b",
            r"(?i)\blowest\b",
            r"(?i)\blargest\b",
            r"(?i)\bwhich\b.*\b(have|has|with)\b",
            r"[\$€£]\d",
        ])
        .expect("relational cue patterns are valid")
    })
}

fn conceptual_cues() -> &'static RegexSet {
    static CUES: OnceLock<RegexSet> = OnceLock::new();
    CUES.get_or_init(|| {
        RegexSet::new([
            r"(?i)\bwhat is\b",
            r"(?i)\bwhat does\b",
            r"(?i)\bdescribe\b",
            r"(?i)\bexplain\b",
            r"(?i)\boverview\b",
            r"(?i)\btell me about\b",
            r"(?i)\bhow does\b",
            r"(?i)\bpurpose\b",
            r"(?i)\bsummar(y|ize|ise)\b",
            r"(?i)\bmeans?\b",
        ])
        .expect("conceptual cue patterns are valid")
    })
}

fn exact_term_cue() -> &'static regex::Regex {
    static CUE: OnceLock<regex::Regex> = OnceLock::new();
    CUE.get_or_init(|| regex::Regex::new(r#""[^"]+"|'[^']{2,}'"#).expect("exact-term pattern is valid"))
}

/// In-process per-tool success counters. Grounded outcomes count as
/// successes; used only to break ties for cue-less questions.
#[derive(Default)]
pub struct ToolStats {
    counters: Mutex<HashMap<ToolKind, (u64, u64)>>,
}

impl ToolStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, tool: ToolKind, grounded: bool) {
        let mut counters = self.counters.lock().unwrap();
        let entry = counters.entry(tool).or_insert((0, 0));
        entry.1 += 1;
        if grounded {
            entry.0 += 1;
        }
    }

    /// Success rate, once a tool has a minimal sample.
    pub fn success_rate(&self, tool: ToolKind) -> Option<f64> {
        let counters = self.counters.lock().unwrap();
        let (succeeded, total) = counters.get(&tool).copied()?;
        if total < 3 {
            return None;
        }
        Some(succeeded as f64 / total as f64)
    }

    fn best_of(&self, candidates: &[ToolKind]) -> Option<ToolKind> {
        candidates
            .iter()
            .filter_map(|&tool| self.success_rate(tool).map(|rate| (tool, rate)))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(tool, _)| tool)
    }
}

/// Cheapest-first preference order.
const CHEAPEST_FIRST: [ToolKind; 3] = [
    ToolKind::VectorSearch,
    ToolKind::GraphQuery,
    ToolKind::HybridSearch,
];

/// Select one or more tools for the question, restricted to `enabled`.
/// Returns an empty vector only when no tools are enabled at all.
pub fn plan_tools(question: &str, enabled: &[ToolKind], stats: &ToolStats) -> Vec<ToolKind> {
    if enabled.is_empty() {
        return Vec::new();
    }

    let relational = relational_cues().is_match(question);
    let conceptual = conceptual_cues().is_match(question);
    let exact_terms = exact_term_cue().is_match(question);

    let preferred: Vec<ToolKind> = match (relational, conceptual) {
        (true, false) => vec![ToolKind::GraphQuery],
        (false, true) if exact_terms => vec![ToolKind::HybridSearch],
        (false, true) => vec![ToolKind::VectorSearch],
        // Both cue families: run structured and semantic retrieval in
        // parallel and merge at synthesis
        (true, true) => vec![ToolKind::GraphQuery, ToolKind::VectorSearch],
        (false, false) if exact_terms => vec![ToolKind::HybridSearch],
        (false, false) => match stats.best_of(enabled) {
            Some(tool) => vec![tool],
            None => vec![CHEAPEST_FIRST
                .into_iter()
                .find(|t| enabled.contains(t))
                .unwrap_or(enabled[0])],
        },
    };

    let selected: Vec<ToolKind> = preferred
        .into_iter()
        .filter(|tool| enabled.contains(tool))
        .collect();

    if selected.is_empty() {
        // Preferred tools are disabled: degrade to the cheapest enabled one
        return vec![CHEAPEST_FIRST
            .into_iter()
            .find(|t| enabled.contains(t))
            .unwrap_or(enabled[0])];
    }

    selected
}
