//! Eval metrics: grounded-answer rate and tool-selection accuracy.

use crate::eval::EvalQuestion;
use crate::tools::ToolKind;
use std::collections::BTreeMap;
use std::fmt;

/// One question's result after running through the agent.
#[derive(Debug, Clone)]
pub struct EvalOutcome {
    pub question: EvalQuestion,
    pub grounded: bool,
    pub tools: Vec<ToolKind>,
    pub elapsed_ms: u64,
}

impl EvalOutcome {
    /// Grounding matched expectation.
    pub fn grounding_correct(&self) -> bool {
        self.grounded == self.question.expect_grounded
    }

    /// The expected tool, if stated, was among those invoked.
    pub fn tool_correct(&self) -> Option<bool> {
        self.question
            .expected_tool
            .map(|expected| self.tools.contains(&expected))
    }
}

/// Fraction of outcomes whose grounded flag matched expectation.
pub fn grounded_rate(outcomes: &[EvalOutcome]) -> f32 {
    if outcomes.is_empty() {
        return 0.0;
    }
    let correct = outcomes.iter().filter(|o| o.grounding_correct()).count();
    correct as f32 / outcomes.len() as f32
}

/// Among outcomes that state an expected tool, the fraction where it was
/// invoked. None when no outcome states one.
pub fn tool_selection_accuracy(outcomes: &[EvalOutcome]) -> Option<f32> {
    let judged: Vec<bool> = outcomes.iter().filter_map(|o| o.tool_correct()).collect();
    if judged.is_empty() {
        return None;
    }
    let correct = judged.iter().filter(|&&c| c).count();
    Some(correct as f32 / judged.len() as f32)
}

/// Aggregated report over one eval run.
#[derive(Debug)]
pub struct EvalReport {
    pub total: usize,
    pub grounded_rate: f32,
    pub tool_accuracy: Option<f32>,
    pub mean_elapsed_ms: u64,
    /// category -> (correct, total)
    pub by_category: BTreeMap<String, (usize, usize)>,
}

impl EvalReport {
    pub fn build(outcomes: &[EvalOutcome]) -> Self {
        let mut by_category: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        for outcome in outcomes {
            let entry = by_category
                .entry(outcome.question.category.clone())
                .or_insert((0, 0));
            entry.1 += 1;
            if outcome.grounding_correct() {
                entry.0 += 1;
            }
        }
        let mean_elapsed_ms = if outcomes.is_empty() {
            0
        } else {
            outcomes.iter().map(|o| o.elapsed_ms).sum::<u64>() / outcomes.len() as u64
        };
        Self {
            total: outcomes.len(),
            grounded_rate: grounded_rate(outcomes),
            tool_accuracy: tool_selection_accuracy(outcomes),
            mean_elapsed_ms,
            by_category,
        }
    }
}

impl fmt::Display for EvalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Questions: {}", self.total)?;
        writeln!(f, "Grounded-answer rate: {:.1}%", self.grounded_rate * 100.0)?;
        match self.tool_accuracy {
            Some(accuracy) => {
                writeln!(f, "Tool-selection accuracy: {:.1}%", accuracy * 100.0)?
            }
            None => writeln!(f, "Tool-selection accuracy: n/a")?,
        }
        writeln!(f, "Mean latency: {} ms", self.mean_elapsed_ms)?;
        for (category, (correct, total)) in &self.by_category {
            writeln!(f, "  {}: {}/{}", category, correct, total)?;
        }
        Ok(())
    }
}
