//! Query generator: natural-language question -> typed graph query plan.
//!
//! Generation is a pure transformation from the caller's perspective: it
//! calls the generative model but executes nothing. A model response that
//! cannot be parsed into a plan is `Generation::Failed` - a normal, expected
//! outcome the agent recovers from, never an exception.

pub mod compile;
pub mod plan;

pub use compile::{compile, CompiledQuery, ResultShape};
pub use plan::{
    Aggregate, AggregateFn, Direction, FilterOp, GraphQueryPlan, PlanComplexity, PropertyFilter,
    QueryPlanCandidate, TraversalStep,
};

use crate::error::Result;
use crate::llm::CompletionModel;
use crate::schema::SchemaContext;

/// Outcome of one generation attempt.
#[derive(Debug)]
pub enum Generation {
    Plan(QueryPlanCandidate),
    Failed { reason: String },
}

/// Generate a graph query plan for the question using the schema context.
///
/// Model transport failures propagate as `RagentError::Model`; everything
/// the model does wrong with its output is a `Generation::Failed`.
pub async fn generate(
    question: &str,
    context: &SchemaContext,
    model: &dyn CompletionModel,
) -> Result<Generation> {
    let system = build_system_prompt(context);
    let raw = model.complete(&system, question).await?;

    let json_text = match extract_json(&raw) {
        Some(text) => text,
        None => {
            log::debug!("Generation produced no JSON object: {}", truncate(&raw, 200));
            return Ok(Generation::Failed {
                reason: "model output contained no JSON object".to_string(),
            });
        }
    };

    let plan: GraphQueryPlan = match serde_json::from_str(json_text) {
        Ok(plan) => plan,
        Err(e) => {
            log::debug!("Generation produced unparseable plan: {}", e);
            return Ok(Generation::Failed {
                reason: format!("model output did not parse as a query plan: {}", e),
            });
        }
    };

    if plan.entity.trim().is_empty() {
        return Ok(Generation::Failed {
            reason: "generated plan has no entity label".to_string(),
        });
    }

    Ok(Generation::Plan(QueryPlanCandidate::new(question, plan)))
}

/// Schema description + worked examples + output-format instructions.
fn build_system_prompt(context: &SchemaContext) -> String {
    let mut prompt = String::from(
        "You translate business questions into JSON graph query plans.\n\
         A plan is a JSON object: {\"entity\": \"<label>\", \"filters\": \
         [{\"property\", \"op\", \"value\"}], \"traversals\": [{\"relation\", \
         \"direction\": \"out\"|\"in\", \"target\", \"filters\"}], \
         \"aggregate\": {\"function\": \"count\"|\"sum\"|\"avg\"|\"min\"|\"max\", \
         \"property\", \"group_by\"}, \"limit\": <n>}.\n\
         Filter ops: eq, ne, gt, gte, lt, lte, contains. Express money and \
         counts as plain numbers (\"$5M\" is 5000000).\n\
         Use only the entity labels, property names, and relation types \
         listed below. Respond with the JSON object only.\n\n",
    );
    prompt.push_str(&context.describe());

    if !context.examples.is_empty() {
        prompt.push_str("\nExamples:\n");
        for example in &context.examples {
            prompt.push_str(&format!(
                "Q: {}\nA: {}\n",
                example.question,
                serde_json::to_string(&example.plan).unwrap_or_default()
            ));
        }
    }

    prompt
}

/// Pull the first balanced JSON object out of model output, tolerating
/// code fences and surrounding prose.
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
