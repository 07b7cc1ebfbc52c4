//! Answer synthesis from retrieved facts.
//!
//! The model is constrained to the retrieved items; when no tool produced
//! store-backed data the agent returns a fixed honest answer without calling
//! the model at all, so there is nothing to fabricate from.

use crate::agent::ConversationContext;
use crate::error::Result;
use crate::llm::CompletionModel;
use crate::tools::{RetrievedItem, ToolKind};

const SYNTHESIS_SYSTEM: &str = "You answer business questions using ONLY the retrieved facts \
below. Every entity, number, and relationship in your answer must appear in the facts. If the \
facts answer the question partially, state what is known and what is not. Answer concisely in \
natural language.";

/// The fixed answer for sessions where no tool produced grounded data.
pub fn ungrounded_answer() -> String {
    "I don't have specific data to answer that question. No matching records were found in the \
     knowledge base."
        .to_string()
}

/// Compose the final answer from all tools' retrieved items.
pub async fn answer(
    model: &dyn CompletionModel,
    question: &str,
    retrieved: &[(ToolKind, Vec<RetrievedItem>)],
    session: Option<&ConversationContext>,
) -> Result<String> {
    let system = build_system_prompt(retrieved);
    let user = build_user_prompt(question, session);

    let text = model.complete(&system, &user).await?;
    let trimmed = text.trim();

    if trimmed.is_empty() {
        // Degenerate model output: fall back to a plain rendering of the
        // facts rather than an empty answer
        return Ok(render_facts(retrieved));
    }

    Ok(trimmed.to_string())
}

fn build_system_prompt(retrieved: &[(ToolKind, Vec<RetrievedItem>)]) -> String {
    let mut prompt = String::from(SYNTHESIS_SYSTEM);
    prompt.push_str("\n\nRetrieved facts:\n");
    for (tool, items) in retrieved {
        for item in items {
            prompt.push_str(&format!(
                "[{}] {} (score {:.2})\n",
                tool.name(),
                item.snippet,
                item.score
            ));
        }
    }
    prompt
}

fn build_user_prompt(question: &str, session: Option<&ConversationContext>) -> String {
    let mut prompt = String::new();
    if let Some(session) = session {
        if !session.turns.is_empty() {
            prompt.push_str("Earlier in this conversation:\n");
            for turn in &session.turns {
                prompt.push_str(&format!("Q: {}\nA: {}\n", turn.question, turn.answer));
            }
            prompt.push('\n');
        }
    }
    prompt.push_str(question);
    prompt
}

fn render_facts(retrieved: &[(ToolKind, Vec<RetrievedItem>)]) -> String {
    let snippets: Vec<&str> = retrieved
        .iter()
        .flat_map(|(_, items)| items.iter().map(|i| i.snippet.as_str()))
        .collect();
    format!("Based on the retrieved data: {}", snippets.join("; "))
}
