//! Evaluation CLI: run a question set through the agent and report the
//! grounded-answer rate and tool-selection accuracy.

use clap::Parser;
use ragent::agent::Agent;
use ragent::eval::{EvalOutcome, EvalQuestion, EvalReport};
use ragent::store::{migrate, Store};
use ragent::Config;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Evaluation framework: run questions and report metrics.
#[derive(Parser, Debug)]
#[command(name = "eval")]
struct Args {
    /// Path to eval questions JSON (array of {question, category,
    /// expect_grounded?, expected_tool?}).
    #[arg(long, default_value = "eval_questions.json")]
    questions: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    let config = Config::load()?;
    let store = Arc::new(Store::new(config.db_path()));
    store
        .with_connection(|conn| migrate::run_migrations(conn, Path::new("migrations")))
        .await?;

    let questions_json = std::fs::read_to_string(&args.questions)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", args.questions.display(), e))?;
    let questions: Vec<EvalQuestion> = serde_json::from_str(&questions_json)
        .map_err(|e| anyhow::anyhow!("Invalid questions JSON: {}", e))?;

    if questions.is_empty() {
        anyhow::bail!("No questions in {}", args.questions.display());
    }

    let agent = Agent::from_config(&config, store)?;

    println!("Running evaluation on {} questions\n", questions.len());

    let mut outcomes = Vec::with_capacity(questions.len());
    for question in questions {
        let answer = agent.answer(&question.question, None).await?;
        let tools = answer.tools_used.iter().map(|r| r.tool).collect();
        println!(
            "[{}] grounded={} ({}): {}",
            question.category, answer.grounded, answer.metadata.search_type, question.question
        );
        outcomes.push(EvalOutcome {
            question,
            grounded: answer.grounded,
            tools,
            elapsed_ms: answer.metadata.elapsed_ms,
        });
    }

    println!("\n{}", EvalReport::build(&outcomes));

    Ok(())
}
