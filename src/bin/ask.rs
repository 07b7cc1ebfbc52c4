//! One-shot question CLI: ask the agent and print the answer with tool
//! transparency.

use clap::Parser;
use ragent::agent::Agent;
use ragent::store::{migrate, Store};
use ragent::Config;
use std::path::Path;
use std::sync::Arc;

/// Ask the agent one question.
#[derive(Parser, Debug)]
#[command(name = "ask")]
struct Args {
    /// The question to answer.
    question: String,

    /// Print the full response as JSON instead of text.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    if args.question.trim().is_empty() {
        anyhow::bail!("Question cannot be empty");
    }

    let config = Config::load()?;
    let store = Arc::new(Store::new(config.db_path()));
    store
        .with_connection(|conn| migrate::run_migrations(conn, Path::new("migrations")))
        .await?;

    let agent = Agent::from_config(&config, store)?;
    let answer = agent.answer(&args.question, None).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
        return Ok(());
    }

    println!("{}\n", answer.answer);
    println!(
        "grounded: {} | search: {} | {} ms{}",
        answer.grounded,
        answer.metadata.search_type,
        answer.metadata.elapsed_ms,
        if answer.metadata.timed_out { " (timed out)" } else { "" }
    );
    for record in &answer.tools_used {
        println!(
            "  [{}] {} -> {}",
            record.tool, record.args, record.result_summary
        );
    }

    Ok(())
}
