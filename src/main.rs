use anyhow::Result;
use ragent::agent::Agent;
use ragent::server::QueryServer;
use ragent::store::{migrate, Store};
use ragent::{Config, RagentError};
use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("verify");

    match command {
        "serve" => run_server().await?,
        "verify" | _ => run_schema_verification().await?,
    }

    Ok(())
}

/// Run the HTTP query server.
async fn run_server() -> Result<()> {
    log::info!("Starting ragent v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    let store = Arc::new(Store::new(config.db_path()));

    let migrations_dir = Path::new("migrations");
    store
        .with_connection(|conn| migrate::run_migrations(conn, migrations_dir))
        .await?;
    log::info!("Store initialized");

    let agent = Arc::new(Agent::from_config(&config, store)?);
    let server = QueryServer::new(agent, config.http_server.allowed_origins.clone());
    server.run(config.http_server.port).await?;

    Ok(())
}

/// Verify the store schema (default command).
async fn run_schema_verification() -> Result<()> {
    log::info!("Starting ragent v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    log::info!("Store path: {}", config.db_path().display());
    log::info!("Model: {}", config.model.model);
    log::info!("Embedding model: {}", config.embeddings.model);

    let store = Store::new(config.db_path());

    let migrations_dir = Path::new("migrations");
    store
        .with_connection(|conn| migrate::run_migrations(conn, migrations_dir))
        .await?;

    verify_store_schema(&store).await?;

    log::info!("Store ready; run `ragent serve` to start the query API");
    Ok(())
}

/// Check that all expected store objects exist.
async fn verify_store_schema(store: &Store) -> Result<()> {
    store
        .with_connection(|conn| {
            let mut stmt =
                conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
            let tables: Vec<String> = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

            let expected_tables = [
                "entities",
                "relations",
                "session_logs",
                "failed_queries",
                "schema_migrations",
            ];
            for table in &expected_tables {
                if !tables.iter().any(|t| t == table) {
                    return Err(RagentError::Config(format!("Missing table: {}", table)));
                }
                log::debug!("Table exists: {}", table);
            }

            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name='entities_fts'")?;
            if !stmt.exists([])? {
                return Err(RagentError::Config(
                    "FTS5 virtual table 'entities_fts' does not exist".to_string(),
                ));
            }
            log::debug!("FTS5 virtual table exists");

            let mut stmt =
                conn.prepare("SELECT name FROM sqlite_master WHERE type='trigger' ORDER BY name")?;
            let triggers: Vec<String> = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

            for trigger in ["entities_fts_insert", "entities_fts_delete", "entities_fts_update"] {
                if !triggers.iter().any(|t| t.contains(trigger)) {
                    return Err(RagentError::Config(format!("Missing trigger: {}", trigger)));
                }
            }
            log::debug!("FTS triggers exist");

            let applied = migrate::get_applied_migrations(conn)?;
            if applied.len() < 2 {
                return Err(RagentError::Config(format!(
                    "Expected at least 2 migrations, found {}",
                    applied.len()
                )));
            }
            log::debug!("{} migrations applied", applied.len());

            let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
            if journal_mode.to_uppercase() != "WAL" {
                return Err(RagentError::Config(format!(
                    "Journal mode is not WAL: {}",
                    journal_mode
                )));
            }

            let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
            if integrity != "ok" {
                return Err(RagentError::Config(format!(
                    "Store integrity check failed: {}",
                    integrity
                )));
            }
            log::info!("Store integrity: OK");

            Ok(())
        })
        .await?;

    log::info!("Store schema verification complete");
    Ok(())
}
