//! Session and failed-query audit logging.
//!
//! Audit writes are best-effort: a failed insert logs a warning and never
//! fails the question-answering session.

use crate::error::Result;
use crate::store::Store;
use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

/// Log one answered session. Returns the generated session log id.
pub async fn log_session(
    store: &Store,
    question: &str,
    tools_json: &str,
    grounded: bool,
    latency_ms: i64,
) -> Result<String> {
    let log_id = Uuid::new_v4().to_string();
    let timestamp = Utc::now().to_rfc3339();

    let q = question.to_string();
    let tools = tools_json.to_string();
    let id = log_id.clone();

    store
        .with_connection(move |conn| {
            conn.execute(
                "INSERT INTO session_logs (session_id, timestamp, question, tools_json, grounded, latency_ms) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, timestamp, q, tools, grounded as i64, latency_ms],
            )?;
            Ok::<(), crate::error::RagentError>(())
        })
        .await?;

    Ok(log_id)
}

/// Record a generated query that failed execution, with the offending plan
/// and lowered SQL when available.
pub async fn log_failed_query(
    store: &Store,
    question: &str,
    plan_json: &str,
    sql_text: Option<&str>,
    error: &str,
) -> Result<String> {
    let failure_id = Uuid::new_v4().to_string();
    let timestamp = Utc::now().to_rfc3339();

    let q = question.to_string();
    let plan = plan_json.to_string();
    let sql = sql_text.map(String::from);
    let err = error.to_string();
    let id = failure_id.clone();

    store
        .with_connection(move |conn| {
            conn.execute(
                "INSERT INTO failed_queries (failure_id, timestamp, question, plan_json, sql_text, error) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, timestamp, q, plan, sql, err],
            )?;
            Ok::<(), crate::error::RagentError>(())
        })
        .await?;

    Ok(failure_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::migrate;
    use std::path::Path;
    use tempfile::TempDir;

    async fn setup_store() -> (Store, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::new(temp_dir.path().join("test.db"));
        let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
        store
            .with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
            .await
            .unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_log_session() {
        let (store, _temp) = setup_store().await;
        let id = log_session(&store, "test question", "[]", true, 42)
            .await
            .unwrap();
        assert!(!id.is_empty());

        let count: i64 = store
            .with_connection(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM session_logs", [], |r| r.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_log_failed_query() {
        let (store, _temp) = setup_store().await;
        log_failed_query(
            &store,
            "which customers",
            r#"{"entity":"Customer"}"#,
            Some("SELECT 1"),
            "no such column",
        )
        .await
        .unwrap();

        let (plan, err): (String, String) = store
            .with_connection(|conn| {
                Ok(conn.query_row(
                    "SELECT plan_json, error FROM failed_queries",
                    [],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )?)
            })
            .await
            .unwrap();
        assert!(plan.contains("Customer"));
        assert!(err.contains("no such column"));
    }
}
