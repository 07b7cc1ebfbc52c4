//! Structured graph querying: compile a generated plan and execute it.
//!
//! Best for relational/aggregation questions. Schema mismatches and SQL
//! failures from the generated statement are `ExecutionFailed` on the result
//! (and recorded in the failed-query audit); only store-level failures
//! propagate as errors.

use crate::error::Result;
use crate::generator::{compile, CompiledQuery, QueryPlanCandidate, ResultShape};
use crate::schema::SchemaContext;
use crate::store::{audit, Store};
use crate::tools::{render_entity, RetrievalFailure, RetrievalResult, RetrievedItem};

/// Execute a query plan candidate against the store.
pub async fn retrieve(
    store: &Store,
    context: &SchemaContext,
    candidate: &QueryPlanCandidate,
    default_limit: usize,
) -> Result<RetrievalResult> {
    let compiled = match compile(&candidate.plan, context, default_limit) {
        Ok(compiled) => compiled,
        Err(reason) => {
            log::warn!(
                "Graph query rejected by schema validation: {} (plan: {})",
                reason,
                plan_json(candidate)
            );
            record_failure(store, candidate, None, &reason).await;
            return Ok(RetrievalResult::failed(RetrievalFailure::ExecutionFailed(
                reason,
            )));
        }
    };

    log::debug!(
        "Graph query (agg={}, hops={}): {}",
        candidate.complexity.uses_aggregation,
        candidate.complexity.hop_depth,
        compiled.sql
    );

    let execution = execute(store, &compiled, &candidate.plan.entity).await?;

    match execution {
        Ok(items) => Ok(RetrievalResult::ok(items)),
        Err(reason) => {
            log::warn!(
                "Graph query execution failed: {} (sql: {})",
                reason,
                compiled.sql
            );
            record_failure(store, candidate, Some(&compiled.sql), &reason).await;
            Ok(RetrievalResult::failed(RetrievalFailure::ExecutionFailed(
                reason,
            )))
        }
    }
}

/// Run the compiled statement. The outer Result is store-level; the inner
/// carries failures of the generated statement itself.
async fn execute(
    store: &Store,
    compiled: &CompiledQuery,
    root_label: &str,
) -> Result<std::result::Result<Vec<RetrievedItem>, String>> {
    let sql = compiled.sql.clone();
    let params = compiled.params.clone();
    let shape = compiled.shape.clone();
    let label = root_label.to_string();

    store
        .with_connection(move |conn| {
            let mut stmt = match conn.prepare(&sql) {
                Ok(stmt) => stmt,
                Err(e) => return Ok(Err(e.to_string())),
            };
            let mut rows = match stmt.query(rusqlite::params_from_iter(params.iter())) {
                Ok(rows) => rows,
                Err(e) => return Ok(Err(e.to_string())),
            };

            let mut items = Vec::new();
            match shape {
                ResultShape::Entities => loop {
                    match rows.next() {
                        Ok(Some(row)) => {
                            let entity_id: String = row.get(0)?;
                            let entity_label: String = row.get(1)?;
                            let properties: String = row.get(2)?;
                            let snippet = render_entity(&entity_label, &properties);
                            let rank = items.len() + 1;
                            items.push(RetrievedItem {
                                entity_id,
                                label: entity_label,
                                snippet,
                                score: 1.0,
                                rank,
                            });
                        }
                        Ok(None) => break,
                        Err(e) => return Ok(Err(e.to_string())),
                    }
                },
                ResultShape::Aggregate {
                    grouped: false,
                    ref description,
                } => {
                    match rows.next() {
                        Ok(Some(row)) => {
                            let value: Option<f64> = row.get(0)?;
                            // NULL aggregate (e.g. SUM over nothing) and a
                            // zero count both mean: no store-backed data
                            if let Some(value) = value {
                                if !(description == "count" && value == 0.0) {
                                    items.push(RetrievedItem {
                                        entity_id: "aggregate".to_string(),
                                        label: label.clone(),
                                        snippet: format!("{} = {}", description, fmt_number(value)),
                                        score: 1.0,
                                        rank: 1,
                                    });
                                }
                            }
                        }
                        Ok(None) => {}
                        Err(e) => return Ok(Err(e.to_string())),
                    }
                }
                ResultShape::Aggregate {
                    grouped: true,
                    ref description,
                } => loop {
                    match rows.next() {
                        Ok(Some(row)) => {
                            let group: rusqlite::types::Value = row.get(0)?;
                            let value: f64 = row.get(1)?;
                            let group_text = match group {
                                rusqlite::types::Value::Text(s) => s,
                                rusqlite::types::Value::Integer(i) => i.to_string(),
                                rusqlite::types::Value::Real(f) => fmt_number(f),
                                _ => "(none)".to_string(),
                            };
                            let rank = items.len() + 1;
                            items.push(RetrievedItem {
                                entity_id: format!("aggregate:{}", group_text),
                                label: label.clone(),
                                snippet: format!(
                                    "{} [{}] = {}",
                                    description,
                                    group_text,
                                    fmt_number(value)
                                ),
                                score: 1.0,
                                rank,
                            });
                        }
                        Ok(None) => break,
                        Err(e) => return Ok(Err(e.to_string())),
                    }
                },
            }

            Ok(Ok(items))
        })
        .await
}

async fn record_failure(
    store: &Store,
    candidate: &QueryPlanCandidate,
    sql: Option<&str>,
    reason: &str,
) {
    if let Err(e) =
        audit::log_failed_query(store, &candidate.question, &plan_json(candidate), sql, reason)
            .await
    {
        log::warn!("Failed to record failed query: {}", e);
    }
}

fn plan_json(candidate: &QueryPlanCandidate) -> String {
    serde_json::to_string(&candidate.plan).unwrap_or_else(|_| "{}".to_string())
}

fn fmt_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value)
    }
}
