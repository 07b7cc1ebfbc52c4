//! Schema/context provider: introspects the graph store's entity and
//! relation vocabulary and supplies it, with a curated bank of worked
//! question->plan examples, to the query generator's prompt builder.
//!
//! The context is cached with a TTL staleness policy. If the store is
//! unreachable at refresh time the last good context is served flagged
//! `stale`; with no cached copy the store error propagates.

use crate::error::{RagentError, Result};
use crate::generator::plan::GraphQueryPlan;
use crate::store::Store;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// One entity label with its observed property names.
#[derive(Debug, Clone)]
pub struct EntityTypeInfo {
    pub label: String,
    pub properties: Vec<String>,
    pub count: i64,
}

/// One relation type with its endpoint labels.
#[derive(Debug, Clone)]
pub struct RelationTypeInfo {
    pub relation: String,
    pub source_label: String,
    pub target_label: String,
    pub count: i64,
}

/// Curated natural-language-question -> plan pair fed to the prompt builder.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkedExample {
    pub question: String,
    pub plan: GraphQueryPlan,
}

/// Snapshot of the graph vocabulary plus the example bank.
#[derive(Debug, Clone)]
pub struct SchemaContext {
    pub entity_types: Vec<EntityTypeInfo>,
    pub relation_types: Vec<RelationTypeInfo>,
    pub examples: Vec<WorkedExample>,
    /// True when the store was unreachable and this is the last good copy.
    pub stale: bool,
    pub refreshed_at: DateTime<Utc>,
}

impl SchemaContext {
    pub fn entity(&self, label: &str) -> Option<&EntityTypeInfo> {
        self.entity_types.iter().find(|e| e.label == label)
    }

    pub fn has_relation(&self, relation: &str) -> bool {
        self.relation_types.iter().any(|r| r.relation == relation)
    }

    /// Render the vocabulary for the generation prompt.
    pub fn describe(&self) -> String {
        let mut out = String::from("Entity types:\n");
        for e in &self.entity_types {
            out.push_str(&format!(
                "- {} ({} entities): {}\n",
                e.label,
                e.count,
                if e.properties.is_empty() {
                    "(no properties)".to_string()
                } else {
                    e.properties.join(", ")
                }
            ));
        }
        out.push_str("Relation types:\n");
        for r in &self.relation_types {
            out.push_str(&format!(
                "- ({})-[{}]->({}): {} edges\n",
                r.source_label, r.relation, r.target_label, r.count
            ));
        }
        out
    }
}

/// Lazily-refreshed schema context cache over the store.
pub struct SchemaProvider {
    store: Arc<Store>,
    ttl: Duration,
    examples: Vec<WorkedExample>,
    cache: RwLock<Option<SchemaContext>>,
}

impl SchemaProvider {
    pub fn new(store: Arc<Store>, ttl: Duration, examples: Vec<WorkedExample>) -> Self {
        Self {
            store,
            ttl,
            examples,
            cache: RwLock::new(None),
        }
    }

    /// Current schema context, refreshed when older than the TTL.
    pub async fn context(&self) -> Result<SchemaContext> {
        {
            let cache = self.cache.read().await;
            if let Some(ctx) = cache.as_ref() {
                let age = Utc::now().signed_duration_since(ctx.refreshed_at);
                if age.num_milliseconds() >= 0 && (age.num_milliseconds() as u128) < self.ttl.as_millis() {
                    return Ok(ctx.clone());
                }
            }
        }
        match self.refresh().await {
            Ok(ctx) => Ok(ctx),
            Err(e) => {
                let cache = self.cache.read().await;
                match cache.as_ref() {
                    Some(ctx) => {
                        log::warn!("Schema refresh failed ({}); serving stale context", e);
                        let mut stale = ctx.clone();
                        stale.stale = true;
                        Ok(stale)
                    }
                    None => Err(e),
                }
            }
        }
    }

    /// Explicit invalidation trigger: re-introspect the store now.
    pub async fn refresh(&self) -> Result<SchemaContext> {
        let (entity_types, relation_types) = self.introspect().await?;
        let ctx = SchemaContext {
            entity_types,
            relation_types,
            examples: self.examples.clone(),
            stale: false,
            refreshed_at: Utc::now(),
        };
        let mut cache = self.cache.write().await;
        *cache = Some(ctx.clone());
        Ok(ctx)
    }

    /// Read-only metadata scan: labels with their union of property keys,
    /// relation types grouped by endpoint labels.
    async fn introspect(&self) -> Result<(Vec<EntityTypeInfo>, Vec<RelationTypeInfo>)> {
        self.store
            .with_connection(|conn| {
                let mut by_label: BTreeMap<String, (std::collections::BTreeSet<String>, i64)> =
                    BTreeMap::new();
                {
                    let mut stmt = conn.prepare("SELECT label, properties FROM entities")?;
                    let mut rows = stmt.query([])?;
                    while let Some(row) = rows.next()? {
                        let label: String = row.get(0)?;
                        let properties: String = row.get(1)?;
                        let entry = by_label.entry(label).or_default();
                        entry.1 += 1;
                        if let Ok(serde_json::Value::Object(map)) =
                            serde_json::from_str::<serde_json::Value>(&properties)
                        {
                            for key in map.keys() {
                                entry.0.insert(key.clone());
                            }
                        }
                    }
                }

                let entity_types = by_label
                    .into_iter()
                    .map(|(label, (props, count))| EntityTypeInfo {
                        label,
                        properties: props.into_iter().collect(),
                        count,
                    })
                    .collect();

                let mut relation_types = Vec::new();
                {
                    let mut stmt = conn.prepare(
                        "SELECT r.relation_type, s.label, t.label, COUNT(*) \
                         FROM relations r \
                         JOIN entities s ON s.entity_id = r.source_id \
                         JOIN entities t ON t.entity_id = r.target_id \
                         GROUP BY r.relation_type, s.label, t.label \
                         ORDER BY r.relation_type",
                    )?;
                    let mut rows = stmt.query([])?;
                    while let Some(row) = rows.next()? {
                        relation_types.push(RelationTypeInfo {
                            relation: row.get(0)?,
                            source_label: row.get(1)?,
                            target_label: row.get(2)?,
                            count: row.get(3)?,
                        });
                    }
                }

                Ok((entity_types, relation_types))
            })
            .await
    }
}

/// Load worked examples from a JSON file (array of {question, plan}).
pub fn load_examples(path: &Path) -> Result<Vec<WorkedExample>> {
    let text = std::fs::read_to_string(path).map_err(RagentError::Io)?;
    serde_json::from_str(&text)
        .map_err(|e| RagentError::Config(format!("Invalid examples file {}: {}", path.display(), e)))
}

/// Built-in example bank for the business knowledge graph domain.
pub fn default_examples() -> Vec<WorkedExample> {
    let raw = vec![
        (
            "Which customers have subscriptions over $5M?",
            json!({
                "entity": "Customer",
                "filters": [
                    {"property": "subscription_value", "op": "gte", "value": 5000000}
                ]
            }),
        ),
        (
            "How many customers are exposed to churn risk?",
            json!({
                "entity": "Customer",
                "traversals": [
                    {"relation": "at_risk_of", "target": "Risk"}
                ],
                "aggregate": {"function": "count"}
            }),
        ),
        (
            "What is the average subscription value across customers?",
            json!({
                "entity": "Customer",
                "aggregate": {"function": "avg", "property": "subscription_value"}
            }),
        ),
        (
            "Which products does Acme Corp subscribe to?",
            json!({
                "entity": "Product",
                "traversals": [
                    {
                        "relation": "subscribes_to",
                        "direction": "in",
                        "target": "Customer",
                        "filters": [
                            {"property": "name", "op": "eq", "value": "Acme Corp"}
                        ]
                    }
                ]
            }),
        ),
    ];

    raw.into_iter()
        .map(|(question, plan)| WorkedExample {
            question: question.to_string(),
            plan: serde_json::from_value(plan).expect("built-in example plan is valid"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::migrate;
    use rusqlite::params;
    use tempfile::TempDir;

    async fn seeded_store() -> (Arc<Store>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(Store::new(temp_dir.path().join("graph.db")));
        let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
        store
            .with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
            .await
            .unwrap();
        store
            .with_connection(|conn| {
                conn.execute(
                    "INSERT INTO entities (entity_id, label, properties) VALUES (?1, ?2, ?3)",
                    params![
                        "c1",
                        "Customer",
                        r#"{"name": "Acme Corp", "subscription_value": 6000000}"#
                    ],
                )?;
                conn.execute(
                    "INSERT INTO entities (entity_id, label, properties) VALUES (?1, ?2, ?3)",
                    params!["c2", "Customer", r#"{"name": "Globex", "region": "EU"}"#],
                )?;
                conn.execute(
                    "INSERT INTO entities (entity_id, label, properties) VALUES (?1, ?2, ?3)",
                    params!["p1", "Product", r#"{"name": "SpyroAnalytics"}"#],
                )?;
                conn.execute(
                    "INSERT INTO relations (relation_id, source_id, relation_type, target_id) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params!["r1", "c1", "subscribes_to", "p1"],
                )?;
                Ok::<(), RagentError>(())
            })
            .await
            .unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_introspection() {
        let (store, _temp) = seeded_store().await;
        let provider = SchemaProvider::new(store, Duration::from_secs(300), default_examples());
        let ctx = provider.context().await.unwrap();

        assert!(!ctx.stale);
        let customer = ctx.entity("Customer").unwrap();
        assert_eq!(customer.count, 2);
        assert!(customer.properties.contains(&"name".to_string()));
        assert!(customer.properties.contains(&"subscription_value".to_string()));
        assert!(customer.properties.contains(&"region".to_string()));

        assert!(ctx.has_relation("subscribes_to"));
        let rel = &ctx.relation_types[0];
        assert_eq!(rel.source_label, "Customer");
        assert_eq!(rel.target_label, "Product");
        assert_eq!(rel.count, 1);
    }

    #[tokio::test]
    async fn test_context_is_cached_within_ttl() {
        let (store, _temp) = seeded_store().await;
        let provider =
            SchemaProvider::new(store.clone(), Duration::from_secs(300), default_examples());
        let first = provider.context().await.unwrap();

        // New entity not visible until the TTL lapses or refresh() is called
        store
            .with_connection(|conn| {
                conn.execute(
                    "INSERT INTO entities (entity_id, label, properties) VALUES (?1, ?2, ?3)",
                    params!["t1", "Team", "{}"],
                )?;
                Ok::<(), RagentError>(())
            })
            .await
            .unwrap();

        let cached = provider.context().await.unwrap();
        assert_eq!(cached.entity_types.len(), first.entity_types.len());
        assert!(cached.entity("Team").is_none());

        let refreshed = provider.refresh().await.unwrap();
        assert!(refreshed.entity("Team").is_some());
    }

    #[tokio::test]
    async fn test_stale_context_on_store_failure() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("graph.db");
        let store = Arc::new(Store::new(&db_path));
        let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
        store
            .with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
            .await
            .unwrap();

        let provider = SchemaProvider::new(store, Duration::from_millis(0), vec![]);
        let first = provider.context().await.unwrap();
        assert!(!first.stale);

        // Make the store unreachable: replace the db file with a directory
        std::fs::remove_file(&db_path).unwrap();
        let _ = std::fs::remove_file(temp_dir.path().join("graph.db-wal"));
        let _ = std::fs::remove_file(temp_dir.path().join("graph.db-shm"));
        std::fs::create_dir(&db_path).unwrap();

        let ctx = provider.context().await.unwrap();
        assert!(ctx.stale, "unreachable store should serve stale cached context");
    }

    #[test]
    fn test_default_examples_parse() {
        let examples = default_examples();
        assert!(examples.len() >= 3);
        assert!(examples
            .iter()
            .any(|e| e.plan.aggregate.is_some()));
        assert!(examples
            .iter()
            .any(|e| !e.plan.traversals.is_empty()));
    }

    #[test]
    fn test_describe_renders_vocabulary() {
        let ctx = SchemaContext {
            entity_types: vec![EntityTypeInfo {
                label: "Customer".to_string(),
                properties: vec!["name".to_string()],
                count: 3,
            }],
            relation_types: vec![RelationTypeInfo {
                relation: "subscribes_to".to_string(),
                source_label: "Customer".to_string(),
                target_label: "Product".to_string(),
                count: 2,
            }],
            examples: vec![],
            stale: false,
            refreshed_at: Utc::now(),
        };
        let text = ctx.describe();
        assert!(text.contains("Customer (3 entities): name"));
        assert!(text.contains("(Customer)-[subscribes_to]->(Product)"));
    }
}
