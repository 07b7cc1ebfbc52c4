//! Plan validation and lowering to SQL.
//!
//! A plan is validated against the live schema context first; an unknown
//! label, relation, or property is an execution failure the agent recovers
//! from via simplification. Valid plans lower to a single parameterized
//! read-only SELECT (JOIN chain for traversals, json_extract filters,
//! aggregate projection over de-duplicated root entities).

use crate::generator::plan::{
    AggregateFn, Direction, FilterOp, GraphQueryPlan, PropertyFilter,
};
use crate::schema::SchemaContext;
use rusqlite::types::Value as SqlValue;

/// How the rows of a compiled query should be interpreted.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultShape {
    /// Rows are (entity_id, label, properties).
    Entities,
    /// Rows are (group_key?, numeric value); `description` names the
    /// computation, e.g. "sum(subscription_value) by region".
    Aggregate { grouped: bool, description: String },
}

#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
    pub shape: ResultShape,
}

/// Compile a plan against the schema context. `Err` carries the execution
/// failure reason (schema mismatch) for the simplifier.
pub fn compile(
    plan: &GraphQueryPlan,
    context: &SchemaContext,
    default_limit: usize,
) -> std::result::Result<CompiledQuery, String> {
    let root = context
        .entity(&plan.entity)
        .ok_or_else(|| format!("unknown entity label: {}", plan.entity))?;

    for filter in &plan.filters {
        if !root.properties.contains(&filter.property) {
            return Err(format!(
                "unknown property {} on entity {}",
                filter.property, plan.entity
            ));
        }
    }

    // Traversal JOIN chain
    let mut joins = String::new();
    let mut join_params: Vec<SqlValue> = Vec::new();
    for (i, step) in plan.traversals.iter().enumerate() {
        if !context.has_relation(&step.relation) {
            return Err(format!("unknown relation type: {}", step.relation));
        }
        let target = context
            .entity(&step.target)
            .ok_or_else(|| format!("unknown entity label: {}", step.target))?;
        for filter in &step.filters {
            if !target.properties.contains(&filter.property) {
                return Err(format!(
                    "unknown property {} on entity {}",
                    filter.property, step.target
                ));
            }
        }

        let prev = format!("e{}", i);
        let rel = format!("r{}", i + 1);
        let next = format!("e{}", i + 1);
        let (near, far) = match step.direction {
            Direction::Out => ("source_id", "target_id"),
            Direction::In => ("target_id", "source_id"),
        };
        joins.push_str(&format!(
            " JOIN relations {rel} ON {rel}.{near} = {prev}.entity_id AND {rel}.relation_type = ? \
             JOIN entities {next} ON {next}.entity_id = {rel}.{far} AND {next}.label = ?",
        ));
        join_params.push(SqlValue::Text(step.relation.clone()));
        join_params.push(SqlValue::Text(step.target.clone()));
    }

    // WHERE clause: root label, root filters, then per-step target filters
    let mut wheres = vec!["e0.label = ?".to_string()];
    let mut where_params: Vec<SqlValue> = vec![SqlValue::Text(plan.entity.clone())];
    for filter in &plan.filters {
        let (clause, mut params) = filter_clause("e0", filter)?;
        wheres.push(clause);
        where_params.append(&mut params);
    }
    for (i, step) in plan.traversals.iter().enumerate() {
        let alias = format!("e{}", i + 1);
        for filter in &step.filters {
            let (clause, mut params) = filter_clause(&alias, filter)?;
            wheres.push(clause);
            where_params.append(&mut params);
        }
    }
    let where_sql = wheres.join(" AND ");

    let limit = plan.limit.unwrap_or(default_limit).clamp(1, 100) as i64;

    match &plan.aggregate {
        None => {
            let sql = format!(
                "SELECT DISTINCT e0.entity_id, e0.label, e0.properties \
                 FROM entities e0{joins} WHERE {where_sql} LIMIT ?"
            );
            let mut params = join_params;
            params.extend(where_params);
            params.push(SqlValue::Integer(limit));
            Ok(CompiledQuery {
                sql,
                params,
                shape: ResultShape::Entities,
            })
        }
        Some(aggregate) => {
            // Aggregate over de-duplicated roots so traversal fan-out does
            // not multiply counts or sums.
            let inner = format!(
                "SELECT DISTINCT e0.entity_id AS entity_id, e0.properties AS properties \
                 FROM entities e0{joins} WHERE {where_sql}"
            );

            let value_expr;
            let mut select_params: Vec<SqlValue> = Vec::new();
            let mut description;
            match aggregate.function {
                AggregateFn::Count => {
                    value_expr = "COUNT(*)".to_string();
                    description = "count".to_string();
                }
                function => {
                    let property = aggregate.property.as_ref().ok_or_else(|| {
                        format!("{} aggregate requires a property", function.sql_name())
                    })?;
                    if !root.properties.contains(property) {
                        return Err(format!(
                            "unknown property {} on entity {}",
                            property, plan.entity
                        ));
                    }
                    value_expr = format!(
                        "{}(CAST(json_extract(properties, ?) AS REAL))",
                        function.sql_name()
                    );
                    description = format!("{}({})", function.sql_name().to_lowercase(), property);
                }
            }

            match &aggregate.group_by {
                None => {
                    // Outer SELECT param (aggregate path) binds before the
                    // inner query params: text order is binding order.
                    if let Some(property) = &aggregate.property {
                        if aggregate.function != AggregateFn::Count {
                            select_params.push(SqlValue::Text(json_path(property)));
                        }
                    }
                    let sql = format!("SELECT {value_expr} FROM ({inner})");
                    let mut params = select_params;
                    params.extend(join_params);
                    params.extend(where_params);
                    Ok(CompiledQuery {
                        sql,
                        params,
                        shape: ResultShape::Aggregate {
                            grouped: false,
                            description,
                        },
                    })
                }
                Some(group_by) => {
                    if !root.properties.contains(group_by) {
                        return Err(format!(
                            "unknown property {} on entity {}",
                            group_by, plan.entity
                        ));
                    }
                    description = format!("{} by {}", description, group_by);
                    select_params.push(SqlValue::Text(json_path(group_by)));
                    if let Some(property) = &aggregate.property {
                        if aggregate.function != AggregateFn::Count {
                            select_params.push(SqlValue::Text(json_path(property)));
                        }
                    }
                    let sql = format!(
                        "SELECT json_extract(properties, ?) AS grp, {value_expr} AS val \
                         FROM ({inner}) GROUP BY grp ORDER BY val DESC LIMIT ?"
                    );
                    let mut params = select_params;
                    params.extend(join_params);
                    params.extend(where_params);
                    params.push(SqlValue::Integer(limit));
                    Ok(CompiledQuery {
                        sql,
                        params,
                        shape: ResultShape::Aggregate {
                            grouped: true,
                            description,
                        },
                    })
                }
            }
        }
    }
}

fn json_path(property: &str) -> String {
    format!("$.{}", property)
}

fn filter_clause(
    alias: &str,
    filter: &PropertyFilter,
) -> std::result::Result<(String, Vec<SqlValue>), String> {
    let path = SqlValue::Text(json_path(&filter.property));
    let extract = format!("json_extract({}.properties, ?)", alias);

    match filter.op {
        FilterOp::Eq => Ok((format!("{} = ?", extract), vec![path, scalar(&filter.value)?])),
        FilterOp::Ne => Ok((format!("{} != ?", extract), vec![path, scalar(&filter.value)?])),
        FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => {
            let op = match filter.op {
                FilterOp::Gt => ">",
                FilterOp::Gte => ">=",
                FilterOp::Lt => "<",
                FilterOp::Lte => "<=",
                _ => unreachable!(),
            };
            // Numbers compare as REAL; strings (ISO dates) compare as text
            if filter.value.is_number() {
                Ok((
                    format!("CAST({} AS REAL) {} ?", extract, op),
                    vec![path, scalar(&filter.value)?],
                ))
            } else {
                Ok((format!("{} {} ?", extract, op), vec![path, scalar(&filter.value)?]))
            }
        }
        FilterOp::Contains => {
            let needle = filter
                .value
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| filter.value.to_string());
            Ok((
                format!("{} LIKE ?", extract),
                vec![path, SqlValue::Text(format!("%{}%", needle))],
            ))
        }
    }
}

fn scalar(value: &serde_json::Value) -> std::result::Result<SqlValue, String> {
    match value {
        serde_json::Value::Null => Ok(SqlValue::Null),
        serde_json::Value::Bool(b) => Ok(SqlValue::Integer(*b as i64)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(SqlValue::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(SqlValue::Real(f))
            } else {
                Err(format!("unsupported numeric filter value: {}", n))
            }
        }
        serde_json::Value::String(s) => Ok(SqlValue::Text(s.clone())),
        other => Err(format!("unsupported filter value: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntityTypeInfo, RelationTypeInfo, SchemaContext};
    use chrono::Utc;
    use rusqlite::Connection;
    use serde_json::json;

    fn test_context() -> SchemaContext {
        SchemaContext {
            entity_types: vec![
                EntityTypeInfo {
                    label: "Customer".to_string(),
                    properties: vec![
                        "name".to_string(),
                        "region".to_string(),
                        "subscription_value".to_string(),
                    ],
                    count: 3,
                },
                EntityTypeInfo {
                    label: "Product".to_string(),
                    properties: vec!["name".to_string(), "description".to_string()],
                    count: 2,
                },
            ],
            relation_types: vec![RelationTypeInfo {
                relation: "subscribes_to".to_string(),
                source_label: "Customer".to_string(),
                target_label: "Product".to_string(),
                count: 3,
            }],
            examples: vec![],
            stale: false,
            refreshed_at: Utc::now(),
        }
    }

    fn seeded_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE entities (entity_id TEXT PRIMARY KEY, label TEXT NOT NULL, \
             properties TEXT NOT NULL DEFAULT '{}', embedding BLOB); \
             CREATE TABLE relations (relation_id TEXT PRIMARY KEY, source_id TEXT NOT NULL, \
             relation_type TEXT NOT NULL, target_id TEXT NOT NULL, \
             properties TEXT NOT NULL DEFAULT '{}');",
        )
        .unwrap();
        let rows = [
            ("c1", "Customer", r#"{"name": "Acme Corp", "region": "US", "subscription_value": 6000000}"#),
            ("c2", "Customer", r#"{"name": "Globex", "region": "EU", "subscription_value": 2000000}"#),
            ("c3", "Customer", r#"{"name": "Initech", "region": "US", "subscription_value": 8000000}"#),
            ("p1", "Product", r#"{"name": "SpyroAnalytics", "description": "analytics suite"}"#),
            ("p2", "Product", r#"{"name": "SpyroGuard", "description": "risk monitoring"}"#),
        ];
        for (id, label, props) in rows {
            conn.execute(
                "INSERT INTO entities (entity_id, label, properties) VALUES (?1, ?2, ?3)",
                rusqlite::params![id, label, props],
            )
            .unwrap();
        }
        let edges = [
            ("r1", "c1", "subscribes_to", "p1"),
            ("r2", "c2", "subscribes_to", "p1"),
            ("r3", "c3", "subscribes_to", "p2"),
        ];
        for (id, src, rel, dst) in edges {
            conn.execute(
                "INSERT INTO relations (relation_id, source_id, relation_type, target_id) \
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, src, rel, dst],
            )
            .unwrap();
        }
        conn
    }

    fn run_entities(conn: &Connection, compiled: &CompiledQuery) -> Vec<(String, String)> {
        let mut stmt = conn.prepare(&compiled.sql).unwrap();
        let rows = stmt
            .query_map(rusqlite::params_from_iter(compiled.params.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(2)?))
            })
            .unwrap();
        rows.collect::<std::result::Result<Vec<_>, _>>().unwrap()
    }

    #[test]
    fn test_compile_unknown_label() {
        let plan: GraphQueryPlan = serde_json::from_value(json!({"entity": "Martian"})).unwrap();
        let err = compile(&plan, &test_context(), 10).unwrap_err();
        assert!(err.contains("unknown entity label"));
    }

    #[test]
    fn test_compile_unknown_property() {
        let plan: GraphQueryPlan = serde_json::from_value(json!({
            "entity": "Customer",
            "filters": [{"property": "arr_growth", "op": "gt", "value": 1}]
        }))
        .unwrap();
        let err = compile(&plan, &test_context(), 10).unwrap_err();
        assert!(err.contains("unknown property arr_growth"));
    }

    #[test]
    fn test_compile_unknown_relation() {
        let plan: GraphQueryPlan = serde_json::from_value(json!({
            "entity": "Customer",
            "traversals": [{"relation": "reports_to", "target": "Product"}]
        }))
        .unwrap();
        let err = compile(&plan, &test_context(), 10).unwrap_err();
        assert!(err.contains("unknown relation type"));
    }

    #[test]
    fn test_numeric_filter_executes() {
        let conn = seeded_conn();
        let plan: GraphQueryPlan = serde_json::from_value(json!({
            "entity": "Customer",
            "filters": [{"property": "subscription_value", "op": "gte", "value": 5000000}]
        }))
        .unwrap();
        let compiled = compile(&plan, &test_context(), 10).unwrap();
        assert_eq!(compiled.shape, ResultShape::Entities);
        let rows = run_entities(&conn, &compiled);
        let ids: Vec<&str> = rows.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"c1"));
        assert!(ids.contains(&"c3"));
    }

    #[test]
    fn test_traversal_executes() {
        let conn = seeded_conn();
        let plan: GraphQueryPlan = serde_json::from_value(json!({
            "entity": "Product",
            "traversals": [{
                "relation": "subscribes_to",
                "direction": "in",
                "target": "Customer",
                "filters": [{"property": "name", "op": "eq", "value": "Acme Corp"}]
            }]
        }))
        .unwrap();
        let compiled = compile(&plan, &test_context(), 10).unwrap();
        let rows = run_entities(&conn, &compiled);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "p1");
    }

    #[test]
    fn test_count_aggregate_deduplicates_roots() {
        let conn = seeded_conn();
        // Two customers subscribe to p1; count of products with any
        // subscriber must still be 2 (p1, p2), not 3.
        let plan: GraphQueryPlan = serde_json::from_value(json!({
            "entity": "Product",
            "traversals": [{"relation": "subscribes_to", "direction": "in", "target": "Customer"}],
            "aggregate": {"function": "count"}
        }))
        .unwrap();
        let compiled = compile(&plan, &test_context(), 10).unwrap();
        let count: i64 = conn
            .query_row(
                &compiled.sql,
                rusqlite::params_from_iter(compiled.params.iter()),
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_sum_aggregate_executes() {
        let conn = seeded_conn();
        let plan: GraphQueryPlan = serde_json::from_value(json!({
            "entity": "Customer",
            "aggregate": {"function": "sum", "property": "subscription_value"}
        }))
        .unwrap();
        let compiled = compile(&plan, &test_context(), 10).unwrap();
        match &compiled.shape {
            ResultShape::Aggregate { grouped, description } => {
                assert!(!grouped);
                assert_eq!(description, "sum(subscription_value)");
            }
            other => panic!("unexpected shape: {:?}", other),
        }
        let sum: f64 = conn
            .query_row(
                &compiled.sql,
                rusqlite::params_from_iter(compiled.params.iter()),
                |row| row.get(0),
            )
            .unwrap();
        assert!((sum - 16_000_000.0).abs() < 1.0);
    }

    #[test]
    fn test_grouped_aggregate_executes() {
        let conn = seeded_conn();
        let plan: GraphQueryPlan = serde_json::from_value(json!({
            "entity": "Customer",
            "aggregate": {"function": "count", "group_by": "region"}
        }))
        .unwrap();
        let compiled = compile(&plan, &test_context(), 10).unwrap();
        let mut stmt = conn.prepare(&compiled.sql).unwrap();
        let rows: Vec<(String, f64)> = stmt
            .query_map(rusqlite::params_from_iter(compiled.params.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "US"); // larger group sorts first
        assert!((rows[0].1 - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_sum_without_property_is_schema_error() {
        let plan: GraphQueryPlan = serde_json::from_value(json!({
            "entity": "Customer",
            "aggregate": {"function": "sum"}
        }))
        .unwrap();
        let err = compile(&plan, &test_context(), 10).unwrap_err();
        assert!(err.contains("requires a property"));
    }

    #[test]
    fn test_contains_filter_executes() {
        let conn = seeded_conn();
        let plan: GraphQueryPlan = serde_json::from_value(json!({
            "entity": "Product",
            "filters": [{"property": "description", "op": "contains", "value": "analytics"}]
        }))
        .unwrap();
        let compiled = compile(&plan, &test_context(), 10).unwrap();
        let rows = run_entities(&conn, &compiled);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "p1");
    }
}
