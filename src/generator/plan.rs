//! Typed graph query plans.
//!
//! The generative model emits a plan as JSON rather than free query text;
//! everything downstream (validation, compilation, simplification) operates
//! on this closed structure.

use serde::{Deserialize, Serialize};

/// One structured query against the property graph: match entities of a
/// label, filter on properties, optionally traverse relations, optionally
/// aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQueryPlan {
    /// Entity label to match (e.g. "Customer").
    pub entity: String,
    #[serde(default)]
    pub filters: Vec<PropertyFilter>,
    /// Relation hops from the matched entity, applied in order.
    #[serde(default)]
    pub traversals: Vec<TraversalStep>,
    #[serde(default)]
    pub aggregate: Option<Aggregate>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyFilter {
    pub property: String,
    pub op: FilterOp,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversalStep {
    /// Relation type to follow (e.g. "subscribes_to").
    pub relation: String,
    #[serde(default)]
    pub direction: Direction,
    /// Label of the entity on the far end.
    pub target: String,
    /// Filters on the far-end entity.
    #[serde(default)]
    pub filters: Vec<PropertyFilter>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Out,
    In,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub function: AggregateFn,
    /// Property of the root entity the function applies to (count needs none).
    #[serde(default)]
    pub property: Option<String>,
    /// Root-entity property to group by.
    #[serde(default)]
    pub group_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFn {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFn {
    pub fn sql_name(&self) -> &'static str {
        match self {
            AggregateFn::Count => "COUNT",
            AggregateFn::Sum => "SUM",
            AggregateFn::Avg => "AVG",
            AggregateFn::Min => "MIN",
            AggregateFn::Max => "MAX",
        }
    }
}

/// Complexity indicator attached to a candidate, derived from the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanComplexity {
    pub uses_aggregation: bool,
    pub hop_depth: usize,
}

impl GraphQueryPlan {
    pub fn complexity(&self) -> PlanComplexity {
        PlanComplexity {
            uses_aggregation: self.aggregate.is_some(),
            hop_depth: self.traversals.len(),
        }
    }
}

/// One attempt at answering a question through the graph: the question, the
/// generated plan, and its complexity. Transient; discarded after synthesis.
#[derive(Debug, Clone)]
pub struct QueryPlanCandidate {
    pub question: String,
    pub plan: GraphQueryPlan,
    pub complexity: PlanComplexity,
}

impl QueryPlanCandidate {
    pub fn new(question: impl Into<String>, plan: GraphQueryPlan) -> Self {
        let complexity = plan.complexity();
        Self {
            question: question.into(),
            plan,
            complexity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plan_deserializes_with_defaults() {
        let plan: GraphQueryPlan = serde_json::from_str(r#"{"entity": "Customer"}"#).unwrap();
        assert_eq!(plan.entity, "Customer");
        assert!(plan.filters.is_empty());
        assert!(plan.traversals.is_empty());
        assert!(plan.aggregate.is_none());
        assert!(plan.limit.is_none());
    }

    #[test]
    fn test_plan_full_round_trip() {
        let plan: GraphQueryPlan = serde_json::from_value(json!({
            "entity": "Customer",
            "filters": [
                {"property": "subscription_value", "op": "gte", "value": 5000000}
            ],
            "traversals": [
                {"relation": "subscribes_to", "direction": "out", "target": "Product"}
            ],
            "aggregate": {"function": "count"},
            "limit": 10
        }))
        .unwrap();
        assert_eq!(plan.filters[0].op, FilterOp::Gte);
        assert_eq!(plan.traversals[0].direction, Direction::Out);
        assert_eq!(plan.aggregate.as_ref().unwrap().function, AggregateFn::Count);
        let complexity = plan.complexity();
        assert!(complexity.uses_aggregation);
        assert_eq!(complexity.hop_depth, 1);
    }

    #[test]
    fn test_direction_defaults_out() {
        let step: TraversalStep = serde_json::from_value(json!({
            "relation": "at_risk_of",
            "target": "Risk"
        }))
        .unwrap();
        assert_eq!(step.direction, Direction::Out);
    }

    #[test]
    fn test_candidate_derives_complexity() {
        let plan: GraphQueryPlan = serde_json::from_value(json!({
            "entity": "Customer",
            "traversals": [
                {"relation": "subscribes_to", "target": "Product"},
                {"relation": "includes", "target": "Feature"}
            ]
        }))
        .unwrap();
        let candidate = QueryPlanCandidate::new("q", plan);
        assert_eq!(candidate.complexity.hop_depth, 2);
        assert!(!candidate.complexity.uses_aggregation);
    }
}
