//! The tool-selecting agent: one question-answering session as a state
//! machine over planning, parallel tool execution, failure recovery, and
//! answer synthesis.
//!
//! Session flow: Received -> Planning -> Executing (-> Simplifying ->
//! Executing) -> Synthesizing -> Done, or Failed only when a service error
//! leaves nothing to answer from. Timeouts abort in-flight tools and carry
//! whatever completed into synthesis.

pub mod planner;
pub mod simplify;
pub mod synthesize;

pub use planner::ToolStats;

use crate::config::Config;
use crate::embeddings::{EmbeddingCache, EmbeddingModel, OpenAiEmbedder};
use crate::error::{RagentError, Result};
use crate::generator::{self, Generation};
use crate::llm::{CompletionModel, OpenAiChatModel};
use crate::schema::{self, SchemaContext, SchemaProvider};
use crate::store::{audit, Store};
use crate::tools::{
    graph, hybrid, vector, RetrievalFailure, RetrievalResult, RetrievedItem,
    ToolInvocationRecord, ToolKind,
};
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// The simplifier is bounded by its strictly ordered steps; this guard
/// enforces the bound even if a step fails to reduce the plan.
const MAX_SIMPLIFY_INVOCATIONS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Received,
    Planning,
    Executing,
    Simplifying,
    Synthesizing,
    Done,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Received => "received",
            SessionState::Planning => "planning",
            SessionState::Executing => "executing",
            SessionState::Simplifying => "simplifying",
            SessionState::Synthesizing => "synthesizing",
            SessionState::Done => "done",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

fn transition(state: &mut SessionState, to: SessionState) {
    log::debug!("session state: {} -> {}", state, to);
    *state = to;
}

/// One prior question/answer turn, supplied by the conversation owner.
#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

/// Prior turns for conversational context. Owned by the caller (e.g. the
/// HTTP layer's session map); the agent holds no session state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversationContext {
    pub turns: Vec<Turn>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerMetadata {
    /// Tool names actually invoked, joined with '+'.
    pub search_type: String,
    pub elapsed_ms: u64,
    pub simplification_steps: usize,
    pub timed_out: bool,
}

/// The agent's public answer contract.
#[derive(Debug, Clone, Serialize)]
pub struct AgentAnswer {
    pub answer: String,
    pub tools_used: Vec<ToolInvocationRecord>,
    /// True iff at least one tool invocation returned at least one
    /// store-backed item.
    pub grounded: bool,
    pub metadata: AnswerMetadata,
}

/// Runtime options distilled from [`Config`].
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub default_k: usize,
    pub min_score: f32,
    pub vector_weight: f32,
    pub keyword_weight: f32,
    pub session_timeout: Duration,
    pub disabled_tools: Vec<ToolKind>,
}

impl AgentOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_k: config.search.default_k,
            min_score: config.search.min_score,
            vector_weight: config.search.hybrid_vector_weight,
            keyword_weight: config.search.hybrid_keyword_weight,
            session_timeout: Duration::from_millis(config.agent.session_timeout_ms),
            disabled_tools: config
                .agent
                .disabled_tools
                .iter()
                .filter_map(|name| ToolKind::parse(name))
                .collect(),
        }
    }
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            default_k: 5,
            min_score: 0.0,
            vector_weight: 0.7,
            keyword_weight: 0.3,
            session_timeout: Duration::from_secs(30),
            disabled_tools: Vec::new(),
        }
    }
}

/// The orchestration core. Read-only against the store; safe to share
/// across concurrent sessions.
pub struct Agent {
    store: Arc<Store>,
    schema: Arc<SchemaProvider>,
    model: Arc<dyn CompletionModel>,
    embedder: Arc<dyn EmbeddingModel>,
    options: AgentOptions,
    stats: ToolStats,
}

struct GraphOutcome {
    records: Vec<ToolInvocationRecord>,
    items: Vec<RetrievedItem>,
    needs_fallback: bool,
    simplify_steps: usize,
    error: Option<RagentError>,
}

enum TaskOutput {
    Flat {
        tool: ToolKind,
        args: serde_json::Value,
        result: Result<RetrievalResult>,
    },
    Graph(GraphOutcome),
}

impl Agent {
    pub fn new(
        store: Arc<Store>,
        schema: Arc<SchemaProvider>,
        model: Arc<dyn CompletionModel>,
        embedder: Arc<dyn EmbeddingModel>,
        options: AgentOptions,
    ) -> Self {
        Self {
            store,
            schema,
            model,
            embedder,
            options,
            stats: ToolStats::new(),
        }
    }

    /// Wire up the agent with the real model, embedder, and schema provider
    /// from configuration.
    pub fn from_config(config: &Config, store: Arc<Store>) -> Result<Self> {
        let model_key = std::env::var(&config.model.api_key_env).map_err(|_| {
            RagentError::Config(format!(
                "Environment variable {} not set",
                config.model.api_key_env
            ))
        })?;
        let embed_key = std::env::var(&config.embeddings.api_key_env).map_err(|_| {
            RagentError::Config(format!(
                "Environment variable {} not set",
                config.embeddings.api_key_env
            ))
        })?;

        let model = Arc::new(OpenAiChatModel::new(
            config.model.api_base.clone(),
            model_key,
            config.model.model.clone(),
            config.model.max_output_tokens,
            config.model.temperature,
        ));

        let cache = (config.embeddings.cache_capacity > 0)
            .then(|| Arc::new(EmbeddingCache::new(config.embeddings.cache_capacity)));
        let embedder = Arc::new(OpenAiEmbedder::new_with_cache(
            embed_key,
            config.embeddings.model.clone(),
            config.embeddings.dimensions,
            config.embeddings.batch_size,
            cache,
        ));

        let examples = match &config.agent.examples_path {
            Some(path) => schema::load_examples(path)?,
            None => schema::default_examples(),
        };
        let schema = Arc::new(SchemaProvider::new(
            store.clone(),
            Duration::from_secs(config.agent.schema_ttl_seconds),
            examples,
        ));

        Ok(Agent::new(
            store,
            schema,
            model,
            embedder,
            AgentOptions::from_config(config),
        ))
    }

    /// Re-introspect the store's schema now (e.g. after an ingestion run),
    /// without restarting the agent.
    pub async fn refresh_schema(&self) -> Result<()> {
        self.schema.refresh().await.map(|_| ())
    }

    fn enabled_tools(&self) -> Vec<ToolKind> {
        ToolKind::ALL
            .into_iter()
            .filter(|tool| !self.options.disabled_tools.contains(tool))
            .collect()
    }

    /// Answer one question. Returns `Err` only for invalid input or a
    /// service failure (store/model unreachable) that left nothing to
    /// answer from; everything else is a successful response, grounded or
    /// not.
    pub async fn answer(
        &self,
        question: &str,
        session: Option<&ConversationContext>,
    ) -> Result<AgentAnswer> {
        let started = std::time::Instant::now();
        let mut state = SessionState::Received;

        if question.trim().is_empty() {
            return Err(RagentError::InvalidInput(
                "question must be non-empty".to_string(),
            ));
        }

        transition(&mut state, SessionState::Planning);
        let context = self.schema.context().await?;
        if context.stale {
            log::warn!("Answering with stale schema context");
        }

        let enabled = self.enabled_tools();
        let selected = planner::plan_tools(question, &enabled, &self.stats);
        log::info!(
            "Planned tools for question: {:?}",
            selected.iter().map(|t| t.name()).collect::<Vec<_>>()
        );

        if selected.is_empty() {
            transition(&mut state, SessionState::Synthesizing);
            let answer = AgentAnswer {
                answer: synthesize::ungrounded_answer(),
                grounded: false,
                metadata: AnswerMetadata {
                    search_type: "none".to_string(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    simplification_steps: 0,
                    timed_out: false,
                },
                tools_used: Vec::new(),
            };
            self.audit(question, &answer.tools_used, false, started).await;
            transition(&mut state, SessionState::Done);
            return Ok(answer);
        }

        transition(&mut state, SessionState::Executing);
        let deadline = Instant::now() + self.options.session_timeout;

        let mut join_set: JoinSet<TaskOutput> = JoinSet::new();
        for tool in &selected {
            match tool {
                ToolKind::GraphQuery => {
                    let store = self.store.clone();
                    let model = self.model.clone();
                    let context = context.clone();
                    let question = question.to_string();
                    let default_k = self.options.default_k;
                    join_set.spawn(async move {
                        TaskOutput::Graph(
                            run_graph_pipeline(store, context, model, question, default_k).await,
                        )
                    });
                }
                flat => {
                    let tool = *flat;
                    let store = self.store.clone();
                    let embedder = self.embedder.clone();
                    let question = question.to_string();
                    let options = self.options.clone();
                    join_set.spawn(async move {
                        run_flat_tool(tool, store, embedder, question, options).await
                    });
                }
            }
        }

        let mut records: Vec<ToolInvocationRecord> = Vec::new();
        let mut collected: Vec<(ToolKind, Vec<RetrievedItem>)> = Vec::new();
        let mut simplification_steps = 0usize;
        let mut needs_fallback = false;
        let mut timed_out = false;
        let mut service_error: Option<RagentError> = None;

        loop {
            match tokio::time::timeout_at(deadline, join_set.join_next()).await {
                Err(_) => {
                    log::warn!(
                        "Session deadline reached with {} tool(s) still running; aborting them",
                        join_set.len()
                    );
                    timed_out = true;
                    join_set.abort_all();
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(join_err))) => {
                    if !join_err.is_cancelled() {
                        service_error =
                            Some(RagentError::Store(format!("tool task failed: {}", join_err)));
                    }
                }
                Ok(Some(Ok(TaskOutput::Flat { tool, args, result }))) => match result {
                    Ok(result) => {
                        records.push(ToolInvocationRecord::from_result(tool, args, &result));
                        if !result.items.is_empty() {
                            collected.push((tool, result.items));
                        }
                    }
                    Err(e) => {
                        records.push(ToolInvocationRecord {
                            tool,
                            args,
                            result_summary: e.to_string(),
                            item_count: 0,
                            succeeded: false,
                        });
                        service_error = Some(e);
                    }
                },
                Ok(Some(Ok(TaskOutput::Graph(outcome)))) => {
                    records.extend(outcome.records);
                    simplification_steps = outcome.simplify_steps;
                    needs_fallback |= outcome.needs_fallback;
                    if let Some(e) = outcome.error {
                        service_error = Some(e);
                    }
                    if !outcome.items.is_empty() {
                        collected.push((ToolKind::GraphQuery, outcome.items));
                    }
                }
            }
        }

        // Structured querying exhausted: fall back to semantic retrieval if
        // an unused tool and time remain.
        if needs_fallback && !timed_out {
            transition(&mut state, SessionState::Simplifying);
            let already: HashSet<ToolKind> = records.iter().map(|r| r.tool).collect();
            let fallback = [ToolKind::VectorSearch, ToolKind::HybridSearch]
                .into_iter()
                .find(|tool| enabled.contains(tool) && !already.contains(tool));

            if let Some(tool) = fallback {
                transition(&mut state, SessionState::Executing);
                let run = run_flat_tool(
                    tool,
                    self.store.clone(),
                    self.embedder.clone(),
                    question.to_string(),
                    self.options.clone(),
                );
                match tokio::time::timeout_at(deadline, run).await {
                    Err(_) => {
                        log::warn!("Fallback {} timed out", tool);
                        timed_out = true;
                    }
                    Ok(TaskOutput::Flat { tool, args, result }) => match result {
                        Ok(result) => {
                            records.push(ToolInvocationRecord::from_result(tool, args, &result));
                            if !result.items.is_empty() {
                                collected.push((tool, result.items));
                            }
                        }
                        Err(e) => {
                            records.push(ToolInvocationRecord {
                                tool,
                                args,
                                result_summary: e.to_string(),
                                item_count: 0,
                                succeeded: false,
                            });
                            service_error = Some(e);
                        }
                    },
                    Ok(TaskOutput::Graph(_)) => unreachable!("fallback tools are flat"),
                }
            }
        }

        let grounded = !collected.is_empty();

        if let Some(e) = service_error {
            if grounded {
                // Partial service failure with usable data: answer from
                // what we have
                log::warn!("Continuing with partial results after service error: {}", e);
            } else {
                transition(&mut state, SessionState::Failed);
                self.audit(question, &records, false, started).await;
                return Err(e);
            }
        }

        for record in &records {
            self.stats.record(record.tool, record.item_count > 0);
        }

        transition(&mut state, SessionState::Synthesizing);
        let answer_text = if grounded {
            synthesize::answer(self.model.as_ref(), question, &collected, session).await?
        } else {
            synthesize::ungrounded_answer()
        };

        let answer = AgentAnswer {
            answer: answer_text,
            grounded,
            metadata: AnswerMetadata {
                search_type: search_type(&records),
                elapsed_ms: started.elapsed().as_millis() as u64,
                simplification_steps,
                timed_out,
            },
            tools_used: records,
        };

        self.audit(question, &answer.tools_used, grounded, started).await;
        transition(&mut state, SessionState::Done);
        Ok(answer)
    }

    async fn audit(
        &self,
        question: &str,
        records: &[ToolInvocationRecord],
        grounded: bool,
        started: std::time::Instant,
    ) {
        let tools_json = serde_json::to_string(records).unwrap_or_else(|_| "[]".to_string());
        if let Err(e) = audit::log_session(
            &self.store,
            question,
            &tools_json,
            grounded,
            started.elapsed().as_millis() as i64,
        )
        .await
        {
            log::warn!("Session audit failed: {}", e);
        }
    }
}

fn search_type(records: &[ToolInvocationRecord]) -> String {
    let mut seen = Vec::new();
    for record in records {
        if !seen.contains(&record.tool) {
            seen.push(record.tool);
        }
    }
    if seen.is_empty() {
        "none".to_string()
    } else {
        seen.iter()
            .map(|t| t.name())
            .collect::<Vec<_>>()
            .join("+")
    }
}

/// Vector or hybrid invocation as one task.
async fn run_flat_tool(
    tool: ToolKind,
    store: Arc<Store>,
    embedder: Arc<dyn EmbeddingModel>,
    question: String,
    options: AgentOptions,
) -> TaskOutput {
    match tool {
        ToolKind::VectorSearch => {
            let args = json!({
                "query": question,
                "k": options.default_k,
                "min_score": options.min_score,
            });
            let result = vector::retrieve(
                &store,
                embedder.as_ref(),
                &question,
                None,
                options.default_k,
                options.min_score,
            )
            .await;
            TaskOutput::Flat { tool, args, result }
        }
        ToolKind::HybridSearch => {
            let args = json!({
                "query": question,
                "k": options.default_k,
                "min_score": options.min_score,
                "vector_weight": options.vector_weight,
                "keyword_weight": options.keyword_weight,
            });
            let result = hybrid::retrieve(
                &store,
                embedder.as_ref(),
                &question,
                None,
                options.default_k,
                options.min_score,
                options.vector_weight,
                options.keyword_weight,
            )
            .await;
            TaskOutput::Flat { tool, args, result }
        }
        ToolKind::GraphQuery => unreachable!("graph queries run through the generation pipeline"),
    }
}

/// The structured-query pipeline: generate a plan, execute it, simplify on
/// failure, and signal fallback when structured querying is exhausted.
async fn run_graph_pipeline(
    store: Arc<Store>,
    context: SchemaContext,
    model: Arc<dyn CompletionModel>,
    question: String,
    default_k: usize,
) -> GraphOutcome {
    let mut records = Vec::new();
    let mut simplify_steps = 0usize;

    let generation = match generator::generate(&question, &context, model.as_ref()).await {
        Ok(generation) => generation,
        Err(e) => {
            return GraphOutcome {
                records,
                items: Vec::new(),
                needs_fallback: false,
                simplify_steps,
                error: Some(e),
            }
        }
    };

    let mut candidate = match generation {
        Generation::Failed { reason } => {
            let result =
                RetrievalResult::failed(RetrievalFailure::GenerationFailed(reason));
            records.push(ToolInvocationRecord::from_result(
                ToolKind::GraphQuery,
                json!({"question": question}),
                &result,
            ));
            return GraphOutcome {
                records,
                items: Vec::new(),
                needs_fallback: true,
                simplify_steps,
                error: None,
            };
        }
        Generation::Plan(candidate) => candidate,
    };

    loop {
        let result = match graph::retrieve(&store, &context, &candidate, default_k).await {
            Ok(result) => result,
            Err(e) => {
                return GraphOutcome {
                    records,
                    items: Vec::new(),
                    needs_fallback: false,
                    simplify_steps,
                    error: Some(e),
                }
            }
        };

        let args = json!({
            "plan": candidate.plan,
            "uses_aggregation": candidate.complexity.uses_aggregation,
            "hop_depth": candidate.complexity.hop_depth,
        });
        records.push(ToolInvocationRecord::from_result(
            ToolKind::GraphQuery,
            args,
            &result,
        ));

        match result.error {
            None => {
                return GraphOutcome {
                    records,
                    items: result.items,
                    needs_fallback: false,
                    simplify_steps,
                    error: None,
                }
            }
            Some(failure) => {
                if simplify_steps >= MAX_SIMPLIFY_INVOCATIONS {
                    return GraphOutcome {
                        records,
                        items: Vec::new(),
                        needs_fallback: true,
                        simplify_steps,
                        error: None,
                    };
                }
                simplify_steps += 1;
                match simplify::simplify(&candidate, &failure.to_string()) {
                    simplify::Simplification::Simplified(next) => {
                        log::debug!("session state: executing -> simplifying -> executing");
                        candidate = next;
                    }
                    simplify::Simplification::FallBack => {
                        return GraphOutcome {
                            records,
                            items: Vec::new(),
                            needs_fallback: true,
                            simplify_steps,
                            error: None,
                        }
                    }
                }
            }
        }
    }
}
