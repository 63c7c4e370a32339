//! Workflow engine.
//!
//! Runs one query through classify, expand, retrieve and a single strategy
//! stage, threading a [`PipelineState`] through every step. Each stage is
//! time-bounded, leaves a [`StageTrace`] and records failures instead of
//! propagating them: degraded stages continue, fatal provider errors end the
//! run with a deterministic message.

mod routing;
mod state;

pub use routing::{after_classify, after_expand, after_retrieve, strategy_for};
pub use state::{
    PipelineResult, PipelineState, ResponseKind, Stage, StageStatus, StageTrace,
    INSUFFICIENT_INFORMATION_MESSAGE, UNAVAILABLE_MESSAGE,
};

use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::error::{PipelineError, ProviderResult};
use crate::providers::{QueryClassifier, QueryExpander, ReasoningStrategies, SearchProvider};
use crate::retrieval::{RetrievalOutcome, RetrievalSettings, RetrievalStage};
use crate::types::{Classification, Query};
use state::{condense, serialize_for_log};

/// Characters of free text kept in condensed traces.
const TRACE_TEXT_CHARS: usize = 160;

/// Per-run workflow options.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowConfig {
    /// Attach stage traces to the result
    pub tracing: bool,
    /// Result cap when the query does not carry one
    pub max_fragments: usize,
    /// Upper bound for any single stage
    pub stage_timeout: Duration,
    /// Keep full stage payloads instead of condensed ones
    pub debug: bool,
    /// Run the expansion stage before retrieval
    pub expand_queries: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            tracing: true,
            max_fragments: 5,
            stage_timeout: Duration::from_secs(30),
            debug: false,
            expand_queries: true,
        }
    }
}

/// The external services a pipeline run calls.
#[derive(Clone)]
pub struct Collaborators {
    pub classifier: Arc<dyn QueryClassifier>,
    pub expander: Arc<dyn QueryExpander>,
    pub search: Arc<dyn SearchProvider>,
    pub reasoner: Arc<dyn ReasoningStrategies>,
}

/// Orchestrates pipeline runs. Cheap to clone; runs share the cache store.
#[derive(Clone)]
pub struct WorkflowEngine {
    classifier: Arc<dyn QueryClassifier>,
    expander: Arc<dyn QueryExpander>,
    reasoner: Arc<dyn ReasoningStrategies>,
    retrieval: RetrievalStage,
    cache: Arc<CacheStore>,
}

impl WorkflowEngine {
    pub fn new(
        collaborators: Collaborators,
        cache: Arc<CacheStore>,
        settings: RetrievalSettings,
    ) -> Self {
        let retrieval = RetrievalStage::new(collaborators.search, Arc::clone(&cache), settings);
        Self {
            classifier: collaborators.classifier,
            expander: collaborators.expander,
            reasoner: collaborators.reasoner,
            retrieval,
            cache,
        }
    }

    /// Replace the retrieval stage, e.g. to inject other relevance strategies.
    pub fn with_retrieval_stage(mut self, retrieval: RetrievalStage) -> Self {
        self.retrieval = retrieval;
        self
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Run one query to completion. Never fails: errors end up in the result.
    pub async fn run_pipeline(&self, query: Query, config: &WorkflowConfig) -> PipelineResult {
        let start = Instant::now();
        let mut state = PipelineState::new(query);

        info!(
            run_id = %state.run_id,
            session_id = %state.query.session_id,
            "Starting pipeline run"
        );

        let mut stage = Stage::Classify;
        loop {
            stage = match stage {
                Stage::Classify => {
                    self.classify(&mut state, config).await;
                    after_classify(&state, config)
                }
                Stage::Expand => {
                    self.expand(&mut state, config).await;
                    after_expand(&state)
                }
                Stage::Retrieve => {
                    self.retrieve(&mut state, config).await;
                    after_retrieve(&state)
                }
                Stage::Reason | Stage::Simulate | Stage::TemporalAnalyze | Stage::FallbackKnowledge => {
                    self.run_strategy(stage, &mut state, config).await;
                    Stage::Done
                }
                Stage::Done => break,
            };
        }

        if state.response().is_none() {
            state.set_response(
                INSUFFICIENT_INFORMATION_MESSAGE,
                ResponseKind::InsufficientInformation,
            );
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        if config.debug {
            debug!(run_id = %state.run_id, state = ?state, "Final pipeline state");
        }

        let result = state.into_result(config.tracing, duration_ms);
        match &result.error {
            Some(error) => warn!(
                run_id = %result.run_id,
                kind = %error.kind,
                duration_ms = duration_ms,
                "Pipeline run halted"
            ),
            None => info!(
                run_id = %result.run_id,
                response_kind = ?result.response_kind,
                sources = result.sources.len(),
                duration_ms = duration_ms,
                "Pipeline run completed"
            ),
        }
        result
    }

    async fn classify(&self, state: &mut PipelineState, config: &WorkflowConfig) {
        let trace = StageTrace::begin(
            Stage::Classify,
            json!({ "query": trace_text(&state.query.text, config) }),
        );

        let call = self.classifier.classify(&state.query);
        let (classification, error) = match bounded(Stage::Classify, config.stage_timeout, call).await {
            Ok(classification) => (Some(classification), None),
            Err(error) if error.is_fatal() => (None, Some(error)),
            Err(error) => {
                warn!(error = %error, "Classifier failed, using rule-based default");
                (Some(Classification::rule_based_default()), Some(error))
            }
        };

        let output = serialize_for_log(&classification, "classification");
        if let Some(error) = &error {
            state.halt(error.clone());
        }
        state.classification = classification;
        record(state, trace.finish(output, error));
    }

    async fn expand(&self, state: &mut PipelineState, config: &WorkflowConfig) {
        let session_id = state.query.session_id.clone();
        let text = state.query.text.clone();
        let scope = state.query.scope();
        let trace = StageTrace::begin(Stage::Expand, json!({ "query": trace_text(&text, config) }));

        if let Some(hit) = self.cache.expansion().lookup(&session_id, &text, &scope).await {
            let output = json!({
                "variants": hit.payload.iter().map(|v| v.text.clone()).collect::<Vec<_>>(),
                "cache_similarity": hit.similarity,
                "reuse_count": hit.reuse_count,
            });
            state.variants = hit.payload;
            state.expansion_cache_similarity = Some(hit.similarity);
            record(state, trace.finish(output, None));
            return;
        }

        let call = self.expander.expand(&state.query);
        match bounded(Stage::Expand, config.stage_timeout, call).await {
            Ok(variants) => {
                self.cache
                    .expansion()
                    .insert(&session_id, &text, &scope, variants.clone(), 1.0)
                    .await;
                let output = json!({
                    "variants": variants.iter().map(|v| v.text.clone()).collect::<Vec<_>>(),
                });
                state.variants = variants;
                record(state, trace.finish(output, None));
            }
            Err(error) => {
                if error.is_fatal() {
                    state.halt(error.clone());
                } else {
                    warn!(error = %error, "Expansion failed, searching with the original query only");
                }
                record(state, trace.finish(json!({ "variants": [] }), Some(error)));
            }
        }
    }

    async fn retrieve(&self, state: &mut PipelineState, config: &WorkflowConfig) {
        let category = state
            .classification
            .as_ref()
            .map(|c| c.category)
            .unwrap_or_else(|| Classification::rule_based_default().category);
        let max_fragments = state
            .query
            .max_results
            .unwrap_or(config.max_fragments)
            .max(1);

        let trace = StageTrace::begin(
            Stage::Retrieve,
            json!({
                "query": trace_text(&state.query.text, config),
                "variants": state.variants.len(),
                "category": category.as_str(),
                "max_fragments": max_fragments,
            }),
        );

        let run = self
            .retrieval
            .run(&state.query, &state.variants, category, max_fragments);
        match timeout(config.stage_timeout, run).await {
            Ok(outcome) => {
                let output = retrieval_output(&outcome, config);
                let error = outcome
                    .fatal
                    .clone()
                    .or_else(|| outcome.degraded.first().cloned());
                state.retrieval_cache_similarity = outcome.cache_similarity;
                match outcome.fatal {
                    Some(fatal) => state.halt(fatal),
                    None => state.fragments = outcome.fragments,
                }
                record(state, trace.finish(output, error));
            }
            Err(_) => {
                let error = timed_out(Stage::Retrieve, config.stage_timeout);
                warn!(error = %error, "Retrieval timed out, continuing without fragments");
                record(state, trace.finish(json!({ "fragments": 0 }), Some(error)));
            }
        }
    }

    async fn run_strategy(&self, stage: Stage, state: &mut PipelineState, config: &WorkflowConfig) {
        let Some(kind) = stage.response_kind() else {
            return;
        };
        let classification = state
            .classification
            .clone()
            .unwrap_or_else(Classification::rule_based_default);
        let trace = StageTrace::begin(
            stage,
            json!({
                "query": trace_text(&state.query.text, config),
                "category": classification.category.as_str(),
                "fragments": state.fragments.len(),
            }),
        );

        let query = &state.query;
        let fragments = state.fragments.as_slice();
        let call = match stage {
            Stage::Reason => self.reasoner.reason_factual(query, fragments, &classification),
            Stage::Simulate => self
                .reasoner
                .reason_counterfactual(query, fragments, &classification),
            Stage::TemporalAnalyze => self.reasoner.reason_temporal(query, fragments, &classification),
            _ => self.reasoner.reason_fallback_knowledge(query, &classification),
        };

        let outcome = match bounded(stage, config.stage_timeout, call).await {
            Ok(text) if text.trim().is_empty() => {
                Err(PipelineError::degraded(format!("{} returned an empty answer", stage)))
            }
            other => other,
        };

        match outcome {
            Ok(text) => {
                let output = json!({ "response": trace_text(&text, config) });
                state.set_response(text, kind);
                record(state, trace.finish(output, None));
            }
            Err(error) => {
                if error.is_fatal() {
                    state.halt(error.clone());
                } else {
                    warn!(stage = %stage, error = %error, "Strategy failed");
                    state.set_response(UNAVAILABLE_MESSAGE, ResponseKind::Unavailable);
                }
                record(state, trace.finish(serde_json::Value::Null, Some(error)));
            }
        }
    }
}

/// Await a collaborator call under the stage timeout, classifying any failure.
async fn bounded<T, F>(stage: Stage, limit: Duration, call: F) -> Result<T, PipelineError>
where
    F: Future<Output = ProviderResult<T>>,
{
    match timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(PipelineError::from_provider(&e)),
        Err(_) => Err(timed_out(stage, limit)),
    }
}

fn timed_out(stage: Stage, limit: Duration) -> PipelineError {
    PipelineError::degraded(format!("{} timed out after {}ms", stage, limit.as_millis()))
}

fn trace_text(text: &str, config: &WorkflowConfig) -> String {
    if config.debug {
        text.to_string()
    } else {
        condense(text, TRACE_TEXT_CHARS)
    }
}

fn retrieval_output(outcome: &RetrievalOutcome, config: &WorkflowConfig) -> serde_json::Value {
    if config.debug {
        return serialize_for_log(outcome, "retrieval_outcome");
    }
    json!({
        "fragments": outcome.fragments.iter().map(|f| f.id.clone()).collect::<Vec<_>>(),
        "threshold": outcome.threshold,
        "from_cache": outcome.from_cache(),
        "cache_stored": outcome.cache_stored,
        "branches": outcome.branches.len(),
        "failed_branches": outcome.branches.iter().filter(|b| b.error.is_some()).count(),
        "notes": outcome.notes,
    })
}

fn record(state: &mut PipelineState, trace: StageTrace) {
    match trace.status {
        StageStatus::Success => info!(
            run_id = %state.run_id,
            stage = %trace.stage,
            duration_ms = trace.duration_ms,
            "Stage completed"
        ),
        StageStatus::Degraded | StageStatus::Failed => warn!(
            run_id = %state.run_id,
            stage = %trace.stage,
            status = ?trace.status,
            duration_ms = trace.duration_ms,
            "Stage did not complete cleanly"
        ),
    }
    state.push_trace(trace);
}
