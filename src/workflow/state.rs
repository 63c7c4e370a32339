//! Per-run pipeline state, stage traces and the result returned to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::types::{Classification, Fragment, Query, QueryVariant};

/// Deterministic reply when retrieval found nothing and fallback is not allowed.
pub const INSUFFICIENT_INFORMATION_MESSAGE: &str = "I could not find information about this in the available documents, so I cannot answer it reliably. Try rephrasing the question or adding documents that cover it.";

/// Deterministic reply when the selected reasoning strategy failed.
pub const UNAVAILABLE_MESSAGE: &str =
    "An answer could not be generated right now. Please try again shortly.";

/// Pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Classify,
    Expand,
    Retrieve,
    Reason,
    Simulate,
    TemporalAnalyze,
    FallbackKnowledge,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Classify => "classify",
            Stage::Expand => "expand",
            Stage::Retrieve => "retrieve",
            Stage::Reason => "reason",
            Stage::Simulate => "simulate",
            Stage::TemporalAnalyze => "temporal_analyze",
            Stage::FallbackKnowledge => "fallback_knowledge",
            Stage::Done => "done",
        }
    }

    /// Terminal strategy stages that produce the response.
    pub fn is_strategy(&self) -> bool {
        matches!(
            self,
            Stage::Reason | Stage::Simulate | Stage::TemporalAnalyze | Stage::FallbackKnowledge
        )
    }

    /// Response kind produced by a strategy stage.
    pub fn response_kind(&self) -> Option<ResponseKind> {
        match self {
            Stage::Reason => Some(ResponseKind::Reasoned),
            Stage::Simulate => Some(ResponseKind::Simulated),
            Stage::TemporalAnalyze => Some(ResponseKind::TemporalAnalysis),
            Stage::FallbackKnowledge => Some(ResponseKind::FallbackKnowledge),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the terminal response was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Reasoned,
    Simulated,
    TemporalAnalysis,
    FallbackKnowledge,
    InsufficientInformation,
    Unavailable,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    /// Completed with reduced output
    Degraded,
    /// Hit a fatal error
    Failed,
}

/// Observability record for one stage execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTrace {
    pub stage: Stage,
    pub status: StageStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PipelineError>,
}

impl StageTrace {
    pub fn begin(stage: Stage, input: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            stage,
            status: StageStatus::Success,
            started_at: now,
            ended_at: now,
            duration_ms: 0,
            input,
            output: serde_json::Value::Null,
            error: None,
        }
    }

    /// Stamp the end time and attach output. Status follows the error, if any.
    pub fn finish(mut self, output: serde_json::Value, error: Option<PipelineError>) -> Self {
        self.ended_at = Utc::now();
        self.duration_ms = (self.ended_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64;
        self.output = output;
        self.status = match &error {
            None => StageStatus::Success,
            Some(e) if e.is_fatal() => StageStatus::Failed,
            Some(_) => StageStatus::Degraded,
        };
        self.error = error;
        self
    }
}

/// Serialize a value for a trace payload, recording the failure instead of
/// dropping the trace when serialization fails.
pub(crate) fn serialize_for_log<T: Serialize>(value: &T, context: &str) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        warn!(
            error = %e,
            context = %context,
            "Failed to serialize value for stage trace"
        );
        serde_json::json!({
            "serialization_error": e.to_string(),
            "context": context
        })
    })
}

/// Shorten text for condensed traces.
pub(crate) fn condense(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut short: String = text.chars().take(max_chars).collect();
    short.push_str("...");
    short
}

/// The single mutable record threaded through every stage of one run.
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub run_id: Uuid,
    pub query: Query,
    pub classification: Option<Classification>,
    pub variants: Vec<QueryVariant>,
    pub fragments: Vec<Fragment>,
    pub traces: Vec<StageTrace>,
    pub expansion_cache_similarity: Option<f64>,
    pub retrieval_cache_similarity: Option<f64>,
    error: Option<PipelineError>,
    response: Option<String>,
    response_kind: Option<ResponseKind>,
}

impl PipelineState {
    pub fn new(query: Query) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            query,
            classification: None,
            variants: Vec::new(),
            fragments: Vec::new(),
            traces: Vec::new(),
            expansion_cache_similarity: None,
            retrieval_cache_similarity: None,
            error: None,
            response: None,
            response_kind: None,
        }
    }

    pub fn error(&self) -> Option<&PipelineError> {
        self.error.as_ref()
    }

    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    pub fn response_kind(&self) -> Option<ResponseKind> {
        self.response_kind
    }

    /// True once a fatal error has been recorded.
    pub fn is_halted(&self) -> bool {
        self.error.as_ref().is_some_and(PipelineError::is_fatal)
    }

    /// Record a fatal error and its user-facing message. The first fatal error
    /// wins; non-fatal errors belong in stage traces and are ignored here.
    pub fn halt(&mut self, error: PipelineError) {
        if !error.is_fatal() {
            return;
        }
        if self.is_halted() {
            warn!(
                run_id = %self.run_id,
                ignored = %error,
                "Pipeline already halted, keeping first fatal error"
            );
            return;
        }
        self.response = Some(error.kind.user_message().to_string());
        self.response_kind = Some(ResponseKind::Error);
        self.error = Some(error);
    }

    /// Set the terminal response. Refused once the run has halted.
    pub fn set_response(&mut self, text: impl Into<String>, kind: ResponseKind) -> bool {
        if self.is_halted() {
            return false;
        }
        self.response = Some(text.into());
        self.response_kind = Some(kind);
        true
    }

    pub fn push_trace(&mut self, trace: StageTrace) {
        self.traces.push(trace);
    }

    /// Build the caller-facing result.
    pub fn into_result(self, include_traces: bool, duration_ms: u64) -> PipelineResult {
        PipelineResult {
            run_id: self.run_id,
            session_id: self.query.session_id,
            response: self.response.unwrap_or_default(),
            response_kind: self.response_kind.unwrap_or(ResponseKind::Error),
            sources: self.fragments,
            classification: self.classification,
            traces: if include_traces {
                self.traces
            } else {
                Vec::new()
            },
            error: self.error,
            expansion_cache_similarity: self.expansion_cache_similarity,
            retrieval_cache_similarity: self.retrieval_cache_similarity,
            duration_ms,
        }
    }
}

/// What a pipeline run returns to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub run_id: Uuid,
    pub session_id: String,
    pub response: String,
    pub response_kind: ResponseKind,
    /// Fragments the response was grounded on
    pub sources: Vec<Fragment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    /// Empty unless tracing is enabled
    #[serde(default)]
    pub traces: Vec<StageTrace>,
    /// Set when the run halted early
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PipelineError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expansion_cache_similarity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval_cache_similarity: Option<f64>,
    pub duration_ms: u64,
}

impl PipelineResult {
    /// Stages that left a trace, in execution order.
    pub fn traced_stages(&self) -> Vec<Stage> {
        self.traces.iter().map(|t| t.stage).collect()
    }
}
