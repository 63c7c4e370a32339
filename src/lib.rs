//! # Langbase RAG Orchestrator
//!
//! A retrieval-and-orchestration pipeline that answers questions over indexed
//! documents by delegating classification, expansion, search and reasoning to
//! Langbase pipes and memories.
//!
//! ## Features
//!
//! - **Query Classification**: Factual, analytical, counterfactual or temporal routing
//! - **Query Expansion**: Diverse rephrasings searched in parallel
//! - **Similarity Caches**: Session-scoped reuse of expansions and retrieval results
//! - **Fan-out Search**: Bounded concurrency with per-branch timeouts and dedup
//! - **Relevance Filtering**: Statistical tier, content-aware tier and reranking
//! - **Score Normalization**: User-facing scores and adaptive internal thresholds
//! - **Error Classification**: Auth, quota and connection failures stop the run early
//!
//! ## Architecture
//!
//! ```text
//! Query → Classify → Expand → Retrieve → Reason | Simulate | TemporalAnalyze | FallbackKnowledge
//!                       ↓         ↓
//!                 Expansion   Retrieval
//!                   cache       cache
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use langbase_rag_orchestrator::{Config, CacheStore, Collaborators, Query, WorkflowEngine};
//! use langbase_rag_orchestrator::langbase::LangbaseClient;
//! use langbase_rag_orchestrator::providers::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let client = LangbaseClient::new(&config.langbase, config.request.clone())?;
//!     let collaborators = Collaborators {
//!         classifier: Arc::new(LangbaseClassifier::new(client.clone(), &config.pipes.classifier)),
//!         expander: Arc::new(LangbaseExpander::new(client.clone(), &config.pipes.expander)),
//!         search: Arc::new(LangbaseMemorySearch::new(client.clone(), config.memory.names.clone())),
//!         reasoner: Arc::new(LangbaseReasoner::new(client, config.pipes.clone())),
//!     };
//!     let engine = WorkflowEngine::new(collaborators, Arc::new(CacheStore::default()), config.retrieval);
//!     let result = engine
//!         .run_pipeline(Query::new("What is the refund policy?", "session-1"), &config.workflow)
//!         .await;
//!     println!("{}", result.response);
//!     Ok(())
//! }
//! ```

/// Similarity caches for expansions and retrieval results.
pub mod cache;
/// Command-line interface.
pub mod cli;
/// Configuration management.
pub mod config;
/// Error types, failure classification and result aliases.
pub mod error;
/// Langbase API client and types for pipe and memory communication.
pub mod langbase;
/// System prompts for Langbase pipes.
pub mod prompts;
/// Collaborator traits and their Langbase-backed implementations.
pub mod providers;
/// Fan-out search, relevance filtering and score normalization.
pub mod retrieval;
/// Records shared across the pipeline.
pub mod types;
/// Stage orchestration, routing and traces.
pub mod workflow;

pub use cache::CacheStore;
pub use config::Config;
pub use error::{AppError, AppResult, ErrorKind, PipelineError};
pub use types::{Classification, Fragment, Query, QueryCategory, QueryVariant};
pub use workflow::{Collaborators, PipelineResult, ResponseKind, WorkflowConfig, WorkflowEngine};
