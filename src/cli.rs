//! Command-line interface.
//!
//! `ask` runs a single question; `repl` reads one question per line from
//! stdin and keeps the session (and its caches) across questions.

use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;
use uuid::Uuid;

use crate::types::Query;
use crate::workflow::{PipelineResult, WorkflowConfig, WorkflowEngine};

/// Answer questions over your Langbase memories.
#[derive(Parser, Debug)]
#[command(name = "langbase-rag-orchestrator", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Answer one question and print the result as JSON
    Ask {
        /// The question to answer
        question: String,

        #[command(flatten)]
        options: RunOptions,
    },

    /// Interactive session: one question per line, `:stats`, `:clear` and `:quit`
    Repl {
        #[command(flatten)]
        options: RunOptions,
    },
}

/// Options shared by every command that runs the pipeline.
#[derive(Args, Debug, Clone, Default)]
pub struct RunOptions {
    /// Session id; a fresh one is generated when omitted
    #[arg(long)]
    pub session: Option<String>,

    /// Restrict retrieval to these document ids (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub documents: Vec<String>,

    /// Minimum match expectation, as a fraction (0.9) or percentage (90)
    #[arg(long)]
    pub min_match: Option<f64>,

    /// Maximum number of fragments to ground the answer on
    #[arg(long)]
    pub max_fragments: Option<usize>,

    /// Owner of the documents being searched
    #[arg(long)]
    pub user: Option<String>,

    /// Omit stage traces from the output
    #[arg(long)]
    pub no_trace: bool,

    /// Skip query expansion
    #[arg(long)]
    pub no_expand: bool,

    /// Keep full stage payloads in traces
    #[arg(long)]
    pub debug: bool,
}

impl RunOptions {
    /// Session id for this invocation.
    pub fn session_id(&self) -> String {
        self.session
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }

    /// Workflow options with command-line overrides applied.
    pub fn workflow(&self, base: &WorkflowConfig) -> WorkflowConfig {
        WorkflowConfig {
            tracing: base.tracing && !self.no_trace,
            expand_queries: base.expand_queries && !self.no_expand,
            debug: base.debug || self.debug,
            max_fragments: self.max_fragments.unwrap_or(base.max_fragments).max(1),
            stage_timeout: base.stage_timeout,
        }
    }

    /// Build a query for `text` in `session_id`.
    pub fn query(&self, text: &str, session_id: &str) -> Query {
        let mut query = Query::new(text.trim(), session_id);
        if !self.documents.is_empty() {
            query = query.with_documents(self.documents.clone());
        }
        if let Some(min_match) = self.min_match {
            query = query.with_min_match(min_match);
        }
        if let Some(max) = self.max_fragments {
            query = query.with_max_results(max);
        }
        if let Some(user) = &self.user {
            query = query.with_user(user.clone());
        }
        query
    }
}

/// Result of CLI command execution.
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Output message
    pub message: String,
}

impl CliResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

/// Execute a CLI command against a configured engine.
pub async fn execute_command(
    command: Commands,
    engine: &WorkflowEngine,
    defaults: &WorkflowConfig,
) -> CliResult {
    match command {
        Commands::Ask { question, options } => execute_ask(engine, defaults, &question, &options).await,
        Commands::Repl { options } => execute_repl(engine, defaults, &options).await,
    }
}

async fn execute_ask(
    engine: &WorkflowEngine,
    defaults: &WorkflowConfig,
    question: &str,
    options: &RunOptions,
) -> CliResult {
    if question.trim().is_empty() {
        return CliResult::error("Question must not be empty");
    }
    let session_id = options.session_id();
    let result = engine
        .run_pipeline(options.query(question, &session_id), &options.workflow(defaults))
        .await;
    render(&result)
}

async fn execute_repl(
    engine: &WorkflowEngine,
    defaults: &WorkflowConfig,
    options: &RunOptions,
) -> CliResult {
    let session_id = options.session_id();
    let config = options.workflow(defaults);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut failures = 0usize;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => return CliResult::error(format!("Failed to read stdin: {}", e)),
        };

        let output = match line.trim() {
            "" => continue,
            ":quit" | ":q" => break,
            ":stats" => match serde_json::to_string_pretty(&engine.cache().stats().await) {
                Ok(json) => json,
                Err(e) => format!("Failed to render cache stats: {}", e),
            },
            ":clear" => {
                let removed = engine.cache().clear_session(&session_id).await;
                format!("Cleared {} cached entries for session {}", removed, session_id)
            }
            question => {
                let result = engine
                    .run_pipeline(options.query(question, &session_id), &config)
                    .await;
                let rendered = render(&result);
                if rendered.exit_code != 0 {
                    failures += 1;
                }
                rendered.message
            }
        };

        if let Err(e) = stdout.write_all(format!("{}\n", output).as_bytes()).await {
            warn!(error = %e, "Failed to write to stdout");
            break;
        }
        let _ = stdout.flush().await;
    }

    CliResult::success(format!(
        "Session {} ended ({} halted runs)",
        session_id, failures
    ))
}

/// Pretty JSON for a result; a halted run exits non-zero.
fn render(result: &PipelineResult) -> CliResult {
    match serde_json::to_string_pretty(result) {
        Ok(json) if result.error.is_some() => CliResult::error(json),
        Ok(json) => CliResult::success(json),
        Err(e) => CliResult::error(format!("Failed to render result: {}", e)),
    }
}
