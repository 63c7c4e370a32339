use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use langbase_rag_orchestrator::{
    cache::CacheStore,
    cli::{execute_command, Cli},
    config::{Config, LogFormat},
    langbase::LangbaseClient,
    providers::{LangbaseClassifier, LangbaseExpander, LangbaseMemorySearch, LangbaseReasoner},
    workflow::{Collaborators, WorkflowEngine},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Langbase RAG orchestrator starting..."
    );

    let langbase = match LangbaseClient::new(&config.langbase, config.request.clone()) {
        Ok(c) => {
            info!(base_url = %config.langbase.base_url, "Langbase client initialized");
            c
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize Langbase client");
            return Err(e.into());
        }
    };

    let classifier = LangbaseClassifier::new(langbase.clone(), &config.pipes.classifier);
    let expander = LangbaseExpander::new(langbase.clone(), &config.pipes.expander);

    // Ensure the pipes we own exist (create if needed)
    info!("Ensuring classifier and expander pipes exist...");
    if let Err(e) = classifier.ensure_pipe().await {
        error!(error = %e, "Failed to ensure classifier pipe exists");
        return Err(e.into());
    }
    if let Err(e) = expander.ensure_pipe().await {
        error!(error = %e, "Failed to ensure expander pipe exists");
        return Err(e.into());
    }

    let cache = Arc::new(CacheStore::new(
        config.cache.expansion.clone(),
        config.cache.retrieval.clone(),
    ));
    let sweeper = cache.spawn_sweeper(config.cache.sweep_interval);

    let collaborators = Collaborators {
        classifier: Arc::new(classifier),
        expander: Arc::new(expander),
        search: Arc::new(LangbaseMemorySearch::new(
            langbase.clone(),
            config.memory.names.clone(),
        )),
        reasoner: Arc::new(LangbaseReasoner::new(langbase, config.pipes.clone())),
    };
    let engine = WorkflowEngine::new(collaborators, cache, config.retrieval.clone());

    let outcome = execute_command(cli.command, &engine, &config.workflow).await;
    sweeper.abort();

    println!("{}", outcome.message);
    if outcome.exit_code != 0 {
        std::process::exit(outcome.exit_code);
    }
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
