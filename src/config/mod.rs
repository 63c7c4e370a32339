use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::CachePolicy;
use crate::error::AppError;
use crate::retrieval::RetrievalSettings;
use crate::workflow::WorkflowConfig;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub langbase: LangbaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub pipes: PipeConfig,
    pub memory: MemoryConfig,
    pub cache: CacheConfig,
    pub retrieval: RetrievalSettings,
    pub workflow: WorkflowConfig,
}

/// Langbase API configuration
#[derive(Debug, Clone)]
pub struct LangbaseConfig {
    pub api_key: String,
    pub base_url: String,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Langbase pipe name configuration
#[derive(Debug, Clone)]
pub struct PipeConfig {
    pub classifier: String,
    pub expander: String,
    pub factual: String,
    pub counterfactual: String,
    pub temporal: String,
    pub fallback: String,
}

/// Langbase memories searched during retrieval
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub names: Vec<String>,
}

/// Similarity cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub expansion: CachePolicy,
    pub retrieval: CachePolicy,
    pub sweep_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let langbase = LangbaseConfig {
            api_key: env::var("LANGBASE_API_KEY").map_err(|_| AppError::Config {
                message: "LANGBASE_API_KEY is required".to_string(),
            })?,
            base_url: env::var("LANGBASE_BASE_URL")
                .unwrap_or_else(|_| "https://api.langbase.com".to_string()),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: env_parse("REQUEST_TIMEOUT_MS", 30000),
            max_retries: env_parse("MAX_RETRIES", 3),
            retry_delay_ms: env_parse("RETRY_DELAY_MS", 1000),
        };

        let pipes = PipeConfig {
            classifier: env::var("PIPE_CLASSIFIER")
                .unwrap_or_else(|_| "query-classifier-v1".to_string()),
            expander: env::var("PIPE_EXPANDER").unwrap_or_else(|_| "query-expander-v1".to_string()),
            factual: env::var("PIPE_FACTUAL").unwrap_or_else(|_| "factual-reasoning-v1".to_string()),
            counterfactual: env::var("PIPE_COUNTERFACTUAL")
                .unwrap_or_else(|_| "counterfactual-simulation-v1".to_string()),
            temporal: env::var("PIPE_TEMPORAL")
                .unwrap_or_else(|_| "temporal-analysis-v1".to_string()),
            fallback: env::var("PIPE_FALLBACK")
                .unwrap_or_else(|_| "fallback-knowledge-v1".to_string()),
        };

        let memory = MemoryConfig {
            names: env::var("LANGBASE_MEMORIES")
                .unwrap_or_else(|_| "documents".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        };

        let mut expansion = CachePolicy::expansion();
        expansion.ttl = Duration::from_secs(env_parse(
            "EXPANSION_CACHE_TTL_SECS",
            expansion.ttl.as_secs(),
        ));
        expansion.max_entries_per_session =
            env_parse("EXPANSION_CACHE_MAX_ENTRIES", expansion.max_entries_per_session);

        let mut retrieval_cache = CachePolicy::retrieval();
        retrieval_cache.ttl = Duration::from_secs(env_parse(
            "RETRIEVAL_CACHE_TTL_SECS",
            retrieval_cache.ttl.as_secs(),
        ));
        retrieval_cache.max_entries_per_session = env_parse(
            "RETRIEVAL_CACHE_MAX_ENTRIES",
            retrieval_cache.max_entries_per_session,
        );

        let cache = CacheConfig {
            expansion,
            retrieval: retrieval_cache,
            sweep_interval: Duration::from_secs(env_parse("CACHE_SWEEP_INTERVAL_SECS", 600)),
        };

        let mut retrieval = RetrievalSettings::default();
        retrieval.default_min_match = env_parse("DEFAULT_MIN_MATCH", retrieval.default_min_match);

        let defaults = WorkflowConfig::default();
        let workflow = WorkflowConfig {
            tracing: env_parse("WORKFLOW_TRACING", defaults.tracing),
            max_fragments: env_parse("WORKFLOW_MAX_FRAGMENTS", defaults.max_fragments),
            stage_timeout: Duration::from_millis(env_parse(
                "WORKFLOW_STAGE_TIMEOUT_MS",
                defaults.stage_timeout.as_millis() as u64,
            )),
            debug: env_parse("WORKFLOW_DEBUG", defaults.debug),
            expand_queries: env_parse("WORKFLOW_EXPAND_QUERIES", defaults.expand_queries),
        };

        if workflow.max_fragments == 0 {
            return Err(AppError::Config {
                message: "WORKFLOW_MAX_FRAGMENTS must be at least 1".to_string(),
            });
        }

        Ok(Config {
            langbase,
            logging,
            request,
            pipes,
            memory,
            cache,
            retrieval,
            workflow,
        })
    }
}

/// Parse an environment variable, falling back to `default` when unset or malformed.
fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            classifier: "query-classifier-v1".to_string(),
            expander: "query-expander-v1".to_string(),
            factual: "factual-reasoning-v1".to_string(),
            counterfactual: "counterfactual-simulation-v1".to_string(),
            temporal: "temporal-analysis-v1".to_string(),
            fallback: "fallback-knowledge-v1".to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expansion: CachePolicy::expansion(),
            retrieval: CachePolicy::retrieval(),
            sweep_interval: Duration::from_secs(600),
        }
    }
}
