use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{
    CreatePipeRequest, CreatePipeResponse, MemoryChunk, MemoryRetrieveRequest, Message,
    PipeRequest, PipeResponse,
};
use crate::config::{LangbaseConfig, RequestConfig};
use crate::error::{LangbaseError, LangbaseResult};

/// Client for the Langbase pipes and memory APIs.
///
/// Retries with exponential backoff live here; the pipeline itself never retries.
#[derive(Clone)]
pub struct LangbaseClient {
    client: Client,
    base_url: String,
    api_key: String,
    request_config: RequestConfig,
}

impl LangbaseClient {
    /// Create a new Langbase client
    pub fn new(config: &LangbaseConfig, request_config: RequestConfig) -> LangbaseResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(LangbaseError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_config,
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run a pipe and return its completion
    pub async fn call_pipe(&self, request: PipeRequest) -> LangbaseResult<PipeResponse> {
        let url = format!("{}/v1/pipes/run", self.base_url);
        debug!(
            pipe = %request.name,
            messages = request.messages.len(),
            "Calling Langbase pipe"
        );
        let response: PipeResponse = self.post_with_retries(&request.name, &url, &request).await?;
        if let Some(usage) = response.usage() {
            debug!(
                pipe = %request.name,
                model = response.model().unwrap_or("unknown"),
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "Pipe token usage"
            );
        }
        Ok(response)
    }

    /// Search memories for chunks similar to the query
    pub async fn retrieve_memory(
        &self,
        request: MemoryRetrieveRequest,
    ) -> LangbaseResult<Vec<MemoryChunk>> {
        let url = format!("{}/v1/memory/retrieve", self.base_url);
        debug!(
            memories = request.memory.len(),
            top_k = request.top_k,
            "Retrieving from Langbase memory"
        );
        self.post_with_retries("memory.retrieve", &url, &request)
            .await
    }

    async fn post_with_retries<B, R>(&self, operation: &str, url: &str, body: &B) -> LangbaseResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay = Duration::from_millis(
                    self.request_config.retry_delay_ms * (2_u64.pow(retries - 1)),
                );
                warn!(
                    operation = %operation,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying Langbase request"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();

            match self.execute_request(url, body).await {
                Ok(response) => {
                    info!(
                        operation = %operation,
                        latency_ms = start.elapsed().as_millis(),
                        "Langbase call succeeded"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    error!(
                        operation = %operation,
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = retries,
                        "Langbase call failed"
                    );
                    if !is_retryable(&e) {
                        return Err(e);
                    }
                    last_error = Some(e);
                    retries += 1;
                }
            }
        }

        Err(LangbaseError::Unavailable {
            message: last_error
                .map(|e| describe_failure(&e))
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries,
        })
    }

    /// Execute a single request (internal)
    async fn execute_request<B, R>(&self, url: &str, body: &B) -> LangbaseResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LangbaseError::Timeout {
                        timeout_ms: self.request_config.timeout_ms,
                    }
                } else {
                    LangbaseError::Http(e)
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(LangbaseError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| LangbaseError::InvalidResponse {
                message: format!("Failed to parse response: {}", e),
            })
    }

    /// Create a new pipe
    pub async fn create_pipe(
        &self,
        request: CreatePipeRequest,
    ) -> LangbaseResult<CreatePipeResponse> {
        let url = format!("{}/v1/pipes", self.base_url);

        info!(pipe = %request.name, "Creating Langbase pipe");

        let response: CreatePipeResponse = self.execute_request(&url, &request).await?;

        info!(
            pipe = %response.name,
            url = response.url.as_deref().unwrap_or(""),
            "Pipe ready"
        );

        Ok(response)
    }

    /// Ensure a JSON-output pipe exists with the given system prompt.
    ///
    /// Uses upsert, so an existing pipe is updated in place; a 409 from older
    /// API versions is treated as success.
    pub async fn ensure_pipe(
        &self,
        pipe_name: &str,
        description: &str,
        system_prompt: &str,
    ) -> LangbaseResult<()> {
        let request = CreatePipeRequest::new(pipe_name)
            .with_description(description)
            .with_model("openai:gpt-4o-mini")
            .with_upsert(true)
            .with_json_output(true)
            .with_temperature(0.3)
            .with_max_tokens(1000)
            .with_messages(vec![Message::system(system_prompt)]);

        match self.create_pipe(request).await {
            Ok(_) => Ok(()),
            Err(LangbaseError::Api { status: 409, .. }) => {
                info!(pipe = %pipe_name, "Pipe already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Credential and quota failures will not improve on retry, nor will other
/// client errors apart from request timeouts and rate limiting.
fn is_retryable(error: &LangbaseError) -> bool {
    match error {
        LangbaseError::Api { status, .. } => {
            let status = StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            status.is_server_error()
                || status == StatusCode::REQUEST_TIMEOUT
                || status == StatusCode::TOO_MANY_REQUESTS
        }
        LangbaseError::InvalidResponse { .. } => false,
        _ => true,
    }
}

/// Keep the failure signal intact once retries are exhausted.
fn describe_failure(error: &LangbaseError) -> String {
    match error {
        LangbaseError::Http(e) if e.is_connect() => format!("connection failed: {}", e),
        other => other.to_string(),
    }
}
