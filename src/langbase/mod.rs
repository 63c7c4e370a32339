//! Langbase HTTP client: pipe runs, pipe creation and memory retrieval.

mod client;
mod types;

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;

pub use client::LangbaseClient;
pub use types::{
    CreatePipeRequest, CreatePipeResponse, MemoryChunk, MemoryRef, MemoryRetrieveRequest, Message,
    MessageRole, PipeRequest, PipeResponse, RawResponse, Usage,
};

/// Extract JSON from a completion string, handling markdown code blocks.
///
/// Attempts extraction in this order:
/// 1. Raw JSON (fast path)
/// 2. A ```json fenced block
/// 3. Any ``` fenced block
pub(crate) fn extract_json_from_completion(completion: &str) -> Result<&str, String> {
    let trimmed = completion.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(trimmed);
    }

    let fenced = |marker: &str| {
        completion
            .split(marker)
            .nth(1)
            .and_then(|s| s.split("```").next())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    if completion.contains("```json") {
        return fenced("```json")
            .ok_or_else(|| "Found ```json block but content was empty or malformed".to_string());
    }
    if completion.contains("```") {
        return fenced("```")
            .ok_or_else(|| "Found ``` block but content was empty or malformed".to_string());
    }

    Err(format!(
        "No JSON found in completion. First 100 chars: '{}'",
        completion.chars().take(100).collect::<String>()
    ))
}
