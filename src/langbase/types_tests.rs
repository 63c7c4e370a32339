//! Unit tests for Langbase API types and completion parsing.

use super::*;
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn test_pipe_request_serialization() {
    let req = PipeRequest::new("query-classifier-v1", vec![Message::user("hello")])
        .with_variable("max_variants", "3");
    let value = serde_json::to_value(&req).unwrap();

    assert_eq!(value["name"], "query-classifier-v1");
    assert_eq!(value["stream"], false);
    assert_eq!(value["messages"][0]["role"], "user");
    assert_eq!(value["variables"]["max_variants"], "3");
}

#[test]
fn test_pipe_request_omits_empty_variables() {
    let req = PipeRequest::new("p", vec![Message::system("s")]);
    let value = serde_json::to_value(&req).unwrap();
    assert!(value.get("variables").is_none());
}

#[test]
fn test_pipe_response_deserialization() {
    let value = json!({
        "success": true,
        "completion": "{\"category\": \"factual\"}",
        "threadId": "t-1",
        "raw": {"model": "gpt-4o-mini", "usage": {"total_tokens": 42}}
    });
    let resp: PipeResponse = serde_json::from_value(value).unwrap();
    assert!(resp.success);
    assert_eq!(resp.thread_id.as_deref(), Some("t-1"));
    assert_eq!(resp.model(), Some("gpt-4o-mini"));
    let usage = resp.usage().unwrap();
    assert_eq!(usage.total_tokens, Some(42));
    assert_eq!(usage.prompt_tokens, None);
}

#[test]
fn test_pipe_response_without_raw_has_no_usage() {
    let resp: PipeResponse =
        serde_json::from_value(json!({"success": true, "completion": "ok"})).unwrap();
    assert!(resp.usage().is_none());
    assert!(resp.model().is_none());
}

#[test]
fn test_create_pipe_request_builder() {
    let req = CreatePipeRequest::new("query-expander-v1")
        .with_description("Query expansion")
        .with_model("openai:gpt-4o-mini")
        .with_upsert(true)
        .with_json_output(true)
        .with_temperature(0.3)
        .with_max_tokens(500)
        .with_messages(vec![Message::system("prompt")]);
    let value = serde_json::to_value(&req).unwrap();

    assert_eq!(value["upsert"], true);
    assert_eq!(value["json"], true);
    assert_eq!(value["max_tokens"], 500);
    assert_eq!(value["messages"][0]["role"], "system");
}

#[test]
fn test_memory_retrieve_request_shape() {
    let memories = vec!["docs".to_string(), "faq".to_string()];
    let req = MemoryRetrieveRequest::new("refund policy", &memories, 10)
        .with_in_filter("documentId", &["d1".to_string()]);
    let value = serde_json::to_value(&req).unwrap();

    assert_eq!(
        value,
        json!({
            "query": "refund policy",
            "memory": [{"name": "docs"}, {"name": "faq"}],
            "topK": 10,
            "filters": ["documentId", "In", ["d1"]]
        })
    );
}

#[test]
fn test_memory_chunk_rejects_unknown_shape() {
    let ok: Result<MemoryChunk, _> = serde_json::from_value(json!({
        "text": "Refunds within 30 days",
        "similarity": 0.82,
        "meta": {"documentId": "d1"}
    }));
    assert!(ok.is_ok());

    let unknown: Result<MemoryChunk, _> = serde_json::from_value(json!({
        "text": "x",
        "similarity": 0.5,
        "embedding": [0.1, 0.2]
    }));
    assert!(unknown.is_err());

    let missing: Result<MemoryChunk, _> = serde_json::from_value(json!({"text": "x"}));
    assert!(missing.is_err());
}

#[test]
fn test_extract_json_raw() {
    assert_eq!(extract_json_from_completion(" {\"a\": 1} ").unwrap(), "{\"a\": 1}");
    assert_eq!(extract_json_from_completion("[1,2]").unwrap(), "[1,2]");
}

#[test]
fn test_extract_json_fenced() {
    let completion = "Here you go:\n```json\n{\"variants\": []}\n```\nDone.";
    assert_eq!(
        extract_json_from_completion(completion).unwrap(),
        "{\"variants\": []}"
    );

    let plain_fence = "```\n{\"x\": true}\n```";
    assert_eq!(extract_json_from_completion(plain_fence).unwrap(), "{\"x\": true}");
}

#[test]
fn test_extract_json_missing() {
    let err = extract_json_from_completion("no json here").unwrap_err();
    assert!(err.contains("No JSON found"));

    let err = extract_json_from_completion("```json\n```").unwrap_err();
    assert!(err.contains("empty or malformed"));
}
