//! Integration tests for the Langbase client and Langbase-backed collaborators
//!
//! Tests HTTP behavior using wiremock for request/response mocking.

use serde_json::json;
use std::time::Duration;
use tokio_test::assert_ok;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use langbase_rag_orchestrator::config::{LangbaseConfig, PipeConfig, RequestConfig};
use langbase_rag_orchestrator::error::{classify_provider_error, ErrorKind, LangbaseError, ProviderError};
use langbase_rag_orchestrator::langbase::{LangbaseClient, MemoryRetrieveRequest, Message, PipeRequest};
use langbase_rag_orchestrator::providers::{
    LangbaseClassifier, LangbaseExpander, LangbaseMemorySearch, LangbaseReasoner, QueryClassifier,
    QueryExpander, ReasoningStrategies, SearchProvider, SearchRequest,
};
use langbase_rag_orchestrator::{Classification, Fragment, Query, QueryCategory};

/// Create a test client pointing to mock server
fn create_test_client(base_url: &str, max_retries: u32) -> LangbaseClient {
    let config = LangbaseConfig {
        api_key: "test-api-key".to_string(),
        base_url: base_url.to_string(),
    };

    let request_config = RequestConfig {
        timeout_ms: 5000,
        max_retries,
        retry_delay_ms: 10,
    };

    LangbaseClient::new(&config, request_config).expect("Failed to create client")
}

fn completion(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "success": true,
        "completion": text,
        "threadId": "thread-123"
    }))
}

fn search_request(query: &str) -> SearchRequest {
    SearchRequest {
        query: query.to_string(),
        top_k: 5,
        score_floor: 0.6,
        document_ids: None,
        user_id: None,
    }
}

#[cfg(test)]
mod pipe_call_tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_pipe_call() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .and(header("Authorization", "Bearer test-api-key"))
            .and(header("Content-Type", "application/json"))
            .respond_with(completion("Refunds are available for 30 days."))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let request = PipeRequest::new("factual-reasoning-v1", vec![Message::user("Refunds?")]);
        let response = assert_ok!(client.call_pipe(request).await);

        assert!(response.success);
        assert_eq!(response.completion, "Refunds are available for 30 days.");
        assert_eq!(response.thread_id, Some("thread-123".to_string()));
    }

    #[tokio::test]
    async fn test_auth_error_is_not_retried() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 3);
        let request = PipeRequest::new("p", vec![Message::user("q")]);
        let err = client.call_pipe(request).await.unwrap_err();

        assert!(matches!(err, LangbaseError::Api { status: 401, .. }));
        let provider: ProviderError = err.into();
        assert_eq!(
            classify_provider_error(&provider),
            ErrorKind::ProviderAuthFailed
        );
    }

    #[tokio::test]
    async fn test_server_error_is_retried_then_classified() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
            .expect(3)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 2);
        let request = PipeRequest::new("p", vec![Message::user("q")]);
        let err = client.call_pipe(request).await.unwrap_err();

        assert!(matches!(err, LangbaseError::Unavailable { retries: 3, .. }));
        let provider: ProviderError = err.into();
        assert_eq!(
            classify_provider_error(&provider),
            ErrorKind::ProviderConnectionError
        );
    }

    #[tokio::test]
    async fn test_rate_limit_survives_retries_as_quota() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(429).set_body_string("Too Many Requests"))
            .expect(2)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 1);
        let request = PipeRequest::new("p", vec![Message::user("q")]);
        let provider: ProviderError = client.call_pipe(request).await.unwrap_err().into();

        assert_eq!(
            classify_provider_error(&provider),
            ErrorKind::ProviderQuotaExceeded
        );
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(completion("late").set_delay(Duration::from_secs(10)))
            .mount(&mock_server)
            .await;

        let config = LangbaseConfig {
            api_key: "test-api-key".to_string(),
            base_url: mock_server.uri(),
        };
        let request_config = RequestConfig {
            timeout_ms: 100,
            max_retries: 0,
            retry_delay_ms: 10,
        };
        let client = LangbaseClient::new(&config, request_config).unwrap();

        let request = PipeRequest::new("p", vec![Message::user("q")]);
        let provider: ProviderError = client.call_pipe(request).await.unwrap_err().into();
        assert_eq!(classify_provider_error(&provider), ErrorKind::StageDegraded);
    }
}

#[cfg(test)]
mod memory_tests {
    use super::*;

    #[tokio::test]
    async fn test_retrieve_memory_sends_filters() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/memory/retrieve"))
            .and(body_partial_json(json!({
                "query": "refund policy",
                "topK": 4,
                "memory": [{"name": "docs"}],
                "filters": ["documentId", "In", ["policy"]]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"text": "Refunds within 30 days.", "similarity": 0.91,
                 "meta": {"documentId": "policy", "position": "2"}}
            ])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let request = MemoryRetrieveRequest::new("refund policy", &["docs".to_string()], 4)
            .with_in_filter("documentId", &["policy".to_string()]);
        let chunks = client.retrieve_memory(request).await.unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].similarity, 0.91);
    }

    #[tokio::test]
    async fn test_memory_search_maps_and_filters_chunks() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/memory/retrieve"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"text": "Refunds within 30 days.", "similarity": 0.91,
                 "meta": {"documentId": "policy", "position": "2", "filename": "policy.pdf"}},
                {"text": "Receipts are required.", "similarity": 0.72,
                 "meta": {"documentId": "policy", "chunkId": "policy-c7", "position": "7"}},
                {"text": "Office hours.", "similarity": 0.41,
                 "meta": {"documentId": "misc"}}
            ])))
            .mount(&mock_server)
            .await;

        let search = LangbaseMemorySearch::new(
            create_test_client(&mock_server.uri(), 0),
            vec!["docs".to_string()],
        );
        let fragments = search.search(&search_request("refund policy")).await.unwrap();

        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].id, "policy#2");
        assert_eq!(fragments[0].filename, "policy.pdf");
        assert_eq!(fragments[0].position, 2);
        assert_eq!(fragments[1].id, "policy-c7");
    }

    #[tokio::test]
    async fn test_memory_search_rejects_unknown_chunk_shape() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/memory/retrieve"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"text": "x", "similarity": 0.9, "score_v2": 0.9, "meta": {"documentId": "d"}}
            ])))
            .mount(&mock_server)
            .await;

        let search = LangbaseMemorySearch::new(
            create_test_client(&mock_server.uri(), 0),
            vec!["docs".to_string()],
        );
        let err = search.search(&search_request("q")).await.unwrap_err();
        assert_eq!(classify_provider_error(&err), ErrorKind::StageDegraded);
    }
}

#[cfg(test)]
mod collaborator_tests {
    use super::*;

    #[tokio::test]
    async fn test_classifier_parses_json_completion() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .and(body_partial_json(json!({"name": "query-classifier-v1"})))
            .respond_with(completion(
                "```json\n{\"category\": \"temporal\", \"confidence\": 0.82, \"rationale\": \"asks about change\"}\n```",
            ))
            .mount(&mock_server)
            .await;

        let classifier =
            LangbaseClassifier::new(create_test_client(&mock_server.uri(), 0), "query-classifier-v1");
        let result = classifier
            .classify(&Query::new("How did pricing change since 2020?", "s1"))
            .await
            .unwrap();

        assert_eq!(result.category, QueryCategory::Temporal);
        assert_eq!(result.confidence, 0.82);
        assert!(result.needs_retrieval);
    }

    #[tokio::test]
    async fn test_expander_drops_restatements() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(completion(
                r#"{"variants": ["What is the refund policy?", "refund rules for returned items", "  "]}"#,
            ))
            .mount(&mock_server)
            .await;

        let expander =
            LangbaseExpander::new(create_test_client(&mock_server.uri(), 0), "query-expander-v1");
        let variants = expander
            .expand(&Query::new("What is the refund policy?", "s1"))
            .await
            .unwrap();

        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].text, "refund rules for returned items");
        assert!(variants[0].diversity > 0);
    }

    #[tokio::test]
    async fn test_reasoner_uses_category_pipe() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .and(body_partial_json(json!({"name": "counterfactual-simulation-v1"})))
            .respond_with(completion("Sales would likely fall."))
            .expect(1)
            .mount(&mock_server)
            .await;

        let reasoner = LangbaseReasoner::new(
            create_test_client(&mock_server.uri(), 0),
            PipeConfig::default(),
        );
        let fragments = vec![Fragment::new("f1", "pricing", "Prices rose 10% in 2023.", 0.9)];
        let answer = reasoner
            .reason_counterfactual(
                &Query::new("What if prices had not risen?", "s1"),
                &fragments,
                &Classification::new(QueryCategory::Counterfactual, 0.9, "what if"),
            )
            .await
            .unwrap();

        assert_eq!(answer, "Sales would likely fall.");
    }
}
