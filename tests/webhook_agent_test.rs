//! Webhook agent against a local HTTP server.

mod common;

use maestro::adapters::agents::WebhookAgent;
use maestro::domain::models::{AgentStatus, ChunkType};
use maestro::domain::ports::Agent;
use mockito::Matcher;
use serde_json::json;

fn agent_for(server: &mockito::Server, retry_count: u32) -> WebhookAgent {
    let url = format!("{}/webhook/agent", server.url());
    WebhookAgent::new(&common::webhook_config(&url, retry_count), reqwest::Client::new())
        .expect("valid webhook config")
}

#[tokio::test]
async fn test_reply_is_mapped_onto_response() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/webhook/agent")
        .match_body(Matcher::PartialJson(json!({
            "query": "What changed?",
            "context": {"tenant_id": "tenant-1", "session_id": "session-1"}
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "answer": "Two things changed.",
                "citations": [{"source": "CHANGELOG.md", "content": "v2"}],
                "metadata": {"tools_used": ["search"]},
                "execution_id": "exec-42"
            })
            .to_string(),
        )
        .create_async()
        .await;

    let response = agent_for(&server, 1)
        .execute("What changed?", &common::context())
        .await;

    mock.assert_async().await;
    assert_eq!(response.status, AgentStatus::Completed);
    assert_eq!(response.answer, "Two things changed.");
    assert_eq!(response.citations.len(), 1);
    assert_eq!(response.citations[0].source, "CHANGELOG.md");
    assert_eq!(response.tools_used, vec!["search".to_string()]);
    assert_eq!(response.metadata["workflow_execution_id"], "exec-42");
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let mut server = mockito::Server::new_async().await;
    let failing = server
        .mock("POST", "/webhook/agent")
        .with_status(500)
        .expect(2)
        .create_async()
        .await;
    let succeeding = server
        .mock("POST", "/webhook/agent")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"answer":"ok"}"#)
        .expect(1)
        .create_async()
        .await;

    let response = agent_for(&server, 3)
        .execute("ping", &common::context())
        .await;

    failing.assert_async().await;
    succeeding.assert_async().await;
    assert_eq!(response.status, AgentStatus::Completed);
    assert_eq!(response.answer, "ok");
}

#[tokio::test]
async fn test_exhausted_attempts_fail_the_response() {
    let mut server = mockito::Server::new_async().await;
    let failing = server
        .mock("POST", "/webhook/agent")
        .with_status(500)
        .expect(2)
        .create_async()
        .await;

    let response = agent_for(&server, 2)
        .execute("ping", &common::context())
        .await;

    failing.assert_async().await;
    assert_eq!(response.status, AgentStatus::Failed);
    assert!(response.error.as_deref().is_some_and(|e| e.contains("500")));
}

#[tokio::test]
async fn test_unreachable_endpoint_fails_without_panicking() {
    // Nothing listens on the discard port.
    let config = common::webhook_config("http://127.0.0.1:9/webhook", 1);
    let agent = WebhookAgent::new(&config, reqwest::Client::new()).unwrap();

    let response = agent.execute("ping", &common::context()).await;
    assert_eq!(response.status, AgentStatus::Failed);
    assert!(response.error.is_some());
}

async fn assert_malformed_reply_fails(body: &str) {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/webhook/agent")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body)
        .expect(2)
        .create_async()
        .await;
    let agent = agent_for(&server, 1);

    let response = agent.execute("ping", &common::context()).await;
    assert_eq!(response.status, AgentStatus::Failed);
    assert!(response
        .error
        .as_deref()
        .is_some_and(|e| e.contains("malformed webhook response")));

    let chunks = agent
        .execute_streaming("ping", &common::context())
        .collect_chunks()
        .await;
    let errors = chunks.iter().filter(|c| c.chunk_type == ChunkType::Error).count();
    assert_eq!(errors, 1);
    assert_eq!(chunks.last().map(|c| c.chunk_type), Some(ChunkType::Error));
    assert!(chunks.iter().all(|c| c.chunk_type != ChunkType::Completion));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_non_json_reply_fails_the_response() {
    assert_malformed_reply_fails("<html>gateway says hi</html>").await;
}

#[tokio::test]
async fn test_reply_without_answer_fails_the_response() {
    assert_malformed_reply_fails(&json!({"result": "x", "execution_id": "exec-1"}).to_string()).await;
}

#[tokio::test]
async fn test_streaming_emits_sentences_then_completion() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/webhook/agent")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "answer": "First. Second",
                "citations": [{"source": "doc"}]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let chunks = agent_for(&server, 1)
        .execute_streaming("q", &common::context())
        .collect_chunks()
        .await;

    let kinds: Vec<ChunkType> = chunks.iter().map(|c| c.chunk_type).collect();
    assert_eq!(
        kinds,
        vec![
            ChunkType::Status,
            ChunkType::Text,
            ChunkType::Text,
            ChunkType::Citation,
            ChunkType::Completion,
        ]
    );
    assert_eq!(chunks[1].content, "First. ");
    assert_eq!(chunks[2].content, "Second");
}

#[tokio::test]
async fn test_streaming_failure_ends_with_error_chunk() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/webhook/agent")
        .with_status(503)
        .create_async()
        .await;

    let chunks = agent_for(&server, 1)
        .execute_streaming("q", &common::context())
        .collect_chunks()
        .await;

    assert_eq!(chunks.first().map(|c| c.chunk_type), Some(ChunkType::Status));
    assert_eq!(chunks.last().map(|c| c.chunk_type), Some(ChunkType::Error));
}

#[tokio::test]
async fn test_health_accepts_method_not_allowed() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/webhook/agent")
        .with_status(405)
        .create_async()
        .await;

    let status = agent_for(&server, 1).health_check().await;
    assert!(status.healthy);
}

#[tokio::test]
async fn test_health_falls_back_to_post_request() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/webhook/agent")
        .with_status(404)
        .create_async()
        .await;
    server
        .mock("POST", "/webhook/agent")
        .match_body(Matcher::PartialJson(json!({"query": "health_check"})))
        .with_status(502)
        .create_async()
        .await;

    let status = agent_for(&server, 1).health_check().await;
    assert!(!status.healthy);
}
