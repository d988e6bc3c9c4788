use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tern::config::Config;
use tern::conversation::ConversationLoop;
use tern::errors::TransportError;
use tern::tools::ToolHandler;
use tern::transport::{Session, WebClient};

fn test_config(host: String) -> Config {
    Config {
        host,
        session_cookie: "sessionKey=test".to_string(),
        conversation_id: None,
        tool_timeout: Duration::from_secs(2),
        user_agent: "test-agent".to_string(),
        allowed_tools: None,
        search_api_key: None,
    }
}

async fn mount_workspace(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/organizations"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!([{"uuid": "org-1"}])),
        )
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/organizations/org-1/chat_conversations"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(serde_json::json!({"uuid": "conv-1"})),
        )
        .mount(server)
        .await;
}

const COMPLETION_PATH: &str = "/api/organizations/org-1/chat_conversations/conv-1/completion";

fn sse(lines: &[&str]) -> String {
    let mut body = String::new();
    for line in lines {
        body.push_str("data: ");
        body.push_str(line);
        body.push_str("\n\n");
    }
    body.push_str("data: [DONE]\n");
    body
}

#[tokio::test]
async fn test_full_loop_with_tool_round_trip() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_workspace(&server).await;

    // First turn: streamed text followed by a complete tool-call block.
    let first = sse(&[
        r#"{"completion": "I'll look that up."}"#,
        r#"{"completion": "<function_calls><invoke name=\"web-search\"><parameter name=\"query\">tern migration</parameter></invoke></function_calls>"}"#,
    ]);
    Mock::given(method("POST"))
        .and(path(COMPLETION_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw(first, "text/event-stream"))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    // Second turn (carrying the tool results): the final answer, delivered
    // through the block-delta frame shape.
    let second = sse(&[
        r#"{"type": "content_block_delta", "delta": {"type": "text_delta", "text": "They migrate "}}"#,
        r#"{"type": "content_block_delta", "delta": {"type": "text_delta", "text": "pole to pole."}}"#,
    ]);
    Mock::given(method("POST"))
        .and(path(COMPLETION_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw(second, "text/event-stream"))
        .mount(&server)
        .await;

    let config = test_config(server.uri());
    let tools = ToolHandler::new(&config)?;
    let transport = WebClient::new(config)?;
    let conversation = ConversationLoop::new(transport, tools);

    let mut session = Session::new();
    let text = conversation
        .run(&mut session, "where do terns go?", &[])
        .await?;

    assert_eq!(text, "I'll look that up.\n\nThey migrate pole to pole.");
    assert_eq!(session.conversation_id.as_deref(), Some("conv-1"));

    // The follow-up turn posted the formatted tool results.
    let requests = server.received_requests().await.unwrap();
    let completions: Vec<_> = requests
        .iter()
        .filter(|r| r.url.path() == COMPLETION_PATH)
        .collect();
    assert_eq!(completions.len(), 2);
    let follow_up: serde_json::Value = serde_json::from_slice(&completions[1].body)?;
    let prompt = follow_up["prompt"].as_str().unwrap();
    assert!(prompt.starts_with("<function_results>"));
    assert!(prompt.contains("<result name=\"web-search\">"));
    Ok(())
}

#[tokio::test]
async fn test_auth_expiry_aborts_the_loop() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/organizations"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let config = test_config(server.uri());
    let tools = ToolHandler::new(&config)?;
    let transport = WebClient::new(config)?;
    let conversation = ConversationLoop::new(transport, tools);

    let mut session = Session::new();
    let result = conversation.run(&mut session, "hello", &[]).await;

    assert!(matches!(
        result,
        Err(TransportError::AuthExpired { status: 403 })
    ));
    Ok(())
}

#[tokio::test]
async fn test_empty_stream_yields_no_response_text() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_workspace(&server).await;
    Mock::given(method("POST"))
        .and(path(COMPLETION_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("data: [DONE]\n", "text/event-stream"),
        )
        .mount(&server)
        .await;

    let config = test_config(server.uri());
    let tools = ToolHandler::new(&config)?;
    let transport = WebClient::new(config)?;
    let conversation = ConversationLoop::new(transport, tools);

    let mut session = Session::new();
    let text = conversation.run(&mut session, "anyone there?", &[]).await?;

    assert_eq!(text, "No response received");
    Ok(())
}
