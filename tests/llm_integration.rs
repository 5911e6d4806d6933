//! Integration tests for the LLM chat client.
//!
//! These tests make real API calls to an OpenAI-compatible endpoint.
//! Run with: OPENAI_API_KEY=your_key cargo test --test llm_integration -- --ignored

use std::time::Duration;

use threatforge::llm::{ChatClient, ChatRequest, LlmProvider, Message};

fn get_test_api_key() -> String {
    std::env::var("OPENAI_API_KEY")
        .expect("OPENAI_API_KEY environment variable must be set for integration tests")
}

fn create_test_client() -> ChatClient {
    ChatClient::new(
        "https://api.openai.com/v1",
        Some(get_test_api_key()),
        Duration::from_secs(60),
    )
}

#[tokio::test]
#[ignore] // Run with: cargo test --test llm_integration -- --ignored
async fn test_simple_completion() {
    let client = create_test_client();

    let request = ChatRequest::new(
        "gpt-4o-mini",
        vec![
            Message::system("You are a helpful assistant. Reply concisely."),
            Message::user("What is 2 + 2? Reply with just the number."),
        ],
    )
    .with_max_tokens(10)
    .with_temperature(0.0);

    let response = client.chat(request).await;
    assert!(response.is_ok(), "Completion failed: {:?}", response.err());

    let response = response.expect("Should have response");
    let content = response.first_content().expect("Should have content");
    assert!(
        content.contains('4'),
        "Response should contain '4', got: {}",
        content
    );
}

#[tokio::test]
#[ignore]
async fn test_json_contract_completion() {
    let client = create_test_client();

    let request = ChatRequest::new(
        "gpt-4o-mini",
        vec![
            Message::system(
                "Reply with a JSON object only: {\"category\": <string>, \"score\": <0-100 number>}.",
            ),
            Message::user("Assess: bombing reported in a capital city, casualties unknown."),
        ],
    )
    .with_max_tokens(100)
    .with_temperature(0.0);

    let response = client.chat(request).await.expect("Should complete");
    let content = response.first_content().expect("Should have content");

    let json = threatforge::utils::extract_object(content).expect("Reply should contain JSON");
    let value: serde_json::Value = serde_json::from_str(&json).expect("JSON should parse");
    assert!(value.get("category").is_some());
    assert!(value.get("score").is_some());
}

#[tokio::test]
#[ignore]
async fn test_bad_key_is_api_error() {
    let client = ChatClient::new(
        "https://api.openai.com/v1",
        Some("sk-invalid".to_string()),
        Duration::from_secs(30),
    );

    let request = ChatRequest::new("gpt-4o-mini", vec![Message::user("hello")]);
    let result = client.chat(request).await;
    assert!(matches!(
        result,
        Err(threatforge::LlmError::ApiError { .. })
    ));
}
