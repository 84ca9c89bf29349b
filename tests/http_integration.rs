use std::time::Duration;

use genbridge::config::Settings;
use genbridge::{
    Client, ClientBuilder, ConversationState, Error, GenerationParams, ImageInput, RetryPolicy,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retries() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        jitter: false,
    }
}

fn builder(model: &str, server: &MockServer) -> ClientBuilder {
    Client::builder(model)
        .api_key("test_key")
        .base_url(server.uri())
        .settings(Settings::default())
        .retry_policy(fast_retries())
}

#[tokio::test]
async fn test_claude_conversation_roundtrip() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test_key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({"system": "You are terse."})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "claude-haiku-4-5",
            "content": [{"type": "text", "text": "Hi"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 14, "output_tokens": 2}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = builder("claude-haiku-4-5", &mock_server)
        .system_instruction("You are terse.")
        .build()
        .unwrap();

    let (result, state) = client
        .converse(&ConversationState::new(), "Say hi", GenerationParams::new())
        .await
        .unwrap();

    assert_eq!(result.text, "Hi");
    assert_eq!(state.len(), 2);
    assert_eq!(state.system_instruction(), Some("You are terse."));

    let usage = client.usage(false);
    assert_eq!(usage.input_tokens, 14);
    assert_eq!(usage.output_tokens, 2);
}

#[tokio::test]
async fn test_claude_streaming_is_folded() {
    let mock_server = MockServer::start().await;

    let body = [
        r#"{"type":"message_start","message":{"model":"claude-haiku-4-5","usage":{"input_tokens":9,"output_tokens":1}}}"#,
        r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}"#,
        r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"lo"}}"#,
        r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":3}}"#,
        r#"{"type":"message_stop"}"#,
    ]
    .iter()
    .map(|event| format!("event: x\ndata: {}\n\n", event))
    .collect::<String>();

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&mock_server)
        .await;

    let client = builder("claude-haiku-4-5", &mock_server)
        .streaming(true)
        .build()
        .unwrap();

    let result = client.generate("Greet me", GenerationParams::new()).await.unwrap();
    assert_eq!(result.text, "Hello");
    assert_eq!(result.usage.output_tokens, 3);
}

#[tokio::test]
async fn test_rate_limit_then_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "1")
                .set_body_json(json!({"error": {"type": "rate_limit_error", "message": "slow down"}})),
        )
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "text", "text": "ok"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 1, "output_tokens": 1}
        })))
        .mount(&mock_server)
        .await;

    let client = builder("claude-haiku-4-5", &mock_server).build().unwrap();

    let started = std::time::Instant::now();
    let result = client.generate("ping", GenerationParams::new()).await.unwrap();
    assert_eq!(result.text, "ok");
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_gemini_prompt_block() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.5-flash:generateContent"))
        .and(header("x-goog-api-key", "test_key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "promptFeedback": {"blockReason": "PROHIBITED_CONTENT"}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = builder("gemini-2.5-flash", &mock_server).build().unwrap();

    let err = client
        .generate("something bad", GenerationParams::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Blocked { ref category, .. } if category == "PROHIBITED_CONTENT"));
    assert_eq!(client.usage(false).request_count, 0);
}

#[tokio::test]
async fn test_gemini_server_error_exhausts_retries() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "error": {"code": 503, "message": "The model is overloaded.", "status": "UNAVAILABLE"}
        })))
        .expect(3)
        .mount(&mock_server)
        .await;

    let client = builder("gemini-2.5-flash", &mock_server).build().unwrap();

    let err = client.generate("hello", GenerationParams::new()).await.unwrap_err();
    assert!(matches!(err, Error::ServerError { status: 503, .. }));
}

#[tokio::test]
async fn test_wavespeed_upload_submit_and_poll() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v2/media/upload/binary"))
        .and(header("authorization", "Bearer test_key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 200,
            "message": "success",
            "data": {"download_url": "https://cdn.test/input.png"}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v3/bytedance/seedream-v4/edit"))
        .and(body_partial_json(json!({"images": ["https://cdn.test/input.png"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 200,
            "data": {"id": "task-42", "status": "created"}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v2/predictions/task-42/result"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 200,
            "data": {"id": "task-42", "status": "processing"}
        })))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v2/predictions/task-42/result"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 200,
            "data": {
                "id": "task-42",
                "status": "completed",
                "outputs": ["https://cdn.test/output.png"],
                "has_nsfw_contents": [false]
            }
        })))
        .mount(&mock_server)
        .await;

    let client = builder("bytedance/seedream-v4/edit", &mock_server)
        .poll_interval(Duration::from_millis(10))
        .build()
        .unwrap();

    let png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
    let params = GenerationParams::new().image(ImageInput::from_bytes(png));
    let result = client.generate("Make it snow", params).await.unwrap();

    assert_eq!(result.image_urls(), vec!["https://cdn.test/output.png"]);
    assert_eq!(result.task_id.as_deref(), Some("task-42"));
}

#[tokio::test]
async fn test_no_credential_lists_sources() {
    let resolver = genbridge::CredentialResolver::new()
        .with_env(|_| None)
        .with_config_path(std::env::temp_dir().join("genbridge-missing-config.json"));

    let err = Client::builder("gemini-2.5-flash")
        .resolver(resolver)
        .settings(Settings::default())
        .build()
        .unwrap_err();

    let message = err.to_string();
    assert!(matches!(err, Error::NoCredential { .. }));
    assert!(message.contains("GOOGLE_API_KEY or GEMINI_API_KEY"));
    assert!(message.contains("[gemini]"));
}
