//! End-to-end chat flows against an in-process HTTP server.

use std::time::Duration;

use modelchat::config::{ConfigLoader, FileSource, ModelConfig};
use modelchat::credentials::MapCredentials;
use modelchat::factory::create_client;
use modelchat::llm::{ChatClient, Provider};
use modelchat::session::{ChatSession, SendOutcome};
use modelchat::types::{Message, StreamChunk};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug)]
struct CapturedRequest {
    request_line: String,
    headers: Vec<(String, String)>,
    body: Value,
}

impl CapturedRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

struct Reply {
    head: String,
    parts: Vec<String>,
    hang: bool,
}

impl Reply {
    fn sse(parts: &[&str]) -> Self {
        Self {
            head: "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n"
                .to_string(),
            parts: parts.iter().map(|p| p.to_string()).collect(),
            hang: false,
        }
    }

    fn status(code: u16, reason: &str, body: &str) -> Self {
        Self {
            head: format!(
                "HTTP/1.1 {} {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                code,
                reason,
                body.len()
            ),
            parts: vec![body.to_string()],
            hang: false,
        }
    }

    fn hanging(self) -> Self {
        Self { hang: true, ..self }
    }
}

async fn read_request(stream: &mut TcpStream) -> CapturedRequest {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let read = stream.read(&mut chunk).await.unwrap();
        assert!(read > 0, "client closed before sending headers");
        buf.extend_from_slice(&chunk[..read]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();
    let content_length: usize = headers
        .iter()
        .find(|(key, _)| key == "content-length")
        .and_then(|(_, value)| value.parse().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let read = stream.read(&mut chunk).await.unwrap();
        assert!(read > 0, "client closed before sending body");
        buf.extend_from_slice(&chunk[..read]);
    }
    let body = serde_json::from_slice(&buf[header_end..header_end + content_length]).unwrap();

    CapturedRequest {
        request_line,
        headers,
        body,
    }
}

/// Serve exactly one request with `reply`. Returns the server address and a
/// handle yielding the captured request.
async fn serve_once(reply: Reply) -> (String, JoinHandle<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_request(&mut stream).await;

        stream.write_all(reply.head.as_bytes()).await.unwrap();
        for part in &reply.parts {
            stream.write_all(part.as_bytes()).await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        if reply.hang {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        let _ = stream.shutdown().await;
        request
    });

    (addr, handle)
}

fn client_for(base_url: String, params: Value) -> ChatClient {
    let settings = ModelConfig {
        name: "test-model".to_string(),
        base_url,
        api_key_env_name: "TEST_KEY".to_string(),
        default_params: params.as_object().cloned().unwrap_or_default(),
    };
    ChatClient::new("test", settings, "sk-test").unwrap()
}

fn openai_frame(text: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({ "choices": [{ "index": 0, "delta": { "content": text }, "finish_reason": null }] })
    )
}

#[tokio::test]
async fn openai_stream_folds_into_one_assistant_message() {
    let first = openai_frame("He");
    let second = openai_frame("llo");
    let (split_a, split_b) = second.split_at(12);
    let (addr, server) = serve_once(Reply::sse(&[
        &first,
        split_a,
        split_b,
        "data: [DONE]\n\n",
    ]))
    .await;

    let client = client_for(
        format!("{addr}/v1/chat/completions"),
        json!({ "temperature": 0.7, "max_tokens": 1000 }),
    );
    assert_eq!(client.provider(), Provider::OpenAiCompatible);
    let mut session = ChatSession::with_client(client);

    let outcome = session.send_message("hello", None).await;

    assert_eq!(outcome, SendOutcome::Completed);
    assert_eq!(
        session.messages(),
        &[Message::user("hello"), Message::assistant("Hello")]
    );
    assert!(!session.is_loading());
    assert!(session.error().is_none());

    let request = server.await.unwrap();
    assert_eq!(request.request_line, "POST /v1/chat/completions HTTP/1.1");
    assert_eq!(request.header("authorization"), Some("Bearer sk-test"));
    assert_eq!(request.header("content-type"), Some("application/json"));
    assert_eq!(request.body["model"], "test-model");
    assert_eq!(request.body["stream"], true);
    assert_eq!(request.body["temperature"], 0.7);
    assert_eq!(request.body["max_tokens"], 1000);
    assert_eq!(
        request.body["messages"],
        json!([{ "role": "user", "content": "hello" }])
    );
}

#[tokio::test]
async fn openai_sends_full_history_and_extra_params() {
    let (addr, server) = serve_once(Reply::sse(&[&openai_frame("ok"), "data: [DONE]\n\n"])).await;
    let mut session = ChatSession::with_client(client_for(
        format!("{addr}/chat"),
        json!({ "temperature": 0.7 }),
    ));
    session.append_user_message("first");
    session.fold_assistant_chunk("answer");

    let mut extra = serde_json::Map::new();
    extra.insert("temperature".to_string(), json!(0.0));
    let outcome = session.send_message("second", Some(&extra)).await;
    assert_eq!(outcome, SendOutcome::Completed);

    let request = server.await.unwrap();
    assert_eq!(request.body["temperature"], 0.0);
    assert_eq!(
        request.body["messages"],
        json!([
            { "role": "user", "content": "first" },
            { "role": "assistant", "content": "answer" },
            { "role": "user", "content": "second" },
        ])
    );
    assert_eq!(session.messages().len(), 4);
}

#[tokio::test]
async fn anthropic_endpoint_sends_only_last_message() {
    let (addr, server) = serve_once(Reply::sse(&[
        "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{}}\n\n",
        "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Bon\"}}\n\n",
        "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"jour\"}}\n\n",
        "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
    ]))
    .await;

    let client = client_for(
        format!("{addr}/anthropic.com/v1/messages"),
        json!({ "max_tokens": 1024 }),
    );
    assert_eq!(client.provider(), Provider::Anthropic);
    let mut session = ChatSession::with_client(client);
    session.append_user_message("earlier question");
    session.fold_assistant_chunk("earlier answer");

    let outcome = session.send_message("latest", None).await;
    assert_eq!(outcome, SendOutcome::Completed);
    assert_eq!(session.messages().last(), Some(&Message::assistant("Bonjour")));

    let request = server.await.unwrap();
    assert_eq!(request.header("x-api-key"), Some("sk-test"));
    assert_eq!(request.header("anthropic-version"), Some("2023-06-01"));
    assert_eq!(request.header("authorization"), None);
    assert_eq!(
        request.body["messages"],
        json!([{ "role": "user", "content": "latest" }])
    );
    assert_eq!(request.body["max_tokens"], 1024);
}

#[tokio::test]
async fn error_status_is_recorded_without_losing_history() {
    let (addr, server) =
        serve_once(Reply::status(401, "Unauthorized", "{\"error\":\"bad key\"}")).await;
    let mut session = ChatSession::with_client(client_for(format!("{addr}/chat"), json!({})));
    session.append_user_message("kept");
    session.fold_assistant_chunk("also kept");

    let outcome = session.send_message("hello", None).await;

    assert_eq!(outcome, SendOutcome::Failed);
    let error = session.error().unwrap();
    assert!(error.contains("401"), "unexpected error: {error}");
    assert!(!session.is_loading());
    assert_eq!(session.messages().len(), 3);
    assert_eq!(session.messages()[2], Message::user("hello"));
    server.await.unwrap();
}

#[tokio::test]
async fn empty_body_is_reported() {
    let (addr, server) = serve_once(Reply::status(200, "OK", "")).await;
    let client = client_for(format!("{addr}/chat"), json!({}));

    let mut events = Vec::new();
    client
        .stream_chat(&[Message::user("hi")], &mut events, None)
        .await;

    assert_eq!(
        events,
        vec![StreamChunk::Error("response body is empty".to_string())]
    );
    server.await.unwrap();
}

#[tokio::test]
async fn malformed_frame_does_not_stop_stream() {
    let (addr, server) = serve_once(Reply::sse(&[
        &openai_frame("a"),
        "data: {oops\n\n",
        &openai_frame("b"),
        "data: [DONE]\n\n",
    ]))
    .await;
    let client = client_for(format!("{addr}/chat"), json!({}));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut sink = tx;

    client.stream_chat(&[Message::user("hi")], &mut sink, None).await;
    drop(sink);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert_eq!(
        events,
        vec![
            StreamChunk::TextDelta("a".to_string()),
            StreamChunk::TextDelta("b".to_string()),
            StreamChunk::Done,
        ]
    );
    server.await.unwrap();
}

#[tokio::test]
async fn abandoned_send_clears_loading() {
    let (addr, server) = serve_once(Reply::sse(&[&openai_frame("par")]).hanging()).await;
    let mut session = ChatSession::with_client(client_for(format!("{addr}/chat"), json!({})));

    let result =
        tokio::time::timeout(Duration::from_millis(500), session.send_message("hi", None)).await;

    assert!(result.is_err(), "stream should still be open");
    assert!(!session.is_loading());
    assert_eq!(session.messages().last(), Some(&Message::assistant("par")));
    server.abort();

    let outcome = session.send_message("again", None).await;
    assert_ne!(outcome, SendOutcome::Busy);
}

#[tokio::test]
async fn factory_builds_client_from_config_file() {
    let (addr, server) = serve_once(Reply::sse(&[&openai_frame("pong"), "data: [DONE]\n\n"])).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("models.yaml");
    std::fs::write(
        &path,
        format!(
            "models:\n  default: mock\n  available:\n    mock:\n      name: mock-1\n      baseUrl: {addr}/v1/chat/completions\n      apiKeyEnvName: MOCK_KEY\n      defaultParams:\n        temperature: 0.3\n"
        ),
    )
    .unwrap();

    let loader = ConfigLoader::new(Box::new(FileSource::new(&path)));
    let credentials = MapCredentials::new().with("MOCK_KEY", "mock-secret");
    let client = create_client(&loader, &credentials, None).await.unwrap();
    assert_eq!(client.model_id(), "mock");

    let mut session = ChatSession::with_client(client);
    assert_eq!(session.send_message("ping", None).await, SendOutcome::Completed);
    assert_eq!(session.messages().last(), Some(&Message::assistant("pong")));

    let request = server.await.unwrap();
    assert_eq!(request.header("authorization"), Some("Bearer mock-secret"));
    assert_eq!(request.body["model"], "mock-1");
    assert_eq!(request.body["temperature"], 0.3);
}
