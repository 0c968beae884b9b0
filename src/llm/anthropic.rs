//! Anthropic Messages API dialect.
//!
//! Differences from the OpenAI-compatible dialect:
//! - only the most recent message is sent, so earlier turns are not part of
//!   the request
//! - the key goes in an `x-api-key` header together with a pinned
//!   `anthropic-version`
//! - text arrives as `delta.text` on `content_block_delta` events

use serde_json::Value;

use super::chat_body;
use crate::config::ModelConfig;
use crate::types::Message;

pub const API_VERSION: &str = "2023-06-01";

/// Build the streaming request body from the last message only.
pub fn build_body(
    settings: &ModelConfig,
    messages: &[Message],
    extra: Option<&serde_json::Map<String, Value>>,
) -> Value {
    let messages = messages
        .last()
        .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
        .into_iter()
        .collect();
    chat_body(settings, messages, extra)
}

pub fn authorize(request: reqwest::RequestBuilder, api_key: &str) -> reqwest::RequestBuilder {
    request
        .header("x-api-key", api_key)
        .header("anthropic-version", API_VERSION)
}

/// `delta.text`
pub fn extract_text(event: &Value) -> Option<&str> {
    event.pointer("/delta/text")?.as_str()
}
