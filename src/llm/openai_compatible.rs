//! OpenAI-compatible chat completions dialect.
//!
//! Used for OpenAI, Cerebras, and any endpoint that is not recognised as
//! another provider. The whole conversation is sent verbatim and the key goes
//! in a bearer `Authorization` header.

use serde_json::Value;

use super::chat_body;
use crate::config::ModelConfig;
use crate::types::Message;

/// Build the streaming request body.
pub fn build_body(
    settings: &ModelConfig,
    messages: &[Message],
    extra: Option<&serde_json::Map<String, Value>>,
) -> Value {
    let messages = messages
        .iter()
        .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
        .collect();
    chat_body(settings, messages, extra)
}

pub fn authorize(request: reqwest::RequestBuilder, api_key: &str) -> reqwest::RequestBuilder {
    request.bearer_auth(api_key)
}

/// `choices[0].delta.content`
pub fn extract_text(event: &Value) -> Option<&str> {
    event.pointer("/choices/0/delta/content")?.as_str()
}
