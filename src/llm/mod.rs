//! LLM client module.
//!
//! A [`ChatClient`] talks to one configured model. Providers differ only in
//! how the request is shaped and authorized and in which field of a streamed
//! event carries the text, so they are modelled as a closed [`Provider`] enum
//! whose [`Dialect`] owns those three pieces. The provider is picked once,
//! from the endpoint URL, when the client is built.
//!
//! Streamed output is delivered through a [`ChunkSink`]. Errors are never
//! returned from [`ChatClient::stream_chat`]; they are reported to the sink.

pub mod anthropic;
pub mod openai_compatible;
pub mod stream;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ModelConfig;
use crate::error::{ClientError, TransportError};
use crate::types::{Message, StreamChunk};

// --- Sinks ---

/// Receives the output of one streaming request, in order.
pub trait ChunkSink {
    /// A non-empty increment of assistant text.
    fn on_chunk(&mut self, text: &str);

    /// The request or stream failed. No further callbacks follow.
    fn on_error(&mut self, message: String);

    /// The stream completed without error.
    fn on_done(&mut self) {}
}

impl<K: ChunkSink + ?Sized> ChunkSink for &mut K {
    fn on_chunk(&mut self, text: &str) {
        (**self).on_chunk(text)
    }

    fn on_error(&mut self, message: String) {
        (**self).on_error(message)
    }

    fn on_done(&mut self) {
        (**self).on_done()
    }
}

/// Collects every event; mostly useful in tests.
impl ChunkSink for Vec<StreamChunk> {
    fn on_chunk(&mut self, text: &str) {
        self.push(StreamChunk::TextDelta(text.to_string()));
    }

    fn on_error(&mut self, message: String) {
        self.push(StreamChunk::Error(message));
    }

    fn on_done(&mut self) {
        self.push(StreamChunk::Done);
    }
}

/// Forwards events over a channel. A closed receiver drops them.
impl ChunkSink for mpsc::UnboundedSender<StreamChunk> {
    fn on_chunk(&mut self, text: &str) {
        let _ = self.send(StreamChunk::TextDelta(text.to_string()));
    }

    fn on_error(&mut self, message: String) {
        let _ = self.send(StreamChunk::Error(message));
    }

    fn on_done(&mut self) {
        let _ = self.send(StreamChunk::Done);
    }
}

/// Shared flag telling in-flight work whether its owner still exists.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Mark the owner as gone. Every clone observes it.
    pub fn end(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Drops every callback once its [`Liveness`] has ended.
///
/// For embedders that forward a stream to an owner which may be torn down
/// before the stream finishes (a UI widget, a channel to another task). The
/// terminal host never needs it: it abandons a reply by dropping the send
/// future, which takes its sink with it.
pub struct LiveSink<K> {
    inner: K,
    liveness: Liveness,
}

impl<K: ChunkSink> LiveSink<K> {
    pub fn new(inner: K, liveness: Liveness) -> Self {
        Self { inner, liveness }
    }

    pub fn into_inner(self) -> K {
        self.inner
    }
}

impl<K: ChunkSink> ChunkSink for LiveSink<K> {
    fn on_chunk(&mut self, text: &str) {
        if self.liveness.is_alive() {
            self.inner.on_chunk(text);
        }
    }

    fn on_error(&mut self, message: String) {
        if self.liveness.is_alive() {
            self.inner.on_error(message);
        }
    }

    fn on_done(&mut self) {
        if self.liveness.is_alive() {
            self.inner.on_done();
        }
    }
}

// --- Providers ---

/// Known providers, identified from the configured endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Cerebras,
    OpenAi,
    Anthropic,
    /// Any other endpoint, assumed to speak the OpenAI protocol
    OpenAiCompatible,
}

impl Provider {
    /// Identify the provider from a fragment of its endpoint URL.
    pub fn detect(base_url: &str) -> Self {
        if base_url.contains("cerebras.ai") {
            Provider::Cerebras
        } else if base_url.contains("openai.com") {
            Provider::OpenAi
        } else if base_url.contains("anthropic.com") {
            Provider::Anthropic
        } else {
            Provider::OpenAiCompatible
        }
    }

    pub fn dialect(self) -> Dialect {
        match self {
            Provider::Anthropic => Dialect::Anthropic,
            Provider::Cerebras | Provider::OpenAi | Provider::OpenAiCompatible => Dialect::OpenAi,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Provider::Cerebras => "Cerebras",
            Provider::OpenAi => "OpenAI",
            Provider::Anthropic => "Anthropic",
            Provider::OpenAiCompatible => "OpenAI-Compatible",
        }
    }
}

/// Wire protocol spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenAi,
    Anthropic,
}

impl Dialect {
    pub fn build_body(
        self,
        settings: &ModelConfig,
        messages: &[Message],
        extra: Option<&serde_json::Map<String, Value>>,
    ) -> Value {
        match self {
            Dialect::OpenAi => openai_compatible::build_body(settings, messages, extra),
            Dialect::Anthropic => anthropic::build_body(settings, messages, extra),
        }
    }

    pub fn authorize(
        self,
        request: reqwest::RequestBuilder,
        api_key: &str,
    ) -> reqwest::RequestBuilder {
        match self {
            Dialect::OpenAi => openai_compatible::authorize(request, api_key),
            Dialect::Anthropic => anthropic::authorize(request, api_key),
        }
    }

    /// The text field extractor for one decoded stream event.
    pub fn extractor(self) -> fn(&Value) -> Option<&str> {
        match self {
            Dialect::OpenAi => openai_compatible::extract_text,
            Dialect::Anthropic => anthropic::extract_text,
        }
    }
}

/// Common body layout: `model`, `messages`, `stream`, then the model's
/// default parameters, then per-request extras. Later keys win.
fn chat_body(
    settings: &ModelConfig,
    messages: Vec<Value>,
    extra: Option<&serde_json::Map<String, Value>>,
) -> Value {
    let mut body = serde_json::Map::new();
    body.insert("model".to_string(), Value::String(settings.name.clone()));
    body.insert("messages".to_string(), Value::Array(messages));
    body.insert("stream".to_string(), Value::Bool(true));
    for (key, value) in settings.default_params.iter().chain(extra.into_iter().flatten()) {
        body.insert(key.clone(), value.clone());
    }
    Value::Object(body)
}

// --- Client ---

/// A streaming chat client bound to one configured model.
pub struct ChatClient {
    provider: Provider,
    model_id: String,
    settings: ModelConfig,
    api_key: String,
    http: reqwest::Client,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("provider", &self.provider)
            .field("model_id", &self.model_id)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ChatClient {
    /// Build a client, selecting the provider from `settings.base_url`.
    pub fn new(
        model_id: impl Into<String>,
        settings: ModelConfig,
        api_key: impl Into<String>,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            provider: Provider::detect(&settings.base_url),
            model_id: model_id.into(),
            settings,
            api_key: api_key.into(),
            http,
        })
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// The configured model id (the key in `models.available`).
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn settings(&self) -> &ModelConfig {
        &self.settings
    }

    /// The JSON body `stream_chat` would send for `messages`.
    pub fn request_body(
        &self,
        messages: &[Message],
        extra: Option<&serde_json::Map<String, Value>>,
    ) -> Value {
        self.provider
            .dialect()
            .build_body(&self.settings, messages, extra)
    }

    /// Send `messages` and stream the reply into `sink`.
    ///
    /// Transport failures (connection errors, non-success status, an empty
    /// body, a broken stream) go to [`ChunkSink::on_error`]; this never fails
    /// on its own.
    pub async fn stream_chat<K: ChunkSink + ?Sized>(
        &self,
        messages: &[Message],
        sink: &mut K,
        extra: Option<&serde_json::Map<String, Value>>,
    ) {
        let dialect = self.provider.dialect();
        let body = self.request_body(messages, extra);
        let url = &self.settings.base_url;

        info!(
            provider = self.provider.name(),
            model = %self.settings.name,
            messages = messages.len(),
            "sending chat request"
        );

        let request = dialect
            .authorize(self.http.post(url), &self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(&body);

        let response = match request.send().await {
            Ok(response) => response,
            Err(source) => {
                let err = TransportError::Request {
                    url: url.clone(),
                    source,
                };
                warn!(error = %err, "chat request failed");
                sink.on_error(err.to_string());
                return;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = TransportError::Status {
                status: status.as_u16(),
                body: body.trim().to_string(),
            };
            warn!(error = %err, "chat request rejected");
            sink.on_error(err.to_string());
            return;
        }

        if response.content_length() == Some(0) {
            warn!("chat response has no body");
            sink.on_error(TransportError::MissingBody.to_string());
            return;
        }

        let summary =
            stream::decode_stream(response.bytes_stream(), dialect.extractor(), sink).await;
        if !summary.failed {
            debug!(chunks = summary.chunks, "chat stream complete");
            sink.on_done();
        }
    }
}
