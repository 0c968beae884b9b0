//! Chat session engine.
//!
//! A [`ChatSession`] owns the conversation state and the active client:
//!
//! ```text
//! send_message(text)
//!     |
//!     v
//! append user message --> stream_chat(history) --> fold each chunk
//!                                 |                      |
//!                                 v                      v
//!                          error recorded       last assistant message
//! ```
//!
//! Only one request may be in flight per session. A send while another is
//! still streaming is rejected with [`SendOutcome::Busy`] instead of
//! interleaving two replies into the same message.

use serde_json::Value;
use tracing::{debug, warn};

use crate::llm::{ChatClient, ChunkSink};
use crate::types::{ChatState, Message};

const CLIENT_UNAVAILABLE: &str = "API client is not initialized";

/// How a [`ChatSession::send_message`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The reply streamed to completion.
    Completed,
    /// The request or stream failed; the error is in [`ChatState::error`].
    Failed,
    /// No client was available, so nothing was sent.
    ClientUnavailable,
    /// Another request is still in flight; the message was not added.
    Busy,
}

/// Holds the conversation and the client used to continue it.
#[derive(Debug, Default)]
pub struct ChatSession {
    state: ChatState,
    client: Option<ChatClient>,
}

impl ChatSession {
    /// A session with no client yet (still initializing).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: ChatClient) -> Self {
        Self {
            state: ChatState::new(),
            client: Some(client),
        }
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn messages(&self) -> &[Message] {
        &self.state.messages
    }

    pub fn is_loading(&self) -> bool {
        self.state.is_loading
    }

    pub fn error(&self) -> Option<&str> {
        self.state.error.as_deref()
    }

    pub fn client(&self) -> Option<&ChatClient> {
        self.client.as_ref()
    }

    /// Switch to another model's client. History is kept.
    pub fn set_client(&mut self, client: ChatClient) {
        debug!(model = client.model_id(), "switching chat client");
        self.client = Some(client);
    }

    /// Forget the conversation and any error.
    pub fn clear(&mut self) {
        self.state.messages.clear();
        self.state.error = None;
    }

    pub fn append_user_message(&mut self, text: impl Into<String>) {
        self.state.append_user_message(text);
    }

    pub fn fold_assistant_chunk(&mut self, text: &str) {
        self.state.fold_assistant_chunk(text);
    }

    /// Send `text` and fold the streamed reply into the history.
    pub async fn send_message(
        &mut self,
        text: &str,
        extra: Option<&serde_json::Map<String, Value>>,
    ) -> SendOutcome {
        self.send_message_with(text, extra, &mut Discard).await
    }

    /// Like [`send_message`](Self::send_message), also forwarding every
    /// stream event to `observer` as it is folded.
    pub async fn send_message_with<O: ChunkSink + ?Sized>(
        &mut self,
        text: &str,
        extra: Option<&serde_json::Map<String, Value>>,
        observer: &mut O,
    ) -> SendOutcome {
        if self.state.is_loading {
            warn!("rejecting message while a reply is still streaming");
            return SendOutcome::Busy;
        }

        self.state.append_user_message(text);
        self.state.error = None;

        let Some(client) = self.client.as_ref() else {
            warn!("no chat client available");
            self.state.error = Some(CLIENT_UNAVAILABLE.to_string());
            return SendOutcome::ClientUnavailable;
        };

        self.state.is_loading = true;
        let history = self.state.messages.clone();
        let mut sink = FoldSink {
            state: &mut self.state,
            observer,
            failed: false,
        };
        client.stream_chat(&history, &mut sink, extra).await;

        if sink.failed {
            SendOutcome::Failed
        } else {
            SendOutcome::Completed
        }
    }
}

/// Folds chunks into the session state and clears the loading flag when
/// dropped, including when the send future is dropped mid-stream.
struct FoldSink<'a, O: ChunkSink + ?Sized> {
    state: &'a mut ChatState,
    observer: &'a mut O,
    failed: bool,
}

impl<O: ChunkSink + ?Sized> ChunkSink for FoldSink<'_, O> {
    fn on_chunk(&mut self, text: &str) {
        self.state.fold_assistant_chunk(text);
        self.observer.on_chunk(text);
    }

    fn on_error(&mut self, message: String) {
        self.failed = true;
        self.state.error = Some(message.clone());
        self.observer.on_error(message);
    }

    fn on_done(&mut self) {
        self.observer.on_done();
    }
}

impl<O: ChunkSink + ?Sized> Drop for FoldSink<'_, O> {
    fn drop(&mut self) {
        self.state.is_loading = false;
    }
}

struct Discard;

impl ChunkSink for Discard {
    fn on_chunk(&mut self, _text: &str) {}

    fn on_error(&mut self, _message: String) {}
}
