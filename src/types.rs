//! Core data types used throughout modelchat.
//!
//! This module defines the conversation message types, the chat state
//! the session engine owns, and the chunk type streamed out of a provider.

use serde::{Deserialize, Serialize};

// --- Message Roles ---

/// The role of a message in the conversation.
///
/// Only two roles exist in a chat session:
/// - `User`: the human's input
/// - `Assistant`: the model's reply, grown in place while it streams
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

// --- Messages ---

/// A single message in the conversation history.
///
/// Serializes to the `{ "role": ..., "content": ... }` shape every provider
/// accepts, so the history can be sent verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// --- Chat State ---

/// State of one chat session.
///
/// The message list is append-only, except that the final assistant
/// message grows in place while its reply streams in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatState {
    pub messages: Vec<Message>,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last message, if any.
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn append_user_message(&mut self, text: impl Into<String>) {
        self.messages.push(Message::user(text));
    }

    /// Append streamed text to the assistant reply in progress, starting a
    /// new assistant message if the last one is not an assistant turn.
    pub fn fold_assistant_chunk(&mut self, text: &str) {
        match self.messages.last_mut() {
            Some(last) if last.role == Role::Assistant => last.content.push_str(text),
            _ => self.messages.push(Message::assistant(text)),
        }
    }
}

// --- Stream Chunk ---

/// A single event from a streaming chat response.
///
/// Used when a stream is forwarded over a channel instead of being
/// folded directly into a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    /// A piece of text content
    TextDelta(String),
    /// The request or stream failed
    Error(String),
    /// The stream is complete
    Done,
}
