//! Core data types used throughout chatdeck.
//!
//! This module defines the chat message and session types that flow
//! between the provider adapters, the session store and the controller.

use serde::{Deserialize, Serialize};

/// Title every session carries until its first user message arrives.
pub const DEFAULT_TITLE: &str = "New Chat";

/// Longest title (in characters) kept before it is cut and suffixed.
const TITLE_MAX_CHARS: usize = 30;

// --- Message Roles ---

/// The role of a message in the conversation.
///
/// Only two parties ever speak in a chat session:
/// - `User`: the human's input
/// - `Assistant`: the model's reply (or a warning standing in for it)
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

/// A single message in a chat session.
///
/// Finalized messages are never edited. The one exception is the
/// assistant placeholder, whose content grows while a reply streams in.
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

    /// Create an assistant message (text reply from the model).
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// --- Sessions ---

/// One independent, named conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    /// Creation time in unix milliseconds.
    pub created_at: i64,
}

impl ChatSession {
    /// Create an empty session with a fresh id, stamped with the current time.
    pub fn new() -> Self {
        Self {
            id: generate_session_id(),
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            created_at: now_millis(),
        }
    }

    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_TITLE
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Derive a session title from the first user message.
///
/// Titles longer than 30 characters are cut and suffixed with `...`.
pub fn derive_title(first_user_message: &str) -> String {
    let text = first_user_message.trim();
    if text.chars().count() > TITLE_MAX_CHARS {
        let head: String = text.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

/// Time-based id with a random suffix, e.g. `1760700000000-3f9a0c1e`.
pub fn generate_session_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", now_millis(), &suffix[..8])
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
