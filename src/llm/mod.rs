//! LLM provider adapters.
//!
//! This module defines the `LlmProvider` trait that the controller talks to,
//! and the shared adapter core that every vendor plugs into.
//!
//! Key concepts:
//! - **LlmProvider**: "send a message, receive a stream of text chunks".
//!   Chunks are raw deltas, delivered in arrival order.
//! - **Wire**: one vendor's request/response format. A wire only knows how
//!   to turn a conversation into a stream of text deltas or a classified
//!   [`ProviderError`].
//! - **Assistant**: wraps a wire with per-session conversation history and
//!   the failure policy. Failures are emitted as a single warning chunk and
//!   the call still resolves; `chat_stream` never returns an error for
//!   provider trouble.

pub mod anthropic;
pub mod gemini;
pub mod openai_compatible;
pub mod registry;
pub mod sse;

#[cfg(test)]
pub mod mock;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::types::Message;

/// Receives each text delta as it arrives.
pub type ChunkSink<'a> = dyn FnMut(&str) + Send + 'a;

/// A stream of text deltas from one upstream request.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Trait that all chat adapters implement.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send `content` as the next user turn of `session_id`'s conversation,
    /// calling `on_chunk` once per streamed text delta.
    ///
    /// Built-in adapters always return `Ok`; an `Err` is only expected from
    /// adapters that do not follow that policy.
    async fn chat_stream(
        &self,
        session_id: &str,
        content: &str,
        on_chunk: &mut ChunkSink<'_>,
    ) -> Result<()>;

    /// Drop any conversation history kept for `session_id`.
    fn forget(&self, session_id: &str);

    /// Return the provider's display name (for logging).
    fn name(&self) -> &str;
}

/// One vendor's streaming wire format.
pub trait Wire: Send + Sync {
    /// Vendor name used in warnings, e.g. "Anthropic".
    fn vendor(&self) -> &str;

    /// Start a streaming request for the given conversation, whose last
    /// entry is the new user turn.
    fn open(&self, history: &[Message]) -> Result<DeltaStream, ProviderError>;
}

/// Shared adapter core: history bookkeeping and the failure policy.
pub struct Assistant<W> {
    wire: W,
    histories: Mutex<HashMap<String, Vec<Message>>>,
}

impl<W: Wire> Assistant<W> {
    pub fn new(wire: W) -> Self {
        Self {
            wire,
            histories: Mutex::new(HashMap::new()),
        }
    }

    fn histories(&self) -> MutexGuard<'_, HashMap<String, Vec<Message>>> {
        self.histories
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Conversation recorded so far for a session.
    #[cfg(test)]
    pub fn history(&self, session_id: &str) -> Vec<Message> {
        self.histories()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn stream_reply(
        &self,
        history: &[Message],
        reply: &mut String,
        on_chunk: &mut ChunkSink<'_>,
    ) -> Result<(), ProviderError> {
        let mut stream = self.wire.open(history)?;
        while let Some(delta) = stream.next().await {
            let delta = delta?;
            if delta.is_empty() {
                continue;
            }
            reply.push_str(&delta);
            on_chunk(&delta);
        }
        Ok(())
    }
}

#[async_trait]
impl<W: Wire> LlmProvider for Assistant<W> {
    async fn chat_stream(
        &self,
        session_id: &str,
        content: &str,
        on_chunk: &mut ChunkSink<'_>,
    ) -> Result<()> {
        let history = {
            let mut histories = self.histories();
            let history = histories.entry(session_id.to_string()).or_default();
            history.push(Message::user(content));
            history.clone()
        };

        let mut reply = String::new();
        let result = match self.stream_reply(&history, &mut reply, on_chunk).await {
            Ok(()) if reply.is_empty() => Err(ProviderError::Other(
                "empty response from provider".to_string(),
            )),
            other => other,
        };
        let recorded = match result {
            Ok(()) => {
                debug!(vendor = self.wire.vendor(), chars = reply.len(), "stream completed");
                reply
            }
            Err(err) => {
                warn!(vendor = self.wire.vendor(), error = %err, "provider call failed");
                let warning = err.warning(self.wire.vendor());
                on_chunk(&warning);
                warning
            }
        };

        // The session may have been forgotten while the reply streamed.
        if let Some(history) = self.histories().get_mut(session_id) {
            history.push(Message::assistant(recorded));
        }
        Ok(())
    }

    fn forget(&self, session_id: &str) {
        self.histories().remove(session_id);
    }

    fn name(&self) -> &str {
        self.wire.vendor()
    }
}
