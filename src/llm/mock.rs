//! Scripted provider and wire for tests.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::Notify;

use super::{ChunkSink, DeltaStream, LlmProvider, Wire};
use crate::error::ProviderError;
use crate::types::Message;

/// Run one round against `provider` and collect every chunk it emits.
pub async fn collect_chunks(provider: &dyn LlmProvider, session_id: &str, text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut sink = |delta: &str| chunks.push(delta.to_string());
    provider
        .chat_stream(session_id, text, &mut sink)
        .await
        .unwrap();
    chunks
}

/// Wire whose streams end without producing any text.
pub struct SilentWire;

impl Wire for SilentWire {
    fn vendor(&self) -> &str {
        "Silent"
    }

    fn open(&self, _history: &[Message]) -> Result<DeltaStream, ProviderError> {
        Ok(Box::pin(stream::empty::<Result<String, ProviderError>>()))
    }
}

/// Emits a fixed list of chunks, optionally pausing after the first one
/// and optionally failing at the end.
pub struct ScriptedProvider {
    name: String,
    chunks: Vec<String>,
    failure: Option<String>,
    /// (signalled after the first chunk, awaited before the rest)
    pause: Option<(Arc<Notify>, Arc<Notify>)>,
    calls: Mutex<Vec<(String, String)>>,
    forgotten: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn replying(chunks: &[&str]) -> Self {
        Self {
            name: "scripted".to_string(),
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            failure: None,
            pause: None,
            calls: Mutex::new(Vec::new()),
            forgotten: Mutex::new(Vec::new()),
        }
    }

    /// Returns an error instead of resolving, like an adapter that rethrows.
    pub fn failing_with(message: &str) -> Self {
        let mut provider = Self::replying(&[]);
        provider.failure = Some(message.to_string());
        provider
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn pausing_after_first(mut self, reached: Arc<Notify>, resume: Arc<Notify>) -> Self {
        self.pause = Some((reached, resume));
        self
    }

    /// (session id, content) of every call so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn forgotten(&self) -> Vec<String> {
        self.forgotten.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat_stream(
        &self,
        session_id: &str,
        content: &str,
        on_chunk: &mut ChunkSink<'_>,
    ) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((session_id.to_string(), content.to_string()));

        for (i, chunk) in self.chunks.iter().enumerate() {
            on_chunk(chunk);
            if i == 0 {
                if let Some((reached, resume)) = &self.pause {
                    reached.notify_one();
                    resume.notified().await;
                }
            }
        }

        if let Some(message) = &self.failure {
            anyhow::bail!("{}", message);
        }
        Ok(())
    }

    fn forget(&self, session_id: &str) {
        self.forgotten.lock().unwrap().push(session_id.to_string());
    }

    fn name(&self) -> &str {
        &self.name
    }
}
