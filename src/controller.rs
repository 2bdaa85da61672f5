//! Streaming session controller - the core of chatdeck.
//!
//! The controller owns the working message list of the current session,
//! the "typing" flag and the selected model, and drives each send through
//! its states:
//!
//! ```text
//! Idle -> Sending -> Streaming -> Finalized | Failed -> Idle
//!          |            |
//!          |            +-- each delta lands in the placeholder
//!          +-- user message + empty placeholder appended and persisted
//! ```
//!
//! Deltas address the placeholder by (session id, index) captured when it
//! was inserted, so a reply keeps filling the right session even after the
//! user switches away; replies for deleted sessions are dropped.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::consent::Consent;
use crate::error::ControllerError;
use crate::llm::registry::ProviderRegistry;
use crate::session::SessionStore;
use crate::storage::Storage;
use crate::types::{ChatSession, Message, Role};

const GENERIC_ERROR: &str = "Something went wrong while contacting the model. Please try again.";

/// How a call to [`ChatController::send_message`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank input or no current session; nothing changed.
    Ignored,
    /// A reply is already streaming into this session; nothing changed.
    Busy,
    /// The reply finished (it may carry a provider warning).
    Completed,
    /// The adapter or model lookup failed; the placeholder holds the error.
    Failed,
}

/// Notifications for whoever renders the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Delta { session_id: String, text: String },
    Finished { session_id: String, outcome: SendOutcome },
}

struct ControllerState {
    store: SessionStore,
    /// Projection of the current session's messages.
    messages: Vec<Message>,
    is_typing: bool,
    current_model: String,
    /// Sessions with a reply currently streaming.
    in_flight: HashSet<String>,
    subscribers: Vec<mpsc::UnboundedSender<ChatEvent>>,
}

impl ControllerState {
    fn emit(&mut self, event: ChatEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn is_current(&self, session_id: &str) -> bool {
        self.store.current_id() == Some(session_id)
    }

    fn load_current_messages(&mut self) {
        self.messages = self.store.current_messages().to_vec();
    }
}

/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct ChatController {
    state: Arc<Mutex<ControllerState>>,
    registry: Arc<ProviderRegistry>,
}

impl ChatController {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        storage: Arc<dyn Storage>,
        model: impl Into<String>,
    ) -> Self {
        let store = SessionStore::open(storage);
        let messages = store.current_messages().to_vec();
        let current_model = model.into();
        if !registry.contains(&current_model) {
            warn!(model = %current_model, "selected model is not registered");
        }

        Self {
            state: Arc::new(Mutex::new(ControllerState {
                store,
                messages,
                is_typing: false,
                current_model,
                in_flight: HashSet::new(),
                subscribers: Vec::new(),
            })),
            registry,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // --- Read side ---

    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn is_typing(&self) -> bool {
        self.lock().is_typing
    }

    pub fn current_model(&self) -> String {
        self.lock().current_model.clone()
    }

    pub fn available_models(&self) -> Vec<String> {
        self.registry.available_models()
    }

    pub fn sessions(&self) -> Vec<ChatSession> {
        self.lock().store.sessions().to_vec()
    }

    pub fn current_session_id(&self) -> Option<String> {
        self.lock().store.current_id().map(str::to_string)
    }

    pub fn consent(&self) -> Consent {
        self.lock().store.consent()
    }

    /// Receive deltas and completion notices from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ChatEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(tx);
        rx
    }

    // --- Actions ---

    /// Select a model by display name. Adapter histories are left untouched.
    pub fn set_model(&self, name: &str) -> Result<(), ControllerError> {
        if !self.registry.contains(name) {
            return Err(ControllerError::UnknownModel(name.to_string()));
        }
        self.lock().current_model = name.to_string();
        info!(model = name, "model selected");
        Ok(())
    }

    pub fn create_new_chat(&self) -> String {
        let mut state = self.lock();
        let id = state.store.create_session();
        state.messages.clear();
        state.is_typing = false;
        id
    }

    /// Switch to another session. Unknown ids leave everything unchanged.
    ///
    /// A reply still streaming into the previous session keeps going; it
    /// just stops being shown.
    pub fn switch_session(&self, id: &str) -> bool {
        let mut state = self.lock();
        if !state.store.switch_session(id) {
            return false;
        }
        state.load_current_messages();
        state.is_typing = false;
        true
    }

    pub fn delete_session(&self, id: &str) -> bool {
        let mut state = self.lock();
        let was_current = state.is_current(id);
        if !state.store.delete_session(id) {
            return false;
        }
        state.in_flight.remove(id);
        if was_current {
            state.load_current_messages();
            state.is_typing = false;
        }
        drop(state);
        self.registry.forget_session(id);
        true
    }

    /// Record the persistence decision. Returns `false` if already decided.
    pub fn decide_consent(&self, granted: bool) -> bool {
        self.lock().store.decide_consent(granted)
    }

    /// Send a user message to the selected model and stream the reply into
    /// the current session.
    pub async fn send_message(&self, text: &str) -> SendOutcome {
        if text.trim().is_empty() {
            return SendOutcome::Ignored;
        }

        let (session_id, slot, model) = {
            let mut state = self.lock();
            let Some(session_id) = state.store.current_id().map(str::to_string) else {
                return SendOutcome::Ignored;
            };
            if state.in_flight.contains(&session_id) {
                debug!(session_id = %session_id, "send rejected, reply still streaming");
                return SendOutcome::Busy;
            }

            state.messages.push(Message::user(text));
            let slot = state.messages.len();
            state.messages.push(Message::assistant(""));
            state.is_typing = true;
            state.in_flight.insert(session_id.clone());

            let snapshot = state.messages.clone();
            state.store.replace_messages(&session_id, snapshot);
            (session_id, slot, state.current_model.clone())
        };

        let result = match self.registry.get(&model) {
            Some(provider) => {
                debug!(
                    session_id = %session_id,
                    model = %model,
                    provider = provider.name(),
                    "sending message"
                );
                let mut on_chunk = |delta: &str| self.apply_delta(&session_id, slot, delta);
                provider.chat_stream(&session_id, text, &mut on_chunk).await
            }
            None => Err(ControllerError::UnknownModel(model.clone()).into()),
        };

        let mut state = self.lock();
        // A reply must carry text or an error, never neither.
        let result = result.and_then(|()| {
            let empty = state
                .store
                .get(&session_id)
                .and_then(|session| session.messages.get(slot))
                .is_some_and(|placeholder| placeholder.content.is_empty());
            if empty {
                anyhow::bail!("the model returned an empty response");
            }
            Ok(())
        });
        let outcome = match result {
            Ok(()) => SendOutcome::Completed,
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "reply failed");
                let message = err.to_string();
                let content = if message.trim().is_empty() {
                    format!("⚠️ Error: {}", GENERIC_ERROR)
                } else {
                    format!("⚠️ Error: {}", message)
                };
                state.store.overwrite_message(&session_id, slot, &content);
                if state.is_current(&session_id) {
                    if let Some(placeholder) = state.messages.get_mut(slot) {
                        placeholder.content = content;
                    }
                }
                SendOutcome::Failed
            }
        };

        if state.store.get(&session_id).is_some() {
            state.store.persist();
        }
        state.in_flight.remove(&session_id);
        if state.is_current(&session_id) {
            state.is_typing = false;
        }
        state.emit(ChatEvent::Finished {
            session_id,
            outcome,
        });
        outcome
    }

    /// Apply one streamed delta to the placeholder at `slot` of `session_id`.
    fn apply_delta(&self, session_id: &str, slot: usize, delta: &str) {
        let mut state = self.lock();
        if !state.store.append_to_message(session_id, slot, delta) {
            debug!(session_id, "dropping delta for a session that no longer exists");
            return;
        }
        if state.is_current(session_id) {
            match state.messages.get_mut(slot) {
                Some(message) if message.role == Role::Assistant => message.content.push_str(delta),
                _ => warn!(session_id, slot, "working list out of step with session"),
            }
        }
        state.emit(ChatEvent::Delta {
            session_id: session_id.to_string(),
            text: delta.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{ScriptedProvider, SilentWire};
    use crate::llm::Assistant;
    use crate::storage::{decode_sessions, MemoryStorage, CONSENT_KEY, SESSIONS_KEY};
    use crate::types::DEFAULT_TITLE;
    use tokio::sync::Notify;

    fn rt() -> tokio::runtime::Runtime {
        tokio::runtime::Runtime::new().unwrap()
    }

    fn controller_with(providers: Vec<(&str, Arc<ScriptedProvider>)>) -> ChatController {
        controller_on(providers, Arc::new(MemoryStorage::new()))
    }

    fn controller_on(
        providers: Vec<(&str, Arc<ScriptedProvider>)>,
        storage: Arc<dyn Storage>,
    ) -> ChatController {
        let mut registry = ProviderRegistry::new();
        let first = providers.first().map(|(name, _)| name.to_string());
        for (name, provider) in providers {
            registry.register(name, provider);
        }
        ChatController::new(
            Arc::new(registry),
            storage,
            first.unwrap_or_else(|| "none".to_string()),
        )
    }

    #[test]
    fn test_streamed_reply_is_assembled() {
        rt().block_on(async {
            let provider = Arc::new(ScriptedProvider::replying(&["Hello", " World"]));
            let controller = controller_with(vec![("Groq", provider.clone())]);

            let outcome = controller.send_message("Hi AI").await;

            assert_eq!(outcome, SendOutcome::Completed);
            let messages = controller.messages();
            assert_eq!(messages.len(), 2);
            assert_eq!(messages[0], Message::user("Hi AI"));
            assert_eq!(messages[1], Message::assistant("Hello World"));
            assert!(!controller.is_typing());

            let session_id = controller.current_session_id().unwrap();
            assert_eq!(provider.calls(), [(session_id, "Hi AI".to_string())]);
        });
    }

    #[test]
    fn test_blank_input_is_noop() {
        rt().block_on(async {
            let provider = Arc::new(ScriptedProvider::replying(&["x"]));
            let controller = controller_with(vec![("Groq", provider.clone())]);

            for text in ["", "   ", "\n\t"] {
                assert_eq!(controller.send_message(text).await, SendOutcome::Ignored);
            }
            assert!(controller.messages().is_empty());
            assert!(!controller.is_typing());
            assert!(provider.calls().is_empty());
        });
    }

    #[test]
    fn test_user_content_is_kept_verbatim() {
        rt().block_on(async {
            let controller =
                controller_with(vec![("Groq", Arc::new(ScriptedProvider::replying(&["ok"])))]);
            controller.send_message("  padded  ").await;
            assert_eq!(controller.messages()[0].content, "  padded  ");
        });
    }

    #[test]
    fn test_title_set_once() {
        rt().block_on(async {
            let controller =
                controller_with(vec![("Groq", Arc::new(ScriptedProvider::replying(&["ok"])))]);

            controller.send_message("What is Rust?").await;
            controller.send_message("And what is Cargo?").await;

            let sessions = controller.sessions();
            assert_eq!(sessions[0].title, "What is Rust?");
            assert_eq!(sessions[0].messages.len(), 4);
        });
    }

    #[test]
    fn test_adapter_error_becomes_message() {
        rt().block_on(async {
            let controller = controller_with(vec![(
                "Groq",
                Arc::new(ScriptedProvider::failing_with("Network Error")),
            )]);

            let outcome = controller.send_message("Hi").await;

            assert_eq!(outcome, SendOutcome::Failed);
            let messages = controller.messages();
            assert_eq!(messages.len(), 2);
            assert_eq!(messages[1].content, "⚠️ Error: Network Error");
            assert!(messages[1].content.contains("Error"));
            assert!(!controller.is_typing());
            assert_eq!(controller.sessions()[0].messages[1].content, messages[1].content);
        });
    }

    #[test]
    fn test_adapter_error_with_empty_message_uses_fallback() {
        rt().block_on(async {
            let controller =
                controller_with(vec![("Groq", Arc::new(ScriptedProvider::failing_with("")))]);
            controller.send_message("Hi").await;
            assert_eq!(controller.messages()[1].content, format!("⚠️ Error: {}", GENERIC_ERROR));
        });
    }

    #[test]
    fn test_reply_without_text_never_stays_empty() {
        rt().block_on(async {
            let mut registry = ProviderRegistry::new();
            registry.register("Silent", Arc::new(Assistant::new(SilentWire)));
            registry.register("Mute", Arc::new(ScriptedProvider::replying(&[])));
            let controller =
                ChatController::new(Arc::new(registry), Arc::new(MemoryStorage::new()), "Silent");

            // built-in adapters answer with a warning
            assert_eq!(controller.send_message("Hi").await, SendOutcome::Completed);
            let reply = &controller.messages()[1];
            assert_eq!(reply.content, "\n\n⚠️ **System Error** - empty response from provider");

            // anything else is finalized as an error
            controller.set_model("Mute").unwrap();
            assert_eq!(controller.send_message("Hi again").await, SendOutcome::Failed);
            let messages = controller.messages();
            assert_eq!(messages[3].content, "⚠️ Error: the model returned an empty response");
            assert!(!controller.is_typing());
            assert_eq!(controller.sessions()[0].messages[3].content, messages[3].content);
        });
    }

    #[test]
    fn test_unknown_model_is_local_error() {
        rt().block_on(async {
            let controller = controller_on(vec![], Arc::new(MemoryStorage::new()));

            let outcome = controller.send_message("Hi").await;

            assert_eq!(outcome, SendOutcome::Failed);
            let messages = controller.messages();
            assert_eq!(messages[1].content, "⚠️ Error: model 'none' is not available");
            assert!(!controller.is_typing());
        });
    }

    #[test]
    fn test_switch_between_sessions() {
        rt().block_on(async {
            let controller =
                controller_with(vec![("Groq", Arc::new(ScriptedProvider::replying(&["ok"])))]);
            let a = controller.current_session_id().unwrap();
            controller.send_message("in A").await;
            assert_eq!(controller.messages().len(), 2);

            let b = controller.create_new_chat();
            assert!(controller.messages().is_empty());
            assert!(controller.switch_session(&a));
            assert_eq!(controller.messages().len(), 2);

            assert!(controller.switch_session(&b));
            assert!(controller.messages().is_empty());
            assert_eq!(controller.current_session_id(), Some(b));
        });
    }

    #[test]
    fn test_switch_to_unknown_is_noop() {
        rt().block_on(async {
            let controller =
                controller_with(vec![("Groq", Arc::new(ScriptedProvider::replying(&["ok"])))]);
            controller.send_message("keep me").await;
            let before = controller.current_session_id();

            assert!(!controller.switch_session("no-such-id"));
            assert_eq!(controller.current_session_id(), before);
            assert_eq!(controller.messages().len(), 2);
        });
    }

    #[test]
    fn test_delete_only_session_leaves_fresh_chat() {
        rt().block_on(async {
            let provider = Arc::new(ScriptedProvider::replying(&["ok"]));
            let controller = controller_with(vec![("Groq", provider.clone())]);
            controller.send_message("Session 1").await;
            let id = controller.current_session_id().unwrap();
            assert_eq!(controller.sessions()[0].title, "Session 1");

            assert!(controller.delete_session(&id));

            let sessions = controller.sessions();
            assert_eq!(sessions.len(), 1);
            assert_eq!(sessions[0].title, DEFAULT_TITLE);
            assert!(sessions[0].messages.is_empty());
            assert_eq!(controller.current_session_id(), Some(sessions[0].id.clone()));
            assert!(controller.messages().is_empty());
            assert_eq!(provider.forgotten(), [id]);
        });
    }

    #[test]
    fn test_set_model_validates_and_keeps_messages() {
        rt().block_on(async {
            let controller = controller_with(vec![
                ("Groq", Arc::new(ScriptedProvider::replying(&["from groq"]))),
                ("Claude", Arc::new(ScriptedProvider::replying(&["from claude"]))),
            ]);
            controller.send_message("one").await;

            assert_eq!(
                controller.set_model("Nope"),
                Err(ControllerError::UnknownModel("Nope".to_string()))
            );
            assert_eq!(controller.current_model(), "Groq");

            controller.set_model("Claude").unwrap();
            assert_eq!(controller.messages().len(), 2);
            controller.send_message("two").await;
            assert_eq!(controller.messages()[3].content, "from claude");
            assert_eq!(controller.available_models(), ["Groq", "Claude"]);
        });
    }

    #[test]
    fn test_busy_guard_rejects_overlapping_send() {
        rt().block_on(async {
            let reached = Arc::new(Notify::new());
            let resume = Arc::new(Notify::new());
            let provider = Arc::new(
                ScriptedProvider::replying(&["Hello", " World"])
                    .pausing_after_first(reached.clone(), resume.clone()),
            );
            let controller = controller_with(vec![("Groq", provider.clone())]);

            let background = controller.clone();
            let first = tokio::spawn(async move { background.send_message("first").await });
            reached.notified().await;

            assert!(controller.is_typing());
            assert_eq!(controller.messages()[1].content, "Hello");
            assert_eq!(controller.send_message("second").await, SendOutcome::Busy);
            assert_eq!(controller.messages().len(), 2);

            resume.notify_one();
            assert_eq!(first.await.unwrap(), SendOutcome::Completed);
            assert_eq!(controller.messages()[1].content, "Hello World");
            assert!(!controller.is_typing());
            assert_eq!(provider.calls().len(), 1);
        });
    }

    #[test]
    fn test_reply_keeps_filling_original_session_after_switch() {
        rt().block_on(async {
            let reached = Arc::new(Notify::new());
            let resume = Arc::new(Notify::new());
            let provider = Arc::new(
                ScriptedProvider::replying(&["Hello", " World"])
                    .pausing_after_first(reached.clone(), resume.clone()),
            );
            let controller = controller_with(vec![("Groq", provider)]);
            let a = controller.current_session_id().unwrap();

            let background = controller.clone();
            let first = tokio::spawn(async move { background.send_message("in A").await });
            reached.notified().await;

            let b = controller.create_new_chat();
            assert!(!controller.is_typing());
            resume.notify_one();
            first.await.unwrap();

            // B's working list never saw A's reply
            assert_eq!(controller.current_session_id(), Some(b));
            assert!(controller.messages().is_empty());
            assert!(!controller.is_typing());

            controller.switch_session(&a);
            assert_eq!(controller.messages()[1].content, "Hello World");
        });
    }

    #[test]
    fn test_reply_for_deleted_session_is_dropped() {
        rt().block_on(async {
            let reached = Arc::new(Notify::new());
            let resume = Arc::new(Notify::new());
            let provider = Arc::new(
                ScriptedProvider::replying(&["Hello", " World"])
                    .pausing_after_first(reached.clone(), resume.clone()),
            );
            let controller = controller_with(vec![("Groq", provider)]);
            let a = controller.current_session_id().unwrap();
            let b = controller.create_new_chat();
            controller.switch_session(&a);

            let background = controller.clone();
            let first = tokio::spawn(async move { background.send_message("doomed").await });
            reached.notified().await;

            controller.delete_session(&a);
            resume.notify_one();
            first.await.unwrap();

            assert_eq!(controller.current_session_id(), Some(b));
            assert_eq!(controller.sessions().len(), 1);
            assert!(controller.messages().is_empty());
        });
    }

    #[test]
    fn test_events_are_published() {
        rt().block_on(async {
            let controller = controller_with(vec![(
                "Groq",
                Arc::new(ScriptedProvider::replying(&["Hello", " World"])),
            )]);
            let mut events = controller.subscribe();
            let id = controller.current_session_id().unwrap();

            controller.send_message("Hi").await;

            let mut received = Vec::new();
            while let Ok(event) = events.try_recv() {
                received.push(event);
            }
            assert_eq!(
                received,
                [
                    ChatEvent::Delta { session_id: id.clone(), text: "Hello".to_string() },
                    ChatEvent::Delta { session_id: id.clone(), text: " World".to_string() },
                    ChatEvent::Finished { session_id: id, outcome: SendOutcome::Completed },
                ]
            );
        });
    }

    #[test]
    fn test_persists_placeholder_and_final_reply() {
        rt().block_on(async {
            let storage = Arc::new(MemoryStorage::new());
            storage.set(CONSENT_KEY, "true").unwrap();
            let reached = Arc::new(Notify::new());
            let resume = Arc::new(Notify::new());
            let provider = Arc::new(
                ScriptedProvider::replying(&["Hello", " World"])
                    .pausing_after_first(reached.clone(), resume.clone()),
            );
            let controller = controller_on(vec![("Groq", provider)], storage.clone());

            let background = controller.clone();
            let first = tokio::spawn(async move { background.send_message("Hi AI").await });
            reached.notified().await;

            // the sent text is saved before the reply arrives
            let saved = decode_sessions(&storage.get(SESSIONS_KEY).unwrap().unwrap()).unwrap();
            assert_eq!(saved[0].messages[0], Message::user("Hi AI"));
            assert_eq!(saved[0].messages[1], Message::assistant(""));

            resume.notify_one();
            first.await.unwrap();

            let saved = decode_sessions(&storage.get(SESSIONS_KEY).unwrap().unwrap()).unwrap();
            assert_eq!(saved[0].messages[1], Message::assistant("Hello World"));
            assert_eq!(saved[0].title, "Hi AI");
        });
    }

    #[test]
    fn test_sessions_survive_restart_with_consent() {
        rt().block_on(async {
            let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
            let provider = Arc::new(ScriptedProvider::replying(&["ok"]));

            let controller = controller_on(vec![("Groq", provider.clone())], storage.clone());
            assert_eq!(controller.consent(), Consent::Undecided);
            controller.send_message("remember me").await;
            assert!(controller.decide_consent(true));

            let restarted = controller_on(vec![("Groq", provider)], storage);
            assert_eq!(restarted.consent(), Consent::Granted);
            assert_eq!(restarted.sessions(), controller.sessions());
            assert_eq!(restarted.messages().len(), 2);
        });
    }
}
