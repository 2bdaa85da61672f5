//! Session persistence and multi-session management.
//!
//! The store owns every [`ChatSession`] and the notion of which one is
//! current. Whenever it holds sessions, exactly one of them is current;
//! removing the last session immediately creates a replacement.

use std::sync::Arc;

use chrono::{Local, TimeZone};
use tracing::{debug, info, warn};

use crate::consent::{Consent, ConsentGate};
use crate::storage::{decode_sessions, encode_sessions, Storage, CONSENT_KEY, SESSIONS_KEY};
use crate::types::{derive_title, ChatSession, Message, Role};

const DAY_MILLIS: i64 = 86_400_000;

pub struct SessionStore {
    /// Most recently created first.
    sessions: Vec<ChatSession>,
    current_id: Option<String>,
    storage: Arc<dyn Storage>,
    consent: ConsentGate,
}

impl SessionStore {
    /// Open the store, restoring saved sessions when consent was granted earlier.
    ///
    /// Missing or corrupt data starts a fresh session instead of failing.
    pub fn open(storage: Arc<dyn Storage>) -> Self {
        let consent = ConsentGate::load(storage.as_ref());
        let sessions = if consent.allows_persistence() {
            load_sessions(storage.as_ref())
        } else {
            Vec::new()
        };

        let mut store = Self {
            current_id: sessions.first().map(|s| s.id.clone()),
            sessions,
            storage,
            consent,
        };
        if store.sessions.is_empty() {
            store.create_session();
        }
        info!(
            sessions = store.sessions.len(),
            consent = ?store.consent.state(),
            "session store opened"
        );
        store
    }

    pub fn sessions(&self) -> &[ChatSession] {
        &self.sessions
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current_id.as_deref()
    }

    pub fn get(&self, id: &str) -> Option<&ChatSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut ChatSession> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    /// Messages of the current session.
    pub fn current_messages(&self) -> &[Message] {
        self.current_id
            .as_deref()
            .and_then(|id| self.get(id))
            .map(|s| s.messages.as_slice())
            .unwrap_or(&[])
    }

    /// Insert a new empty session at the front and make it current.
    pub fn create_session(&mut self) -> String {
        let session = ChatSession::new();
        let id = session.id.clone();
        self.sessions.insert(0, session);
        self.current_id = Some(id.clone());
        debug!(session_id = %id, "created session");
        self.persist();
        id
    }

    /// Make `id` current. Returns `false` for unknown ids, leaving everything as is.
    pub fn switch_session(&mut self, id: &str) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        self.current_id = Some(id.to_string());
        true
    }

    /// Remove a session. Returns `false` for unknown ids.
    ///
    /// Deleting the current session promotes the most recently created
    /// survivor, or a brand-new session when none remain.
    pub fn delete_session(&mut self, id: &str) -> bool {
        let Some(pos) = self.sessions.iter().position(|s| s.id == id) else {
            return false;
        };
        self.sessions.remove(pos);
        debug!(session_id = %id, "deleted session");

        if self.current_id.as_deref() == Some(id) {
            match self.sessions.first() {
                Some(next) => self.current_id = Some(next.id.clone()),
                None => {
                    // create_session persists on its own
                    self.create_session();
                    return true;
                }
            }
        }
        self.persist();
        true
    }

    /// Write a session's full message list back and persist.
    ///
    /// The title is derived here, once, when the session first gains messages.
    pub fn replace_messages(&mut self, id: &str, messages: Vec<Message>) -> bool {
        let Some(session) = self.get_mut(id) else {
            return false;
        };
        if session.messages.is_empty() && !messages.is_empty() && session.has_default_title() {
            if let Some(first) = messages.iter().find(|m| m.role == Role::User) {
                session.title = derive_title(&first.content);
            }
        }
        session.messages = messages;
        self.persist();
        true
    }

    /// Append a streamed delta to the assistant message at `index`. In memory only.
    pub fn append_to_message(&mut self, id: &str, index: usize, delta: &str) -> bool {
        match self.assistant_message_mut(id, index) {
            Some(message) => {
                message.content.push_str(delta);
                true
            }
            None => false,
        }
    }

    /// Replace the content of the assistant message at `index`. In memory only.
    pub fn overwrite_message(&mut self, id: &str, index: usize, content: &str) -> bool {
        match self.assistant_message_mut(id, index) {
            Some(message) => {
                message.content = content.to_string();
                true
            }
            None => false,
        }
    }

    fn assistant_message_mut(&mut self, id: &str, index: usize) -> Option<&mut Message> {
        self.get_mut(id)?
            .messages
            .get_mut(index)
            .filter(|m| m.role == Role::Assistant)
    }

    pub fn consent(&self) -> Consent {
        self.consent.state()
    }

    /// Apply the user's consent decision. Returns `false` if it was already decided.
    ///
    /// Granting writes the in-memory sessions right away; denying wipes any
    /// saved sessions. The decision itself is stored either way.
    pub fn decide_consent(&mut self, granted: bool) -> bool {
        if !self.consent.decide(granted) {
            return false;
        }
        if let Some(value) = self.consent.stored_value() {
            if let Err(e) = self.storage.set(CONSENT_KEY, value) {
                warn!(error = %e, "failed to store consent decision");
            }
        }
        if granted {
            self.persist();
        } else if let Err(e) = self.storage.remove(SESSIONS_KEY) {
            warn!(error = %e, "failed to clear saved sessions");
        }
        info!(granted, "consent decided");
        true
    }

    /// Write every session to storage, if consent allows. Failures are logged and dropped.
    pub fn persist(&self) {
        if !self.consent.allows_persistence() {
            return;
        }
        let result =
            encode_sessions(&self.sessions).and_then(|encoded| self.storage.set(SESSIONS_KEY, &encoded));
        match result {
            Ok(()) => debug!(sessions = self.sessions.len(), "sessions persisted"),
            Err(e) => warn!(error = %e, "failed to persist sessions, keeping them in memory"),
        }
    }
}

fn load_sessions(storage: &dyn Storage) -> Vec<ChatSession> {
    match storage.get(SESSIONS_KEY) {
        Ok(Some(encoded)) => match decode_sessions(&encoded) {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "discarding unreadable saved sessions");
                Vec::new()
            }
        },
        Ok(None) => Vec::new(),
        Err(e) => {
            warn!(error = %e, "failed to read saved sessions");
            Vec::new()
        }
    }
}

// --- Grouping ---

/// A labelled bucket of sessions for display.
#[derive(Debug)]
pub struct SessionGroup<'a> {
    pub label: &'static str,
    pub sessions: Vec<&'a ChatSession>,
}

/// Group sessions by creation day relative to the local start of today.
pub fn group_sessions(sessions: &[ChatSession]) -> Vec<SessionGroup<'_>> {
    let today = Local::now().date_naive();
    let start_of_today = today
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| Local.from_local_datetime(&midnight).earliest())
        .map(|dt| dt.timestamp_millis())
        .unwrap_or_else(|| Local::now().timestamp_millis());
    group_sessions_at(sessions, start_of_today)
}

/// Buckets: Today, Yesterday, Previous 7 Days, Older. Empty buckets are dropped.
pub fn group_sessions_at(sessions: &[ChatSession], start_of_today: i64) -> Vec<SessionGroup<'_>> {
    let yesterday = start_of_today - DAY_MILLIS;
    let week_ago = start_of_today - DAY_MILLIS * 7;

    let mut groups = vec![
        SessionGroup { label: "Today", sessions: vec![] },
        SessionGroup { label: "Yesterday", sessions: vec![] },
        SessionGroup { label: "Previous 7 Days", sessions: vec![] },
        SessionGroup { label: "Older", sessions: vec![] },
    ];

    for session in sessions {
        let bucket = if session.created_at >= start_of_today {
            0
        } else if session.created_at >= yesterday {
            1
        } else if session.created_at >= week_ago {
            2
        } else {
            3
        };
        groups[bucket].sessions.push(session);
    }

    groups.retain(|g| !g.sessions.is_empty());
    groups
}
