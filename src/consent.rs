//! One-time consent decision gating session persistence.

use tracing::warn;

use crate::storage::{Storage, CONSENT_KEY};

/// Whether the user agreed to keep chats across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consent {
    /// No decision yet: sessions live in memory only.
    Undecided,
    Granted,
    Denied,
}

/// Holds the consent state. A decision is final for the lifetime of the gate.
#[derive(Debug, Clone)]
pub struct ConsentGate {
    state: Consent,
}

impl ConsentGate {
    pub fn new(state: Consent) -> Self {
        Self { state }
    }

    /// Read a previously stored decision. Unreadable or unknown values count as undecided.
    pub fn load(storage: &dyn Storage) -> Self {
        let state = match storage.get(CONSENT_KEY) {
            Ok(Some(value)) => match value.trim() {
                "true" => Consent::Granted,
                "false" => Consent::Denied,
                other => {
                    warn!(value = other, "ignoring unrecognized consent value");
                    Consent::Undecided
                }
            },
            Ok(None) => Consent::Undecided,
            Err(e) => {
                warn!(error = %e, "failed to read consent decision");
                Consent::Undecided
            }
        };
        Self::new(state)
    }

    pub fn state(&self) -> Consent {
        self.state
    }

    pub fn allows_persistence(&self) -> bool {
        self.state == Consent::Granted
    }

    /// Record a decision. Returns `false` (and changes nothing) if one was already made.
    pub fn decide(&mut self, granted: bool) -> bool {
        if self.state != Consent::Undecided {
            return false;
        }
        self.state = if granted {
            Consent::Granted
        } else {
            Consent::Denied
        };
        true
    }

    /// Slot value for a decided state.
    pub fn stored_value(&self) -> Option<&'static str> {
        match self.state {
            Consent::Granted => Some("true"),
            Consent::Denied => Some("false"),
            Consent::Undecided => None,
        }
    }
}
