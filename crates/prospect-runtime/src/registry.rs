//! The session registry — ordered, newest-first source of truth.
//!
//! A plain collection: the controller wraps every mutation so the session
//! list and selector options are republished on each change. Callers must
//! go through that wrapper — mutating a `Session` clone without pushing it
//! back desyncs the view.

use prospect_core::session::{Session, SessionId, SessionStatus};

/// Ordered collection of session summaries.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Vec<Session>,
}

impl SessionRegistry {
    pub fn new(initial: Vec<Session>) -> Self {
        Self { sessions: initial }
    }

    /// Prepend a new session (newest first).
    pub fn add(&mut self, session: Session) {
        self.sessions.insert(0, session);
    }

    /// Replace an existing session by id. No-op when absent — inserts go
    /// through [`add`](Self::add) explicitly.
    pub fn upsert(&mut self, session: Session) -> bool {
        match self.sessions.iter_mut().find(|s| s.id == session.id) {
            Some(slot) => {
                *slot = session;
                true
            }
            None => false,
        }
    }

    /// Remove by id, returning the removed session.
    pub fn remove(&mut self, id: &str) -> Option<Session> {
        let index = self.sessions.iter().position(|s| s.id == id)?;
        Some(self.sessions.remove(index))
    }

    pub fn find(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|s| s.id.clone()).collect()
    }

    pub fn snapshot(&self) -> Vec<Session> {
        self.sessions.clone()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn any_ongoing(&self) -> bool {
        self.sessions.iter().any(|s| s.status == SessionStatus::Ongoing)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
