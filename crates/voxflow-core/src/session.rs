//! Session model and in-memory registry.
//!
//! The registry is the authoritative table of in-flight sessions. It is
//! explicit shared state injected where needed — constructed at startup,
//! dropped at shutdown — never an ambient global.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Interrupted,
    Completed,
}

/// One in-flight session, identified by `(hardware_id, session_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub hardware_id: String,
    pub session_id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// In-memory session table. At most one active session per `session_id`.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session, or refresh the existing one for this `session_id`.
    pub fn create(&self, hardware_id: &str, session_id: &str) -> Session {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .entry(session_id.to_string())
            .and_modify(|s| {
                s.hardware_id = hardware_id.to_string();
                s.status = SessionStatus::Active;
                s.last_activity_at = now;
            })
            .or_insert_with(|| Session {
                hardware_id: hardware_id.to_string(),
                session_id: session_id.to_string(),
                status: SessionStatus::Active,
                created_at: now,
                last_activity_at: now,
            });
        session.clone()
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }

    /// All sessions belonging to a hardware identity.
    pub fn list_by_hardware(&self, hardware_id: &str) -> Vec<Session> {
        self.sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.hardware_id == hardware_id)
            .cloned()
            .collect()
    }

    /// Bump `last_activity_at` on every chunk.
    pub fn touch(&self, session_id: &str) {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(session_id) {
            session.last_activity_at = Utc::now();
        }
    }

    /// Mark every active session for this hardware identity as interrupted.
    /// Returns the ids that transitioned.
    pub fn mark_interrupted(&self, hardware_id: &str) -> Vec<String> {
        let mut marked = Vec::new();
        let mut sessions = self.sessions.lock().unwrap();
        for session in sessions.values_mut() {
            if session.hardware_id == hardware_id && session.status == SessionStatus::Active {
                session.status = SessionStatus::Interrupted;
                session.last_activity_at = Utc::now();
                marked.push(session.session_id.clone());
            }
        }
        marked
    }

    pub fn mark_completed(&self, session_id: &str) {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(session_id) {
            session.status = SessionStatus::Completed;
            session.last_activity_at = Utc::now();
        }
    }

    pub fn remove(&self, session_id: &str) -> Option<Session> {
        let removed = self.sessions.lock().unwrap().remove(session_id);
        if removed.is_some() {
            debug!(session_id, "Session removed");
        }
        removed
    }

    /// Drop interrupted/completed sessions for a hardware identity. Called by
    /// the interrupt cleanup sweep.
    pub fn remove_finished(&self, hardware_id: &str) -> usize {
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|_, s| {
            s.hardware_id != hardware_id || s.status == SessionStatus::Active
        });
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().unwrap().is_empty()
    }
}
