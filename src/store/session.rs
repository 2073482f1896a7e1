//! Session store: conversation history and per-session context.
//!
//! A single mutex guards the whole map, so every operation is linearizable
//! with respect to every other. Sessions live only for the process lifetime.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::llm::Role;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub metadata: Map<String, Value>,
    pub history: Vec<Message>,
    pub context: Map<String, Value>,
}

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().expect("session store lock poisoned")
    }

    pub fn create(&self, metadata: Option<Map<String, Value>>) -> Session {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            last_activity: now,
            metadata: metadata.unwrap_or_default(),
            history: Vec::new(),
            context: Map::new(),
        };
        self.locked().insert(session.id.clone(), session.clone());
        session
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.locked().get(id).cloned()
    }

    /// Merge metadata and/or context into the session. Returns false if unknown.
    pub fn update(
        &self,
        id: &str,
        metadata: Option<Map<String, Value>>,
        context: Option<Map<String, Value>>,
    ) -> bool {
        let mut sessions = self.locked();
        let Some(session) = sessions.get_mut(id) else {
            return false;
        };
        session.last_activity = Utc::now();
        if let Some(meta) = metadata {
            session.metadata.extend(meta);
        }
        if let Some(ctx) = context {
            session.context.extend(ctx);
        }
        true
    }

    pub fn delete(&self, id: &str) -> bool {
        self.locked().remove(id).is_some()
    }

    /// Append a message to the conversation history. Messages are immutable
    /// once appended and their order is never changed.
    pub fn append_message(
        &self,
        id: &str,
        role: Role,
        content: impl Into<String>,
        metadata: Option<Value>,
    ) -> bool {
        let mut sessions = self.locked();
        let Some(session) = sessions.get_mut(id) else {
            return false;
        };
        let now = Utc::now();
        session.history.push(Message {
            role,
            content: content.into(),
            timestamp: now,
            metadata,
        });
        session.last_activity = now;
        true
    }

    /// Conversation history, most recent `limit` messages when given.
    pub fn history(&self, id: &str, limit: Option<usize>) -> Vec<Message> {
        let sessions = self.locked();
        let Some(session) = sessions.get(id) else {
            return Vec::new();
        };
        match limit {
            Some(n) if n < session.history.len() => {
                session.history[session.history.len() - n..].to_vec()
            }
            _ => session.history.clone(),
        }
    }

    pub fn list_ids(&self) -> Vec<String> {
        self.locked().keys().cloned().collect()
    }

    /// Remove sessions idle for longer than `max_age`. Returns how many went.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut sessions = self.locked();
        let before = sessions.len();
        sessions.retain(|_, s| s.last_activity >= cutoff);
        before - sessions.len()
    }
}
