use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::{
    error::{ReportError, Result},
    lab::LabFinding,
};

/// Maximum number of turns kept per session (10 user/assistant exchanges).
pub const MAX_HISTORY_TURNS: usize = 20;

pub const DEFAULT_LANGUAGE: &str = "English";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Conversation state for one uploaded report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub filename: String,
    pub extracted_text: String,
    pub history: Vec<ChatTurn>,
    pub language: String,
    pub lab_findings: Vec<LabFinding>,
    pub uploaded_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(id: impl Into<String>, filename: impl Into<String>, extracted_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            filename: filename.into(),
            extracted_text: extracted_text.into(),
            history: Vec::new(),
            language: DEFAULT_LANGUAGE.to_string(),
            lab_findings: Vec::new(),
            uploaded_at: Utc::now(),
        }
    }

    pub fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Replace the report of an existing session, keeping its conversation.
    pub fn replace_document(&mut self, filename: impl Into<String>, extracted_text: impl Into<String>, findings: Vec<LabFinding>) {
        self.filename = filename.into();
        self.extracted_text = extracted_text.into();
        self.lab_findings = findings;
        self.uploaded_at = Utc::now();
    }

    /// Append a question/answer pair and drop the oldest turns beyond `limit`.
    pub fn push_exchange(&mut self, question: ChatTurn, answer: ChatTurn, limit: usize) {
        self.history.push(question);
        self.history.push(answer);
        if self.history.len() > limit {
            let excess = self.history.len() - limit;
            self.history.drain(..excess);
        }
    }

    /// The last `n` turns, oldest first.
    pub fn recent_turns(&self, n: usize) -> &[ChatTurn] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    /// First eight characters of the id, used in download file names.
    pub fn short_id(&self) -> &str {
        match self.id.char_indices().nth(8) {
            Some((idx, _)) => &self.id[..idx],
            None => &self.id,
        }
    }
}

pub type SessionUpdate = Box<dyn FnOnce(&mut ChatSession) + Send>;

/// Trait for storing and retrieving chat sessions
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn save(&self, session: ChatSession) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<ChatSession>>;
    /// Returns whether a session was removed.
    async fn delete(&self, id: &str) -> Result<bool>;
    /// Apply `update` to the stored session atomically with respect to other updates.
    async fn update(&self, id: &str, update: SessionUpdate) -> Result<()>;
    async fn count(&self) -> Result<usize>;
}

/// In-memory implementation of SessionStorage
pub struct InMemorySessionStorage {
    sessions: Arc<DashMap<String, ChatSession>>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemorySessionStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn save(&self, session: ChatSession) -> Result<()> {
        debug!("Storing session {}", session.id);
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ChatSession>> {
        Ok(self.sessions.get(id).map(|entry| entry.clone()))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.sessions.remove(id).is_some();
        debug!("Deleted session {}: {}", id, removed);
        Ok(removed)
    }

    async fn update(&self, id: &str, update: SessionUpdate) -> Result<()> {
        // the entry guard holds the shard lock until the closure returns
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| ReportError::SessionNotFound(id.to_string()))?;
        update(entry.value_mut());
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.sessions.len())
    }
}
