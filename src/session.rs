//! In-memory per-conversation history, bounded to the most recent turns.
//!
//! Keys live for the process lifetime — there is no eviction of idle
//! conversations, an accepted trade-off for a single-process deployment.
//! Writes to distinct conversations never contend: the outer map is behind a
//! read lock on the hot path and each conversation carries its own mutex.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// One entry in a conversation's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

pub struct SessionStore {
    conversations: RwLock<HashMap<String, Arc<Mutex<Vec<Turn>>>>>,
    cap: usize,
}

impl SessionStore {
    pub fn new(cap: usize) -> Self {
        assert!(cap > 0, "history cap must be at least 1");
        Self {
            conversations: RwLock::new(HashMap::new()),
            cap,
        }
    }

    /// Append a turn to the conversation and truncate to the most recent
    /// `cap` entries. Returns the updated history.
    pub fn record(&self, conversation_id: &str, turn: Turn) -> Vec<Turn> {
        let entry = self.entry(conversation_id);
        let mut history = entry.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        history.push(turn);
        if history.len() > self.cap {
            let excess = history.len() - self.cap;
            history.drain(..excess);
        }
        history.clone()
    }

    /// Read-only snapshot of a conversation's history. Unknown ids are just
    /// empty conversations.
    pub fn history(&self, conversation_id: &str) -> Vec<Turn> {
        let map = self
            .conversations
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        map.get(conversation_id).map_or_else(Vec::new, |entry| {
            entry
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone()
        })
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    fn entry(&self, conversation_id: &str) -> Arc<Mutex<Vec<Turn>>> {
        {
            let map = self
                .conversations
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(entry) = map.get(conversation_id) {
                return Arc::clone(entry);
            }
        }

        let mut map = self
            .conversations
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(
            map.entry(conversation_id.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(Vec::new()))),
        )
    }
}
