use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

/// One conversation's message history, in provider wire shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Thread {
    pub messages: Vec<Value>,
}

impl Thread {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, message: Value) {
        self.messages.push(message);
    }
}

/// Conversation histories keyed by caller-chosen session id. Handlers
/// clone a thread out, run the agent against it, and write it back, so
/// concurrent writers to the same id are last-writer-wins.
#[derive(Clone, Default)]
pub struct ThreadStore {
    inner: Arc<RwLock<HashMap<String, Thread>>>,
}

impl ThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_create(&self, session_id: &str) -> Thread {
        self.inner
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn put(&self, session_id: &str, thread: Thread) {
        self.inner
            .write()
            .await
            .insert(session_id.to_string(), thread);
    }

    /// Removes a conversation. Returns false when the id was unknown.
    pub async fn remove(&self, session_id: &str) -> bool {
        self.inner.write().await.remove(session_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}
