//! In-memory conversation store.

use dashmap::DashMap;

use agentmesh_core::{traits::MemoryStore, types::Message, Result};

/// In-memory memory store, sessions held in a concurrent map.
///
/// Appends for one session take that session's shard lock, so a load
/// immediately after an append observes it exactly once.
pub struct InMemoryMemoryStore {
    sessions: DashMap<String, Vec<Message>>,
}

impl InMemoryMemoryStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Get the number of stored sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if store is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop a session's history.
    pub fn clear(&self, session_id: &str) {
        self.sessions.remove(session_id);
        tracing::debug!(session_id = %session_id, "Session cleared");
    }
}

impl Default for InMemoryMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn append(&self, session_id: &str, message: &Message) -> Result<()> {
        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .push(message.clone());
        tracing::debug!(session_id = %session_id, role = message.role.as_str(), "Message appended");
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .sessions
            .get(session_id)
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_after_append_ends_with_message() {
        let store = InMemoryMemoryStore::new();
        store.append("s1", &Message::user("first")).await.unwrap();
        let msg = Message::assistant("second");
        store.append("s1", &msg).await.unwrap();

        let loaded = store.load("s1").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.last(), Some(&msg));
        assert_eq!(loaded.iter().filter(|m| **m == msg).count(), 1);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = InMemoryMemoryStore::new();
        store.append("a", &Message::user("for a")).await.unwrap();

        assert!(store.load("b").await.unwrap().is_empty());
        assert_eq!(store.len(), 1);

        store.clear("a");
        assert!(store.is_empty());
    }
}
