//! Memory store traits.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Message;

/// Append-only conversation history keyed by session id.
///
/// Writes for different sessions are independent. Callers must not run two
/// invocations against the same session concurrently.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Append one message to a session.
    async fn append(&self, session_id: &str, message: &Message) -> Result<()>;

    /// Load a session's messages in append order. Unknown sessions are empty.
    async fn load(&self, session_id: &str) -> Result<Vec<Message>>;
}
