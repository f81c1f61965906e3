//! Mock implementations of core traits for testing.
//!
//! Scripted providers, recording tools, and in-memory stores used by the unit
//! and integration tests across the workspace.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Barrier;

use crate::{
    error::{ProviderError, ToolError},
    stream::{chunk_channel, ChunkStream},
    traits::{MemoryStore, Provider, ProviderResponse, ProviderResult, Tool},
    types::{Message, ToolDefinition, ToolOutput},
    Error, Result,
};

// Mocks keep working after a panicking test thread poisoned a lock.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Scripted Provider
// =============================================================================

/// Provider that replays a queue of scripted results.
///
/// When the queue is empty the `repeat` response is returned if one was set,
/// otherwise the call fails with `InvalidRequest`.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<ProviderResult<ProviderResponse>>>,
    repeat: Option<ProviderResponse>,
    barrier: Option<Arc<Barrier>>,
    delay: Option<Duration>,
    chunked: bool,
    chunk_delay: Option<Duration>,
    calls: AtomicUsize,
    conversations: Mutex<Vec<Vec<Message>>>,
    advertised: Mutex<Vec<Vec<ToolDefinition>>>,
}

impl ScriptedProvider {
    /// Create a provider with a queue of results.
    pub fn new(script: Vec<ProviderResult<ProviderResponse>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    /// A provider that always answers with the same response.
    pub fn repeating(response: ProviderResponse) -> Self {
        Self {
            repeat: Some(response),
            ..Self::default()
        }
    }

    /// A provider that answers once with plain text.
    pub fn answer(text: &str) -> Self {
        Self::new(vec![Ok(ProviderResponse::text(text))])
    }

    /// Wait on a barrier at the start of every call.
    pub fn with_barrier(mut self, barrier: Arc<Barrier>) -> Self {
        self.barrier = Some(barrier);
        self
    }

    /// Sleep before answering every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Deliver streamed responses word by word instead of as one chunk.
    pub fn chunked(mut self) -> Self {
        self.chunked = true;
        self
    }

    /// Stream word by word, pausing after each word.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunked = true;
        self.chunk_delay = Some(delay);
        self
    }

    /// Number of `generate`/`stream_generate` calls made.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Conversations received, one per call.
    pub fn conversations(&self) -> Vec<Vec<Message>> {
        lock(&self.conversations).clone()
    }

    /// Tool definitions received, one list per call.
    pub fn advertised_tools(&self) -> Vec<Vec<ToolDefinition>> {
        lock(&self.advertised).clone()
    }

    async fn next(
        &self,
        conversation: &[Message],
        tools: &[ToolDefinition],
    ) -> ProviderResult<ProviderResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.conversations).push(conversation.to_vec());
        lock(&self.advertised).push(tools.to_vec());

        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = lock(&self.script).pop_front();
        match (scripted, &self.repeat) {
            (Some(result), _) => result,
            (None, Some(response)) => Ok(response.clone()),
            (None, None) => Err(ProviderError::invalid_request("script exhausted")),
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        conversation: &[Message],
        tools: &[ToolDefinition],
    ) -> ProviderResult<ProviderResponse> {
        self.next(conversation, tools).await
    }

    async fn stream_generate(
        &self,
        conversation: &[Message],
        tools: &[ToolDefinition],
    ) -> ProviderResult<ChunkStream> {
        let response = self.next(conversation, tools).await?;
        if !self.chunked {
            return Ok(ChunkStream::from_response(response));
        }

        let (tx, stream) = chunk_channel();
        let pause = self.chunk_delay;
        tokio::spawn(async move {
            let mut response = response;
            let content = std::mem::take(&mut response.message.content);
            for word in content.split_inclusive(' ') {
                if tx.delta(word).await.is_err() {
                    return;
                }
                if let Some(pause) = pause {
                    tokio::time::sleep(pause).await;
                }
            }
            let _ = tx.finish(response).await;
        });
        Ok(stream)
    }
}

// =============================================================================
// Mock Tools
// =============================================================================

/// Mock tool that records the arguments of every call.
pub struct RecordingTool {
    name: String,
    description: String,
    response: String,
    calls: Mutex<Vec<Value>>,
}

impl RecordingTool {
    pub fn new(name: &str, description: &str, response: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            response: response.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Value> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        lock(&self.calls).push(args);
        Ok(ToolOutput::text(self.response.clone()))
    }
}

/// Mock tool whose every call fails.
pub struct FailingTool {
    name: String,
    message: String,
    calls: AtomicUsize,
}

impl FailingTool {
    pub fn new(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            message: message.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn parameters(&self) -> Value {
        serde_json::json!({ "type": "object" })
    }

    async fn execute(&self, _args: Value) -> Result<ToolOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ToolError::execution(&self.name, &self.message).into())
    }
}

// =============================================================================
// Mock Memory Stores
// =============================================================================

/// In-memory mock for the MemoryStore trait.
#[derive(Default)]
pub struct MockMemoryStore {
    sessions: Mutex<HashMap<String, Vec<Message>>>,
}

impl MockMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a session with prior history.
    pub fn with_history(self, session_id: &str, history: Vec<Message>) -> Self {
        lock(&self.sessions).insert(session_id.to_string(), history);
        self
    }

    /// Messages currently stored for a session.
    pub fn messages(&self, session_id: &str) -> Vec<Message> {
        lock(&self.sessions)
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl MemoryStore for MockMemoryStore {
    async fn append(&self, session_id: &str, message: &Message) -> Result<()> {
        lock(&self.sessions)
            .entry(session_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Vec<Message>> {
        Ok(self.messages(session_id))
    }
}

/// Memory store whose loads and/or appends fail.
#[derive(Default)]
pub struct FlakyMemoryStore {
    inner: MockMemoryStore,
    fail_loads: bool,
    fail_appends: bool,
    failed_appends: AtomicUsize,
}

impl FlakyMemoryStore {
    /// Fails every load; appends succeed.
    pub fn failing_loads() -> Self {
        Self {
            fail_loads: true,
            ..Self::default()
        }
    }

    /// Fails every append; loads succeed.
    pub fn failing_appends() -> Self {
        Self {
            fail_appends: true,
            ..Self::default()
        }
    }

    pub fn failed_appends(&self) -> usize {
        self.failed_appends.load(Ordering::SeqCst)
    }

    pub fn messages(&self, session_id: &str) -> Vec<Message> {
        self.inner.messages(session_id)
    }
}

#[async_trait]
impl MemoryStore for FlakyMemoryStore {
    async fn append(&self, session_id: &str, message: &Message) -> Result<()> {
        if self.fail_appends {
            self.failed_appends.fetch_add(1, Ordering::SeqCst);
            return Err(Error::memory("store unavailable"));
        }
        self.inner.append(session_id, message).await
    }

    async fn load(&self, session_id: &str) -> Result<Vec<Message>> {
        if self.fail_loads {
            return Err(Error::memory("store unavailable"));
        }
        self.inner.load(session_id).await
    }
}
