//! Core traits for AgentMesh.
//!
//! Traits are the seams between the runtime and its collaborators:
//! - `llm`: Provider capability (generate, stream, error classification)
//! - `skills`: Tool and ToolInvoker
//! - `store`: MemoryStore for conversation history

pub mod llm;
pub mod skills;
pub mod store;

pub use llm::*;
pub use skills::*;
pub use store::*;
