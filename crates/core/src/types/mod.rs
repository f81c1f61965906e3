//! Core type definitions for AgentMesh.
//!
//! Conversation messages, agent state, tool payloads, and graph run records.

pub mod agent;
pub mod graph;
pub mod message;
pub mod tool;

pub use agent::*;
pub use graph::*;
pub use message::*;
pub use tool::*;
