//! Tools for AgentMesh agents.
//!
//! This crate provides:
//! - An explicit tool registry, built by the caller and read-only afterwards
//! - Built-in tools (echo, calculator)

pub mod builtin;
pub mod registry;

pub use builtin::*;
pub use registry::{ToolRegistry, ToolRegistryBuilder};
