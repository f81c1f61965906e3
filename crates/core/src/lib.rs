//! Core types, traits, and error definitions for AgentMesh.
//!
//! This crate provides the building blocks shared by the tool registry, the
//! agent runtime, and the graph engine.

pub mod config;
pub mod error;
pub mod mocks;
pub mod stream;
pub mod template;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use stream::{chunk_channel, Chunk, ChunkSender, ChunkStream, StreamClosed};
pub use traits::*;
pub use types::*;
