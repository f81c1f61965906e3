//! Controller for AgentMesh.
//!
//! This crate provides the agent runtime loop, graph definition and
//! execution, and YAML workflow loading.

pub mod builder;
pub mod dag;
pub mod executor;
pub mod graph;
pub mod hooks;
pub mod parser;
pub mod persistence;
pub mod react;
pub mod retry;
pub mod telemetry;
pub mod workflow;

pub use builder::AgentRuntimeBuilder;
pub use dag::{EngineConfig, GraphEngine};
pub use executor::ToolExecutor;
pub use graph::{
    AgentNode, Dependency, Graph, GraphDefinition, GraphNode, InputBinding, NodeBody, NodeTask,
    ToolTask,
};
pub use hooks::{AgentHooks, HookChain};
pub use parser::{ActionParser, ParsedAction};
pub use persistence::InMemoryMemoryStore;
pub use react::{AgentConfig, AgentRequest, AgentRuntime};
pub use retry::RetryPolicy;
pub use telemetry::configure_tracing;
pub use workflow::{load_workflow, WorkflowContext};

pub use tokio_util::sync::CancellationToken;
