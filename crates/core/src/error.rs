//! Error types for AgentMesh.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using AgentMesh's Error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Provider Errors
// =============================================================================

/// Classification every provider must assign to a failed call.
///
/// The agent runtime decides whether to retry purely from this kind; it never
/// looks at provider-specific payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ProviderErrorKind {
    /// Too many requests. Retryable after backing off.
    RateLimited,
    /// Bad or missing credentials. Fatal.
    Authentication,
    /// Malformed request. Retrying will not help.
    InvalidRequest,
    /// Connection-level failure. Retryable.
    Network,
    /// The provider did not answer in time. Retryable.
    Timeout,
    /// Provider-side failure (5xx and friends). Retryable.
    Internal,
}

impl ProviderErrorKind {
    /// Whether a call failing with this kind may be re-issued unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited | Self::Network | Self::Timeout | Self::Internal => true,
            Self::Authentication | Self::InvalidRequest => false,
        }
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::RateLimited => "rate limited",
            Self::Authentication => "authentication",
            Self::InvalidRequest => "invalid request",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// A classified provider failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("provider error ({kind}): {message}")]
pub struct ProviderError {
    /// Classification driving the retry policy.
    pub kind: ProviderErrorKind,
    /// Human-readable detail.
    pub message: String,
    /// Server-supplied hint for how long to wait before retrying.
    pub retry_after: Option<Duration>,
}

impl ProviderError {
    /// Create a provider error of the given kind.
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::RateLimited, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Authentication, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::InvalidRequest, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Internal, message)
    }

    /// Attach a retry-after hint.
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// Whether the call may be retried.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

// =============================================================================
// Tool Errors
// =============================================================================

/// Failure reported by the tool invoker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool '{tool}' failed: {message}")]
    ExecutionFailed { tool: String, message: String },

    #[error("Tool '{tool}' call rejected: {message}")]
    Rejected { tool: String, message: String },
}

impl ToolError {
    /// Create an execution failure for a tool.
    pub fn execution(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

// =============================================================================
// Agent Errors
// =============================================================================

/// Terminal conditions of the agent loop that are not provider failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("Agent loop exceeded max iterations: {0}")]
    MaxIterationsExceeded(usize),

    #[error("Provider call failed after {retries} retries: {last}")]
    MaxRetriesExceeded {
        retries: u32,
        #[source]
        last: ProviderError,
    },

    #[error("Token budget exceeded: used {used}, limit {limit}")]
    BudgetExceeded { used: u64, limit: u64 },

    #[error("Agent run cancelled")]
    Cancelled,

    #[error("Agent run exceeded its deadline")]
    DeadlineExceeded,
}

// =============================================================================
// Graph Errors
// =============================================================================

/// Graph validation and run-level failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Node id must not be empty")]
    EmptyNodeId,

    #[error("Duplicate node: {0}")]
    DuplicateNode(String),

    #[error("Node '{0}' depends on itself")]
    SelfDependency(String),

    #[error("Cycle detected between nodes: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    #[error("Node '{node}' depends on unknown node '{upstream}'")]
    UnknownUpstream { node: String, upstream: String },

    #[error("Node '{node}' binds input '{field}' from '{upstream}', which is not one of its dependencies")]
    UndeclaredBinding {
        node: String,
        field: String,
        upstream: String,
    },

    #[error("Node '{node}' binds unknown output key '{key}'")]
    UnknownOutputKey { node: String, key: String },

    #[error("Node '{node}' binds output key '{key}' ambiguously; produced by {}", .producers.join(", "))]
    AmbiguousOutput {
        node: String,
        key: String,
        producers: Vec<String>,
    },

    #[error("Node '{node}' failed: {message}")]
    NodeFailed { node: String, message: String },

    #[error("Graph run cancelled")]
    Cancelled,

    #[error("Graph run timed out after {0:?}")]
    TimedOut(Duration),
}

// =============================================================================
// Crate Error
// =============================================================================

/// Core error type for AgentMesh.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Memory store error: {0}")]
    Memory(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template rendering error: {0}")]
    Template(String),

    #[error("Workflow definition error: {0}")]
    Workflow(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a memory store error.
    pub fn memory(msg: impl Into<String>) -> Self {
        Self::Memory(msg.into())
    }

    /// Create a workflow definition error.
    pub fn workflow(msg: impl Into<String>) -> Self {
        Self::Workflow(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ProviderErrorKind::RateLimited.is_retryable());
        assert!(ProviderErrorKind::Network.is_retryable());
        assert!(ProviderErrorKind::Timeout.is_retryable());
        assert!(ProviderErrorKind::Internal.is_retryable());
        assert!(!ProviderErrorKind::Authentication.is_retryable());
        assert!(!ProviderErrorKind::InvalidRequest.is_retryable());
    }

    #[test]
    fn test_cycle_message_lists_nodes() {
        let err = GraphError::CycleDetected(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Cycle detected between nodes: a -> b -> a");
    }
}
