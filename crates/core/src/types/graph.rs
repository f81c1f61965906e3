use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GraphError;

// =============================================================================
// Graph Run Types
// =============================================================================

/// Named values produced by a node, keyed by declared output key.
pub type NodeOutput = serde_json::Map<String, Value>;

/// Status of a node within one graph run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Waiting on upstream nodes.
    Pending,
    /// All upstream nodes resolved; queued for a worker.
    Ready,
    /// Executing.
    Running,
    Completed,
    Failed,
    /// Never ran. See [`SkipReason`].
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// Why a node was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// A required upstream node failed or was itself skipped.
    UpstreamFailed { upstream: String },
    /// The run was cancelled or hit its deadline before the node started.
    Cancelled,
}

/// Execution record of one node in one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecution {
    pub node_id: String,
    pub status: NodeStatus,
    /// Output, set when `Completed`.
    pub output: Option<NodeOutput>,
    /// Error message, set when `Failed`.
    pub error: Option<String>,
    /// Set when `Skipped`.
    pub skip_reason: Option<SkipReason>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl NodeExecution {
    pub fn pending(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            status: NodeStatus::Pending,
            output: None,
            error: None,
            skip_reason: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Wall-clock time the node ran for, if it ran.
    pub fn duration(&self) -> Option<Duration> {
        let (start, end) = (self.started_at?, self.finished_at?);
        (end - start).to_std().ok()
    }
}

/// Value handed to a node for one bound input field.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    /// The upstream output value.
    Value(Value),
    /// The upstream node behind a best-effort dependency failed or was skipped.
    UpstreamFailed { upstream: String, error: String },
}

/// Inputs assembled for a node from the run input and its bindings.
#[derive(Debug, Clone, Default)]
pub struct NodeInputs {
    /// Input the whole run was started with.
    pub run_input: Value,
    /// Bound fields.
    pub fields: HashMap<String, InputValue>,
}

impl NodeInputs {
    /// Bound value for a field, if the upstream succeeded.
    pub fn get(&self, field: &str) -> Option<&Value> {
        match self.fields.get(field) {
            Some(InputValue::Value(v)) => Some(v),
            _ => None,
        }
    }

    /// Whether a field carries an upstream-failure marker.
    pub fn is_upstream_failed(&self, field: &str) -> bool {
        matches!(self.fields.get(field), Some(InputValue::UpstreamFailed { .. }))
    }

    /// Flatten into a JSON object: the run input under `input`, each field by
    /// name, failure markers as `{"upstream_failed": .., "error": ..}`.
    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("input".to_string(), self.run_input.clone());
        for (field, value) in &self.fields {
            let v = match value {
                InputValue::Value(v) => v.clone(),
                InputValue::UpstreamFailed { upstream, error } => serde_json::json!({
                    "upstream_failed": upstream,
                    "error": error,
                }),
            };
            map.insert(field.clone(), v);
        }
        Value::Object(map)
    }
}

/// Overall status of a graph run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    /// Every non-skipped node completed and no required node failed.
    AllCompleted,
    /// At least one node failed outside a best-effort path.
    Failed,
    /// Cancelled externally or by the run deadline.
    Cancelled,
}

/// What stopped a cancelled run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelCause {
    External,
    Deadline(Duration),
}

/// Full report of one graph invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRun {
    pub run_id: String,
    pub graph_name: String,
    pub status: RunStatus,
    pub cancel_cause: Option<CancelCause>,
    /// First node, in definition order, whose failure was not tolerated.
    #[serde(default)]
    pub failed_node: Option<String>,
    /// Per-node records keyed by node id.
    pub nodes: BTreeMap<String, NodeExecution>,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl GraphRun {
    /// Record for a node.
    pub fn node(&self, id: &str) -> Option<&NodeExecution> {
        self.nodes.get(id)
    }

    /// Status of a node.
    pub fn status_of(&self, id: &str) -> Option<NodeStatus> {
        self.nodes.get(id).map(|n| n.status)
    }

    /// Output of a completed node.
    pub fn output(&self, id: &str) -> Option<&NodeOutput> {
        self.nodes.get(id).and_then(|n| n.output.as_ref())
    }

    /// Ids of nodes that ended with the given status.
    pub fn nodes_with(&self, status: NodeStatus) -> Vec<&str> {
        self.nodes
            .values()
            .filter(|n| n.status == status)
            .map(|n| n.node_id.as_str())
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::AllCompleted
    }

    /// The error a caller should surface for an unsuccessful run.
    pub fn failure(&self) -> Option<GraphError> {
        match self.status {
            RunStatus::Running | RunStatus::AllCompleted => None,
            RunStatus::Cancelled => Some(match self.cancel_cause {
                Some(CancelCause::Deadline(limit)) => GraphError::TimedOut(limit),
                _ => GraphError::Cancelled,
            }),
            RunStatus::Failed => self
                .failed_node
                .as_deref()
                .and_then(|id| self.nodes.get(id))
                .map(|n| GraphError::NodeFailed {
                    node: n.node_id.clone(),
                    message: n.error.clone().unwrap_or_default(),
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inputs_json_marks_failures() {
        let mut inputs = NodeInputs {
            run_input: Value::String("topic".into()),
            fields: HashMap::new(),
        };
        inputs.fields.insert("draft".into(), InputValue::Value(Value::from("text")));
        inputs.fields.insert(
            "facts".into(),
            InputValue::UpstreamFailed {
                upstream: "research".into(),
                error: "boom".into(),
            },
        );

        assert_eq!(inputs.get("draft"), Some(&Value::from("text")));
        assert!(inputs.get("facts").is_none());
        assert!(inputs.is_upstream_failed("facts"));

        let json = inputs.to_json();
        assert_eq!(json["input"], "topic");
        assert_eq!(json["facts"]["upstream_failed"], "research");
    }
}
