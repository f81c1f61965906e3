//! YAML workflow definitions.
//!
//! Loads a graph definition from YAML. Agent nodes name a runtime registered
//! in the [`WorkflowContext`]; tool nodes invoke a tool from its invoker.
//!
//! ```yaml
//! name: report
//! timeout_ms: 60000
//! max_concurrency: 2
//! nodes:
//!   - id: research
//!     agent: researcher
//!     prompt: "Collect facts about {{ input }}"
//!   - id: total
//!     tool: calculator
//!     args: { operation: add, a: 1, b: 2 }
//!     output: sum
//!   - id: write
//!     agent: writer
//!     prompt: "Write about {{ facts }} ({{ sum }})"
//!     depends_on:
//!       - research
//!       - { node: total, optional: true }
//!     bindings:
//!       - { from: research, key: answer, field: facts }
//!       - { key: sum, field: sum }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use agentmesh_core::{traits::ToolInvoker, Error, Result};

use crate::graph::{GraphDefinition, GraphNode};
use crate::react::AgentRuntime;

/// YAML workflow definition for parsing.
#[derive(Debug, Deserialize, Serialize)]
pub struct YamlWorkflow {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Whole-run deadline in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    pub nodes: Vec<YamlNode>,
}

/// YAML node for parsing. Exactly one of `agent` or `tool` must be set.
#[derive(Debug, Deserialize, Serialize)]
pub struct YamlNode {
    pub id: String,
    /// Runtime name for an agent node.
    #[serde(default)]
    pub agent: Option<String>,
    /// Prompt template for an agent node.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Tool name for a tool node.
    #[serde(default)]
    pub tool: Option<String>,
    /// Static tool arguments.
    #[serde(default)]
    pub args: Option<Value>,
    /// Primary output key. Agent nodes default to `answer`, tool nodes to
    /// `result`.
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<YamlDependency>,
    #[serde(default)]
    pub bindings: Vec<YamlBinding>,
}

/// Dependency written either as a bare node id or with an `optional` flag.
#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum YamlDependency {
    Required(String),
    Detailed {
        node: String,
        #[serde(default)]
        optional: bool,
    },
}

#[derive(Debug, Deserialize, Serialize)]
pub struct YamlBinding {
    /// Producing node; may be omitted when exactly one dependency declares `key`.
    #[serde(default)]
    pub from: Option<String>,
    pub key: String,
    pub field: String,
}

/// Named collaborators a workflow may refer to.
#[derive(Default, Clone)]
pub struct WorkflowContext {
    runtimes: HashMap<String, Arc<AgentRuntime>>,
    tools: Option<Arc<dyn ToolInvoker>>,
}

impl WorkflowContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent runtime under `name`.
    pub fn with_runtime(mut self, name: impl Into<String>, runtime: Arc<AgentRuntime>) -> Self {
        self.runtimes.insert(name.into(), runtime);
        self
    }

    /// Set the tool invoker used by tool nodes.
    pub fn with_tools(mut self, tools: Arc<dyn ToolInvoker>) -> Self {
        self.tools = Some(tools);
        self
    }
}

/// Parse a YAML workflow into a graph definition.
///
/// Structural validation (cycles, unknown upstreams, bindings) happens when the
/// returned definition is built.
pub fn load_workflow(yaml: &str, ctx: &WorkflowContext) -> Result<GraphDefinition> {
    let parsed: YamlWorkflow = serde_yaml::from_str(yaml)
        .map_err(|e| Error::workflow(format!("Failed to parse workflow YAML: {}", e)))?;

    tracing::debug!(workflow = %parsed.name, nodes = parsed.nodes.len(), "Loading workflow");

    let mut def = GraphDefinition::new(parsed.name);
    def.timeout = parsed.timeout_ms.map(Duration::from_millis);
    def.max_concurrency = parsed.max_concurrency;

    for node in parsed.nodes {
        def.nodes.push(build_node(node, ctx)?);
    }
    Ok(def)
}

fn build_node(node: YamlNode, ctx: &WorkflowContext) -> Result<GraphNode> {
    let mut graph_node = match (&node.agent, &node.tool) {
        (Some(agent), None) => {
            let runtime = ctx.runtimes.get(agent).cloned().ok_or_else(|| {
                Error::workflow(format!("Node '{}' uses unknown agent '{}'", node.id, agent))
            })?;
            let prompt = node.prompt.clone().ok_or_else(|| {
                Error::workflow(format!("Agent node '{}' has no prompt", node.id))
            })?;
            let key = node.output.clone().unwrap_or_else(|| "answer".to_string());
            GraphNode::agent_with_key(node.id.clone(), runtime, prompt, key)
        }
        (None, Some(tool)) => {
            let tools = ctx.tools.clone().ok_or_else(|| {
                Error::workflow(format!("Tool node '{}' needs a tool invoker", node.id))
            })?;
            let args = node.args.clone().unwrap_or_else(|| Value::Object(Default::default()));
            let key = node.output.clone().unwrap_or_else(|| "result".to_string());
            GraphNode::tool(node.id.clone(), tools, tool.clone(), args, key)
        }
        _ => {
            return Err(Error::workflow(format!(
                "Node '{}' must set exactly one of 'agent' or 'tool'",
                node.id
            )))
        }
    };

    for dep in node.depends_on {
        graph_node = match dep {
            YamlDependency::Required(id) => graph_node.depends_on(id),
            YamlDependency::Detailed { node: upstream, optional: false } => {
                graph_node.depends_on(upstream)
            }
            YamlDependency::Detailed { node: upstream, optional: true } => {
                graph_node.depends_on_optional(upstream)
            }
        };
    }
    for binding in node.bindings {
        graph_node = match binding.from {
            Some(from) => graph_node.bind(from, binding.key, binding.field),
            None => graph_node.bind_key(binding.key, binding.field),
        };
    }
    Ok(graph_node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::AgentRuntimeBuilder;
    use agentmesh_core::mocks::ScriptedProvider;
    use agentmesh_skills::ToolRegistry;

    fn ctx() -> WorkflowContext {
        let runtime = AgentRuntimeBuilder::new()
            .with_provider(Arc::new(ScriptedProvider::answer("ok")))
            .build()
            .unwrap();
        WorkflowContext::new()
            .with_runtime("writer", Arc::new(runtime))
            .with_tools(Arc::new(ToolRegistry::with_builtins()))
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
        name: report
        timeout_ms: 1500
        max_concurrency: 2
        nodes:
          - id: sum
            tool: calculator
            args: { operation: add, a: 1, b: 2 }
          - id: write
            agent: writer
            prompt: "Total is {{ total }}"
            depends_on:
              - { node: sum, optional: true }
            bindings:
              - { from: sum, key: result, field: total }
        "#;

        let def = load_workflow(yaml, &ctx()).unwrap();
        assert_eq!(def.name, "report");
        assert_eq!(def.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(def.max_concurrency, Some(2));
        assert_eq!(def.nodes[0].outputs, vec!["result"]);
        assert!(def.nodes[1].depends_on[0].optional);
        assert!(def.build().is_ok());
    }

    #[test]
    fn test_unknown_agent_is_rejected() {
        let yaml = r#"
        name: bad
        nodes:
          - id: a
            agent: nobody
            prompt: hi
        "#;
        let err = load_workflow(yaml, &ctx()).unwrap_err();
        assert!(matches!(err, Error::Workflow(msg) if msg.contains("nobody")));
    }

    #[test]
    fn test_node_needs_one_kind() {
        let yaml = r#"
        name: bad
        nodes:
          - id: a
            agent: writer
            tool: echo
            prompt: hi
        "#;
        assert!(matches!(load_workflow(yaml, &ctx()), Err(Error::Workflow(_))));
        assert!(matches!(load_workflow("nodes: [", &ctx()), Err(Error::Workflow(_))));
    }
}
