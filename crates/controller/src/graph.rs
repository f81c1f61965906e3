//! Orchestration graph definitions.
//!
//! A [`GraphDefinition`] is a list of nodes with declared dependencies, input
//! bindings, and output keys. [`GraphDefinition::build`] validates it into an
//! immutable [`Graph`] the engine can run; an invalid definition never runs.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use agentmesh_core::{
    error::GraphError,
    template::render_prompt,
    traits::ToolInvoker,
    types::{InputValue, NodeInputs, NodeOutput},
    Result,
};

use crate::react::{AgentRequest, AgentRuntime};

// =============================================================================
// Node Bodies
// =============================================================================

/// A plain unit of work in the graph.
#[async_trait]
pub trait NodeTask: Send + Sync {
    /// Execute the task. `cancel` fires when the run is cancelled or times out.
    async fn run(&self, inputs: NodeInputs, cancel: CancellationToken) -> Result<NodeOutput>;
}

/// Task backed by an async closure.
pub struct FnTask<F>(F);

#[async_trait]
impl<F, Fut> NodeTask for FnTask<F>
where
    F: Fn(NodeInputs, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<NodeOutput>> + Send + 'static,
{
    async fn run(&self, inputs: NodeInputs, cancel: CancellationToken) -> Result<NodeOutput> {
        (self.0)(inputs, cancel).await
    }
}

/// Task invoking one registered tool.
///
/// Bound input fields are merged over the static arguments; the tool's output
/// text is stored under `output_key`.
pub struct ToolTask {
    tools: Arc<dyn ToolInvoker>,
    tool: String,
    args: Value,
    output_key: String,
}

impl ToolTask {
    pub fn new(
        tools: Arc<dyn ToolInvoker>,
        tool: impl Into<String>,
        args: Value,
        output_key: impl Into<String>,
    ) -> Self {
        Self {
            tools,
            tool: tool.into(),
            args,
            output_key: output_key.into(),
        }
    }
}

#[async_trait]
impl NodeTask for ToolTask {
    async fn run(&self, inputs: NodeInputs, _cancel: CancellationToken) -> Result<NodeOutput> {
        let mut args = self.args.clone();
        if let Value::Object(map) = &mut args {
            for (field, value) in inputs.fields {
                if let InputValue::Value(v) = value {
                    map.insert(field, v);
                }
            }
        }

        let output = self.tools.invoke(&self.tool, args).await?;
        let mut out = NodeOutput::new();
        out.insert(self.output_key.clone(), Value::String(output.content));
        Ok(out)
    }
}

/// Agent invocation node.
///
/// The task text is a Tera template rendered against the node inputs (run
/// input under `input`, bound fields by name). The final answer is stored
/// under `output_key`.
#[derive(Clone)]
pub struct AgentNode {
    pub runtime: Arc<AgentRuntime>,
    pub prompt_template: String,
    pub output_key: String,
}

impl AgentNode {
    async fn execute(
        &self,
        node_id: &str,
        inputs: NodeInputs,
        cancel: &CancellationToken,
    ) -> Result<NodeOutput> {
        let prompt = render_prompt(&self.prompt_template, &inputs.to_json())?;
        let state = self
            .runtime
            .run(AgentRequest::new(node_id, prompt), cancel)
            .await;
        let answer = state.into_result()?;

        let mut out = NodeOutput::new();
        out.insert(self.output_key.clone(), Value::String(answer));
        Ok(out)
    }
}

/// Executable body of a node.
#[derive(Clone)]
pub enum NodeBody {
    Agent(AgentNode),
    Task(Arc<dyn NodeTask>),
}

impl NodeBody {
    pub(crate) async fn execute(
        &self,
        node_id: &str,
        inputs: NodeInputs,
        cancel: CancellationToken,
    ) -> Result<NodeOutput> {
        match self {
            Self::Agent(agent) => agent.execute(node_id, inputs, &cancel).await,
            Self::Task(task) => task.run(inputs, cancel).await,
        }
    }
}

impl std::fmt::Debug for NodeBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agent(agent) => f
                .debug_struct("Agent")
                .field("output_key", &agent.output_key)
                .finish(),
            Self::Task(_) => f.write_str("Task"),
        }
    }
}

// =============================================================================
// Node Definitions
// =============================================================================

/// Edge to an upstream node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub node: String,
    /// Best-effort edge: the downstream node still runs if this upstream
    /// fails, receiving an upstream-failed marker instead.
    pub optional: bool,
}

/// Maps an upstream output key to one of this node's input fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputBinding {
    /// Producing node. When absent, the unique dependency declaring `key`.
    pub from_node: Option<String>,
    pub key: String,
    pub field: String,
}

/// A node in a graph definition.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: String,
    pub body: NodeBody,
    pub depends_on: Vec<Dependency>,
    pub bindings: Vec<InputBinding>,
    /// Output keys this node promises to produce.
    pub outputs: Vec<String>,
}

impl GraphNode {
    fn with_body(id: impl Into<String>, body: NodeBody) -> Self {
        Self {
            id: id.into(),
            body,
            depends_on: Vec::new(),
            bindings: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Agent node producing its answer under `answer`.
    pub fn agent(
        id: impl Into<String>,
        runtime: Arc<AgentRuntime>,
        prompt_template: impl Into<String>,
    ) -> Self {
        Self::agent_with_key(id, runtime, prompt_template, "answer")
    }

    pub fn agent_with_key(
        id: impl Into<String>,
        runtime: Arc<AgentRuntime>,
        prompt_template: impl Into<String>,
        output_key: impl Into<String>,
    ) -> Self {
        let output_key = output_key.into();
        let mut node = Self::with_body(
            id,
            NodeBody::Agent(AgentNode {
                runtime,
                prompt_template: prompt_template.into(),
                output_key: output_key.clone(),
            }),
        );
        node.outputs.push(output_key);
        node
    }

    /// Node running an arbitrary task. Declare its outputs with
    /// [`GraphNode::with_outputs`].
    pub fn task(id: impl Into<String>, task: Arc<dyn NodeTask>) -> Self {
        Self::with_body(id, NodeBody::Task(task))
    }

    /// Node running an async closure.
    pub fn task_fn<F, Fut>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn(NodeInputs, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<NodeOutput>> + Send + 'static,
    {
        Self::task(id, Arc::new(FnTask(f)))
    }

    /// Node invoking a registered tool.
    pub fn tool(
        id: impl Into<String>,
        tools: Arc<dyn ToolInvoker>,
        tool: impl Into<String>,
        args: Value,
        output_key: impl Into<String>,
    ) -> Self {
        let output_key = output_key.into();
        let mut node = Self::task(id, Arc::new(ToolTask::new(tools, tool, args, output_key.clone())));
        node.outputs.push(output_key);
        node
    }

    pub fn depends_on(mut self, upstream: impl Into<String>) -> Self {
        self.depends_on.push(Dependency {
            node: upstream.into(),
            optional: false,
        });
        self
    }

    /// Best-effort dependency.
    pub fn depends_on_optional(mut self, upstream: impl Into<String>) -> Self {
        self.depends_on.push(Dependency {
            node: upstream.into(),
            optional: true,
        });
        self
    }

    /// Bind `upstream`'s output `key` to input `field`.
    pub fn bind(
        mut self,
        upstream: impl Into<String>,
        key: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        self.bindings.push(InputBinding {
            from_node: Some(upstream.into()),
            key: key.into(),
            field: field.into(),
        });
        self
    }

    /// Bind output `key` of whichever dependency produces it to `field`.
    pub fn bind_key(mut self, key: impl Into<String>, field: impl Into<String>) -> Self {
        self.bindings.push(InputBinding {
            from_node: None,
            key: key.into(),
            field: field.into(),
        });
        self
    }

    pub fn with_outputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs.extend(keys.into_iter().map(Into::into));
        self
    }

    fn dependency(&self, upstream: &str) -> Option<&Dependency> {
        self.depends_on.iter().find(|d| d.node == upstream)
    }
}

/// An unvalidated graph.
#[derive(Debug, Clone, Default)]
pub struct GraphDefinition {
    pub name: String,
    pub nodes: Vec<GraphNode>,
    /// Whole-run deadline; overrides the engine default.
    pub timeout: Option<Duration>,
    /// Max in-flight nodes; overrides the engine default.
    pub max_concurrency: Option<usize>,
}

impl GraphDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn add_node(mut self, node: GraphNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }

    /// Wire nodes into a linear sequence. Each node after the first depends on
    /// its predecessor and receives the predecessor's first output key as the
    /// `previous` input field.
    pub fn chain(name: impl Into<String>, nodes: Vec<GraphNode>) -> Self {
        let mut def = Self::new(name);
        let mut prev: Option<(String, Option<String>)> = None;
        for mut node in nodes {
            if let Some((prev_id, prev_key)) = prev.take() {
                node = node.depends_on(prev_id.clone());
                if let Some(key) = prev_key {
                    node = node.bind(prev_id, key, "previous");
                }
            }
            prev = Some((node.id.clone(), node.outputs.first().cloned()));
            def.nodes.push(node);
        }
        def
    }

    /// Validate into a runnable graph.
    pub fn build(self) -> std::result::Result<Graph, GraphError> {
        Graph::validate(self)
    }
}

// =============================================================================
// Validated Graph
// =============================================================================

/// Binding with its producing node resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBinding {
    pub upstream: usize,
    pub key: String,
    pub field: String,
}

/// A validated, immutable graph.
#[derive(Debug, Clone)]
pub struct Graph {
    pub(crate) name: String,
    pub(crate) nodes: Vec<GraphNode>,
    pub(crate) index: HashMap<String, usize>,
    /// Per node: (upstream index, optional).
    pub(crate) upstreams: Vec<Vec<(usize, bool)>>,
    /// Per node: (downstream index, optional).
    pub(crate) downstreams: Vec<Vec<(usize, bool)>>,
    pub(crate) bindings: Vec<Vec<ResolvedBinding>>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) max_concurrency: Option<usize>,
}

impl Graph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.id.as_str())
    }

    fn validate(def: GraphDefinition) -> std::result::Result<Self, GraphError> {
        let GraphDefinition {
            name,
            nodes,
            timeout,
            max_concurrency,
        } = def;

        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if node.id.is_empty() {
                return Err(GraphError::EmptyNodeId);
            }
            if index.insert(node.id.clone(), i).is_some() {
                return Err(GraphError::DuplicateNode(node.id.clone()));
            }
        }

        let mut upstreams = vec![Vec::new(); nodes.len()];
        let mut downstreams = vec![Vec::new(); nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            for dep in &node.depends_on {
                if dep.node == node.id {
                    return Err(GraphError::SelfDependency(node.id.clone()));
                }
                let &u = index.get(&dep.node).ok_or_else(|| GraphError::UnknownUpstream {
                    node: node.id.clone(),
                    upstream: dep.node.clone(),
                })?;
                // Repeated edges collapse into one; any required mention wins.
                match upstreams[i].iter_mut().find(|(x, _)| *x == u) {
                    Some((_, optional)) => *optional &= dep.optional,
                    None => upstreams[i].push((u, dep.optional)),
                }
            }
        }
        for (i, ups) in upstreams.iter().enumerate() {
            for &(u, optional) in ups {
                downstreams[u].push((i, optional));
            }
        }

        if let Some(cycle) = find_cycle(&nodes, &downstreams) {
            return Err(GraphError::CycleDetected(cycle));
        }

        let mut bindings = Vec::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            let mut resolved = Vec::with_capacity(node.bindings.len());
            for binding in &node.bindings {
                resolved.push(resolve_binding(node, binding, &upstreams[i], &nodes, &index)?);
            }
            bindings.push(resolved);
        }

        Ok(Self {
            name,
            nodes,
            index,
            upstreams,
            downstreams,
            bindings,
            timeout,
            max_concurrency,
        })
    }
}

fn resolve_binding(
    node: &GraphNode,
    binding: &InputBinding,
    upstreams: &[(usize, bool)],
    nodes: &[GraphNode],
    index: &HashMap<String, usize>,
) -> std::result::Result<ResolvedBinding, GraphError> {
    let upstream = match &binding.from_node {
        Some(from) => {
            if node.dependency(from).is_none() {
                return Err(GraphError::UndeclaredBinding {
                    node: node.id.clone(),
                    field: binding.field.clone(),
                    upstream: from.clone(),
                });
            }
            // Declared dependencies were checked to exist.
            let &u = index.get(from).ok_or_else(|| GraphError::UnknownUpstream {
                node: node.id.clone(),
                upstream: from.clone(),
            })?;
            if !nodes[u].outputs.contains(&binding.key) {
                return Err(GraphError::UnknownOutputKey {
                    node: node.id.clone(),
                    key: binding.key.clone(),
                });
            }
            u
        }
        None => {
            // Collapsed edges, so a repeated dependency is one producer.
            let producers: Vec<usize> = upstreams
                .iter()
                .map(|&(u, _)| u)
                .filter(|&u| nodes[u].outputs.contains(&binding.key))
                .collect();
            match producers.as_slice() {
                [] => {
                    return Err(GraphError::UnknownOutputKey {
                        node: node.id.clone(),
                        key: binding.key.clone(),
                    })
                }
                [u] => *u,
                _ => {
                    return Err(GraphError::AmbiguousOutput {
                        node: node.id.clone(),
                        key: binding.key.clone(),
                        producers: producers.iter().map(|&u| nodes[u].id.clone()).collect(),
                    })
                }
            }
        }
    };

    Ok(ResolvedBinding {
        upstream,
        key: binding.key.clone(),
        field: binding.field.clone(),
    })
}

/// Depth-first search for a cycle along upstream-to-downstream edges.
///
/// Returns the participating ids in edge order, first id repeated at the end.
fn find_cycle(nodes: &[GraphNode], downstreams: &[Vec<(usize, bool)>]) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        OnStack,
        Done,
    }

    let mut marks = vec![Mark::Unvisited; nodes.len()];
    let mut path: Vec<usize> = Vec::new();

    for root in 0..nodes.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        // Stack of (node, next edge to explore).
        let mut stack = vec![(root, 0usize)];
        marks[root] = Mark::OnStack;
        path.push(root);

        while let Some(top) = stack.last_mut() {
            let u = top.0;
            let next = downstreams[u].get(top.1).map(|&(v, _)| v);
            top.1 += 1;

            match next {
                Some(v) if marks[v] == Mark::Unvisited => {
                    marks[v] = Mark::OnStack;
                    path.push(v);
                    stack.push((v, 0));
                }
                Some(v) if marks[v] == Mark::OnStack => {
                    let start = path.iter().position(|&p| p == v).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|&p| nodes[p].id.clone()).collect();
                    cycle.push(nodes[v].id.clone());
                    return Some(cycle);
                }
                Some(_) => {}
                None => {
                    marks[u] = Mark::Done;
                    path.pop();
                    stack.pop();
                }
            }
        }
    }
    None
}
