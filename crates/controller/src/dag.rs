//! DAG (Directed Acyclic Graph) Executor.
//!
//! Runs a validated [`Graph`]: nodes become ready once every upstream node has
//! resolved, ready nodes are dispatched in queue order up to the in-flight
//! limit, and each completion re-evaluates its downstream nodes. Failures skip
//! required downstream nodes; best-effort edges hand the downstream node an
//! upstream-failed marker instead.

use std::collections::{BTreeMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use agentmesh_core::{
    config::AppConfig,
    types::{
        CancelCause, GraphRun, InputValue, NodeExecution, NodeInputs, NodeOutput, NodeStatus,
        RunStatus, SkipReason,
    },
};

use crate::graph::Graph;

/// Engine defaults, overridable per graph.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum nodes executing at once.
    pub max_concurrency: usize,
    /// Whole-run deadline.
    pub timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            timeout: None,
        }
    }
}

impl From<&AppConfig> for EngineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_concurrency: config.engine.max_concurrency,
            timeout: config.engine.timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Executor for orchestration graphs.
#[derive(Debug, Clone, Default)]
pub struct GraphEngine {
    config: EngineConfig,
}

type Completion = (usize, Result<NodeOutput, String>);

/// Mutable bookkeeping for one run. Only the scheduling loop touches it.
struct RunState<'g> {
    graph: &'g Graph,
    records: Vec<NodeExecution>,
    /// Upstream nodes not yet resolved, per node.
    waiting: Vec<usize>,
    ready: VecDeque<usize>,
    outputs: Vec<Option<NodeOutput>>,
    /// Set once the run stops dispatching.
    cancel_cause: Option<CancelCause>,
}

impl<'g> RunState<'g> {
    fn new(graph: &'g Graph) -> Self {
        let records = graph
            .nodes
            .iter()
            .map(|n| NodeExecution::pending(n.id.clone()))
            .collect();
        let waiting: Vec<usize> = graph.upstreams.iter().map(Vec::len).collect();

        let mut state = Self {
            graph,
            records,
            waiting,
            ready: VecDeque::new(),
            outputs: vec![None; graph.len()],
            cancel_cause: None,
        };
        for idx in 0..graph.len() {
            if state.waiting[idx] == 0 {
                state.mark_ready(idx);
            }
        }
        state
    }

    fn mark_ready(&mut self, idx: usize) {
        self.records[idx].status = NodeStatus::Ready;
        self.ready.push_back(idx);
    }

    /// Assemble a node's inputs from its upstream records.
    fn inputs_for(&self, idx: usize, run_input: &Value) -> NodeInputs {
        let mut inputs = NodeInputs {
            run_input: run_input.clone(),
            ..NodeInputs::default()
        };
        for binding in &self.graph.bindings[idx] {
            let upstream = &self.records[binding.upstream];
            let value = match &self.outputs[binding.upstream] {
                Some(output) => InputValue::Value(
                    output.get(&binding.key).cloned().unwrap_or(Value::Null),
                ),
                None => InputValue::UpstreamFailed {
                    upstream: upstream.node_id.clone(),
                    error: failure_message(upstream),
                },
            };
            inputs.fields.insert(binding.field.clone(), value);
        }
        inputs
    }

    /// Record a finished node and settle everything downstream of it.
    ///
    /// Once the run is stopping, downstream nodes are left for
    /// [`RunState::skip_unstarted`].
    fn complete(&mut self, idx: usize, outcome: Result<NodeOutput, String>) {
        let graph = self.graph;
        let node = &graph.nodes[idx];
        let outcome = outcome.and_then(|output| {
            match node.outputs.iter().find(|k| !output.contains_key(*k)) {
                Some(key) => Err(format!("missing declared output '{}'", key)),
                None => Ok(output),
            }
        });

        let record = &mut self.records[idx];
        record.finished_at = Some(Utc::now());
        match outcome {
            Ok(output) => {
                tracing::info!(node = %record.node_id, "Node completed");
                record.status = NodeStatus::Completed;
                record.output = Some(output.clone());
                self.outputs[idx] = Some(output);
            }
            Err(message) => {
                tracing::warn!(node = %record.node_id, error = %message, "Node failed");
                record.status = NodeStatus::Failed;
                record.error = Some(message);
            }
        }
        if self.cancel_cause.is_none() {
            self.settle(idx);
        }
    }

    /// Propagate a resolved node to its dependents.
    ///
    /// A failed or skipped upstream on a required edge skips the dependent,
    /// which in turn settles its own dependents.
    fn settle(&mut self, idx: usize) {
        let graph = self.graph;
        let mut resolved = vec![idx];
        while let Some(u) = resolved.pop() {
            let succeeded = self.records[u].status == NodeStatus::Completed;
            for &(d, optional) in &graph.downstreams[u] {
                if self.records[d].status != NodeStatus::Pending {
                    continue;
                }
                if !succeeded && !optional {
                    let upstream = self.records[u].node_id.clone();
                    tracing::info!(node = %self.records[d].node_id, upstream = %upstream, "Skipping node");
                    let record = &mut self.records[d];
                    record.status = NodeStatus::Skipped;
                    record.skip_reason = Some(SkipReason::UpstreamFailed { upstream });
                    record.finished_at = Some(Utc::now());
                    resolved.push(d);
                    continue;
                }
                self.waiting[d] -= 1;
                if self.waiting[d] == 0 {
                    self.mark_ready(d);
                }
            }
        }
    }

    /// Skip every node that never started.
    fn skip_unstarted(&mut self) {
        self.ready.clear();
        for record in &mut self.records {
            if matches!(record.status, NodeStatus::Pending | NodeStatus::Ready) {
                record.status = NodeStatus::Skipped;
                record.skip_reason = Some(SkipReason::Cancelled);
                record.finished_at = Some(Utc::now());
            }
        }
    }

    /// First failure that fails the run. A failure is tolerated only when
    /// every outgoing edge is best-effort.
    fn required_failure(&self) -> Option<String> {
        self.records
            .iter()
            .enumerate()
            .find(|&(idx, record)| {
                record.status == NodeStatus::Failed && {
                    let downstream = &self.graph.downstreams[idx];
                    downstream.is_empty() || downstream.iter().any(|&(_, optional)| !optional)
                }
            })
            .map(|(_, record)| record.node_id.clone())
    }
}

fn failure_message(record: &NodeExecution) -> String {
    match (&record.error, &record.skip_reason) {
        (Some(error), _) => error.clone(),
        (None, Some(SkipReason::UpstreamFailed { upstream })) => {
            format!("skipped: upstream '{}' failed", upstream)
        }
        (None, Some(SkipReason::Cancelled)) => "skipped: run cancelled".to_string(),
        (None, None) => "no output".to_string(),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("node panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("node panicked: {}", s)
    } else {
        "node panicked".to_string()
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending::<()>().await,
    }
}

impl GraphEngine {
    /// Create a new graph engine.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a graph to a terminal status.
    ///
    /// `input` is handed to every node as its run input. Cancelling `cancel`,
    /// or reaching the run timeout, stops dispatch, signals in-flight nodes,
    /// and skips every node that has not started. The run always returns a
    /// full per-node report.
    pub async fn run(&self, graph: &Graph, input: Value, cancel: &CancellationToken) -> GraphRun {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();

        let limit = graph
            .max_concurrency
            .unwrap_or(self.config.max_concurrency)
            .max(1);
        let timeout = graph.timeout.or(self.config.timeout);
        let deadline = timeout.map(|t| start + t);

        // In-flight nodes observe this token; dropping the run cancels them.
        let run_cancel = cancel.child_token();
        let _guard = run_cancel.clone().drop_guard();

        tracing::info!(
            run_id = %run_id,
            graph = %graph.name,
            nodes = graph.len(),
            max_concurrency = limit,
            timeout_ms = timeout.map(|t| t.as_millis() as u64),
            "Starting graph run"
        );

        let mut state = RunState::new(graph);
        let (tx, mut rx) = mpsc::channel::<Completion>(graph.len().max(1));
        let mut in_flight = 0usize;

        loop {
            if state.cancel_cause.is_none() {
                if run_cancel.is_cancelled() {
                    state.cancel_cause = Some(CancelCause::External);
                } else if deadline.is_some_and(|d| Instant::now() >= d) {
                    state.cancel_cause = timeout.map(CancelCause::Deadline);
                    run_cancel.cancel();
                }
            }

            if state.cancel_cause.is_none() {
                while in_flight < limit {
                    let Some(idx) = state.ready.pop_front() else {
                        break;
                    };
                    self.dispatch(&mut state, idx, &input, &run_cancel, &tx, &run_id);
                    in_flight += 1;
                }
            }

            if in_flight == 0 {
                break;
            }

            let stopping = state.cancel_cause.is_some();
            tokio::select! {
                biased;
                _ = run_cancel.cancelled(), if !stopping => {
                    tracing::warn!(run_id = %run_id, "Graph run cancelled");
                    state.cancel_cause = Some(CancelCause::External);
                }
                _ = until(deadline), if !stopping && deadline.is_some() => {
                    tracing::warn!(run_id = %run_id, "Graph run deadline reached");
                    state.cancel_cause = timeout.map(CancelCause::Deadline);
                    run_cancel.cancel();
                }
                Some((idx, outcome)) = rx.recv() => {
                    in_flight -= 1;
                    state.complete(idx, outcome);
                }
            }
        }

        let cancel_cause = state.cancel_cause;
        let mut failed_node = None;
        let status = if cancel_cause.is_some() {
            state.skip_unstarted();
            RunStatus::Cancelled
        } else if let Some(node) = state.required_failure() {
            failed_node = Some(node);
            RunStatus::Failed
        } else {
            RunStatus::AllCompleted
        };

        let run = GraphRun {
            run_id,
            graph_name: graph.name.clone(),
            status,
            cancel_cause,
            failed_node,
            nodes: state
                .records
                .into_iter()
                .map(|r| (r.node_id.clone(), r))
                .collect::<BTreeMap<_, _>>(),
            started_at,
            elapsed: start.elapsed(),
        };

        tracing::info!(
            run_id = %run.run_id,
            status = ?run.status,
            elapsed_ms = run.elapsed.as_millis() as u64,
            failed = run.nodes_with(NodeStatus::Failed).len(),
            skipped = run.nodes_with(NodeStatus::Skipped).len(),
            "Graph run finished"
        );
        run
    }

    fn dispatch(
        &self,
        state: &mut RunState<'_>,
        idx: usize,
        input: &Value,
        run_cancel: &CancellationToken,
        tx: &mpsc::Sender<Completion>,
        run_id: &str,
    ) {
        let graph = state.graph;
        let node = &graph.nodes[idx];
        let inputs = state.inputs_for(idx, input);

        let record = &mut state.records[idx];
        record.status = NodeStatus::Running;
        record.started_at = Some(Utc::now());
        tracing::info!(run_id = %run_id, node = %node.id, "Dispatching node");

        let body = node.body.clone();
        let node_id = node.id.clone();
        let token = run_cancel.child_token();
        let tx = tx.clone();

        tokio::spawn(async move {
            let result = AssertUnwindSafe(body.execute(&node_id, inputs, token))
                .catch_unwind()
                .await;
            let outcome = match result {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(e)) => Err(e.to_string()),
                Err(payload) => Err(panic_message(payload)),
            };
            let _ = tx.send((idx, outcome)).await;
        });
    }
}
