use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agentmesh_controller::{
    AgentRuntime, CancellationToken, EngineConfig, GraphDefinition, GraphEngine, GraphNode,
};
use agentmesh_core::error::{GraphError, ProviderError};
use agentmesh_core::mocks::ScriptedProvider;
use agentmesh_core::traits::ProviderResponse;
use agentmesh_core::types::{
    CancelCause, InputValue, NodeOutput, NodeStatus, RunStatus, SkipReason,
};
use agentmesh_core::Error;
use agentmesh_skills::ToolRegistry;
use serde_json::{json, Value};
use tokio::sync::Barrier;

fn ok_node(id: &str) -> GraphNode {
    let value = id.to_string();
    GraphNode::task_fn(id, move |_, _| {
        let value = value.clone();
        async move {
            let mut out = NodeOutput::new();
            out.insert("out".into(), Value::String(value));
            Ok(out)
        }
    })
    .with_outputs(["out"])
}

fn failing_node(id: &str) -> GraphNode {
    GraphNode::task_fn(id, |_, _| async { Err(Error::internal("node exploded")) })
        .with_outputs(["out"])
}

/// Node that sleeps until done or cancelled.
fn slow_node(id: &str, duration: Duration) -> GraphNode {
    GraphNode::task_fn(id, move |_, cancel: CancellationToken| async move {
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::internal("interrupted")),
            _ = tokio::time::sleep(duration) => Ok(NodeOutput::new()),
        }
    })
}

fn agent(text: &str) -> (Arc<ScriptedProvider>, Arc<AgentRuntime>) {
    let provider = Arc::new(ScriptedProvider::repeating(ProviderResponse::text(text)));
    let runtime = AgentRuntime::builder()
        .with_provider(provider.clone())
        .build()
        .unwrap();
    (provider, Arc::new(runtime))
}

#[tokio::test]
async fn test_failure_skips_required_downstream() -> anyhow::Result<()> {
    let graph = GraphDefinition::new("abc")
        .add_node(failing_node("a"))
        .add_node(ok_node("b").depends_on("a"))
        .add_node(ok_node("c").depends_on("b"))
        .add_node(ok_node("independent"))
        .build()?;

    let run = GraphEngine::default()
        .run(&graph, Value::Null, &CancellationToken::new())
        .await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.status_of("a"), Some(NodeStatus::Failed));
    assert_eq!(run.status_of("b"), Some(NodeStatus::Skipped));
    assert_eq!(run.status_of("c"), Some(NodeStatus::Skipped));
    assert_eq!(run.status_of("independent"), Some(NodeStatus::Completed));
    assert_eq!(
        run.node("c").unwrap().skip_reason,
        Some(SkipReason::UpstreamFailed { upstream: "b".into() })
    );
    assert!(run.node("b").unwrap().started_at.is_none());

    match run.failure() {
        Some(GraphError::NodeFailed { node, message }) => {
            assert_eq!(node, "a");
            assert!(message.contains("node exploded"));
        }
        other => panic!("Expected NodeFailed, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_optional_edge_receives_failure_marker() {
    let seen = Arc::new(std::sync::Mutex::new(None));
    let sink = seen.clone();
    let graph = GraphDefinition::new("markers")
        .add_node(failing_node("a"))
        .add_node(ok_node("b").depends_on("a"))
        .add_node(
            GraphNode::task_fn("c", move |inputs, _| {
                let sink = sink.clone();
                async move {
                    *sink.lock().unwrap() = inputs.fields.get("from_b").cloned();
                    Ok(NodeOutput::new())
                }
            })
            .depends_on_optional("b")
            .bind("b", "out", "from_b"),
        )
        .build()
        .unwrap();

    let run = GraphEngine::default()
        .run(&graph, Value::Null, &CancellationToken::new())
        .await;

    assert_eq!(run.status_of("b"), Some(NodeStatus::Skipped));
    assert_eq!(run.status_of("c"), Some(NodeStatus::Completed));
    match seen.lock().unwrap().clone() {
        Some(InputValue::UpstreamFailed { upstream, error }) => {
            assert_eq!(upstream, "b");
            assert_eq!(error, "skipped: upstream 'a' failed");
        }
        other => panic!("Expected upstream failure marker, got {other:?}"),
    }
    // "a" still has a required outgoing edge.
    assert_eq!(run.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_failure_names_the_node_that_failed_the_run() -> anyhow::Result<()> {
    // "a" is tolerated by its only dependent; "z" has none and fails the run.
    let graph = GraphDefinition::new("attribution")
        .add_node(failing_node("a"))
        .add_node(ok_node("b").depends_on_optional("a"))
        .add_node(failing_node("z"))
        .build()?;

    let run = GraphEngine::default()
        .run(&graph, Value::Null, &CancellationToken::new())
        .await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.status_of("a"), Some(NodeStatus::Failed));
    assert_eq!(run.status_of("b"), Some(NodeStatus::Completed));
    assert_eq!(run.failed_node.as_deref(), Some("z"));
    match run.failure() {
        Some(GraphError::NodeFailed { node, .. }) => assert_eq!(node, "z"),
        other => panic!("Expected NodeFailed, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_independent_nodes_run_concurrently() {
    // With fewer than two in flight the barrier would never release.
    let barrier = Arc::new(Barrier::new(2));
    let node = |id: &str| {
        let barrier = barrier.clone();
        GraphNode::task_fn(id, move |_, _| {
            let barrier = barrier.clone();
            async move {
                barrier.wait().await;
                Ok(NodeOutput::new())
            }
        })
    };
    let graph = GraphDefinition::new("pair")
        .add_node(node("left"))
        .add_node(node("right"))
        .with_max_concurrency(2)
        .build()
        .unwrap();

    let run = tokio::time::timeout(
        Duration::from_secs(5),
        GraphEngine::default().run(&graph, Value::Null, &CancellationToken::new()),
    )
    .await
    .expect("nodes should run concurrently");

    assert!(run.is_success());
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_limit_is_respected() {
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut def = GraphDefinition::new("fan-out");
    for i in 0..6 {
        let (current, peak) = (current.clone(), peak.clone());
        def = def.add_node(GraphNode::task_fn(format!("n{i}"), move |_, _| {
            let (current, peak) = (current.clone(), peak.clone());
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(NodeOutput::new())
            }
        }));
    }
    let graph = def.build().unwrap();

    let engine = GraphEngine::new(EngineConfig {
        max_concurrency: 2,
        timeout: None,
    });
    let run = engine.run(&graph, Value::Null, &CancellationToken::new()).await;

    assert!(run.is_success());
    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_skips_unstarted_nodes() {
    let graph = GraphDefinition::new("cancel")
        .add_node(slow_node("slow", Duration::from_secs(10)))
        .add_node(ok_node("after").depends_on("slow"))
        .build()
        .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let run = GraphEngine::default().run(&graph, Value::Null, &cancel).await;

    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.cancel_cause, Some(CancelCause::External));
    assert_eq!(run.status_of("after"), Some(NodeStatus::Skipped));
    assert_eq!(run.node("after").unwrap().skip_reason, Some(SkipReason::Cancelled));
    assert!(matches!(run.failure(), Some(GraphError::Cancelled)));
}

#[tokio::test(start_paused = true)]
async fn test_run_timeout_cancels() {
    let graph = GraphDefinition::new("slow")
        .add_node(slow_node("slow", Duration::from_secs(10)))
        .add_node(ok_node("after").depends_on("slow"))
        .with_timeout(Duration::from_millis(200))
        .build()
        .unwrap();

    let run = GraphEngine::default()
        .run(&graph, Value::Null, &CancellationToken::new())
        .await;

    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.cancel_cause, Some(CancelCause::Deadline(Duration::from_millis(200))));
    assert_eq!(run.node("after").unwrap().skip_reason, Some(SkipReason::Cancelled));
    assert!(matches!(run.failure(), Some(GraphError::TimedOut(_))));
}

#[tokio::test]
async fn test_invalid_graph_never_runs() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = |id: &str| {
        let calls = calls.clone();
        GraphNode::task_fn(id, move |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(NodeOutput::new()) }
        })
    };

    let result = GraphDefinition::new("cycle")
        .add_node(counted("a").depends_on("b"))
        .add_node(counted("b").depends_on("a"))
        .build();

    assert!(matches!(result, Err(GraphError::CycleDetected(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_agent_nodes_render_prompts_from_inputs() {
    let (research_provider, researcher) = agent("Rust has ownership.");
    let (writer_provider, writer) = agent("An article.");

    let graph = GraphDefinition::new("article")
        .add_node(GraphNode::agent("research", researcher, "Research {{ input }}"))
        .add_node(
            GraphNode::agent("write", writer, "Write about: {{ notes }}")
                .depends_on("research")
                .bind("research", "answer", "notes"),
        )
        .build()
        .unwrap();

    let run = GraphEngine::default()
        .run(&graph, json!("rust"), &CancellationToken::new())
        .await;

    assert!(run.is_success());
    assert_eq!(run.output("write").unwrap()["answer"], "An article.");
    assert_eq!(research_provider.conversations()[0][0].content, "Research rust");
    assert_eq!(
        writer_provider.conversations()[0][0].content,
        "Write about: Rust has ownership."
    );
}

#[tokio::test]
async fn test_failed_agent_fails_its_node() {
    let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderError::authentication(
        "bad key",
    ))]));
    let runtime = Arc::new(AgentRuntime::builder().with_provider(provider).build().unwrap());
    let graph = GraphDefinition::new("g")
        .add_node(GraphNode::agent("a", runtime, "hello"))
        .build()
        .unwrap();

    let run = GraphEngine::default()
        .run(&graph, Value::Null, &CancellationToken::new())
        .await;

    assert_eq!(run.status_of("a"), Some(NodeStatus::Failed));
    assert!(run.node("a").unwrap().error.as_ref().unwrap().contains("bad key"));
}

#[tokio::test]
async fn test_tool_node_merges_bound_arguments() {
    let tools = Arc::new(ToolRegistry::with_builtins());
    let graph = GraphDefinition::new("math")
        .add_node(
            GraphNode::task_fn("source", |_, _| async {
                let mut out = NodeOutput::new();
                out.insert("n".into(), json!(5));
                Ok(out)
            })
            .with_outputs(["n"]),
        )
        .add_node(
            GraphNode::tool(
                "sum",
                tools,
                "calculator",
                json!({ "operation": "add", "a": 1 }),
                "text",
            )
            .depends_on("source")
            .bind("source", "n", "b"),
        )
        .build()
        .unwrap();

    let run = GraphEngine::default()
        .run(&graph, Value::Null, &CancellationToken::new())
        .await;

    assert!(run.is_success());
    let text = run.output("sum").unwrap()["text"].as_str().unwrap().to_string();
    assert!(text.ends_with("= 6"), "unexpected output {text}");
}

#[tokio::test]
async fn test_chain_passes_previous_output() {
    let upper = GraphNode::task_fn("upper", |inputs, _| async move {
        let prev = inputs.get("previous").and_then(Value::as_str).unwrap_or("").to_uppercase();
        let mut out = NodeOutput::new();
        out.insert("out".into(), Value::String(prev));
        Ok(out)
    })
    .with_outputs(["out"]);

    let graph = GraphDefinition::chain("pipeline", vec![ok_node("start"), upper])
        .build()
        .unwrap();

    let run = GraphEngine::default()
        .run(&graph, Value::Null, &CancellationToken::new())
        .await;

    assert!(run.is_success());
    assert_eq!(run.output("upper").unwrap()["out"], "START");
}
