//! End-to-end runner scenarios: linear runs, branching, retries, error
//! actions, runtime cycle detection, cancellation and timeouts.

use agentflow_core::{
    Agent, AgentNode, ErrorAction, FlowError, Graph, GraphRunner, Message, Middleware, NodeRequest,
    NodeResult, OutputNode, RetryMiddleware, RetryPolicy, RunStatus, RunnerConfig, State, Tool,
    ToolContext, ToolNode, ToolResult,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct EchoAgent;

#[async_trait]
impl Agent for EchoAgent {
    fn id(&self) -> &str {
        "echo"
    }

    async fn process(&self, message: Message) -> agentflow_core::Result<Message> {
        Ok(message.reply(format!("ok:{}", message.content), "echo"))
    }
}

struct CannedAgent {
    id: &'static str,
    answer: &'static str,
}

#[async_trait]
impl Agent for CannedAgent {
    fn id(&self) -> &str {
        self.id
    }

    async fn process(&self, message: Message) -> agentflow_core::Result<Message> {
        Ok(message.reply(self.answer, self.id))
    }
}

/// Routes on keywords in the inbound content.
struct ClassifierAgent;

#[async_trait]
impl Agent for ClassifierAgent {
    fn id(&self) -> &str {
        "classifier"
    }

    async fn process(&self, message: Message) -> agentflow_core::Result<Message> {
        let category = if message.content.contains("refund") {
            "refund"
        } else if message.content.contains("crash") {
            "tech"
        } else {
            "general"
        };
        Ok(message.reply(category, "classifier"))
    }
}

fn input_of(text: &str) -> State {
    let mut input = State::new();
    input.insert("input".to_string(), json!(text));
    input
}

fn content_of(result: &Value) -> String {
    result["content"].as_str().unwrap_or_default().to_string()
}

fn routes_to(category: &'static str) -> agentflow_core::EdgeCondition {
    Arc::new(move |result: &NodeResult| {
        result.data["content"].as_str() == Some(category)
    })
}

#[tokio::test]
async fn linear_run_agent_to_output() {
    // S1: A(agent) -> B(output selecting state["A"]).
    let graph = Graph::builder("linear")
        .add_node(AgentNode::new("a", Arc::new(EchoAgent)))
        .add_node(OutputNode::select_key("b", "a"))
        .edge("a", "b")
        .build()
        .unwrap();

    let report = GraphRunner::new().run(&graph, input_of("hi")).await.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(content_of(report.result.as_ref().unwrap()), "ok:hi");
    let nodes: Vec<&str> = report
        .node_reports
        .iter()
        .map(|r| r.node_id.as_str())
        .collect();
    assert_eq!(nodes, vec!["a", "b"]);
    assert!(report.error.is_none());
}

#[tokio::test]
async fn conditional_branch_routes_first_match() {
    // S2: classifier -> refund | tech | general -> out.
    let graph = Graph::builder("support")
        .add_node(AgentNode::new("intake", Arc::new(ClassifierAgent)))
        .add_node(AgentNode::new(
            "refund",
            Arc::new(CannedAgent {
                id: "refund",
                answer: "We'll process your refund within 3 business days.",
            }),
        ))
        .add_node(AgentNode::new(
            "tech",
            Arc::new(CannedAgent { id: "tech", answer: "Try turning it off and on." }),
        ))
        .add_node(AgentNode::new(
            "general",
            Arc::new(CannedAgent { id: "general", answer: "How can we help?" }),
        ))
        .add_node(OutputNode::select_previous("out"))
        .edge_when("intake", "refund", routes_to("refund"))
        .edge_when("intake", "tech", routes_to("tech"))
        .edge_when("intake", "general", Arc::new(|_: &NodeResult| true))
        .edge("refund", "out")
        .edge("tech", "out")
        .edge("general", "out")
        .build()
        .unwrap();

    let report = GraphRunner::new()
        .run(&graph, input_of("I need a refund"))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert!(content_of(report.result.as_ref().unwrap()).starts_with("We'll process your refund"));
    let nodes: Vec<&str> = report
        .node_reports
        .iter()
        .map(|r| r.node_id.as_str())
        .collect();
    assert_eq!(nodes, vec!["intake", "refund", "out"]);
}

struct FlakyTool {
    failures: AtomicU32,
}

#[async_trait]
impl Tool for FlakyTool {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn execute(
        &self,
        _params: HashMap<String, Value>,
        _ctx: &ToolContext,
    ) -> agentflow_core::Result<ToolResult> {
        if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            (n > 0).then(|| n - 1)
        })
        .is_ok()
        {
            Err(FlowError::timeout("flaky upstream", 1))
        } else {
            Ok(ToolResult::ok(json!("done")))
        }
    }
}

#[tokio::test]
async fn transient_errors_are_retried_to_success() {
    // S3: fails twice with a timeout, succeeds on attempt 3.
    let graph = Graph::builder("retry")
        .add_node(ToolNode::new(
            "t",
            Arc::new(FlakyTool { failures: AtomicU32::new(2) }),
        ))
        .add_node(OutputNode::select_previous("out"))
        .edge("t", "out")
        .middleware(Arc::new(RetryMiddleware::new(
            RetryPolicy::new(3).with_initial_backoff(1).with_jitter(false),
        )))
        .build()
        .unwrap();

    let runner = GraphRunner::new().with_config(
        RunnerConfig::new().with_retry(RetryPolicy::new(3).with_initial_backoff(1).with_jitter(false)),
    );
    let report = runner.run(&graph, State::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.result, Some(json!("done")));
    assert_eq!(report.node_reports[0].attempts, 3);
}

#[tokio::test]
async fn exhausted_retries_fail_the_run() {
    let graph = Graph::builder("retry")
        .add_node(ToolNode::new(
            "t",
            Arc::new(FlakyTool { failures: AtomicU32::new(10) }),
        ))
        .add_node(OutputNode::select_previous("out"))
        .edge("t", "out")
        .middleware(Arc::new(RetryMiddleware::new(
            RetryPolicy::new(2).with_initial_backoff(1).with_jitter(false),
        )))
        .build()
        .unwrap();

    let runner = GraphRunner::new().with_config(
        RunnerConfig::new().with_retry(RetryPolicy::new(2).with_initial_backoff(1).with_jitter(false)),
    );
    let report = runner.run(&graph, State::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.error_kind.as_deref(), Some("timeout"));
    assert_eq!(report.failed_node.as_deref(), Some("t"));
    assert_eq!(report.node_reports[0].attempts, 2);
}

#[tokio::test]
async fn without_middleware_failures_propagate() {
    let graph = Graph::builder("no-retry")
        .add_node(ToolNode::new(
            "t",
            Arc::new(FlakyTool { failures: AtomicU32::new(1) }),
        ))
        .add_node(OutputNode::select_previous("out"))
        .edge("t", "out")
        .build()
        .unwrap();

    let report = GraphRunner::new().run(&graph, State::new()).await.unwrap();
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.node_reports[0].attempts, 1);
}

struct ConstTool {
    value: &'static str,
}

#[async_trait]
impl Tool for ConstTool {
    fn name(&self) -> &str {
        "const"
    }

    async fn execute(
        &self,
        _params: HashMap<String, Value>,
        _ctx: &ToolContext,
    ) -> agentflow_core::Result<ToolResult> {
        Ok(ToolResult::ok(json!(self.value)))
    }
}

struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "failing"
    }

    async fn execute(
        &self,
        _params: HashMap<String, Value>,
        _ctx: &ToolContext,
    ) -> agentflow_core::Result<ToolResult> {
        Ok(ToolResult::failure("always broken", false))
    }
}

struct SkipOnError;

#[async_trait]
impl Middleware for SkipOnError {
    async fn on_error(&self, _error: &FlowError, _request: &NodeRequest) -> ErrorAction {
        ErrorAction::Skip
    }
}

#[tokio::test]
async fn skip_preserves_previous_result() {
    let graph = Graph::builder("skip")
        .add_node(ToolNode::new("first", Arc::new(ConstTool { value: "first" })))
        .add_node(ToolNode::new("broken", Arc::new(FailingTool)))
        .add_node(OutputNode::select_previous("out"))
        .edge("first", "broken")
        .edge("broken", "out")
        .middleware(Arc::new(SkipOnError))
        .build()
        .unwrap();

    let report = GraphRunner::new().run(&graph, State::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.result, Some(json!("first")));
    let statuses: Vec<_> = report.node_reports.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            agentflow_core::NodeStatus::Success,
            agentflow_core::NodeStatus::Skipped,
            agentflow_core::NodeStatus::Success,
        ]
    );
    // The skipped node contributed nothing to state.
    assert!(report.node_reports[1].output.is_none());
}

struct ContinueOnError;

#[async_trait]
impl Middleware for ContinueOnError {
    async fn on_error(&self, _error: &FlowError, _request: &NodeRequest) -> ErrorAction {
        ErrorAction::Continue(json!("recovered"))
    }
}

#[tokio::test]
async fn continue_substitutes_the_result() {
    let graph = Graph::builder("continue")
        .add_node(ToolNode::new("broken", Arc::new(FailingTool)))
        .add_node(OutputNode::select_previous("out"))
        .edge("broken", "out")
        .middleware(Arc::new(ContinueOnError))
        .build()
        .unwrap();

    let report = GraphRunner::new().run(&graph, State::new()).await.unwrap();
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.result, Some(json!("recovered")));
    assert_eq!(report.node_reports[0].status, agentflow_core::NodeStatus::Success);
}

#[tokio::test]
async fn innermost_error_decision_wins() {
    struct Deciding {
        value: &'static str,
    }

    #[async_trait]
    impl Middleware for Deciding {
        async fn on_error(&self, _error: &FlowError, _request: &NodeRequest) -> ErrorAction {
            ErrorAction::Continue(json!(self.value))
        }
    }

    let graph = Graph::builder("decisions")
        .add_node(ToolNode::new("broken", Arc::new(FailingTool)))
        .add_node(OutputNode::select_previous("out"))
        .edge("broken", "out")
        .middleware(Arc::new(Deciding { value: "outer" }))
        .middleware(Arc::new(Deciding { value: "inner" }))
        .build()
        .unwrap();

    let report = GraphRunner::new().run(&graph, State::new()).await.unwrap();
    assert_eq!(report.result, Some(json!("inner")));
}

#[tokio::test]
async fn unconditional_cycle_is_rejected_at_build() {
    // S6: A <-> B with unconditional edges never validates.
    let result = Graph::builder("cycle")
        .add_node(ToolNode::new("a", Arc::new(ConstTool { value: "loop" })))
        .add_node(ToolNode::new("b", Arc::new(ConstTool { value: "loop" })))
        .edge("a", "b")
        .edge("b", "a")
        .build();
    assert!(matches!(
        result.unwrap_err(),
        agentflow_core::ValidationError::CycleDetected { .. }
    ));
}

#[tokio::test]
async fn non_converging_conditional_cycle_fails_at_runtime() {
    // S6 variant: legal conditional cycle whose state stops changing.
    let always = || Arc::new(|_: &NodeResult| true) as agentflow_core::EdgeCondition;
    let graph = Graph::builder("spin")
        .add_node(ToolNode::new("a", Arc::new(ConstTool { value: "loop" })))
        .add_node(ToolNode::new("b", Arc::new(ConstTool { value: "loop" })))
        .edge_when("a", "b", always())
        .edge_when("b", "a", always())
        .build()
        .unwrap();

    let report = GraphRunner::new().run(&graph, State::new()).await.unwrap();
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.error_kind.as_deref(), Some("cycle_at_runtime"));
}

struct SlowTool;

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    async fn execute(
        &self,
        _params: HashMap<String, Value>,
        _ctx: &ToolContext,
    ) -> agentflow_core::Result<ToolResult> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(ToolResult::ok(json!("slow")))
    }
}

#[tokio::test]
async fn per_node_timeout_fails_as_timeout() {
    let graph = Graph::builder("deadline")
        .add_node(ToolNode::new("slow", Arc::new(SlowTool)))
        .add_node(OutputNode::select_previous("out"))
        .edge("slow", "out")
        .build()
        .unwrap();

    let runner = GraphRunner::new()
        .with_config(RunnerConfig::new().with_per_node_timeout(Duration::from_millis(5)));
    let report = runner.run(&graph, State::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.error_kind.as_deref(), Some("timeout"));
}

#[tokio::test]
async fn per_run_deadline_cancels() {
    let graph = Graph::builder("budget")
        .add_node(ToolNode::new("a", Arc::new(SlowTool)))
        .add_node(ToolNode::new("b", Arc::new(SlowTool)))
        .add_node(OutputNode::select_previous("out"))
        .edge("a", "b")
        .edge("b", "out")
        .build()
        .unwrap();

    let runner = GraphRunner::new()
        .with_config(RunnerConfig::new().with_per_run_timeout(Duration::from_millis(20)));
    let report = runner.run(&graph, State::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert!(report.error.is_none());
}

#[tokio::test]
async fn external_cancellation_is_reported_as_cancelled() {
    let graph = Arc::new(
        Graph::builder("cancel")
            .add_node(ToolNode::new("a", Arc::new(SlowTool)))
            .add_node(ToolNode::new("b", Arc::new(SlowTool)))
            .add_node(OutputNode::select_previous("out"))
            .edge("a", "b")
            .edge("b", "out")
            .build()
            .unwrap(),
    );

    let runner = Arc::new(GraphRunner::new());
    let token = runner.cancellation_token();
    let task = {
        let runner = runner.clone();
        let graph = graph.clone();
        tokio::spawn(async move { runner.run(&graph, State::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    token.cancel();

    let report = task.await.unwrap().unwrap();
    assert_eq!(report.status, RunStatus::Cancelled);
}

#[tokio::test]
async fn state_is_threaded_immutably() {
    // The input map the caller handed in is reflected untouched in the
    // report's node outputs; each node only adds its own contribution.
    let graph = Graph::builder("thread")
        .add_node(ToolNode::new("a", Arc::new(ConstTool { value: "first" })))
        .add_node(ToolNode::new("b", Arc::new(ConstTool { value: "second" })))
        .add_node(OutputNode::select_key("out", "a"))
        .edge("a", "b")
        .edge("b", "out")
        .build()
        .unwrap();

    let report = GraphRunner::new().run(&graph, input_of("seed")).await.unwrap();
    assert_eq!(report.status, RunStatus::Success);
    // "out" selects node a's contribution even though b ran later.
    assert_eq!(report.result, Some(json!("first")));
}

#[tokio::test]
async fn agent_refusal_surfaces_as_cannot_handle() {
    struct PickyAgent;

    #[async_trait]
    impl Agent for PickyAgent {
        fn id(&self) -> &str {
            "picky"
        }

        async fn process(&self, message: Message) -> agentflow_core::Result<Message> {
            Ok(message.reply("never", "picky"))
        }

        fn can_handle(&self, message: &Message) -> bool {
            message.content.contains("magic")
        }
    }

    let graph = Graph::builder("picky")
        .add_node(AgentNode::new("p", Arc::new(PickyAgent)))
        .add_node(OutputNode::select_previous("out"))
        .edge("p", "out")
        .build()
        .unwrap();

    let report = GraphRunner::new().run(&graph, input_of("plain")).await.unwrap();
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.error_kind.as_deref(), Some("agent_cannot_handle"));
}
