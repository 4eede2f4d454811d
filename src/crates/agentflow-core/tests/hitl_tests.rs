//! Pause/resume scenarios: human nodes, tool-initiated pauses, response
//! validation, checkpoint round-trips and pending-interaction lookup.

use agentflow_checkpoint::{CheckpointPolicy, CheckpointStore, ExecutionState, InMemoryCheckpointStore};
use agentflow_core::{
    Agent, AgentNode, Graph, GraphRunner, HumanInteraction, HumanNode, HumanResponse,
    InteractionOption, Message, NodeResult, OutputNode, RunStatus, State, Tool, ToolContext,
    ToolNode, ToolResult,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

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

fn selected(option: &'static str) -> agentflow_core::EdgeCondition {
    Arc::new(move |result: &NodeResult| {
        result.data["selectedOption"].as_str() == Some(option)
    })
}

/// S4 fixture: draft -> review(human) -> publish | revise -> out.
fn approval_graph() -> Graph {
    Graph::builder("approval")
        .add_node(AgentNode::new(
            "draft",
            Arc::new(CannedAgent { id: "draft", answer: "draft-v1" }),
        ))
        .add_node(
            HumanNode::new("review", "Approve the draft?").with_options(vec![
                InteractionOption::new("approve", "Approve"),
                InteractionOption::new("reject", "Reject"),
            ]),
        )
        .add_node(AgentNode::new(
            "publish",
            Arc::new(CannedAgent { id: "publish", answer: "published" }),
        ))
        .add_node(AgentNode::new(
            "revise",
            Arc::new(CannedAgent { id: "revise", answer: "revised" }),
        ))
        .add_node(OutputNode::select_previous("out"))
        .edge("draft", "review")
        .edge_when("review", "publish", selected("approve"))
        .edge_when("review", "revise", selected("reject"))
        .edge("publish", "out")
        .edge("revise", "out")
        .build()
        .unwrap()
}

fn input_of(text: &str) -> State {
    let mut input = State::new();
    input.insert("input".to_string(), json!(text));
    input
}

#[tokio::test]
async fn human_node_pauses_with_durable_checkpoint() {
    let graph = approval_graph();
    let store = Arc::new(InMemoryCheckpointStore::new());
    let runner = GraphRunner::new();

    let report = runner
        .run_with_checkpoint(&graph, input_of("write it"), store.clone(), CheckpointPolicy::default())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Paused);
    let checkpoint_id = report.checkpoint_id.expect("paused run has a checkpoint id");

    let checkpoint = store.load(&checkpoint_id).await.unwrap();
    assert_eq!(checkpoint.execution_state, ExecutionState::WaitingForHuman);
    assert_eq!(checkpoint.current_node_id, "review");
    assert_eq!(checkpoint.run_id, report.run_id);

    let pending = checkpoint.pending_interaction.expect("pending interaction persisted");
    assert_eq!(
        pending["toolCallId"],
        json!(format!("hitl_{}_review_0", report.run_id))
    );
    assert_eq!(pending["interaction"]["prompt"], json!("Approve the draft?"));

    // Only the draft node completed before the pause.
    let nodes: Vec<&str> = report.node_reports.iter().map(|r| r.node_id.as_str()).collect();
    assert_eq!(nodes, vec!["draft"]);
}

#[tokio::test]
async fn resume_with_approval_reaches_publish() {
    let graph = approval_graph();
    let store = Arc::new(InMemoryCheckpointStore::new());
    let runner = GraphRunner::new();

    let paused = runner
        .run_with_checkpoint(&graph, input_of("write it"), store.clone(), CheckpointPolicy::default())
        .await
        .unwrap();
    let checkpoint_id = paused.checkpoint_id.unwrap();

    let report = runner
        .resume_with_human_response(
            &graph,
            &checkpoint_id,
            HumanResponse::choice("review", "approve"),
            store.clone(),
        )
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(
        report.result.as_ref().unwrap()["content"],
        json!("published")
    );
    assert_eq!(report.run_id, paused.run_id);
    // The resumed report carries the full history: draft, review, publish, out.
    let nodes: Vec<&str> = report.node_reports.iter().map(|r| r.node_id.as_str()).collect();
    assert_eq!(nodes, vec!["draft", "review", "publish", "out"]);
}

#[tokio::test]
async fn resume_with_rejection_takes_the_other_branch() {
    let graph = approval_graph();
    let store = Arc::new(InMemoryCheckpointStore::new());
    let runner = GraphRunner::new();

    let paused = runner
        .run_with_checkpoint(&graph, input_of("write it"), store.clone(), CheckpointPolicy::default())
        .await
        .unwrap();

    let report = runner
        .resume_with_human_response(
            &graph,
            &paused.checkpoint_id.unwrap(),
            HumanResponse::choice("review", "reject"),
            store,
        )
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.result.as_ref().unwrap()["content"], json!("revised"));
}

#[tokio::test]
async fn invalid_response_fails_and_keeps_checkpoint_waiting() {
    // S5: choice "maybe" is not one of the options.
    let graph = approval_graph();
    let store = Arc::new(InMemoryCheckpointStore::new());
    let runner = GraphRunner::new();

    let paused = runner
        .run_with_checkpoint(&graph, input_of("write it"), store.clone(), CheckpointPolicy::default())
        .await
        .unwrap();
    let checkpoint_id = paused.checkpoint_id.unwrap();

    let report = runner
        .resume_with_human_response(
            &graph,
            &checkpoint_id,
            HumanResponse::choice("review", "maybe"),
            store.clone(),
        )
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.error_kind.as_deref(), Some("hitl"));

    // The stored checkpoint is untouched and still resumable.
    let checkpoint = store.load(&checkpoint_id).await.unwrap();
    assert_eq!(checkpoint.execution_state, ExecutionState::WaitingForHuman);

    let retried = runner
        .resume_with_human_response(
            &graph,
            &checkpoint_id,
            HumanResponse::choice("review", "approve"),
            store,
        )
        .await
        .unwrap();
    assert_eq!(retried.status, RunStatus::Success);
}

#[tokio::test]
async fn resume_without_response_reports_awaiting() {
    let graph = approval_graph();
    let store = Arc::new(InMemoryCheckpointStore::new());
    let runner = GraphRunner::new();

    let paused = runner
        .run_with_checkpoint(&graph, input_of("write it"), store.clone(), CheckpointPolicy::default())
        .await
        .unwrap();

    let report = runner
        .resume(
            &graph,
            &paused.checkpoint_id.unwrap(),
            store,
            CheckpointPolicy::default(),
        )
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.error_kind.as_deref(), Some("awaiting_response"));
}

#[tokio::test]
async fn pending_interactions_are_listed_until_resolved() {
    let graph = approval_graph();
    let store = Arc::new(InMemoryCheckpointStore::new());
    let runner = GraphRunner::new();

    let paused = runner
        .run_with_checkpoint(&graph, input_of("write it"), store.clone(), CheckpointPolicy::default())
        .await
        .unwrap();
    let checkpoint_id = paused.checkpoint_id.unwrap();

    let pending = runner
        .get_pending_interactions(&checkpoint_id, store.clone())
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].node_id, "review");
    assert_eq!(pending[0].options.len(), 2);
    assert!(!pending[0].allow_free_text);
}

#[tokio::test]
async fn pause_without_store_is_a_configuration_error() {
    let graph = approval_graph();
    let report = GraphRunner::new().run(&graph, input_of("write it")).await.unwrap();
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.error_kind.as_deref(), Some("configuration"));
}

/// A tool that needs approval before acting: pauses on first execution and
/// completes once a response is attached.
struct TransferTool;

#[async_trait]
impl Tool for TransferTool {
    fn name(&self) -> &str {
        "transfer"
    }

    async fn execute(
        &self,
        params: HashMap<String, Value>,
        ctx: &ToolContext,
    ) -> agentflow_core::Result<ToolResult> {
        match &ctx.hitl_response {
            Some(response) if response.selected_option.as_deref() == Some("approve") => {
                let amount = params.get("amount").cloned().unwrap_or(json!(0));
                Ok(ToolResult::ok(json!({"transferred": amount})))
            }
            Some(_) => Ok(ToolResult::ok(json!({"transferred": 0}))),
            None => Ok(ToolResult::waiting(
                HumanInteraction::new(ctx.graph.node_id.clone(), "Approve the transfer?")
                    .with_options(vec![
                        InteractionOption::new("approve", "Approve"),
                        InteractionOption::new("deny", "Deny"),
                    ]),
            )),
        }
    }
}

#[tokio::test]
async fn tool_waiting_result_pauses_and_resumes() {
    let graph = Graph::builder("transfer")
        .add_node(ToolNode::new("pay", Arc::new(TransferTool)))
        .add_node(OutputNode::select_previous("out"))
        .edge("pay", "out")
        .build()
        .unwrap();

    let store = Arc::new(InMemoryCheckpointStore::new());
    let runner = GraphRunner::new();

    let mut input = State::new();
    input.insert("amount".to_string(), json!(250));

    let paused = runner
        .run_with_checkpoint(&graph, input, store.clone(), CheckpointPolicy::default())
        .await
        .unwrap();
    assert_eq!(paused.status, RunStatus::Paused);

    let checkpoint_id = paused.checkpoint_id.unwrap();
    let checkpoint = store.load(&checkpoint_id).await.unwrap();
    let pending = checkpoint.pending_interaction.unwrap();
    assert_eq!(pending["origin"], json!("tool"));
    assert_eq!(
        pending["toolCallId"],
        json!(format!("hitl_{}_pay_0", paused.run_id))
    );

    let report = runner
        .resume_with_human_response(
            &graph,
            &checkpoint_id,
            HumanResponse::choice("pay", "approve"),
            store,
        )
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.result, Some(json!({"transferred": 250})));
}

#[tokio::test]
async fn checkpoint_round_trip_matches_in_memory_continuation() {
    // The same deterministic graph, paused+resumed vs answered directly,
    // lands on the same result.
    let graph = approval_graph();
    let store = Arc::new(InMemoryCheckpointStore::new());
    let runner = GraphRunner::new();

    let paused = runner
        .run_with_checkpoint(&graph, input_of("write it"), store.clone(), CheckpointPolicy::default())
        .await
        .unwrap();
    let resumed = runner
        .resume_with_human_response(
            &graph,
            &paused.checkpoint_id.unwrap(),
            HumanResponse::choice("review", "approve"),
            store.clone(),
        )
        .await
        .unwrap();

    let store2 = Arc::new(InMemoryCheckpointStore::new());
    let paused2 = runner
        .run_with_checkpoint(&graph, input_of("write it"), store2.clone(), CheckpointPolicy::default())
        .await
        .unwrap();
    let resumed2 = runner
        .resume_with_human_response(
            &graph,
            &paused2.checkpoint_id.unwrap(),
            HumanResponse::choice("review", "approve"),
            store2,
        )
        .await
        .unwrap();

    assert_eq!(
        resumed.result.as_ref().unwrap()["content"],
        resumed2.result.as_ref().unwrap()["content"]
    );
}

#[tokio::test]
async fn resume_checks_graph_identity() {
    let graph = approval_graph();
    let store = Arc::new(InMemoryCheckpointStore::new());
    let runner = GraphRunner::new();

    let paused = runner
        .run_with_checkpoint(&graph, input_of("write it"), store.clone(), CheckpointPolicy::default())
        .await
        .unwrap();

    let other = Graph::builder("different")
        .add_node(OutputNode::select_key("out", "input"))
        .build()
        .unwrap();

    let err = runner
        .resume(
            &other,
            &paused.checkpoint_id.unwrap(),
            store,
            CheckpointPolicy::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "configuration");
}

#[tokio::test]
async fn periodic_checkpoints_follow_the_policy() {
    let graph = Graph::builder("steps")
        .add_node(AgentNode::new("a", Arc::new(CannedAgent { id: "a", answer: "one" })))
        .add_node(AgentNode::new("b", Arc::new(CannedAgent { id: "b", answer: "two" })))
        .add_node(AgentNode::new("c", Arc::new(CannedAgent { id: "c", answer: "three" })))
        .add_node(OutputNode::select_previous("out"))
        .edge("a", "b")
        .edge("b", "c")
        .edge("c", "out")
        .build()
        .unwrap();

    let store = Arc::new(InMemoryCheckpointStore::new());
    let report = GraphRunner::new()
        .run_with_checkpoint(
            &graph,
            input_of("go"),
            store.clone(),
            CheckpointPolicy::new().with_save_every_n_nodes(2),
        )
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Success);
    let saved = store.list_by_run(&report.run_id).await.unwrap();
    // Saves after the 2nd and 4th successful nodes.
    assert_eq!(saved.len(), 2);
    assert!(saved
        .iter()
        .all(|cp| cp.execution_state == ExecutionState::Running));
}
