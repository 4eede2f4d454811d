//! The graph runner: edge-driven execution, pause/resume, events
//!
//! [`GraphRunner`] drives a validated [`Graph`] from its entry point:
//! evaluate the outgoing edges of the node that just finished, follow the
//! first match, wrap every node invocation in the graph's middleware chain,
//! thread the state map immutably, and persist [`Checkpoint`]s according to
//! policy. Within a run, node executions are strictly sequential;
//! independent runs progress in parallel on the shared tokio pool.
//!
//! # Lifecycle events
//!
//! With an event bus attached, a run emits `GraphStarted`, then per node
//! `NodeStarted` followed by exactly one of `NodeSucceeded` / `NodeFailed` /
//! `NodeSkipped` (each retry attempt is its own `NodeStarted`/`NodeFailed`
//! pair), optionally `CheckpointSaved`, then - when pausing -
//! `GraphPaused` and `HitlRequested`, and finally `GraphFinished`. Events of
//! one run carry monotonically increasing versions and arrive at
//! subscribers in emission order; publish failures are logged and never
//! fail the run.
//!
//! # Pause and resume
//!
//! A `HumanNode`, or a tool returning a waiting result, suspends the run:
//! the runner persists a `WaitingForHuman` checkpoint embedding the pending
//! interaction (durably, before returning) and hands back a report with
//! status `Paused` and the checkpoint id. [`GraphRunner::resume_with_human_response`]
//! validates the response against the stored interaction and continues the
//! run exactly where it stopped, reusing the deterministic `tool_call_id`
//! of the pause.
//!
//! ```rust,ignore
//! let runner = GraphRunner::new().with_event_bus(bus);
//! let report = runner
//!     .run_with_checkpoint(&graph, input, store.clone(), CheckpointPolicy::default())
//!     .await?;
//! if report.status == RunStatus::Paused {
//!     let checkpoint_id = report.checkpoint_id.unwrap();
//!     let response = HumanResponse::choice("review", "approve");
//!     runner
//!         .resume_with_human_response(&graph, &checkpoint_id, response, store)
//!         .await?;
//! }
//! ```

pub mod types;

pub use types::{
    state_after, state_hash, CancellationToken, NodeReport, NodeStatus, RunReport, RunStatus,
    RunnerConfig,
};

use crate::context::{keys, ExecutionContext};
use crate::error::{FlowError, Result};
use crate::graph::Graph;
use crate::hitl::{HitlRequest, HitlType, HumanInteraction, HumanResponse, PauseOrigin, PendingInteraction};
use crate::middleware::{compose, ErrorAction, NodeHandler};
use crate::node::{Node, NodeContext, NodeKind, NodeRequest, NodeResult, State, INPUT_KEY, PREVIOUS_KEY};
use agentflow_checkpoint::{
    prune_run, Checkpoint, CheckpointPolicy, CheckpointStore, ExecutionState,
};
use agentflow_events::{event_types, Event, EventBus, EventMetadata};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Executes graphs; cheap to clone per run via `Arc` internals
pub struct GraphRunner {
    config: RunnerConfig,
    bus: Option<Arc<dyn EventBus>>,
    cancellation: CancellationToken,
}

impl Default for GraphRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutable bookkeeping of one run
struct Session {
    run_id: String,
    state: State,
    ctx: ExecutionContext,
    visited: HashSet<u64>,
    node_reports: Vec<NodeReport>,
    event_version: u64,
    started: Instant,
    store: Option<Arc<dyn CheckpointStore>>,
    policy: CheckpointPolicy,
    nodes_since_save: u32,
    last_save: Instant,
    checkpoint_id: Option<String>,
}

impl Session {
    fn new(
        run_id: String,
        state: State,
        ctx: ExecutionContext,
        store: Option<Arc<dyn CheckpointStore>>,
        policy: CheckpointPolicy,
    ) -> Self {
        Self {
            run_id,
            state,
            ctx,
            visited: HashSet::new(),
            node_reports: Vec::new(),
            event_version: 0,
            started: Instant::now(),
            store,
            policy,
            nodes_since_save: 0,
            last_save: Instant::now(),
            checkpoint_id: None,
        }
    }
}

/// Outcome of invoking one node, retries included
enum Invocation {
    Success { result: NodeResult, attempts: u32 },
    Skipped { attempts: u32 },
    Failed { error: FlowError, attempts: u32 },
    Cancelled,
}

impl GraphRunner {
    pub fn new() -> Self {
        Self {
            config: RunnerConfig::default(),
            bus: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Token cancelling runs started from this runner; checked at every
    /// suspension point.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Execute a graph without checkpointing. A run that needs to pause
    /// fails with a configuration error - pausing requires a store.
    pub async fn run(&self, graph: &Graph, input: State) -> Result<RunReport> {
        let ctx = context_from_input(&input);
        self.start(graph, input, ctx, None, CheckpointPolicy::default())
            .await
    }

    /// Execute with an explicit execution context.
    pub async fn run_with_context(
        &self,
        graph: &Graph,
        input: State,
        ctx: ExecutionContext,
    ) -> Result<RunReport> {
        self.start(graph, input, ctx, None, CheckpointPolicy::default())
            .await
    }

    /// Execute with checkpointing: periodic snapshots per policy, durable
    /// snapshots on pause and (per policy) on failure.
    pub async fn run_with_checkpoint(
        &self,
        graph: &Graph,
        input: State,
        store: Arc<dyn CheckpointStore>,
        policy: CheckpointPolicy,
    ) -> Result<RunReport> {
        let ctx = context_from_input(&input);
        self.start(graph, input, ctx, Some(store), policy).await
    }

    /// Resume a run from a checkpoint.
    ///
    /// A `WaitingForHuman` checkpoint must already carry a response
    /// (attached via [`GraphRunner::resume_with_human_response`]); without
    /// one the report fails with the `awaiting_response` kind. A `Running`
    /// checkpoint re-executes its current node.
    pub async fn resume(
        &self,
        graph: &Graph,
        checkpoint_id: &str,
        store: Arc<dyn CheckpointStore>,
        policy: CheckpointPolicy,
    ) -> Result<RunReport> {
        let checkpoint = store.load(checkpoint_id).await?;
        let response = checkpoint
            .human_response
            .clone()
            .map(serde_json::from_value::<HumanResponse>)
            .transpose()?;
        self.resume_internal(graph, checkpoint, response, store, policy)
            .await
    }

    /// Attach a response to a paused run and resume it.
    pub async fn resume_with_human_response(
        &self,
        graph: &Graph,
        checkpoint_id: &str,
        response: HumanResponse,
        store: Arc<dyn CheckpointStore>,
    ) -> Result<RunReport> {
        let checkpoint = store.load(checkpoint_id).await?;
        self.resume_internal(graph, checkpoint, Some(response), store, CheckpointPolicy::default())
            .await
    }

    /// Interactions still waiting on a response under this checkpoint.
    pub async fn get_pending_interactions(
        &self,
        checkpoint_id: &str,
        store: Arc<dyn CheckpointStore>,
    ) -> Result<Vec<HumanInteraction>> {
        let checkpoint = store.load(checkpoint_id).await?;
        if !checkpoint.is_waiting() {
            return Ok(Vec::new());
        }
        match checkpoint.pending_interaction {
            Some(value) => {
                let pending: PendingInteraction = serde_json::from_value(value)?;
                Ok(vec![pending.interaction])
            }
            None => Ok(Vec::new()),
        }
    }

    async fn start(
        &self,
        graph: &Graph,
        input: State,
        ctx: ExecutionContext,
        store: Option<Arc<dyn CheckpointStore>>,
        policy: CheckpointPolicy,
    ) -> Result<RunReport> {
        let run_id = Uuid::new_v4().to_string();
        let ctx = ctx
            .plus(keys::RUN_ID, Value::String(run_id.clone()))
            .plus(keys::GRAPH_ID, Value::String(graph.id().to_string()));
        let session = Session::new(run_id, input, ctx, store, policy);
        let scope_ctx = session.ctx.clone();
        ExecutionContext::scope(scope_ctx, self.drive(graph, session, None, true)).await
    }

    async fn resume_internal(
        &self,
        graph: &Graph,
        checkpoint: Checkpoint,
        response: Option<HumanResponse>,
        store: Arc<dyn CheckpointStore>,
        policy: CheckpointPolicy,
    ) -> Result<RunReport> {
        if checkpoint.graph_id != graph.id() {
            return Err(FlowError::Configuration(format!(
                "checkpoint belongs to graph '{}', not '{}'",
                checkpoint.graph_id,
                graph.id()
            )));
        }
        if checkpoint.execution_state.is_terminal() {
            return Err(FlowError::Configuration(format!(
                "checkpoint '{}' is terminal and cannot be resumed",
                checkpoint.id
            )));
        }

        let ctx = ExecutionContext::of(checkpoint.context.clone());
        let mut session = Session::new(
            checkpoint.run_id.clone(),
            checkpoint.state.clone(),
            ctx,
            Some(store),
            policy,
        );
        session.node_reports = checkpoint
            .metadata
            .get("nodeReports")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();
        session.visited = checkpoint
            .metadata
            .get("visited")
            .cloned()
            .map(serde_json::from_value::<Vec<u64>>)
            .transpose()?
            .unwrap_or_default()
            .into_iter()
            .collect();
        session.event_version = checkpoint
            .metadata
            .get("eventVersion")
            .and_then(Value::as_u64)
            .unwrap_or(0);

        let current = checkpoint.current_node_id.clone();
        let scope_ctx = session.ctx.clone();

        if checkpoint.execution_state != ExecutionState::WaitingForHuman {
            // Mid-flight snapshot: re-execute the node it points at.
            return ExecutionContext::scope(
                scope_ctx,
                self.drive_from(graph, session, current, None, false),
            )
            .await;
        }

        let pending_value = checkpoint.pending_interaction.clone().ok_or_else(|| {
            FlowError::Hitl(format!(
                "checkpoint '{}' is waiting but has no pending interaction",
                checkpoint.id
            ))
        })?;
        let pending: PendingInteraction = serde_json::from_value(pending_value)?;

        let Some(response) = response else {
            let report = RunReport {
                graph_id: graph.id().to_string(),
                run_id: session.run_id.clone(),
                status: RunStatus::Failed,
                result: None,
                duration_ms: 0,
                node_reports: session.node_reports,
                error: Some(format!("checkpoint '{}' is awaiting a human response", checkpoint.id)),
                error_kind: Some("awaiting_response".to_string()),
                failed_node: Some(current),
                checkpoint_id: Some(checkpoint.id),
            };
            return Ok(report);
        };

        ExecutionContext::scope(
            scope_ctx,
            self.apply_response_and_drive(graph, session, current, pending, response),
        )
        .await
    }

    /// Resolve the pending interaction and continue the loop with the
    /// synthesized result. Validation failures fail the run but leave the
    /// stored checkpoint untouched, still waiting.
    async fn apply_response_and_drive(
        &self,
        graph: &Graph,
        mut session: Session,
        current: String,
        pending: PendingInteraction,
        response: HumanResponse,
    ) -> Result<RunReport> {
        self.emit(
            &mut session,
            event_types::GRAPH_RESUMED,
            json!({"nodeId": current, "toolCallId": pending.tool_call_id}),
        )
        .await;

        let node = match graph.node(&current) {
            Some(node) => node.clone(),
            None => {
                let error = FlowError::UnknownNode { node: current.clone() };
                return self.finish_failed(graph, session, Some(current), error).await;
            }
        };

        let call_ctx = session
            .ctx
            .plus(keys::NODE_ID, Value::String(current.clone()))
            .plus(keys::INVOCATION_INDEX, json!(pending.invocation_index));
        let node_ctx = NodeContext::new(graph.id(), session.state.clone(), call_ctx);

        let synthesized = match node.kind() {
            NodeKind::Human => {
                let human = node.as_human().ok_or_else(|| {
                    FlowError::Fatal(format!("node '{current}' reports Human kind without the contract"))
                })?;
                match human.run_after_response(&response) {
                    Ok(result) => result,
                    Err(error @ FlowError::Hitl(_)) => {
                        // Invalid response: the checkpoint stays waiting.
                        return self.finish_failed(graph, session, Some(current), error).await;
                    }
                    Err(error) => return Err(error),
                }
            }
            NodeKind::Tool => {
                let tool = node.as_tool().ok_or_else(|| {
                    FlowError::Fatal(format!("node '{current}' reports Tool kind without the contract"))
                })?;
                let request = NodeRequest {
                    node_id: current.clone(),
                    input: Value::Object(
                        tool.map_params(&node_ctx).into_iter().collect(),
                    ),
                    context: node_ctx.clone(),
                    attempt: 0,
                };
                match tool.run_after_response(&request, response.clone()).await {
                    Ok(result) => result,
                    Err(error) => {
                        return self.finish_failed(graph, session, Some(current), error).await
                    }
                }
            }
            _ => {
                return Err(FlowError::Hitl(format!(
                    "node '{current}' cannot accept a human response"
                )))
            }
        };

        if !synthesized.is_pause() {
            self.emit(
                &mut session,
                event_types::HITL_RESOLVED,
                json!({
                    "toolCallId": pending.tool_call_id,
                    "nodeId": current,
                    "selectedOption": response.selected_option,
                }),
            )
            .await;
        }

        self.drive_from(graph, session, current, Some(synthesized), false)
            .await
    }

    async fn drive(
        &self,
        graph: &Graph,
        session: Session,
        pending: Option<NodeResult>,
        fresh: bool,
    ) -> Result<RunReport> {
        let entry = graph.entry_point().to_string();
        self.drive_from(graph, session, entry, pending, fresh).await
    }

    /// The forward execution loop. `pending` short-circuits the first
    /// iteration with an already-computed result for `current`.
    async fn drive_from(
        &self,
        graph: &Graph,
        mut session: Session,
        mut current: String,
        mut pending: Option<NodeResult>,
        fresh: bool,
    ) -> Result<RunReport> {
        if fresh {
            let run_id = session.run_id.clone();
            self.emit(
                &mut session,
                event_types::GRAPH_STARTED,
                json!({"graphId": graph.id(), "runId": run_id}),
            )
            .await;
            let start_ctx =
                NodeContext::new(graph.id(), session.state.clone(), session.ctx.clone());
            for middleware in graph.middleware() {
                if let Err(error) = middleware.on_start(&start_ctx).await {
                    return self.finish_failed(graph, session, None, error).await;
                }
            }
        }

        loop {
            if self.cancellation.is_cancelled() {
                return self.finish_cancelled(graph, session, current).await;
            }
            if let Some(deadline) = self.config.per_run_timeout {
                if session.started.elapsed() >= deadline {
                    tracing::warn!(run_id = %session.run_id, "run deadline exceeded");
                    return self.finish_cancelled(graph, session, current).await;
                }
            }

            let node = match graph.node(&current) {
                Some(node) => node.clone(),
                None => {
                    let error = FlowError::UnknownNode { node: current.clone() };
                    return self.finish_failed(graph, session, Some(current), error).await;
                }
            };

            let invocation_index = session
                .node_reports
                .iter()
                .filter(|report| report.node_id == current)
                .count();
            let call_ctx = session
                .ctx
                .plus(keys::NODE_ID, Value::String(current.clone()))
                .plus(keys::INVOCATION_INDEX, json!(invocation_index));
            let node_ctx = NodeContext::new(graph.id(), session.state.clone(), call_ctx);

            let started_at = now_ms();
            let node_started = Instant::now();

            let invocation = match pending.take() {
                Some(result) => Invocation::Success { result, attempts: 1 },
                None => {
                    let hash = state_hash(&current, &session.state);
                    if !session.visited.insert(hash) {
                        let error = FlowError::CycleAtRuntime { node: current.clone() };
                        return self.finish_failed(graph, session, Some(current), error).await;
                    }
                    self.invoke(graph, &node, &node_ctx, &current, &mut session)
                        .await
                }
            };

            let duration_ms = node_started.elapsed().as_millis() as u64;

            let result = match invocation {
                Invocation::Cancelled => {
                    return self.finish_cancelled(graph, session, current).await
                }
                Invocation::Failed { error, attempts } => {
                    session.node_reports.push(NodeReport {
                        node_id: current.clone(),
                        status: NodeStatus::Failed,
                        started_at,
                        duration_ms,
                        output: None,
                        error: Some(error.to_string()),
                        attempts,
                    });
                    return self.finish_failed(graph, session, Some(current), error).await;
                }
                Invocation::Skipped { attempts } => {
                    session.node_reports.push(NodeReport {
                        node_id: current.clone(),
                        status: NodeStatus::Skipped,
                        started_at,
                        duration_ms,
                        output: None,
                        error: None,
                        attempts,
                    });
                    // State untouched; routing sees the previous result.
                    NodeResult::new(
                        session.state.get(PREVIOUS_KEY).cloned().unwrap_or(Value::Null),
                    )
                }
                Invocation::Success { result, attempts } => {
                    if let Err(error) = result
                        .enforce_metadata_policy(&current, self.config.metadata_size_policy)
                    {
                        session.node_reports.push(NodeReport {
                            node_id: current.clone(),
                            status: NodeStatus::Failed,
                            started_at,
                            duration_ms,
                            output: None,
                            error: Some(error.to_string()),
                            attempts,
                        });
                        self.emit(
                            &mut session,
                            event_types::NODE_FAILED,
                            json!({"nodeId": current, "error": error.to_string(), "kind": error.kind()}),
                        )
                        .await;
                        return self.finish_failed(graph, session, Some(current), error).await;
                    }

                    if result.is_pause() {
                        self.emit(
                            &mut session,
                            event_types::NODE_SUCCEEDED,
                            json!({"nodeId": current, "durationMs": duration_ms, "paused": true}),
                        )
                        .await;
                        return self
                            .pause(graph, session, current, node.kind(), invocation_index, result)
                            .await;
                    }

                    session.node_reports.push(NodeReport {
                        node_id: current.clone(),
                        status: NodeStatus::Success,
                        started_at,
                        duration_ms,
                        output: Some(result.data.clone()),
                        error: None,
                        attempts,
                    });
                    session.state = state_after(&session.state, &current, &result.data);
                    session.ctx = promote_metadata(
                        &session.ctx,
                        &result.metadata,
                        &self.config.promoted_metadata_keys,
                    );
                    self.emit(
                        &mut session,
                        event_types::NODE_SUCCEEDED,
                        json!({"nodeId": current, "durationMs": duration_ms, "attempts": attempts}),
                    )
                    .await;
                    session.nodes_since_save += 1;
                    self.maybe_save_periodic(&mut session, graph, &current).await;
                    result
                }
            };

            // Output nodes and declared-terminal nodes end the run with
            // their result.
            if node.kind() == NodeKind::Output || graph.is_terminal(&current) {
                return self
                    .finish_success(graph, session, result.data.clone())
                    .await;
            }

            // First edge in declaration order whose predicate accepts,
            // optionally narrowed by the result's next_edges.
            let next = graph
                .outgoing(&current)
                .filter(|edge| match &result.next_edges {
                    Some(allowed) => allowed.contains(&edge.to),
                    None => true,
                })
                .find(|edge| edge.matches(&result))
                .map(|edge| edge.to.clone());

            match next {
                Some(target) => current = target,
                None => {
                    let final_value = session
                        .state
                        .get(PREVIOUS_KEY)
                        .cloned()
                        .unwrap_or(Value::Null);
                    return self.finish_success(graph, session, final_value).await;
                }
            }
        }
    }

    /// Invoke one node through the middleware chain, honoring error
    /// actions and the retry budget. Each attempt emits its own
    /// `NodeStarted` and, if it fails and will be retried, `NodeFailed`.
    async fn invoke(
        &self,
        graph: &Graph,
        node: &Arc<dyn Node>,
        node_ctx: &NodeContext,
        current: &str,
        session: &mut Session,
    ) -> Invocation {
        let mut attempt: u32 = 0;
        loop {
            if self.cancellation.is_cancelled() {
                return Invocation::Cancelled;
            }
            self.emit(
                session,
                event_types::NODE_STARTED,
                json!({"nodeId": current, "attempt": attempt}),
            )
            .await;

            let input = match derive_input(node, node_ctx) {
                Ok(input) => input,
                Err(error) => {
                    self.emit(
                        session,
                        event_types::NODE_FAILED,
                        json!({"nodeId": current, "error": error.to_string(), "kind": error.kind()}),
                    )
                    .await;
                    return Invocation::Failed { error, attempts: attempt + 1 };
                }
            };
            let request = NodeRequest {
                node_id: current.to_string(),
                input,
                context: node_ctx.clone(),
                attempt,
            };

            let handler = compose(graph.middleware(), terminal_handler(node.clone()));
            let call = ExecutionContext::scope(
                node_ctx.context().clone(),
                handler(request.clone()),
            );
            let outcome = match self.config.per_node_timeout {
                Some(deadline) => match tokio::time::timeout(deadline, call).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(FlowError::timeout(
                        format!("node '{current}'"),
                        deadline.as_millis() as u64,
                    )),
                },
                None => call.await,
            };

            let error = match outcome {
                Ok(result) => return Invocation::Success { result, attempts: attempt + 1 },
                Err(error) => error,
            };

            let action = self.consult_error(graph, &error, &request).await;
            match action {
                ErrorAction::Retry { delay }
                    if error.is_transient() && self.config.retry.allows_retry(attempt) =>
                {
                    self.emit(
                        session,
                        event_types::NODE_FAILED,
                        json!({
                            "nodeId": current,
                            "attempt": attempt,
                            "error": error.to_string(),
                            "kind": error.kind(),
                            "willRetry": true,
                        }),
                    )
                    .await;
                    let delay = delay.unwrap_or_else(|| self.config.retry.backoff_delay(attempt));
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                ErrorAction::Skip => {
                    self.emit(
                        session,
                        event_types::NODE_SKIPPED,
                        json!({"nodeId": current, "error": error.to_string()}),
                    )
                    .await;
                    return Invocation::Skipped { attempts: attempt + 1 };
                }
                ErrorAction::Continue(value) => {
                    return Invocation::Success {
                        result: NodeResult::new(value),
                        attempts: attempt + 1,
                    }
                }
                _ => {
                    self.emit(
                        session,
                        event_types::NODE_FAILED,
                        json!({
                            "nodeId": current,
                            "attempt": attempt,
                            "error": error.to_string(),
                            "kind": error.kind(),
                            "willRetry": false,
                        }),
                    )
                    .await;
                    return Invocation::Failed { error, attempts: attempt + 1 };
                }
            }
        }
    }

    /// Innermost-first: the first decision other than `Propagate` wins.
    async fn consult_error(
        &self,
        graph: &Graph,
        error: &FlowError,
        request: &NodeRequest,
    ) -> ErrorAction {
        for middleware in graph.middleware().iter().rev() {
            let action = middleware.on_error(error, request).await;
            if !matches!(action, ErrorAction::Propagate) {
                return action;
            }
        }
        ErrorAction::Propagate
    }

    async fn maybe_save_periodic(&self, session: &mut Session, graph: &Graph, current: &str) {
        let Some(store) = session.store.clone() else { return };
        if !session
            .policy
            .should_save(session.nodes_since_save, session.last_save.elapsed())
        {
            return;
        }
        session.nodes_since_save = 0;
        session.last_save = Instant::now();
        let checkpoint =
            self.snapshot(session, graph, current, ExecutionState::Running, None);
        match store.save(checkpoint).await {
            Ok(id) => {
                self.emit(
                    session,
                    event_types::CHECKPOINT_SAVED,
                    json!({"checkpointId": id, "nodeId": current}),
                )
                .await;
                if let Err(error) = prune_run(store.as_ref(), &session.run_id, &session.policy).await
                {
                    tracing::warn!(run_id = %session.run_id, %error, "checkpoint pruning failed");
                }
            }
            // Periodic saves are best-effort off the critical path.
            Err(error) => {
                tracing::warn!(run_id = %session.run_id, %error, "periodic checkpoint save failed")
            }
        }
    }

    fn snapshot(
        &self,
        session: &Session,
        graph: &Graph,
        current: &str,
        state: ExecutionState,
        pending: Option<&PendingInteraction>,
    ) -> Checkpoint {
        let visited: Vec<u64> = session.visited.iter().copied().collect();
        let mut checkpoint = Checkpoint::new(
            session.run_id.clone(),
            graph.id(),
            current,
            session.state.clone(),
            session.ctx.pairs().to_vec(),
            state,
        )
        .with_metadata(
            "nodeReports",
            serde_json::to_value(&session.node_reports).unwrap_or(Value::Null),
        )
        .with_metadata("visited", serde_json::to_value(visited).unwrap_or(Value::Null))
        .with_metadata("eventVersion", json!(session.event_version));
        if let Some(pending) = pending {
            checkpoint = checkpoint
                .with_pending_interaction(serde_json::to_value(pending).unwrap_or(Value::Null));
        }
        checkpoint
    }

    /// Suspend the run: emit the pause events, persist durably, return the
    /// paused report. The durable save must complete before returning.
    async fn pause(
        &self,
        graph: &Graph,
        mut session: Session,
        current: String,
        kind: NodeKind,
        invocation_index: usize,
        result: NodeResult,
    ) -> Result<RunReport> {
        let interaction = result
            .interaction()
            .cloned()
            .unwrap_or_else(|| HumanInteraction::new(current.clone(), "input required"));
        let origin = if kind == NodeKind::Human {
            PauseOrigin::Human
        } else {
            PauseOrigin::Tool
        };
        let hitl_type = graph
            .node(&current)
            .and_then(|node| node.as_human())
            .map(|human| human.hitl_type())
            .unwrap_or(if interaction.options.is_empty() {
                HitlType::Input
            } else {
                HitlType::Selection
            });
        let pending = PendingInteraction {
            tool_call_id: crate::hitl::tool_call_id(&session.run_id, &current, invocation_index),
            invocation_index,
            hitl_type,
            origin,
            interaction: interaction.clone(),
        };

        self.emit(
            &mut session,
            event_types::GRAPH_PAUSED,
            json!({"nodeId": current, "toolCallId": pending.tool_call_id}),
        )
        .await;

        let request = HitlRequest {
            tool_call_id: pending.tool_call_id.clone(),
            prompt: interaction.prompt.clone(),
            hitl_type,
            options: interaction.options.clone(),
            allow_free_text: interaction.allow_free_text,
            timeout_ms: interaction
                .expires_at
                .map(|expires| expires - interaction.paused_at),
            run_id: session.run_id.clone(),
            node_id: current.clone(),
            graph_id: graph.id().to_string(),
            agent_id: session.ctx.get_str(keys::AGENT_ID),
            correlation_id: session.ctx.correlation_id(),
            user_id: session.ctx.user_id(),
            tenant_id: session.ctx.tenant_id(),
        };
        self.emit(
            &mut session,
            event_types::HITL_REQUESTED,
            serde_json::to_value(&request).unwrap_or(Value::Null),
        )
        .await;

        // Durable-on-pause: without a store the pause cannot be honored.
        let Some(store) = session.store.clone() else {
            let error = FlowError::Configuration(format!(
                "node '{current}' paused the run but no checkpoint store is configured"
            ));
            return self.finish_failed(graph, session, Some(current), error).await;
        };

        self.emit(
            &mut session,
            event_types::GRAPH_FINISHED,
            json!({"status": "PAUSED"}),
        )
        .await;

        // The save must complete before the runner returns.
        let checkpoint = self.snapshot(
            &session,
            graph,
            &current,
            ExecutionState::WaitingForHuman,
            Some(&pending),
        );
        let checkpoint_id = store.save(checkpoint).await?;
        session.checkpoint_id = Some(checkpoint_id.clone());

        let report = RunReport {
            graph_id: graph.id().to_string(),
            run_id: session.run_id.clone(),
            status: RunStatus::Paused,
            result: None,
            duration_ms: session.started.elapsed().as_millis() as u64,
            node_reports: session.node_reports.clone(),
            error: None,
            error_kind: None,
            failed_node: None,
            checkpoint_id: Some(checkpoint_id),
        };
        self.finish_middleware(graph, &report).await;
        Ok(report)
    }

    async fn finish_success(
        &self,
        graph: &Graph,
        mut session: Session,
        result: Value,
    ) -> Result<RunReport> {
        self.emit(
            &mut session,
            event_types::GRAPH_FINISHED,
            json!({"status": "SUCCESS"}),
        )
        .await;
        let report = RunReport {
            graph_id: graph.id().to_string(),
            run_id: session.run_id.clone(),
            status: RunStatus::Success,
            result: Some(result),
            duration_ms: session.started.elapsed().as_millis() as u64,
            node_reports: session.node_reports.clone(),
            error: None,
            error_kind: None,
            failed_node: None,
            checkpoint_id: session.checkpoint_id.clone(),
        };
        self.finish_middleware(graph, &report).await;
        Ok(report)
    }

    async fn finish_failed(
        &self,
        graph: &Graph,
        mut session: Session,
        failed_node: Option<String>,
        error: FlowError,
    ) -> Result<RunReport> {
        let checkpoint_id = if session.policy.save_on_error {
            if let Some(store) = session.store.clone() {
                let current = failed_node.clone().unwrap_or_default();
                let checkpoint =
                    self.snapshot(&session, graph, &current, ExecutionState::Failed, None);
                match store.save(checkpoint).await {
                    Ok(id) => Some(id),
                    Err(save_error) => {
                        tracing::warn!(run_id = %session.run_id, %save_error, "failure checkpoint save failed");
                        None
                    }
                }
            } else {
                None
            }
        } else {
            None
        };

        self.emit(
            &mut session,
            event_types::GRAPH_FINISHED,
            json!({"status": "FAILED", "error": error.to_string(), "kind": error.kind()}),
        )
        .await;

        let report = RunReport {
            graph_id: graph.id().to_string(),
            run_id: session.run_id.clone(),
            status: RunStatus::Failed,
            result: None,
            duration_ms: session.started.elapsed().as_millis() as u64,
            node_reports: session.node_reports.clone(),
            error: Some(error.to_string()),
            error_kind: Some(error.kind().to_string()),
            failed_node,
            checkpoint_id,
        };
        self.finish_middleware(graph, &report).await;
        Ok(report)
    }

    async fn finish_cancelled(
        &self,
        graph: &Graph,
        mut session: Session,
        current: String,
    ) -> Result<RunReport> {
        let checkpoint_id = if session.policy.save_on_error {
            if let Some(store) = session.store.clone() {
                let checkpoint =
                    self.snapshot(&session, graph, &current, ExecutionState::Cancelled, None);
                store.save(checkpoint).await.ok()
            } else {
                None
            }
        } else {
            None
        };

        self.emit(
            &mut session,
            event_types::GRAPH_FINISHED,
            json!({"status": "CANCELLED"}),
        )
        .await;

        let report = RunReport {
            graph_id: graph.id().to_string(),
            run_id: session.run_id.clone(),
            status: RunStatus::Cancelled,
            result: None,
            duration_ms: session.started.elapsed().as_millis() as u64,
            node_reports: session.node_reports.clone(),
            error: None,
            error_kind: None,
            failed_node: None,
            checkpoint_id,
        };
        self.finish_middleware(graph, &report).await;
        Ok(report)
    }

    async fn finish_middleware(&self, graph: &Graph, report: &RunReport) {
        for middleware in graph.middleware() {
            if let Err(error) = middleware.on_finish(report).await {
                tracing::warn!(middleware = middleware.name(), %error, "on_finish failed");
            }
        }
    }

    /// Publish a lifecycle event. Failures are logged, never propagated -
    /// the event store must not fail the run.
    async fn emit(&self, session: &mut Session, event_type: &str, payload: Value) {
        let Some(bus) = &self.bus else { return };
        let metadata = EventMetadata {
            user_id: session.ctx.user_id(),
            correlation_id: session.ctx.correlation_id(),
            causation_id: None,
            tenant_id: session.ctx.tenant_id(),
            source_system: self.config.source_system.clone(),
        };
        let event = Event::new(event_type, session.run_id.clone())
            .with_version(session.event_version)
            .with_payload(payload)
            .with_metadata(metadata);
        session.event_version += 1;
        if let Err(error) = bus.publish(event).await {
            tracing::warn!(run_id = %session.run_id, event_type, %error, "event publish failed");
        }
    }
}

fn terminal_handler(node: Arc<dyn Node>) -> NodeHandler {
    Arc::new(move |request: NodeRequest| {
        let node = node.clone();
        Box::pin(async move { node.run(&request).await })
    })
}

/// Kind-specific input derivation: agents get the previous output (or the
/// run input), tools get their mapped parameters, output and human nodes
/// see the whole state.
fn derive_input(node: &Arc<dyn Node>, ctx: &NodeContext) -> Result<Value> {
    let input = match node.kind() {
        NodeKind::Agent => ctx
            .get(PREVIOUS_KEY)
            .or_else(|| ctx.get(INPUT_KEY))
            .cloned()
            .unwrap_or(Value::Null),
        NodeKind::Tool => {
            let tool = node.as_tool().ok_or_else(|| {
                FlowError::Fatal(format!(
                    "node '{}' reports Tool kind without the contract",
                    node.id()
                ))
            })?;
            Value::Object(tool.map_params(ctx).into_iter().collect())
        }
        NodeKind::Output | NodeKind::Human => Value::Object(
            ctx.state()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
    };
    Ok(input)
}

/// Only whitelisted metadata keys are promoted back into the execution
/// context: the canonical identity keys plus explicit opt-ins.
fn promote_metadata(
    ctx: &ExecutionContext,
    metadata: &std::collections::HashMap<String, Value>,
    extra: &[String],
) -> ExecutionContext {
    let mut promoted = ctx.clone();
    let canonical = [keys::TENANT_ID, keys::USER_ID, keys::CORRELATION_ID];
    for key in canonical
        .iter()
        .map(|key| key.to_string())
        .chain(extra.iter().cloned())
    {
        if let Some(value) = metadata.get(&key) {
            promoted = promoted.plus(key, value.clone());
        }
    }
    promoted
}

fn context_from_input(input: &State) -> ExecutionContext {
    input
        .get("metadata")
        .map(ExecutionContext::from_value)
        .unwrap_or_default()
}
