//! Middleware chain: cross-cutting hooks around node execution
//!
//! Middleware compose as an onion: the first entry in a graph's middleware
//! list is outermost - its `on_node` runs first on the way in and last on
//! the way out. Each `on_node` receives a `next` handler that invokes the
//! rest of the chain and, finally, the node itself. A middleware may
//! replace the request input, transform the returned result, or not call
//! `next` at all to short-circuit the node (mocks, caches).
//!
//! After a node failure the runner consults `on_error` innermost-first; the
//! first decision other than [`ErrorAction::Propagate`] wins. Retries are
//! honored only for transient errors, regardless of what a middleware
//! answers.
//!
//! Provided middlewares: [`LoggingMiddleware`], [`MetricsMiddleware`],
//! [`RetryMiddleware`] and [`CheckpointMiddleware`].

use crate::error::{FlowError, Result};
use crate::node::{NodeRequest, NodeResult};
use crate::runner::types::{state_after, RunReport};
use agentflow_checkpoint::{Checkpoint, CheckpointPolicy, CheckpointStore, ExecutionState};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Invokes the remainder of the chain, ultimately the node
pub type NodeHandler =
    Arc<dyn Fn(NodeRequest) -> BoxFuture<'static, Result<NodeResult>> + Send + Sync>;

/// Decision after a node failure
#[derive(Debug, Clone)]
pub enum ErrorAction {
    /// Fail the run with this error (the default)
    Propagate,
    /// Re-invoke the node; `delay` overrides the runner's backoff
    Retry { delay: Option<Duration> },
    /// Record the node as skipped and continue with the previous result
    Skip,
    /// Treat the value as the node's successful output
    Continue(Value),
}

/// Interceptor composed around node execution
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str {
        "middleware"
    }

    /// Invoked once before the first node.
    async fn on_start(&self, _ctx: &crate::node::NodeContext) -> Result<()> {
        Ok(())
    }

    /// Wraps each node invocation. Must call `next` exactly once on the
    /// success path; not calling it short-circuits the node.
    async fn on_node(&self, request: NodeRequest, next: NodeHandler) -> Result<NodeResult> {
        next(request).await
    }

    /// Consulted once after a node failure, innermost-first.
    async fn on_error(&self, _error: &FlowError, _request: &NodeRequest) -> ErrorAction {
        ErrorAction::Propagate
    }

    /// Invoked once after the run, with the final report.
    async fn on_finish(&self, _report: &RunReport) -> Result<()> {
        Ok(())
    }
}

/// Compose a middleware list around a terminal handler, outermost-first.
pub fn compose(middleware: &[Arc<dyn Middleware>], terminal: NodeHandler) -> NodeHandler {
    let mut handler = terminal;
    for entry in middleware.iter().rev() {
        let entry = entry.clone();
        let next = handler;
        handler = Arc::new(move |request: NodeRequest| {
            let entry = entry.clone();
            let next = next.clone();
            Box::pin(async move { entry.on_node(request, next).await })
        });
    }
    handler
}

/// Structured log lines on run start, per node and on finish
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMiddleware;

impl LoggingMiddleware {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    async fn on_start(&self, ctx: &crate::node::NodeContext) -> Result<()> {
        tracing::info!(graph = ctx.graph_id(), "run starting");
        Ok(())
    }

    async fn on_node(&self, request: NodeRequest, next: NodeHandler) -> Result<NodeResult> {
        let node = request.node_id.clone();
        let attempt = request.attempt;
        tracing::debug!(node = %node, attempt, "node starting");
        let started = Instant::now();
        let outcome = next(request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(result) if result.is_pause() => {
                tracing::info!(node = %node, elapsed_ms, "node paused for human input")
            }
            Ok(_) => tracing::info!(node = %node, elapsed_ms, "node succeeded"),
            Err(error) => {
                tracing::warn!(node = %node, elapsed_ms, kind = error.kind(), %error, "node failed")
            }
        }
        outcome
    }

    async fn on_finish(&self, report: &RunReport) -> Result<()> {
        tracing::info!(
            graph = %report.graph_id,
            run = %report.run_id,
            status = ?report.status,
            nodes = report.node_reports.len(),
            duration_ms = report.duration_ms,
            "run finished"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MetricsInner {
    executions: HashMap<String, u64>,
    failures: HashMap<String, u64>,
    errors_by_kind: HashMap<String, u64>,
    total_duration_ms: HashMap<String, u64>,
}

/// Point-in-time copy of collected metrics
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Executions per node (retries count separately)
    pub executions: HashMap<String, u64>,
    /// Failures per node
    pub failures: HashMap<String, u64>,
    /// Failures per error kind
    pub errors_by_kind: HashMap<String, u64>,
    /// Accumulated execution time per node
    pub total_duration_ms: HashMap<String, u64>,
}

/// Per-node counters and timers, readable via [`MetricsMiddleware::snapshot`]
#[derive(Debug, Clone, Default)]
pub struct MetricsMiddleware {
    inner: Arc<RwLock<MetricsInner>>,
}

impl MetricsMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.read().unwrap();
        MetricsSnapshot {
            executions: inner.executions.clone(),
            failures: inner.failures.clone(),
            errors_by_kind: inner.errors_by_kind.clone(),
            total_duration_ms: inner.total_duration_ms.clone(),
        }
    }
}

#[async_trait]
impl Middleware for MetricsMiddleware {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn on_node(&self, request: NodeRequest, next: NodeHandler) -> Result<NodeResult> {
        let node = request.node_id.clone();
        let started = Instant::now();
        let outcome = next(request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut inner = self.inner.write().unwrap();
        *inner.executions.entry(node.clone()).or_default() += 1;
        *inner.total_duration_ms.entry(node.clone()).or_default() += elapsed_ms;
        if let Err(error) = &outcome {
            *inner.failures.entry(node).or_default() += 1;
            *inner.errors_by_kind.entry(error.kind().to_string()).or_default() += 1;
        }
        outcome
    }
}

/// Answers transient failures with a retry decision and owns the backoff
#[derive(Debug, Clone, Default)]
pub struct RetryMiddleware {
    policy: crate::retry::RetryPolicy,
}

impl RetryMiddleware {
    pub fn new(policy: crate::retry::RetryPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Middleware for RetryMiddleware {
    fn name(&self) -> &str {
        "retry"
    }

    async fn on_error(&self, error: &FlowError, request: &NodeRequest) -> ErrorAction {
        if error.is_transient() && self.policy.allows_retry(request.attempt) {
            ErrorAction::Retry {
                delay: Some(self.policy.backoff_delay(request.attempt)),
            }
        } else {
            ErrorAction::Propagate
        }
    }
}

struct SaveTracker {
    nodes_since_save: u32,
    last_save: Instant,
}

/// Periodic best-effort snapshots after successful nodes
///
/// Saves according to the policy's cadence and prunes the run's retained
/// snapshots. Runs started through
/// [`GraphRunner::run_with_checkpoint`](crate::runner::GraphRunner::run_with_checkpoint)
/// already get cadence saves from the runner itself; this middleware adds
/// snapshots to plain `run()` calls. Saves here never emit events and never
/// fail the node - a failed save is logged and execution continues.
pub struct CheckpointMiddleware {
    store: Arc<dyn CheckpointStore>,
    policy: CheckpointPolicy,
    trackers: Mutex<HashMap<String, SaveTracker>>,
}

impl CheckpointMiddleware {
    pub fn new(store: Arc<dyn CheckpointStore>, policy: CheckpointPolicy) -> Self {
        Self {
            store,
            policy,
            trackers: Mutex::new(HashMap::new()),
        }
    }

    fn save_due(&self, run_id: &str) -> bool {
        let mut trackers = self.trackers.lock().unwrap();
        let tracker = trackers.entry(run_id.to_string()).or_insert(SaveTracker {
            nodes_since_save: 0,
            last_save: Instant::now(),
        });
        tracker.nodes_since_save += 1;
        if self
            .policy
            .should_save(tracker.nodes_since_save, tracker.last_save.elapsed())
        {
            tracker.nodes_since_save = 0;
            tracker.last_save = Instant::now();
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl Middleware for CheckpointMiddleware {
    fn name(&self) -> &str {
        "checkpoint"
    }

    async fn on_node(&self, request: NodeRequest, next: NodeHandler) -> Result<NodeResult> {
        let snapshot_source = request.clone();
        let outcome = next(request).await;

        if let Ok(result) = &outcome {
            // Pause and failure snapshots are the runner's job; this
            // middleware only covers the periodic cadence.
            if !result.is_pause() {
                let ctx = snapshot_source.context.context();
                if let Some(run_id) = ctx.get_str(crate::context::keys::RUN_ID) {
                    if self.save_due(&run_id) {
                        let checkpoint = Checkpoint::new(
                            run_id.clone(),
                            snapshot_source.context.graph_id(),
                            snapshot_source.node_id.clone(),
                            state_after(
                                snapshot_source.context.state(),
                                &snapshot_source.node_id,
                                &result.data,
                            ),
                            ctx.pairs().to_vec(),
                            ExecutionState::Running,
                        );
                        if let Err(error) = self.store.save(checkpoint).await {
                            tracing::warn!(run_id = %run_id, %error, "periodic checkpoint save failed");
                        } else if let Err(error) =
                            agentflow_checkpoint::prune_run(self.store.as_ref(), &run_id, &self.policy)
                                .await
                        {
                            tracing::warn!(run_id = %run_id, %error, "checkpoint pruning failed");
                        }
                    }
                }
            }
        }
        outcome
    }
}
