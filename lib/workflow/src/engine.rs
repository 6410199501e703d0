//! The run API.
//!
//! [`Engine::start_run`] validates a workflow, checks that every node type
//! it uses has an executor, and spawns a coordinator task on the current
//! tokio runtime. The returned [`RunHandle`] observes and cancels the run.
//!
//! At most one run per workflow is active at a time. Runs of different
//! workflows share nothing but the executor registry.

use crate::config::EngineConfig;
use crate::context::VariableContext;
use crate::definition::Workflow;
use crate::error::EngineError;
use crate::execution::{RunStatus, TerminalReason};
use crate::executor::ExecutorRegistry;
use crate::log::LogEntry;
use crate::plan::ExecutionPlan;
use crate::run_state::{RunState, SharedRunState};
use crate::scheduler::Scheduler;
use crate::validator::build_plan;
use rootcause::prelude::{Report, ResultExt};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use taskflow_core::{WorkflowId, WorkflowRunId};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

/// Starts and tracks workflow runs.
#[derive(Debug, Clone)]
pub struct Engine {
    registry: Arc<ExecutorRegistry>,
    config: EngineConfig,
    active: Arc<Mutex<HashSet<WorkflowId>>>,
}

impl Engine {
    /// Creates an engine over a registry.
    #[must_use]
    pub fn new(registry: ExecutorRegistry, config: EngineConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            config,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validates a workflow and checks executor coverage without running it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidWorkflow`] wrapping the validation
    /// error, or [`EngineError::MissingExecutor`].
    pub fn plan(&self, workflow: &Workflow) -> Result<ExecutionPlan, Report<EngineError>> {
        let plan = build_plan(workflow.graph()).context(EngineError::InvalidWorkflow {
            workflow_id: workflow.id,
        })?;
        if let Some(node_type) = plan
            .node_types()
            .into_iter()
            .find(|node_type| !self.registry.supports(*node_type))
        {
            return Err(EngineError::MissingExecutor { node_type }.into());
        }
        Ok(plan)
    }

    /// Starts a run with no input variables.
    ///
    /// # Errors
    ///
    /// See [`Self::start_run_with_input`].
    pub fn start_run(&self, workflow: &Workflow) -> Result<RunHandle, Report<EngineError>> {
        self.start_run_with_input(workflow, Map::new())
    }

    /// Starts a run. `input` is visible to nodes as `input.*`.
    ///
    /// # Errors
    ///
    /// Fails if the workflow is inactive, invalid, uses a node type with no
    /// executor, already has an active run, or if called outside a tokio
    /// runtime.
    #[instrument(skip_all, fields(workflow_id = %workflow.id))]
    pub fn start_run_with_input(
        &self,
        workflow: &Workflow,
        input: Map<String, JsonValue>,
    ) -> Result<RunHandle, Report<EngineError>> {
        let workflow_id = workflow.id;
        if !workflow.is_active() {
            return Err(EngineError::InactiveWorkflow { workflow_id }.into());
        }
        let plan = Arc::new(self.plan(workflow)?);
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
        let guard = ActiveRunGuard::acquire(&self.active, workflow_id)?;

        let run_id = WorkflowRunId::new();
        let nodes = workflow.graph().nodes().map(|node| node.id.clone());
        let state = SharedRunState::new(RunState::new(
            run_id,
            workflow_id,
            nodes,
            VariableContext::new(input),
            self.config.log_channel_capacity,
        ));
        let cancel = CancellationToken::new();

        let scheduler = Scheduler::new(
            run_id,
            plan,
            Arc::clone(&self.registry),
            self.config.clone(),
            state.clone(),
            cancel.clone(),
        );
        let task = runtime.spawn(async move {
            let _guard = guard;
            scheduler.run().await
        });

        info!(run_id = %run_id, "run started");
        Ok(RunHandle {
            run_id,
            workflow_id,
            state,
            cancel,
            task,
        })
    }

    /// Requests cancellation of a run.
    pub fn cancel(&self, handle: &RunHandle) {
        handle.cancel();
    }

    /// Returns a snapshot of a run.
    #[must_use]
    pub fn status(&self, handle: &RunHandle) -> RunStatus {
        handle.status()
    }

    /// Returns true while a run of the workflow is in progress.
    #[must_use]
    pub fn is_running(&self, workflow_id: WorkflowId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&workflow_id)
    }

    /// Starts a run and waits for it to stop.
    ///
    /// # Errors
    ///
    /// See [`Self::start_run_with_input`].
    pub async fn run_to_completion(
        &self,
        workflow: &Workflow,
        input: Map<String, JsonValue>,
    ) -> Result<RunStatus, Report<EngineError>> {
        Ok(self.start_run_with_input(workflow, input)?.wait().await)
    }
}

/// Holds a workflow's active-run slot until dropped.
struct ActiveRunGuard {
    active: Arc<Mutex<HashSet<WorkflowId>>>,
    workflow_id: WorkflowId,
}

impl ActiveRunGuard {
    fn acquire(
        active: &Arc<Mutex<HashSet<WorkflowId>>>,
        workflow_id: WorkflowId,
    ) -> Result<Self, EngineError> {
        let inserted = active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(workflow_id);
        if !inserted {
            return Err(EngineError::RunAlreadyActive { workflow_id });
        }
        Ok(Self {
            active: Arc::clone(active),
            workflow_id,
        })
    }
}

impl Drop for ActiveRunGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.workflow_id);
    }
}

/// Observes and controls one run.
#[derive(Debug)]
pub struct RunHandle {
    run_id: WorkflowRunId,
    workflow_id: WorkflowId,
    state: SharedRunState,
    cancel: CancellationToken,
    task: JoinHandle<TerminalReason>,
}

impl RunHandle {
    #[must_use]
    pub fn run_id(&self) -> WorkflowRunId {
        self.run_id
    }

    #[must_use]
    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    /// Requests cooperative cancellation. Running attempts finish, nothing
    /// new starts and no retries are issued.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns true once cancellation has been requested.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns a snapshot of node statuses, the log and the terminal reason.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.state.with(|state| state.snapshot())
    }

    /// Follows log entries appended from now on. Earlier entries are in
    /// [`Self::status`].
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.state.with(|state| state.subscribe())
    }

    /// Returns true once the run has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state.with(|state| state.is_finished())
    }

    /// Waits for the run to stop and returns its final status.
    pub async fn wait(self) -> RunStatus {
        if let Err(join_error) = self.task.await {
            error!(run_id = %self.run_id, error = %join_error, "run coordinator failed");
            self.state
                .with(|state| state.finish(TerminalReason::HaltedOnError));
        }
        self.state.with(|state| state.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{HANDLE_FALSE, HANDLE_TRUE, WorkflowConnection};
    use crate::execution::NodeStatus;
    use crate::executor::testing::ScriptedExecutor;
    use crate::executor::{ExecutionRequest, ExecutorError, NodeExecutor};
    use crate::graph::WorkflowGraph;
    use crate::log::{LogEvent, Severity};
    use crate::node::{ActionConfig, ActionType, NodeId, NodePolicy, NodeType, WorkflowNode};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    fn action(id: &str) -> WorkflowNode {
        WorkflowNode::action(id, id.to_uppercase(), ActionConfig::new(ActionType::HttpRequest))
    }

    fn trigger(id: &str) -> WorkflowNode {
        WorkflowNode::manual_trigger(id, "Start")
    }

    fn workflow(nodes: Vec<WorkflowNode>, connections: Vec<WorkflowConnection>) -> Workflow {
        let graph = WorkflowGraph::from_parts(nodes, connections).expect("structurally valid");
        Workflow::from_graph("test", graph)
    }

    fn edges(pairs: &[(&str, &str)]) -> Vec<WorkflowConnection> {
        pairs
            .iter()
            .map(|(source, target)| WorkflowConnection::between(*source, *target))
            .collect()
    }

    fn engine(actions: &Arc<ScriptedExecutor>) -> Engine {
        let mut registry = ExecutorRegistry::with_builtins();
        registry.register_shared(NodeType::Action, actions.clone());
        Engine::new(registry, EngineConfig::default())
    }

    fn events(status: &RunStatus) -> Vec<(Option<&str>, LogEvent)> {
        status
            .log
            .iter()
            .map(|entry| (entry.node_id.as_ref().map(NodeId::as_str), entry.event))
            .collect()
    }

    fn seq_of(status: &RunStatus, node: &str, event: LogEvent) -> u64 {
        status
            .log
            .iter()
            .find(|entry| entry.node_id.as_ref().is_some_and(|id| id.as_str() == node) && entry.event == event)
            .map(|entry| entry.seq)
            .unwrap_or_else(|| panic!("no {event:?} entry for {node}"))
    }

    #[tokio::test]
    async fn linear_run_logs_in_order() {
        let actions = ScriptedExecutor::new();
        let wf = workflow(
            vec![trigger("t"), action("a"), action("b")],
            edges(&[("t", "a"), ("a", "b")]),
        );

        let status = engine(&actions)
            .run_to_completion(&wf, Map::new())
            .await
            .expect("run");

        assert_eq!(
            events(&status),
            [
                (Some("t"), LogEvent::NodeStarted),
                (Some("t"), LogEvent::NodeSucceeded),
                (Some("a"), LogEvent::NodeStarted),
                (Some("a"), LogEvent::NodeSucceeded),
                (Some("b"), LogEvent::NodeStarted),
                (Some("b"), LogEvent::NodeSucceeded),
                (
                    None,
                    LogEvent::RunFinished {
                        reason: TerminalReason::Completed
                    }
                ),
            ]
        );
        assert_eq!(status.nodes_with(NodeStatus::Success).len(), 3);
        assert_eq!(status.terminal_reason, Some(TerminalReason::Completed));
        let seqs: Vec<u64> = status.log.iter().map(|entry| entry.seq).collect();
        assert_eq!(seqs, (1..=7).collect::<Vec<_>>());
        assert!(status.finished_at.is_some());
    }

    #[tokio::test]
    async fn retrying_node_is_invoked_max_retries_plus_one_times() {
        let actions = ScriptedExecutor::new();
        actions.always_fail("a");
        let wf = workflow(
            vec![
                trigger("t"),
                action("a").with_policy(NodePolicy::default().retrying(2)),
            ],
            edges(&[("t", "a")]),
        );

        let status = engine(&actions)
            .run_to_completion(&wf, Map::new())
            .await
            .expect("run");

        assert_eq!(actions.calls("a"), 3);
        assert_eq!(status.status_of("a"), Some(NodeStatus::Error));
        assert_eq!(status.terminal_reason, Some(TerminalReason::HaltedOnError));
        let retries: Vec<_> = status
            .log
            .iter()
            .filter(|entry| matches!(entry.event, LogEvent::NodeRetrying { .. }))
            .collect();
        assert_eq!(retries.len(), 2);
        assert!(retries.iter().all(|entry| entry.severity == Severity::Warning));
        let failed = status
            .log
            .iter()
            .find(|entry| entry.event == LogEvent::NodeFailed)
            .expect("failure logged");
        assert_eq!(failed.severity, Severity::Error);
        assert!(failed.message.contains("3 attempt"));
    }

    #[tokio::test]
    async fn retry_recovers_after_transient_failure() {
        let actions = ScriptedExecutor::new();
        actions.script(
            "a",
            [Err(ExecutorError::failed("flaky")), Ok(json!({ "ok": true }))],
        );
        let wf = workflow(
            vec![
                trigger("t"),
                action("a").with_policy(NodePolicy::default().retrying(2)),
            ],
            edges(&[("t", "a")]),
        );

        let status = engine(&actions)
            .run_to_completion(&wf, Map::new())
            .await
            .expect("run");

        assert_eq!(actions.calls("a"), 2);
        assert_eq!(status.status_of("a"), Some(NodeStatus::Success));
        assert_eq!(status.terminal_reason, Some(TerminalReason::Completed));
    }

    #[tokio::test]
    async fn without_retry_on_error_a_failure_is_final() {
        let actions = ScriptedExecutor::new();
        actions.always_fail("a");
        let wf = workflow(vec![trigger("t"), action("a")], edges(&[("t", "a")]));

        engine(&actions)
            .run_to_completion(&wf, Map::new())
            .await
            .expect("run");

        assert_eq!(actions.calls("a"), 1);
    }

    #[tokio::test]
    async fn failure_halts_later_levels() {
        let actions = ScriptedExecutor::new();
        actions.always_fail("a");
        let wf = workflow(
            vec![trigger("t"), action("a"), action("b"), action("c")],
            edges(&[("t", "a"), ("a", "b"), ("b", "c")]),
        );

        let status = engine(&actions)
            .run_to_completion(&wf, Map::new())
            .await
            .expect("run");

        assert_eq!(status.terminal_reason, Some(TerminalReason::HaltedOnError));
        assert_eq!(status.status_of("b"), Some(NodeStatus::Idle));
        assert_eq!(status.status_of("c"), Some(NodeStatus::Idle));
        assert_eq!(actions.calls("b"), 0);
        assert!(!status
            .log
            .iter()
            .any(|entry| entry.node_id.as_ref().is_some_and(|id| id.as_str() == "b")));
        let last = status.log.last().expect("final entry");
        assert_eq!(last.severity, Severity::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn siblings_finish_when_level_halts() {
        let actions = ScriptedExecutor::new();
        actions.always_fail("a");
        actions.sleep_for("slow", Duration::from_secs(5));
        let wf = workflow(
            vec![trigger("t"), action("a"), action("slow"), action("after")],
            edges(&[("t", "a"), ("t", "slow"), ("slow", "after")]),
        );

        let status = engine(&actions)
            .run_to_completion(&wf, Map::new())
            .await
            .expect("run");

        assert_eq!(status.status_of("a"), Some(NodeStatus::Error));
        assert_eq!(status.status_of("slow"), Some(NodeStatus::Success));
        assert_eq!(status.status_of("after"), Some(NodeStatus::Idle));
        assert_eq!(status.terminal_reason, Some(TerminalReason::HaltedOnError));
    }

    #[tokio::test]
    async fn continue_on_error_lets_dependents_run() {
        let actions = ScriptedExecutor::new();
        actions.always_fail("a");
        let wf = workflow(
            vec![
                trigger("t"),
                action("a").with_policy(NodePolicy::default().continuing_on_error()),
                action("b"),
            ],
            edges(&[("t", "a"), ("a", "b")]),
        );

        let status = engine(&actions)
            .run_to_completion(&wf, Map::new())
            .await
            .expect("run");

        assert_eq!(status.status_of("a"), Some(NodeStatus::Error));
        assert_eq!(status.status_of("b"), Some(NodeStatus::Success));
        assert_eq!(actions.calls("b"), 1);
        assert_eq!(status.terminal_reason, Some(TerminalReason::Completed));
    }

    #[tokio::test]
    async fn branch_fans_out_to_all_targets() {
        let actions = ScriptedExecutor::new();
        let wf = workflow(
            vec![
                trigger("t"),
                WorkflowNode::branch("br", "Split"),
                action("x"),
                action("y"),
            ],
            edges(&[("t", "br"), ("br", "x"), ("br", "y")]),
        );

        let status = engine(&actions)
            .run_to_completion(&wf, Map::new())
            .await
            .expect("run");

        for node in ["br", "x", "y"] {
            assert_eq!(status.status_of(node), Some(NodeStatus::Success), "{node}");
            assert!(
                seq_of(&status, node, LogEvent::NodeStarted)
                    < seq_of(&status, node, LogEvent::NodeSucceeded)
            );
        }
        assert!(
            seq_of(&status, "br", LogEvent::NodeSucceeded)
                < seq_of(&status, "x", LogEvent::NodeStarted)
        );
    }

    #[tokio::test]
    async fn condition_routes_by_handle_and_skips_the_other_side() {
        let actions = ScriptedExecutor::new();
        let wf = workflow(
            vec![
                trigger("t"),
                WorkflowNode::condition("big", "Big?", "input.total > 100"),
                action("vip"),
                action("normal"),
                action("normal-followup"),
            ],
            vec![
                WorkflowConnection::between("t", "big"),
                WorkflowConnection::between("big", "vip").from_handle(HANDLE_TRUE),
                WorkflowConnection::between("big", "normal").from_handle(HANDLE_FALSE),
                WorkflowConnection::between("normal", "normal-followup"),
            ],
        );
        let JsonValue::Object(input) = json!({ "total": 240 }) else {
            unreachable!()
        };

        let status = engine(&actions)
            .run_to_completion(&wf, input)
            .await
            .expect("run");

        assert_eq!(status.status_of("vip"), Some(NodeStatus::Success));
        assert_eq!(status.status_of("normal"), Some(NodeStatus::Idle));
        assert_eq!(status.status_of("normal-followup"), Some(NodeStatus::Idle));
        assert!(status.skipped.contains("normal"));
        assert!(status.skipped.contains("normal-followup"));
        assert_eq!(actions.calls("normal"), 0);
        assert_eq!(status.terminal_reason, Some(TerminalReason::Completed));
    }

    #[tokio::test]
    async fn conditions_see_earlier_outputs() {
        let actions = ScriptedExecutor::new();
        actions.script("fetch", [Ok(json!({ "count": 3 }))]);
        let wf = workflow(
            vec![
                trigger("t"),
                action("fetch"),
                WorkflowNode::condition("any", "Any?", "fetch.count > 2"),
                action("process"),
            ],
            edges(&[("t", "fetch"), ("fetch", "any"), ("any", "process")]),
        );

        let status = engine(&actions)
            .run_to_completion(&wf, Map::new())
            .await
            .expect("run");

        assert_eq!(status.status_of("process"), Some(NodeStatus::Success));
    }

    #[tokio::test(start_paused = true)]
    async fn merge_waits_for_every_predecessor() {
        let actions = ScriptedExecutor::new();
        actions.sleep_for("long2", Duration::from_secs(3));
        let wf = workflow(
            vec![
                trigger("t"),
                action("short"),
                action("long1"),
                action("long2"),
                WorkflowNode::merge("join", "Join"),
            ],
            edges(&[
                ("t", "short"),
                ("t", "long1"),
                ("long1", "long2"),
                ("short", "join"),
                ("long2", "join"),
            ]),
        );

        let status = engine(&actions)
            .run_to_completion(&wf, Map::new())
            .await
            .expect("run");

        assert_eq!(status.status_of("join"), Some(NodeStatus::Success));
        let waiting = seq_of(&status, "join", LogEvent::NodeWaiting);
        let started = seq_of(&status, "join", LogEvent::NodeStarted);
        assert!(seq_of(&status, "short", LogEvent::NodeSucceeded) < waiting);
        assert!(waiting < started);
        assert!(seq_of(&status, "long2", LogEvent::NodeSucceeded) < started);
    }

    #[tokio::test]
    async fn merge_runs_when_one_side_was_skipped() {
        let actions = ScriptedExecutor::new();
        let wf = workflow(
            vec![
                trigger("t"),
                WorkflowNode::condition("c", "C", "true"),
                action("yes"),
                action("no"),
                WorkflowNode::merge("join", "Join"),
            ],
            vec![
                WorkflowConnection::between("t", "c"),
                WorkflowConnection::between("c", "yes").from_handle(HANDLE_TRUE),
                WorkflowConnection::between("c", "no").from_handle(HANDLE_FALSE),
                WorkflowConnection::between("yes", "join"),
                WorkflowConnection::between("no", "join"),
            ],
        );

        let status = engine(&actions)
            .run_to_completion(&wf, Map::new())
            .await
            .expect("run");

        assert_eq!(status.status_of("no"), Some(NodeStatus::Idle));
        assert_eq!(status.status_of("join"), Some(NodeStatus::Success));
    }

    #[tokio::test]
    async fn unreachable_nodes_stay_idle() {
        let actions = ScriptedExecutor::new();
        let wf = workflow(
            vec![trigger("t"), action("a"), action("orphan")],
            edges(&[("t", "a")]),
        );

        let status = engine(&actions)
            .run_to_completion(&wf, Map::new())
            .await
            .expect("run");

        assert_eq!(status.status_of("orphan"), Some(NodeStatus::Idle));
        assert!(!status.skipped.contains("orphan"));
        assert_eq!(status.terminal_reason, Some(TerminalReason::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_lets_running_attempt_finish_then_stops() {
        let actions = ScriptedExecutor::new();
        actions.sleep_for("a", Duration::from_secs(10));
        let wf = workflow(
            vec![
                trigger("t"),
                action("a").with_policy(NodePolicy::default().retrying(3)),
                action("b"),
            ],
            edges(&[("t", "a"), ("a", "b")]),
        );
        let engine = engine(&actions);

        let handle = engine.start_run(&wf).expect("start");
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.status().status_of("a"), Some(NodeStatus::Running));
        engine.cancel(&handle);
        let status = handle.wait().await;

        assert_eq!(status.terminal_reason, Some(TerminalReason::Cancelled));
        assert_eq!(status.status_of("t"), Some(NodeStatus::Success));
        assert_eq!(status.status_of("a"), Some(NodeStatus::Idle));
        assert_eq!(status.status_of("b"), Some(NodeStatus::Idle));
        assert_eq!(actions.calls("a"), 1);
        assert_eq!(actions.calls("b"), 0);
        assert!(status.nodes_with(NodeStatus::Running).is_empty());
        assert!(status.nodes_with(NodeStatus::Error).is_empty());

        let cancelled = status
            .log
            .iter()
            .find(|entry| entry.event == LogEvent::RunCancelled)
            .expect("run-level cancellation entry");
        assert!(cancelled.node_id.is_none());
        assert_eq!(cancelled.severity, Severity::Warning);
        assert_eq!(
            status.log.last().map(|entry| entry.event),
            Some(LogEvent::RunFinished {
                reason: TerminalReason::Cancelled
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_delay_nodes() {
        let actions = ScriptedExecutor::new();
        let wf = workflow(
            vec![trigger("t"), WorkflowNode::delay("wait", "Wait", 3600), action("b")],
            edges(&[("t", "wait"), ("wait", "b")]),
        );
        let handle = engine(&actions).start_run(&wf).expect("start");
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.cancel();
        let started = tokio::time::Instant::now();
        let status = handle.wait().await;

        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(status.status_of("wait"), Some(NodeStatus::Idle));
        assert_eq!(status.terminal_reason, Some(TerminalReason::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_longer_than_timeout_still_succeeds() {
        let actions = ScriptedExecutor::new();
        let wf = workflow(
            vec![
                trigger("t"),
                WorkflowNode::delay("wait", "Wait", 120)
                    .with_policy(NodePolicy::default().with_timeout_secs(5)),
            ],
            edges(&[("t", "wait")]),
        );

        let status = engine(&actions)
            .run_to_completion(&wf, Map::new())
            .await
            .expect("run");

        assert_eq!(status.status_of("wait"), Some(NodeStatus::Success));
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_count_as_failed_attempts() {
        let actions = ScriptedExecutor::new();
        actions.sleep_for("a", Duration::from_secs(60));
        let wf = workflow(
            vec![
                trigger("t"),
                action("a").with_policy(NodePolicy::default().retrying(1).with_timeout_secs(1)),
            ],
            edges(&[("t", "a")]),
        );

        let status = engine(&actions)
            .run_to_completion(&wf, Map::new())
            .await
            .expect("run");

        assert_eq!(actions.calls("a"), 2);
        assert_eq!(status.status_of("a"), Some(NodeStatus::Error));
        let failed = status
            .log
            .iter()
            .find(|entry| entry.event == LogEvent::NodeFailed)
            .expect("failure logged");
        assert!(failed.message.contains("timed out"));
    }

    struct NotABool;

    #[async_trait]
    impl NodeExecutor for NotABool {
        async fn execute(&self, _: &ExecutionRequest) -> Result<JsonValue, ExecutorError> {
            Ok(json!("yes"))
        }
    }

    #[tokio::test]
    async fn non_boolean_condition_output_is_an_error() {
        let actions = ScriptedExecutor::new();
        let mut registry = ExecutorRegistry::with_builtins();
        registry.register_shared(NodeType::Action, actions.clone());
        registry.register(NodeType::Condition, NotABool);
        let engine = Engine::new(registry, EngineConfig::default());
        let wf = workflow(
            vec![
                trigger("t"),
                WorkflowNode::condition("c", "C", "true")
                    .with_policy(NodePolicy::default().retrying(2)),
                action("a"),
            ],
            edges(&[("t", "c"), ("c", "a")]),
        );

        let status = engine.run_to_completion(&wf, Map::new()).await.expect("run");

        assert_eq!(status.status_of("c"), Some(NodeStatus::Error));
        assert_eq!(status.status_of("a"), Some(NodeStatus::Idle));
        assert!(!status
            .log
            .iter()
            .any(|entry| matches!(entry.event, LogEvent::NodeRetrying { .. })));
    }

    /// Answers with the compiled expression's source, failing without one.
    struct EchoCompiled;

    #[async_trait]
    impl NodeExecutor for EchoCompiled {
        async fn execute(&self, request: &ExecutionRequest) -> Result<JsonValue, ExecutorError> {
            let expression = request
                .condition
                .as_ref()
                .ok_or_else(|| ExecutorError::failed("no compiled expression"))?;
            Ok(JsonValue::Bool(expression.source() == "input.total > 100"))
        }
    }

    #[tokio::test]
    async fn condition_nodes_receive_the_planned_expression() {
        let actions = ScriptedExecutor::new();
        let mut registry = ExecutorRegistry::with_builtins();
        registry.register_shared(NodeType::Action, actions.clone());
        registry.register(NodeType::Condition, EchoCompiled);
        let engine = Engine::new(registry, EngineConfig::default());
        let wf = workflow(
            vec![
                trigger("t"),
                WorkflowNode::condition("c", "C", "input.total > 100"),
                action("a"),
            ],
            edges(&[("t", "c"), ("c", "a")]),
        );

        let status = engine.run_to_completion(&wf, Map::new()).await.expect("run");

        assert_eq!(status.status_of("c"), Some(NodeStatus::Success));
        assert_eq!(status.status_of("a"), Some(NodeStatus::Success));
    }

    #[tokio::test(start_paused = true)]
    async fn maximal_delay_keeps_waiting() {
        let actions = ScriptedExecutor::new();
        let wf = workflow(
            vec![trigger("t"), WorkflowNode::delay("d", "D", u64::MAX)],
            edges(&[("t", "d")]),
        );
        let handle = engine(&actions).start_run(&wf).expect("start");
        tokio::time::sleep(Duration::from_secs(1)).await;

        let running = handle.status();
        assert_eq!(running.status_of("d"), Some(NodeStatus::Running));
        assert!(running.terminal_reason.is_none());

        handle.cancel();
        let status = handle.wait().await;
        assert_eq!(status.status_of("d"), Some(NodeStatus::Idle));
        assert_eq!(status.terminal_reason, Some(TerminalReason::Cancelled));
        assert!(!status
            .log
            .iter()
            .any(|entry| entry.event == LogEvent::NodeFailed));
    }

    struct Panics;

    #[async_trait]
    impl NodeExecutor for Panics {
        async fn execute(&self, _: &ExecutionRequest) -> Result<JsonValue, ExecutorError> {
            panic!("executor bug");
        }
    }

    #[tokio::test]
    async fn panicking_executor_fails_the_node() {
        let mut registry = ExecutorRegistry::with_builtins();
        registry.register(NodeType::Action, Panics);
        let engine = Engine::new(registry, EngineConfig::default());
        let wf = workflow(vec![trigger("t"), action("a")], edges(&[("t", "a")]));

        let status = engine.run_to_completion(&wf, Map::new()).await.expect("run");

        assert_eq!(status.status_of("a"), Some(NodeStatus::Error));
        assert_eq!(status.terminal_reason, Some(TerminalReason::HaltedOnError));
        assert!(!engine.is_running(wf.id));
    }

    #[tokio::test]
    async fn subscribers_follow_the_run() {
        let actions = ScriptedExecutor::new();
        let wf = workflow(vec![trigger("t"), action("a")], edges(&[("t", "a")]));
        let handle = engine(&actions).start_run(&wf).expect("start");
        let mut rx = handle.subscribe();

        let mut seen = Vec::new();
        while let Ok(entry) = rx.recv().await {
            let done = matches!(entry.event, LogEvent::RunFinished { .. });
            seen.push(entry);
            if done {
                break;
            }
        }
        let status = handle.wait().await;
        assert_eq!(seen, status.log);
    }

    #[tokio::test]
    async fn trigger_output_is_run_input() {
        let actions = ScriptedExecutor::new();
        let wf = workflow(
            vec![trigger("t"), WorkflowNode::condition("c", "C", "t.user == \"ana\""), action("a")],
            vec![
                WorkflowConnection::between("t", "c"),
                WorkflowConnection::between("c", "a"),
            ],
        );
        let JsonValue::Object(input) = json!({ "user": "ana" }) else {
            unreachable!()
        };

        let status = engine(&actions)
            .run_to_completion(&wf, input)
            .await
            .expect("run");

        assert_eq!(status.status_of("a"), Some(NodeStatus::Success));
    }

    #[tokio::test]
    async fn inactive_workflow_is_refused() {
        let actions = ScriptedExecutor::new();
        let mut wf = workflow(vec![trigger("t")], Vec::new());
        wf.set_active(false);

        let err = engine(&actions).start_run(&wf).unwrap_err();
        assert_eq!(
            err.current_context(),
            &EngineError::InactiveWorkflow { workflow_id: wf.id }
        );
    }

    #[tokio::test]
    async fn invalid_workflow_is_refused() {
        let actions = ScriptedExecutor::new();
        let wf = workflow(
            vec![trigger("t"), action("a"), action("b")],
            edges(&[("t", "a"), ("a", "b"), ("b", "a")]),
        );

        let err = engine(&actions).start_run(&wf).unwrap_err();
        assert_eq!(
            err.current_context(),
            &EngineError::InvalidWorkflow { workflow_id: wf.id }
        );
        assert_eq!(actions.total_calls(), 0);
        assert!(!engine(&actions).is_running(wf.id));
    }

    #[tokio::test]
    async fn missing_action_executor_is_refused() {
        let engine = Engine::new(ExecutorRegistry::with_builtins(), EngineConfig::default());
        let wf = workflow(vec![trigger("t"), action("a")], edges(&[("t", "a")]));

        let err = engine.start_run(&wf).unwrap_err();
        assert_eq!(
            err.current_context(),
            &EngineError::MissingExecutor {
                node_type: NodeType::Action
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn one_active_run_per_workflow() {
        let actions = ScriptedExecutor::new();
        actions.sleep_for("a", Duration::from_secs(2));
        let engine = engine(&actions);
        let wf = workflow(vec![trigger("t"), action("a")], edges(&[("t", "a")]));
        let other = workflow(vec![trigger("t"), action("a")], edges(&[("t", "a")]));

        let first = engine.start_run(&wf).expect("first run");
        assert!(engine.is_running(wf.id));
        let err = engine.start_run(&wf).unwrap_err();
        assert_eq!(
            err.current_context(),
            &EngineError::RunAlreadyActive { workflow_id: wf.id }
        );
        let parallel = engine.start_run(&other).expect("different workflow");

        first.wait().await;
        parallel.wait().await;
        assert!(!engine.is_running(wf.id));
        let again = engine.start_run(&wf).expect("slot released");
        assert_eq!(again.wait().await.terminal_reason, Some(TerminalReason::Completed));
    }

    #[test]
    fn start_outside_runtime_fails() {
        let actions = ScriptedExecutor::new();
        let wf = workflow(vec![trigger("t"), action("a")], edges(&[("t", "a")]));
        let engine = engine(&actions);

        let err = engine.start_run(&wf).unwrap_err();
        assert_eq!(err.current_context(), &EngineError::NoRuntime);
        assert!(!engine.is_running(wf.id));
    }

    #[tokio::test]
    async fn every_run_starts_fresh() {
        let actions = ScriptedExecutor::new();
        let engine = engine(&actions);
        let wf = workflow(vec![trigger("t"), action("a")], edges(&[("t", "a")]));

        let first = engine.run_to_completion(&wf, Map::new()).await.expect("run");
        let second = engine.run_to_completion(&wf, Map::new()).await.expect("run");

        assert_ne!(first.run_id, second.run_id);
        assert_eq!(second.log.first().map(|entry| entry.seq), Some(1));
        assert_eq!(second.log.len(), first.log.len());
    }
}
