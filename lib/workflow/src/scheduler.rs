//! The run coordinator.
//!
//! A [`Scheduler`] drives one run of an [`ExecutionPlan`] level by level.
//! Within a level every eligible node runs as its own task; the coordinator
//! waits for all of them before looking at the next level.
//!
//! A node is eligible when it is a trigger or when at least one of its
//! incoming connections was activated by a predecessor. Ineligible nodes are
//! skipped and stay idle. Which connections a finished node activates:
//!
//! | node outcome                    | activated outgoing connections      |
//! |---------------------------------|-------------------------------------|
//! | condition evaluated to `true`   | handle `"true"` or no handle        |
//! | condition evaluated to `false`  | handle `"false"`                    |
//! | any other success               | all                                 |
//! | error with `continue_on_error`  | all                                 |
//! | error without it                | none, and the run halts             |
//!
//! Cancellation is checked between levels and after every attempt. Nodes
//! whose attempt ends after cancellation go back to idle.

use crate::config::EngineConfig;
use crate::connection::ConnectionId;
use crate::context::VariableContext;
use crate::execution::{NodeStatus, TerminalReason};
use crate::executor::{ExecutionRequest, ExecutorError, ExecutorRegistry, NodeExecutor};
use crate::log::LogEvent;
use crate::node::{NodeConfig, NodeId, NodeType, ResolvedPolicy};
use crate::plan::{ExecutionPlan, PlannedNode};
use crate::run_state::SharedRunState;
use futures::FutureExt;
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use taskflow_core::WorkflowRunId;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument};

/// How a node task ended.
#[derive(Debug)]
enum NodeOutcome {
    /// The node settled and these connections may carry the run onward.
    Settled { activate: Vec<ConnectionId> },
    /// The node failed and the run must stop after this level.
    Halt,
    /// The run was cancelled while the node was running.
    Cancelled,
}

/// Drives one run to a terminal reason.
pub(crate) struct Scheduler {
    run_id: WorkflowRunId,
    plan: Arc<ExecutionPlan>,
    registry: Arc<ExecutorRegistry>,
    config: EngineConfig,
    state: SharedRunState,
    cancel: CancellationToken,
}

impl Scheduler {
    pub(crate) fn new(
        run_id: WorkflowRunId,
        plan: Arc<ExecutionPlan>,
        registry: Arc<ExecutorRegistry>,
        config: EngineConfig,
        state: SharedRunState,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_id,
            plan,
            registry,
            config,
            state,
            cancel,
        }
    }

    /// Runs every level and records the terminal reason.
    #[instrument(skip_all, fields(run_id = %self.run_id))]
    pub(crate) async fn run(self) -> TerminalReason {
        let mut activated: HashSet<ConnectionId> = HashSet::new();

        for (index, level) in self.plan.levels().iter().enumerate() {
            if self.cancel.is_cancelled() {
                return self.finish_cancelled();
            }
            debug!(level = index, nodes = level.len(), "starting level");

            let eligible = self.admit(level, &activated);
            let halted = self.run_level(eligible, &mut activated).await;

            if self.cancel.is_cancelled() {
                return self.finish_cancelled();
            }
            if halted {
                return self.finish(TerminalReason::HaltedOnError);
            }
            self.mark_waiting(index + 1);
        }

        self.finish(TerminalReason::Completed)
    }

    /// Skips ineligible nodes and marks the rest running, in id order.
    fn admit(&self, level: &[NodeId], activated: &HashSet<ConnectionId>) -> Vec<PlannedNode> {
        let mut eligible = Vec::new();
        self.state.with(|state| {
            for node_id in level {
                let Some(planned) = self.plan.node(node_id) else {
                    continue;
                };
                let reached = planned.node.is_trigger()
                    || planned.incoming.iter().any(|conn| activated.contains(&conn.id));
                if !reached {
                    state.skip(node_id, "skipped: no activated incoming connection");
                    continue;
                }
                state.transition(node_id, NodeStatus::Running);
                state.log(
                    Some(node_id),
                    LogEvent::NodeStarted,
                    format!("started {} node \"{}\"", planned.node_type(), planned.node.title),
                );
                eligible.push(planned.clone());
            }
        });
        eligible
    }

    /// Runs one level's nodes concurrently. Returns true if the run halts.
    async fn run_level(
        &self,
        eligible: Vec<PlannedNode>,
        activated: &mut HashSet<ConnectionId>,
    ) -> bool {
        let variables = self.state.with(|state| state.variables());
        let mut tasks = JoinSet::new();

        for planned in eligible {
            let policy = planned.node.policy.resolve(&self.config);
            let task = NodeTask {
                run_id: self.run_id,
                executor: self.registry.get(planned.node_type()),
                planned,
                policy,
                retry_delay: self.config.retry_delay(),
                variables: Arc::clone(&variables),
                state: self.state.clone(),
                cancel: self.cancel.clone(),
            };
            tasks.spawn(task.run_guarded());
        }

        let mut halted = false;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(NodeOutcome::Settled { activate }) => activated.extend(activate),
                Ok(NodeOutcome::Halt) => halted = true,
                Ok(NodeOutcome::Cancelled) => {}
                Err(join_error) => {
                    error!(error = %join_error, "node task did not complete");
                    halted = true;
                }
            }
        }
        halted
    }

    /// Marks nodes from `from_level` on as waiting when some, but not all,
    /// of their predecessors have settled.
    fn mark_waiting(&self, from_level: usize) {
        let later = self.plan.levels().iter().skip(from_level).flatten();
        self.state.with(|state| {
            for node_id in later {
                let Some(planned) = self.plan.node(node_id) else {
                    continue;
                };
                if state.status(node_id) != NodeStatus::Idle || planned.incoming.is_empty() {
                    continue;
                }
                let settled = planned
                    .incoming
                    .iter()
                    .filter(|conn| state.is_settled(&conn.source))
                    .count();
                if settled > 0 && settled < planned.incoming.len() {
                    state.transition(node_id, NodeStatus::Waiting);
                    state.log(
                        Some(node_id),
                        LogEvent::NodeWaiting,
                        format!(
                            "waiting on {} of {} predecessors",
                            planned.incoming.len() - settled,
                            planned.incoming.len()
                        ),
                    );
                }
            }
        });
    }

    fn finish_cancelled(&self) -> TerminalReason {
        self.state.with(|state| {
            state.log(None, LogEvent::RunCancelled, "run cancelled by user");
        });
        self.finish(TerminalReason::Cancelled)
    }

    fn finish(&self, reason: TerminalReason) -> TerminalReason {
        self.state.with(|state| state.finish(reason));
        reason
    }
}

/// One node's work within a level.
struct NodeTask {
    run_id: WorkflowRunId,
    planned: PlannedNode,
    executor: Option<Arc<dyn NodeExecutor>>,
    policy: ResolvedPolicy,
    retry_delay: Duration,
    variables: Arc<VariableContext>,
    state: SharedRunState,
    cancel: CancellationToken,
}

impl NodeTask {
    /// Runs the node, turning a panic into a node failure.
    async fn run_guarded(self) -> NodeOutcome {
        let node_id = self.planned.id().clone();
        let continue_on_error = self.policy.continue_on_error;
        let outgoing = self.all_outgoing();
        let state = self.state.clone();

        match AssertUnwindSafe(self.run()).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => {
                state.with(|state| {
                    state.transition(&node_id, NodeStatus::Error);
                    state.log(Some(&node_id), LogEvent::NodeFailed, "executor panicked");
                });
                if continue_on_error {
                    NodeOutcome::Settled { activate: outgoing }
                } else {
                    NodeOutcome::Halt
                }
            }
        }
    }

    #[instrument(skip_all, fields(run_id = %self.run_id, node_id = %self.planned.id()))]
    async fn run(self) -> NodeOutcome {
        let node_type = self.planned.node_type();
        if !node_type.needs_executor() {
            let message = match node_type {
                NodeType::Merge => "joined all incoming paths",
                _ => "fanned out to all outgoing connections",
            };
            return self.succeed(JsonValue::Null, self.all_outgoing(), message.to_string());
        }

        let Some(executor) = self.executor.clone() else {
            return self.fail(ExecutorError::Unsupported { node_type }, 0);
        };

        // A delay's own wait does not count against its timeout.
        let timeout = match &self.planned.node.config {
            NodeConfig::Delay(delay) => self.policy.timeout.saturating_add(delay.duration()),
            _ => self.policy.timeout,
        };

        let mut attempt = 1;
        loop {
            let request = ExecutionRequest {
                run_id: self.run_id,
                node_id: self.planned.id().clone(),
                node_type,
                config: self.planned.node.config.clone(),
                condition: self.planned.condition.clone(),
                timeout,
                attempt,
                variables: Arc::clone(&self.variables),
                cancel: self.cancel.clone(),
            };
            let result = match tokio::time::timeout(timeout, executor.execute(&request)).await {
                Ok(result) => result,
                Err(_) => Err(ExecutorError::Timeout { after: timeout }),
            };

            if self.cancel.is_cancelled() {
                return self.cancelled();
            }

            match result.and_then(|output| self.route(output)) {
                Ok((output, activate, message)) => return self.succeed(output, activate, message),
                Err(err) if err.is_retryable() && attempt < self.policy.max_attempts => {
                    self.state.with(|state| {
                        state.log(
                            Some(self.planned.id()),
                            LogEvent::NodeRetrying {
                                attempt,
                                max_attempts: self.policy.max_attempts,
                            },
                            format!(
                                "attempt {attempt} of {} failed: {err}; retrying",
                                self.policy.max_attempts
                            ),
                        );
                    });
                    if !self.retry_delay.is_zero() {
                        tokio::select! {
                            () = tokio::time::sleep(self.retry_delay) => {}
                            () = self.cancel.cancelled() => return self.cancelled(),
                        }
                    }
                    attempt += 1;
                }
                Err(err) => return self.fail(err, attempt),
            }
        }
    }

    /// Picks the outgoing connections a successful output activates.
    fn route(
        &self,
        output: JsonValue,
    ) -> Result<(JsonValue, Vec<ConnectionId>, String), ExecutorError> {
        if self.planned.node_type() != NodeType::Condition {
            return Ok((output, self.all_outgoing(), "succeeded".to_string()));
        }
        let JsonValue::Bool(outcome) = output else {
            return Err(ExecutorError::InvalidOutput {
                message: format!("condition returned {output} instead of a boolean"),
            });
        };
        let activate = self
            .planned
            .outgoing
            .iter()
            .filter(|conn| conn.follows_outcome(outcome))
            .map(|conn| conn.id.clone())
            .collect();
        Ok((output, activate, format!("condition evaluated to {outcome}")))
    }

    fn all_outgoing(&self) -> Vec<ConnectionId> {
        self.planned
            .outgoing
            .iter()
            .map(|conn| conn.id.clone())
            .collect()
    }

    fn succeed(
        &self,
        output: JsonValue,
        activate: Vec<ConnectionId>,
        message: String,
    ) -> NodeOutcome {
        let node_id = self.planned.id();
        self.state.with(|state| {
            state.record_output(node_id, output);
            state.transition(node_id, NodeStatus::Success);
            state.log(Some(node_id), LogEvent::NodeSucceeded, message);
        });
        NodeOutcome::Settled { activate }
    }

    fn fail(&self, err: ExecutorError, attempts: u32) -> NodeOutcome {
        let node_id = self.planned.id();
        let continue_on_error = self.policy.continue_on_error;
        self.state.with(|state| {
            state.transition(node_id, NodeStatus::Error);
            let suffix = if continue_on_error {
                "; continuing"
            } else {
                ""
            };
            state.log(
                Some(node_id),
                LogEvent::NodeFailed,
                format!("failed after {attempts} attempt(s): {err}{suffix}"),
            );
        });
        if continue_on_error {
            NodeOutcome::Settled {
                activate: self.all_outgoing(),
            }
        } else {
            NodeOutcome::Halt
        }
    }

    fn cancelled(&self) -> NodeOutcome {
        let node_id = self.planned.id();
        self.state.with(|state| {
            state.transition(node_id, NodeStatus::Idle);
            state.log(
                Some(node_id),
                LogEvent::NodeCancelled,
                "did not complete: run cancelled",
            );
        });
        NodeOutcome::Cancelled
    }
}
