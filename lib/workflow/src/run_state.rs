//! Mutable state of one run.
//!
//! The coordinator and every node task of a run share a single
//! [`RunState`] behind a mutex. All status changes and log appends go
//! through it, which serializes concurrent writers and keeps the log's
//! sequence numbers consistent with the status table.

use crate::context::VariableContext;
use crate::execution::{NodeStatus, RunStatus, TerminalReason};
use crate::log::{ExecutionLog, LogEntry, LogEvent};
use crate::node::NodeId;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};
use taskflow_core::{WorkflowId, WorkflowRunId};
use tokio::sync::broadcast;
use tracing::warn;

/// Everything a run mutates.
#[derive(Debug)]
pub struct RunState {
    run_id: WorkflowRunId,
    workflow_id: WorkflowId,
    statuses: BTreeMap<NodeId, NodeStatus>,
    skipped: BTreeSet<NodeId>,
    log: ExecutionLog,
    variables: VariableContext,
    terminal_reason: Option<TerminalReason>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl RunState {
    /// Creates the state for a fresh run with every node idle.
    pub fn new(
        run_id: WorkflowRunId,
        workflow_id: WorkflowId,
        nodes: impl IntoIterator<Item = NodeId>,
        variables: VariableContext,
        log_capacity: usize,
    ) -> Self {
        Self {
            run_id,
            workflow_id,
            statuses: nodes
                .into_iter()
                .map(|node_id| (node_id, NodeStatus::Idle))
                .collect(),
            skipped: BTreeSet::new(),
            log: ExecutionLog::new(run_id, log_capacity),
            variables,
            terminal_reason: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Returns a node's status. Unknown nodes read as idle.
    pub fn status(&self, node_id: &NodeId) -> NodeStatus {
        self.statuses.get(node_id).copied().unwrap_or_default()
    }

    /// Moves a node to `next` if the state machine allows it.
    ///
    /// Returns false, leaving the status untouched, for an illegal move.
    pub fn transition(&mut self, node_id: &NodeId, next: NodeStatus) -> bool {
        let current = self.status(node_id);
        if !current.can_transition_to(next) {
            warn!(
                run_id = %self.run_id,
                node_id = %node_id,
                from = %current,
                to = %next,
                "ignoring illegal node status transition"
            );
            return false;
        }
        self.statuses.insert(node_id.clone(), next);
        true
    }

    /// Records that a node will not run in this run.
    pub fn skip(&mut self, node_id: &NodeId, message: impl Into<String>) {
        if self.status(node_id) == NodeStatus::Waiting {
            self.transition(node_id, NodeStatus::Idle);
        }
        self.skipped.insert(node_id.clone());
        self.log.append(Some(node_id), LogEvent::NodeSkipped, message);
    }

    /// Returns true once a node is terminal or skipped.
    pub fn is_settled(&self, node_id: &NodeId) -> bool {
        self.status(node_id).is_terminal() || self.skipped.contains(node_id)
    }

    /// Appends to the execution log.
    pub fn log(
        &mut self,
        node_id: Option<&NodeId>,
        event: LogEvent,
        message: impl Into<String>,
    ) -> &LogEntry {
        self.log.append(node_id, event, message)
    }

    /// Follows log entries appended from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.log.subscribe()
    }

    /// Stores a successful node's output for later nodes.
    pub fn record_output(&mut self, node_id: &NodeId, output: JsonValue) {
        self.variables.set_output(node_id, output);
    }

    /// Returns a snapshot of the variables.
    pub fn variables(&self) -> Arc<VariableContext> {
        Arc::new(self.variables.clone())
    }

    /// Marks the run as stopped and writes the final log entry.
    pub fn finish(&mut self, reason: TerminalReason) {
        if self.terminal_reason.is_some() {
            return;
        }
        self.log.append(
            None,
            LogEvent::RunFinished { reason },
            format!("run {reason}"),
        );
        self.terminal_reason = Some(reason);
        self.finished_at = Some(Utc::now());
    }

    /// Returns true once the run has stopped.
    pub fn is_finished(&self) -> bool {
        self.terminal_reason.is_some()
    }

    /// Returns a point-in-time copy for observers.
    pub fn snapshot(&self) -> RunStatus {
        RunStatus {
            run_id: self.run_id,
            workflow_id: self.workflow_id,
            node_statuses: self.statuses.clone(),
            skipped: self.skipped.clone(),
            log: self.log.entries().to_vec(),
            terminal_reason: self.terminal_reason,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// A [`RunState`] shared between the coordinator, node tasks and handles.
#[derive(Debug, Clone)]
pub struct SharedRunState(Arc<Mutex<RunState>>);

impl SharedRunState {
    pub fn new(state: RunState) -> Self {
        Self(Arc::new(Mutex::new(state)))
    }

    /// Runs `f` with exclusive access to the state. A lock poisoned by a
    /// panicking node task is recovered.
    pub fn with<R>(&self, f: impl FnOnce(&mut RunState) -> R) -> R {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> RunState {
        RunState::new(
            WorkflowRunId::new(),
            WorkflowId::new(),
            [NodeId::from("a"), NodeId::from("b")],
            VariableContext::default(),
            16,
        )
    }

    #[test]
    fn new_run_starts_idle() {
        let state = state();
        let snapshot = state.snapshot();
        assert_eq!(snapshot.nodes_with(NodeStatus::Idle).len(), 2);
        assert!(snapshot.log.is_empty());
        assert!(!snapshot.is_finished());
    }

    #[test]
    fn illegal_transitions_are_refused() {
        let mut state = state();
        let a = NodeId::from("a");
        assert!(!state.transition(&a, NodeStatus::Success));
        assert_eq!(state.status(&a), NodeStatus::Idle);
        assert!(state.transition(&a, NodeStatus::Running));
        assert!(state.transition(&a, NodeStatus::Success));
        assert!(!state.transition(&a, NodeStatus::Running));
        assert!(state.is_settled(&a));
    }

    #[test]
    fn skipping_a_waiting_node_returns_it_to_idle() {
        let mut state = state();
        let b = NodeId::from("b");
        state.transition(&b, NodeStatus::Waiting);
        state.skip(&b, "not activated");
        assert_eq!(state.status(&b), NodeStatus::Idle);
        assert!(state.is_settled(&b));
        assert_eq!(state.snapshot().skipped.len(), 1);
    }

    #[test]
    fn finish_is_recorded_once() {
        let mut state = state();
        state.finish(TerminalReason::Completed);
        state.finish(TerminalReason::Cancelled);
        let snapshot = state.snapshot();
        assert_eq!(snapshot.terminal_reason, Some(TerminalReason::Completed));
        assert_eq!(snapshot.log.len(), 1);
        assert!(snapshot.finished_at.is_some());
    }

    #[test]
    fn shared_state_recovers_from_poison() {
        let shared = SharedRunState::new(state());
        let clone = shared.clone();
        let _ = std::thread::spawn(move || {
            clone.with(|_| panic!("node task panicked"));
        })
        .join();
        let status = shared.with(|s| s.status(&NodeId::from("a")));
        assert_eq!(status, NodeStatus::Idle);
    }
}
