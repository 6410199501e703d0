//! Run-scoped execution state.
//!
//! Node statuses belong to a run, not to the workflow definition. Every run
//! starts with all nodes `idle` and moves them forward through the state
//! machine below:
//!
//! ```text
//! idle ──► waiting ──► running ──► success | error
//!   └───────────────────►┘  └──► idle (cancelled)
//! ```

use crate::log::LogEntry;
use crate::node::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use taskflow_core::{WorkflowId, WorkflowRunId};

/// The status of a single node within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Not started. Skipped and cancelled nodes end the run here.
    #[default]
    Idle,
    /// Some but not all predecessors have settled.
    Waiting,
    /// An attempt is in flight.
    Running,
    /// Completed successfully.
    Success,
    /// Failed after exhausting its attempts.
    Error,
}

impl NodeStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    /// Returns true if the state machine allows moving to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Waiting | Self::Running)
                | (Self::Waiting, Self::Running | Self::Idle)
                | (Self::Running, Self::Success | Self::Error | Self::Idle)
        )
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
        })
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminalReason {
    /// Every planned node settled.
    Completed,
    /// A node failed without `continue_on_error`.
    HaltedOnError,
    /// The caller cancelled the run.
    Cancelled,
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Completed => "completed",
            Self::HaltedOnError => "halted-on-error",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Snapshot of a run, as returned by the run API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStatus {
    pub run_id: WorkflowRunId,
    pub workflow_id: WorkflowId,
    /// Status of every node of the workflow.
    pub node_statuses: BTreeMap<NodeId, NodeStatus>,
    /// Nodes passed over because no activated connection reached them.
    pub skipped: BTreeSet<NodeId>,
    pub log: Vec<LogEntry>,
    /// Set once the run has stopped.
    pub terminal_reason: Option<TerminalReason>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunStatus {
    /// Returns true once the run has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.terminal_reason.is_some()
    }

    /// Returns a node's status.
    #[must_use]
    pub fn status_of(&self, node_id: &str) -> Option<NodeStatus> {
        self.node_statuses.get(node_id).copied()
    }

    /// Returns the nodes currently in `status`, ordered by id.
    #[must_use]
    pub fn nodes_with(&self, status: NodeStatus) -> Vec<&NodeId> {
        self.node_statuses
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(id, _)| id)
            .collect()
    }
}
