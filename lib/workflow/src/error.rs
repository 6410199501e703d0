//! Error types for the workflow crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `GraphError`: Structural edits that would break graph invariants
//! - `ValidationError`: Definitions that cannot be turned into a plan
//! - `EngineError`: Run API failures (wraps lower errors via context)
//!
//! Every variant names the node or connection involved so an editor can
//! highlight the offending element.

use crate::connection::ConnectionId;
use crate::node::{NodeId, NodeType};
use std::fmt;
use taskflow_core::WorkflowId;

/// Errors from structural graph operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A node with this id already exists.
    DuplicateNodeId { node_id: NodeId },
    /// A connection with this id already exists.
    DuplicateConnectionId { connection_id: ConnectionId },
    /// The node does not exist. `connection_id` is set when the node was
    /// referenced by a connection being added.
    UnknownNode {
        node_id: NodeId,
        connection_id: Option<ConnectionId>,
    },
    /// The connection does not exist.
    UnknownConnection { connection_id: ConnectionId },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateNodeId { node_id } => write!(f, "duplicate node id: {node_id}"),
            Self::DuplicateConnectionId { connection_id } => {
                write!(f, "duplicate connection id: {connection_id}")
            }
            Self::UnknownNode {
                node_id,
                connection_id: Some(connection_id),
            } => write!(
                f,
                "connection {connection_id} references unknown node {node_id}"
            ),
            Self::UnknownNode {
                node_id,
                connection_id: None,
            } => write!(f, "unknown node: {node_id}"),
            Self::UnknownConnection { connection_id } => {
                write!(f, "unknown connection: {connection_id}")
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// Which side of a node an arity rule constrains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incoming => f.write_str("incoming"),
            Self::Outgoing => f.write_str("outgoing"),
        }
    }
}

/// Errors that prevent a workflow from being planned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The workflow has no trigger node.
    NoTrigger,
    /// The connections form a cycle through these nodes, in path order.
    CycleDetected { nodes: Vec<NodeId> },
    /// A branch or merge node has too few connections.
    Arity {
        node_id: NodeId,
        node_type: NodeType,
        direction: Direction,
        required: usize,
        actual: usize,
    },
    /// A trigger node has an incoming connection.
    TriggerHasIncoming {
        node_id: NodeId,
        connection_id: ConnectionId,
    },
    /// A node's configuration is unusable.
    InvalidConfig { node_id: NodeId, reason: String },
}

impl ValidationError {
    /// Returns the nodes an editor should highlight for this error.
    #[must_use]
    pub fn node_ids(&self) -> Vec<&NodeId> {
        match self {
            Self::NoTrigger => Vec::new(),
            Self::CycleDetected { nodes } => nodes.iter().collect(),
            Self::Arity { node_id, .. }
            | Self::TriggerHasIncoming { node_id, .. }
            | Self::InvalidConfig { node_id, .. } => vec![node_id],
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTrigger => write!(f, "workflow has no trigger node"),
            Self::CycleDetected { nodes } => {
                let path: Vec<&str> = nodes.iter().map(NodeId::as_str).collect();
                write!(f, "cycle detected: {}", path.join(" -> "))
            }
            Self::Arity {
                node_id,
                node_type,
                direction,
                required,
                actual,
            } => write!(
                f,
                "{node_type} node {node_id} needs at least {required} {direction} connections, has {actual}"
            ),
            Self::TriggerHasIncoming {
                node_id,
                connection_id,
            } => write!(
                f,
                "trigger node {node_id} has incoming connection {connection_id}"
            ),
            Self::InvalidConfig { node_id, reason } => {
                write!(f, "invalid configuration on node {node_id}: {reason}")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Errors from the run API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The workflow failed validation (use as context wrapper).
    InvalidWorkflow { workflow_id: WorkflowId },
    /// The workflow is switched off.
    InactiveWorkflow { workflow_id: WorkflowId },
    /// A run of this workflow is still in progress.
    RunAlreadyActive { workflow_id: WorkflowId },
    /// No executor is registered for a node type the workflow uses.
    MissingExecutor { node_type: NodeType },
    /// Runs must be started from within a tokio runtime.
    NoRuntime,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidWorkflow { workflow_id } => {
                write!(f, "workflow {workflow_id} is not executable")
            }
            Self::InactiveWorkflow { workflow_id } => {
                write!(f, "workflow {workflow_id} is inactive")
            }
            Self::RunAlreadyActive { workflow_id } => {
                write!(f, "workflow {workflow_id} already has an active run")
            }
            Self::MissingExecutor { node_type } => {
                write!(f, "no executor registered for {node_type} nodes")
            }
            Self::NoRuntime => write!(f, "no async runtime available to drive the run"),
        }
    }
}

impl std::error::Error for EngineError {}
