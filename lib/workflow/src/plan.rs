//! Execution plans.
//!
//! A plan is the validated, immutable form of a workflow graph that the
//! scheduler runs. Nodes are grouped into levels: every predecessor of a
//! node sits in a strictly earlier level, and nodes within a level are
//! ordered by id. Nodes no trigger can reach are left out of the levels and
//! reported as warnings, as are condition outputs no outcome selects.

use crate::connection::{ConnectionId, WorkflowConnection};
use crate::expression::Expression;
use crate::node::{NodeId, NodeType, WorkflowNode};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Non-fatal findings from plan building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanWarning {
    /// No trigger reaches this node, so it never runs.
    Unreachable { node_id: NodeId },
    /// A condition's outgoing connection uses a handle other than `"true"`
    /// or `"false"`, so neither outcome activates it.
    UnroutableHandle {
        node_id: NodeId,
        connection_id: ConnectionId,
        handle: String,
    },
}

impl fmt::Display for PlanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable { node_id } => {
                write!(f, "node {node_id} is not reachable from any trigger")
            }
            Self::UnroutableHandle {
                node_id,
                connection_id,
                handle,
            } => write!(
                f,
                "connection {connection_id} leaves condition {node_id} on handle `{handle}`, \
                 which is never activated"
            ),
        }
    }
}

/// A node as the scheduler sees it.
#[derive(Debug, Clone)]
pub struct PlannedNode {
    pub node: WorkflowNode,
    /// Index of the level this node runs in.
    pub level: usize,
    /// Connections from planned nodes, ordered by connection id.
    pub incoming: Vec<WorkflowConnection>,
    /// Connections to planned nodes, ordered by connection id.
    pub outgoing: Vec<WorkflowConnection>,
    /// Compiled expression for condition nodes.
    pub condition: Option<Arc<Expression>>,
}

impl PlannedNode {
    /// Returns the node id.
    #[must_use]
    pub fn id(&self) -> &NodeId {
        &self.node.id
    }

    /// Returns the node type.
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        self.node.node_type()
    }
}

/// A validated workflow, layered for execution.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    levels: Vec<Vec<NodeId>>,
    nodes: HashMap<NodeId, PlannedNode>,
    warnings: Vec<PlanWarning>,
}

impl ExecutionPlan {
    pub(crate) fn new(
        levels: Vec<Vec<NodeId>>,
        nodes: HashMap<NodeId, PlannedNode>,
        warnings: Vec<PlanWarning>,
    ) -> Self {
        Self {
            levels,
            nodes,
            warnings,
        }
    }

    /// Returns the levels in execution order.
    #[must_use]
    pub fn levels(&self) -> &[Vec<NodeId>] {
        &self.levels
    }

    /// Returns a planned node.
    #[must_use]
    pub fn node(&self, node_id: &NodeId) -> Option<&PlannedNode> {
        self.nodes.get(node_id)
    }

    /// Returns true if the node is part of the plan.
    #[must_use]
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Returns the planned nodes in level order.
    pub fn nodes(&self) -> impl Iterator<Item = &PlannedNode> {
        self.levels
            .iter()
            .flatten()
            .filter_map(|node_id| self.nodes.get(node_id))
    }

    /// Returns the number of planned nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the distinct node types the plan will run.
    #[must_use]
    pub fn node_types(&self) -> BTreeSet<NodeType> {
        self.nodes.values().map(PlannedNode::node_type).collect()
    }

    /// Returns the warnings found while planning.
    #[must_use]
    pub fn warnings(&self) -> &[PlanWarning] {
        &self.warnings
    }

    /// Returns the ids of nodes left out of the plan.
    pub fn unreachable(&self) -> impl Iterator<Item = &NodeId> {
        self.warnings.iter().filter_map(|warning| match warning {
            PlanWarning::Unreachable { node_id } => Some(node_id),
            PlanWarning::UnroutableHandle { .. } => None,
        })
    }
}
