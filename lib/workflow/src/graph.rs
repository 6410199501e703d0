//! Workflow graph implementation using petgraph.
//!
//! The graph owns the nodes and connections of one workflow and enforces
//! the structural invariants on every edit:
//! - node ids are unique
//! - connection ids are unique
//! - every connection joins two member nodes
//!
//! Removing a node removes every connection touching it. Authoring order of
//! nodes and connections is preserved for display and serialization; it has
//! no bearing on execution order.

use crate::connection::{ConnectionId, WorkflowConnection};
use crate::error::GraphError;
use crate::node::{NodeConfig, NodeId, NodePolicy, WorkflowNode};
use petgraph::Direction;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A workflow graph backed by petgraph's stable directed graph.
///
/// Stable indices survive removals, so the id lookup tables never need
/// rebuilding after an edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "GraphDocument", into = "GraphDocument")]
pub struct WorkflowGraph {
    graph: StableDiGraph<WorkflowNode, WorkflowConnection>,
    node_index: HashMap<NodeId, NodeIndex>,
    edge_index: HashMap<ConnectionId, EdgeIndex>,
    node_order: Vec<NodeId>,
    connection_order: Vec<ConnectionId>,
}

impl WorkflowGraph {
    /// Creates a new empty workflow graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
            node_index: HashMap::new(),
            edge_index: HashMap::new(),
            node_order: Vec::new(),
            connection_order: Vec::new(),
        }
    }

    /// Builds a graph from nodes and connections, checking every invariant.
    ///
    /// # Errors
    ///
    /// Returns the first duplicate id or dangling connection encountered.
    pub fn from_parts(
        nodes: impl IntoIterator<Item = WorkflowNode>,
        connections: impl IntoIterator<Item = WorkflowConnection>,
    ) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for node in nodes {
            graph.add_node(node)?;
        }
        for connection in connections {
            graph.add_connection(connection)?;
        }
        Ok(graph)
    }

    /// Adds a node to the graph.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateNodeId`] if the id is taken.
    pub fn add_node(&mut self, node: WorkflowNode) -> Result<(), GraphError> {
        if self.node_index.contains_key(&node.id) {
            return Err(GraphError::DuplicateNodeId { node_id: node.id });
        }
        let node_id = node.id.clone();
        let index = self.graph.add_node(node);
        self.node_index.insert(node_id.clone(), index);
        self.node_order.push(node_id);
        Ok(())
    }

    /// Removes a node together with every connection that touches it.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] if the node does not exist.
    pub fn remove_node(&mut self, node_id: &NodeId) -> Result<WorkflowNode, GraphError> {
        let index = self
            .node_index
            .remove(node_id)
            .ok_or_else(|| GraphError::UnknownNode {
                node_id: node_id.clone(),
                connection_id: None,
            })?;

        let attached: Vec<ConnectionId> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .chain(self.graph.edges_directed(index, Direction::Incoming))
            .map(|edge| edge.weight().id.clone())
            .collect();
        for connection_id in &attached {
            self.edge_index.remove(connection_id);
        }
        self.connection_order.retain(|id| !attached.contains(id));
        self.node_order.retain(|id| id != node_id);

        // petgraph drops the attached edges along with the node.
        self.graph
            .remove_node(index)
            .ok_or_else(|| GraphError::UnknownNode {
                node_id: node_id.clone(),
                connection_id: None,
            })
    }

    /// Adds a connection between two member nodes.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] if either endpoint is missing, or
    /// [`GraphError::DuplicateConnectionId`] if the id is taken.
    pub fn add_connection(&mut self, connection: WorkflowConnection) -> Result<(), GraphError> {
        if self.edge_index.contains_key(&connection.id) {
            return Err(GraphError::DuplicateConnectionId {
                connection_id: connection.id,
            });
        }
        let source = self.endpoint(&connection.source, &connection.id)?;
        let target = self.endpoint(&connection.target, &connection.id)?;

        let connection_id = connection.id.clone();
        let index = self.graph.add_edge(source, target, connection);
        self.edge_index.insert(connection_id.clone(), index);
        self.connection_order.push(connection_id);
        Ok(())
    }

    /// Removes a connection.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownConnection`] if it does not exist.
    pub fn remove_connection(
        &mut self,
        connection_id: &ConnectionId,
    ) -> Result<WorkflowConnection, GraphError> {
        let unknown = || GraphError::UnknownConnection {
            connection_id: connection_id.clone(),
        };
        let index = self.edge_index.remove(connection_id).ok_or_else(unknown)?;
        self.connection_order.retain(|id| id != connection_id);
        self.graph.remove_edge(index).ok_or_else(unknown)
    }

    /// Replaces a node's configuration, which may change its type.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] if the node does not exist.
    pub fn update_node_config(
        &mut self,
        node_id: &NodeId,
        config: NodeConfig,
    ) -> Result<(), GraphError> {
        self.node_mut(node_id)?.config = config;
        Ok(())
    }

    /// Replaces a node's retry and timeout policy.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] if the node does not exist.
    pub fn update_node_policy(
        &mut self,
        node_id: &NodeId,
        policy: NodePolicy,
    ) -> Result<(), GraphError> {
        self.node_mut(node_id)?.policy = policy;
        Ok(())
    }

    /// Returns a node by id.
    #[must_use]
    pub fn node(&self, node_id: &NodeId) -> Option<&WorkflowNode> {
        let index = self.node_index.get(node_id)?;
        self.graph.node_weight(*index)
    }

    /// Returns a connection by id.
    #[must_use]
    pub fn connection(&self, connection_id: &ConnectionId) -> Option<&WorkflowConnection> {
        let index = self.edge_index.get(connection_id)?;
        self.graph.edge_weight(*index)
    }

    /// Returns true if the node exists.
    #[must_use]
    pub fn contains_node(&self, node_id: &NodeId) -> bool {
        self.node_index.contains_key(node_id)
    }

    /// Returns the nodes in authoring order.
    pub fn nodes(&self) -> impl Iterator<Item = &WorkflowNode> {
        self.node_order.iter().filter_map(|id| self.node(id))
    }

    /// Returns the connections in authoring order.
    pub fn connections(&self) -> impl Iterator<Item = &WorkflowConnection> {
        self.connection_order
            .iter()
            .filter_map(|id| self.connection(id))
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns the connections leaving a node.
    #[must_use]
    pub fn outgoing(&self, node_id: &NodeId) -> Vec<&WorkflowConnection> {
        self.attached(node_id, Direction::Outgoing)
    }

    /// Returns the connections entering a node.
    #[must_use]
    pub fn incoming(&self, node_id: &NodeId) -> Vec<&WorkflowConnection> {
        self.attached(node_id, Direction::Incoming)
    }

    /// Returns the downstream neighbours of a node.
    #[must_use]
    pub fn successors(&self, node_id: &NodeId) -> Vec<&WorkflowNode> {
        self.outgoing(node_id)
            .into_iter()
            .filter_map(|conn| self.node(&conn.target))
            .collect()
    }

    /// Returns the upstream neighbours of a node.
    #[must_use]
    pub fn predecessors(&self, node_id: &NodeId) -> Vec<&WorkflowNode> {
        self.incoming(node_id)
            .into_iter()
            .filter_map(|conn| self.node(&conn.source))
            .collect()
    }

    /// Returns the trigger nodes in authoring order.
    pub fn triggers(&self) -> impl Iterator<Item = &WorkflowNode> {
        self.nodes().filter(|node| node.is_trigger())
    }

    /// Returns nodes that have no incoming connections.
    #[must_use]
    pub fn entry_nodes(&self) -> Vec<&WorkflowNode> {
        self.nodes()
            .filter(|node| self.incoming(&node.id).is_empty())
            .collect()
    }

    /// The underlying petgraph graph, for algorithms.
    pub(crate) fn petgraph(&self) -> &StableDiGraph<WorkflowNode, WorkflowConnection> {
        &self.graph
    }

    /// The petgraph index of a node.
    pub(crate) fn index_of(&self, node_id: &NodeId) -> Option<NodeIndex> {
        self.node_index.get(node_id).copied()
    }

    fn node_mut(&mut self, node_id: &NodeId) -> Result<&mut WorkflowNode, GraphError> {
        self.node_index
            .get(node_id)
            .and_then(|index| self.graph.node_weight_mut(*index))
            .ok_or_else(|| GraphError::UnknownNode {
                node_id: node_id.clone(),
                connection_id: None,
            })
    }

    fn endpoint(
        &self,
        node_id: &NodeId,
        connection_id: &ConnectionId,
    ) -> Result<NodeIndex, GraphError> {
        self.index_of(node_id).ok_or_else(|| GraphError::UnknownNode {
            node_id: node_id.clone(),
            connection_id: Some(connection_id.clone()),
        })
    }

    fn attached(&self, node_id: &NodeId, direction: Direction) -> Vec<&WorkflowConnection> {
        let Some(index) = self.index_of(node_id) else {
            return Vec::new();
        };
        let mut connections: Vec<&WorkflowConnection> = self
            .graph
            .edges_directed(index, direction)
            .map(|edge| edge.weight())
            .collect();
        connections.sort_by(|a, b| a.id.cmp(&b.id));
        connections
    }
}

impl Default for WorkflowGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for WorkflowGraph {
    fn eq(&self, other: &Self) -> bool {
        self.nodes().eq(other.nodes()) && self.connections().eq(other.connections())
    }
}

/// Flat serialized form of a graph.
#[derive(Serialize, Deserialize)]
struct GraphDocument {
    #[serde(default)]
    nodes: Vec<WorkflowNode>,
    #[serde(default)]
    connections: Vec<WorkflowConnection>,
}

impl TryFrom<GraphDocument> for WorkflowGraph {
    type Error = GraphError;

    fn try_from(document: GraphDocument) -> Result<Self, Self::Error> {
        Self::from_parts(document.nodes, document.connections)
    }
}

impl From<WorkflowGraph> for GraphDocument {
    fn from(graph: WorkflowGraph) -> Self {
        Self {
            nodes: graph.nodes().cloned().collect(),
            connections: graph.connections().cloned().collect(),
        }
    }
}
