//! Workflow definition types.
//!
//! A workflow is a named automation that consists of:
//! - Identity and display metadata (name, description, timestamps)
//! - An `is_active` switch the run API honours
//! - A directed graph of nodes and connections
//!
//! Definitions are durable. Run state (node statuses, the execution log)
//! never lives here; see [`crate::run_state`].

use crate::connection::{ConnectionId, WorkflowConnection};
use crate::error::GraphError;
use crate::graph::WorkflowGraph;
use crate::node::{NodeConfig, NodeId, NodePolicy, WorkflowNode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskflow_core::WorkflowId;

/// A complete workflow definition.
///
/// Every edit made through this type bumps `updated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WorkflowDocument", into = "WorkflowDocument")]
pub struct Workflow {
    /// Unique identifier for this workflow.
    pub id: WorkflowId,
    name: String,
    description: Option<String>,
    graph: WorkflowGraph,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Creates a new, active, empty workflow.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_graph(name, WorkflowGraph::new())
    }

    /// Creates a new workflow around an existing graph.
    #[must_use]
    pub fn from_graph(name: impl Into<String>, graph: WorkflowGraph) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::new(),
            name: name.into(),
            description: None,
            graph,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Returns the workflow name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the graph.
    #[must_use]
    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    /// Returns whether runs may be started.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// When this workflow was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When this workflow was last edited.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Renames the workflow.
    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.touch();
    }

    /// Switches the workflow on or off.
    pub fn set_active(&mut self, is_active: bool) {
        self.is_active = is_active;
        self.touch();
    }

    /// Adds a node.
    ///
    /// # Errors
    ///
    /// See [`WorkflowGraph::add_node`].
    pub fn add_node(&mut self, node: WorkflowNode) -> Result<(), GraphError> {
        self.graph.add_node(node)?;
        self.touch();
        Ok(())
    }

    /// Removes a node and its connections.
    ///
    /// # Errors
    ///
    /// See [`WorkflowGraph::remove_node`].
    pub fn remove_node(&mut self, node_id: &NodeId) -> Result<WorkflowNode, GraphError> {
        let node = self.graph.remove_node(node_id)?;
        self.touch();
        Ok(node)
    }

    /// Adds a connection.
    ///
    /// # Errors
    ///
    /// See [`WorkflowGraph::add_connection`].
    pub fn add_connection(&mut self, connection: WorkflowConnection) -> Result<(), GraphError> {
        self.graph.add_connection(connection)?;
        self.touch();
        Ok(())
    }

    /// Removes a connection.
    ///
    /// # Errors
    ///
    /// See [`WorkflowGraph::remove_connection`].
    pub fn remove_connection(
        &mut self,
        connection_id: &ConnectionId,
    ) -> Result<WorkflowConnection, GraphError> {
        let connection = self.graph.remove_connection(connection_id)?;
        self.touch();
        Ok(connection)
    }

    /// Replaces a node's configuration.
    ///
    /// # Errors
    ///
    /// See [`WorkflowGraph::update_node_config`].
    pub fn update_node_config(
        &mut self,
        node_id: &NodeId,
        config: NodeConfig,
    ) -> Result<(), GraphError> {
        self.graph.update_node_config(node_id, config)?;
        self.touch();
        Ok(())
    }

    /// Replaces a node's policy.
    ///
    /// # Errors
    ///
    /// See [`WorkflowGraph::update_node_policy`].
    pub fn update_node_policy(
        &mut self,
        node_id: &NodeId,
        policy: NodePolicy,
    ) -> Result<(), GraphError> {
        self.graph.update_node_policy(node_id, policy)?;
        self.touch();
        Ok(())
    }

    /// Marks the workflow as modified now.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Returns a listing entry for this workflow.
    #[must_use]
    pub fn summary(&self) -> WorkflowSummary {
        WorkflowSummary {
            id: self.id,
            name: self.name.clone(),
            is_active: self.is_active,
            node_count: self.graph.node_count(),
            updated_at: self.updated_at,
        }
    }

    /// Serializes the definition to pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if a node payload cannot be serialized.
    pub fn export_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parses a definition produced by [`Self::export_json`].
    ///
    /// Structural invariants are re-checked, so a file with duplicate ids or
    /// dangling connections is rejected.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed JSON or a structurally invalid graph.
    pub fn import_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Listing entry returned by stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub id: WorkflowId,
    pub name: String,
    pub is_active: bool,
    pub node_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// Flat serialized form of a workflow.
#[derive(Serialize, Deserialize)]
struct WorkflowDocument {
    id: WorkflowId,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    nodes: Vec<WorkflowNode>,
    #[serde(default)]
    connections: Vec<WorkflowConnection>,
    #[serde(default = "default_is_active")]
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn default_is_active() -> bool {
    true
}

impl TryFrom<WorkflowDocument> for Workflow {
    type Error = GraphError;

    fn try_from(document: WorkflowDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            id: document.id,
            name: document.name,
            description: document.description,
            graph: WorkflowGraph::from_parts(document.nodes, document.connections)?,
            is_active: document.is_active,
            created_at: document.created_at,
            updated_at: document.updated_at,
        })
    }
}

impl From<Workflow> for WorkflowDocument {
    fn from(workflow: Workflow) -> Self {
        Self {
            id: workflow.id,
            name: workflow.name,
            description: workflow.description,
            nodes: workflow.graph.nodes().cloned().collect(),
            connections: workflow.graph.connections().cloned().collect(),
            is_active: workflow.is_active,
            created_at: workflow.created_at,
            updated_at: workflow.updated_at,
        }
    }
}
