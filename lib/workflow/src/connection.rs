//! Connections between workflow nodes.
//!
//! A connection links a source node's output to a target node's input.
//! Handles name the port on either end; they matter for nodes with several
//! outputs, such as the `"true"`/`"false"` outputs of a condition.

pub use crate::ids::ConnectionId;
use crate::node::NodeId;
use serde::{Deserialize, Serialize};

/// Output handle a condition activates when its expression holds.
pub const HANDLE_TRUE: &str = "true";

/// Output handle a condition activates when its expression does not hold.
pub const HANDLE_FALSE: &str = "false";

/// A directed connection between two nodes of the same workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConnection {
    /// Unique identifier within the workflow.
    pub id: ConnectionId,
    /// The upstream node.
    pub source: NodeId,
    /// The downstream node.
    pub target: NodeId,
    /// Named output port on the source node.
    #[serde(default)]
    pub source_handle: Option<String>,
    /// Named input port on the target node.
    #[serde(default)]
    pub target_handle: Option<String>,
    /// Display label.
    #[serde(default)]
    pub label: Option<String>,
}

impl WorkflowConnection {
    /// Creates a connection using the default ports.
    #[must_use]
    pub fn new(
        id: impl Into<ConnectionId>,
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
            label: None,
        }
    }

    /// Creates a connection with an id derived from its endpoints
    /// (`"source->target"`).
    #[must_use]
    pub fn between(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        let source = source.into();
        let target = target.into();
        let id = ConnectionId::from(format!("{source}->{target}"));
        Self::new(id, source, target)
    }

    /// Sets the source handle.
    #[must_use]
    pub fn from_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = Some(handle.into());
        self
    }

    /// Sets the target handle.
    #[must_use]
    pub fn to_handle(mut self, handle: impl Into<String>) -> Self {
        self.target_handle = Some(handle.into());
        self
    }

    /// Sets the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Returns true if this connection leaves a condition on the branch
    /// selected by `outcome`.
    ///
    /// A connection without a source handle follows the `true` branch.
    #[must_use]
    pub fn follows_outcome(&self, outcome: bool) -> bool {
        match self.source_handle.as_deref() {
            Some(HANDLE_FALSE) => !outcome,
            Some(HANDLE_TRUE) | None => outcome,
            Some(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn between_derives_id_from_endpoints() {
        let conn = WorkflowConnection::between("a", "b");
        assert_eq!(conn.id.as_str(), "a->b");
        assert_eq!(conn.source.as_str(), "a");
        assert_eq!(conn.target.as_str(), "b");
        assert!(conn.source_handle.is_none());
    }

    #[test]
    fn condition_outcome_selects_handles() {
        let yes = WorkflowConnection::between("c", "x").from_handle(HANDLE_TRUE);
        let no = WorkflowConnection::between("c", "y").from_handle(HANDLE_FALSE);
        let plain = WorkflowConnection::between("c", "z");
        let other = WorkflowConnection::between("c", "w").from_handle("maybe");

        assert!(yes.follows_outcome(true));
        assert!(!yes.follows_outcome(false));
        assert!(no.follows_outcome(false));
        assert!(!no.follows_outcome(true));
        assert!(plain.follows_outcome(true));
        assert!(!plain.follows_outcome(false));
        assert!(!other.follows_outcome(true));
        assert!(!other.follows_outcome(false));
    }

    #[test]
    fn optional_fields_default_when_absent() {
        let conn: WorkflowConnection = serde_json::from_str(
            r#"{"id":"e1","source":"a","target":"b"}"#,
        )
        .expect("deserialize");
        assert_eq!(conn, WorkflowConnection::new("e1", "a", "b"));
    }
}
