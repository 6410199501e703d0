//! Action executor that records instead of acting.

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use std::sync::{Mutex, PoisonError};
use taskflow_workflow::node::ActionConfig;
use taskflow_workflow::{ExecutionRequest, ExecutorError, NodeConfig, NodeExecutor, NodeId};
use tracing::info;

/// An action the dry run would have performed.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedAction {
    pub node_id: NodeId,
    pub attempt: u32,
    pub action: ActionConfig,
}

/// Succeeds every action and remembers what it was asked to do.
#[derive(Debug, Default)]
pub struct DryRunExecutor {
    recorded: Mutex<Vec<RecordedAction>>,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the actions recorded so far, in call order.
    pub fn recorded(&self) -> Vec<RecordedAction> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl NodeExecutor for DryRunExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<JsonValue, ExecutorError> {
        let NodeConfig::Action(action) = &request.config else {
            return Err(ExecutorError::Unsupported {
                node_type: request.node_type,
            });
        };
        info!(
            node_id = %request.node_id,
            action_type = ?action.action_type,
            endpoint = action.endpoint.as_deref().unwrap_or("-"),
            "dry run: skipping side effect"
        );
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedAction {
                node_id: request.node_id.clone(),
                attempt: request.attempt,
                action: action.clone(),
            });
        Ok(json!({
            "dry_run": true,
            "action_type": action.action_type,
            "endpoint": action.endpoint,
        }))
    }
}
