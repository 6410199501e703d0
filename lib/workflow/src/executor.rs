//! Node executors.
//!
//! The engine never performs side effects itself. Each executable node type
//! maps to a [`NodeExecutor`] in an [`ExecutorRegistry`] supplied by the host;
//! the engine hands it an [`ExecutionRequest`] and records what comes back.
//!
//! Built-in executors cover trigger, condition and delay nodes. Actions are
//! always host-provided.

use crate::context::VariableContext;
use crate::expression::Expression;
use crate::node::{NodeConfig, NodeId, NodeType};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use taskflow_core::WorkflowRunId;
use tokio_util::sync::CancellationToken;

/// Everything an executor needs to run one attempt of one node.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub run_id: WorkflowRunId,
    pub node_id: NodeId,
    pub node_type: NodeType,
    pub config: NodeConfig,
    /// Expression compiled when the plan was built, for condition nodes.
    pub condition: Option<Arc<Expression>>,
    /// Time the engine allows this attempt.
    pub timeout: Duration,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Snapshot of the run variables taken when the node started.
    pub variables: Arc<VariableContext>,
    /// Cancelled when the run is cancelled. Long-running executors should
    /// watch it and return [`ExecutorError::Cancelled`].
    pub cancel: CancellationToken,
}

/// Errors from node execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// The side effect failed.
    Failed { message: String },
    /// The attempt exceeded its timeout.
    Timeout { after: Duration },
    /// The executor does not handle this node type.
    Unsupported { node_type: NodeType },
    /// The executor produced output the engine cannot use.
    InvalidOutput { message: String },
    /// The attempt stopped because the run was cancelled.
    Cancelled,
}

impl ExecutorError {
    /// Creates a [`ExecutorError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Returns true if another attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Timeout { .. })
    }
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { message } => write!(f, "execution failed: {message}"),
            Self::Timeout { after } => write!(f, "timed out after {after:?}"),
            Self::Unsupported { node_type } => {
                write!(f, "executor does not support {node_type} nodes")
            }
            Self::InvalidOutput { message } => write!(f, "invalid output: {message}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for ExecutorError {}

/// Runs nodes of one type.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Executes one attempt and returns the node's output.
    async fn execute(&self, request: &ExecutionRequest) -> Result<JsonValue, ExecutorError>;
}

/// Lookup from node type to executor.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<NodeType, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the trigger, condition and delay executors.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(NodeType::Trigger, TriggerExecutor);
        registry.register(NodeType::Condition, ConditionExecutor);
        registry.register(NodeType::Delay, DelayExecutor);
        registry
    }

    /// Registers an executor, replacing any previous one for the type.
    pub fn register(&mut self, node_type: NodeType, executor: impl NodeExecutor + 'static) {
        self.executors.insert(node_type, Arc::new(executor));
    }

    /// Registers a shared executor.
    pub fn register_shared(&mut self, node_type: NodeType, executor: Arc<dyn NodeExecutor>) {
        self.executors.insert(node_type, executor);
    }

    /// Returns the executor for a node type.
    #[must_use]
    pub fn get(&self, node_type: NodeType) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(&node_type).cloned()
    }

    /// Returns true if the node type can be run.
    #[must_use]
    pub fn supports(&self, node_type: NodeType) -> bool {
        !node_type.needs_executor() || self.executors.contains_key(&node_type)
    }
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.executors.keys().collect();
        types.sort();
        f.debug_struct("ExecutorRegistry")
            .field("node_types", &types)
            .finish()
    }
}

/// Passes the run input through as the trigger's output.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerExecutor;

#[async_trait]
impl NodeExecutor for TriggerExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<JsonValue, ExecutorError> {
        match request.config {
            NodeConfig::Trigger(_) => Ok(request.variables.input().clone()),
            _ => Err(ExecutorError::Unsupported {
                node_type: request.node_type,
            }),
        }
    }
}

/// Evaluates a condition expression against the run variables.
///
/// Uses the request's compiled expression, parsing the configured source
/// only when none was supplied.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionExecutor;

#[async_trait]
impl NodeExecutor for ConditionExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<JsonValue, ExecutorError> {
        let NodeConfig::Condition(config) = &request.config else {
            return Err(ExecutorError::Unsupported {
                node_type: request.node_type,
            });
        };
        let outcome = match &request.condition {
            Some(expression) => expression.evaluate(&request.variables),
            None => Expression::parse(&config.expression)
                .map_err(|e| ExecutorError::failed(format!("bad expression: {e}")))?
                .evaluate(&request.variables),
        };
        Ok(JsonValue::Bool(outcome))
    }
}

/// Sleeps for the configured duration, stopping early on cancellation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelayExecutor;

#[async_trait]
impl NodeExecutor for DelayExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<JsonValue, ExecutorError> {
        let NodeConfig::Delay(config) = &request.config else {
            return Err(ExecutorError::Unsupported {
                node_type: request.node_type,
            });
        };
        tokio::select! {
            () = tokio::time::sleep(config.duration()) => {
                Ok(serde_json::json!({ "waited_secs": config.duration_secs }))
            }
            () = request.cancel.cancelled() => Err(ExecutorError::Cancelled),
        }
    }
}
