//! Workflow node types and configurations.
//!
//! A node pairs an identifier and display text with a configuration whose
//! variant determines the node type. Each variant carries its own typed
//! fields, so a trigger can never be asked for an endpoint and an action can
//! never lack one of its required settings. Retry and timeout settings are
//! shared by every type and live in [`NodePolicy`].

use crate::config::EngineConfig;
pub use crate::ids::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::time::Duration;

/// The type of a workflow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Entry point of a workflow.
    Trigger,
    /// Evaluates an expression and routes to the matching outputs.
    Condition,
    /// Invokes an external side effect.
    Action,
    /// Waits for a fixed duration.
    Delay,
    /// Fans out to every outgoing connection.
    Branch,
    /// Joins parallel paths back together.
    Merge,
}

impl NodeType {
    /// Returns true if running this node calls into the executor registry.
    ///
    /// Branch and merge nodes are structural and complete on their own.
    #[must_use]
    pub fn needs_executor(self) -> bool {
        !matches!(self, Self::Branch | Self::Merge)
    }

    /// Returns the lowercase name used in serialized definitions.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Condition => "condition",
            Self::Action => "action",
            Self::Delay => "delay",
            Self::Branch => "branch",
            Self::Merge => "merge",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for trigger nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trigger_type", rename_all = "snake_case")]
pub enum TriggerConfig {
    /// Started by a user.
    Manual,
    /// Cron-style scheduled trigger.
    Schedule {
        /// Cron expression (e.g., "0 7 * * *" for 7am daily).
        cron_expression: String,
        /// Timezone for the schedule.
        #[serde(default)]
        timezone: Option<String>,
    },
    /// HTTP webhook trigger.
    Webhook {
        /// The webhook path (e.g., "/hooks/new-task").
        path: String,
    },
    /// Application event trigger (e.g., "task.created").
    Event {
        /// The event type to listen for.
        event_type: String,
    },
}

/// Configuration for condition nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionConfig {
    /// Boolean expression evaluated against the run's variables,
    /// e.g. `input.priority == "high" && fetch.count > 0`.
    pub expression: String,
}

/// The kind of side effect an action node performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Outbound HTTP request.
    HttpRequest,
    /// Send an email.
    SendEmail,
    /// Write to a database table.
    DatabaseWrite,
    /// Post to a webhook.
    Webhook,
    /// In-app notification.
    Notification,
}

/// HTTP method for request-style actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

/// Configuration for action nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    /// What the action does.
    pub action_type: ActionType,
    /// Target URL, address or table, depending on the action type.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// HTTP method for request-style actions.
    #[serde(default)]
    pub method: Option<HttpMethod>,
    /// Action-specific payload handed to the executor untouched.
    #[serde(default)]
    pub payload: JsonValue,
}

impl ActionConfig {
    /// Creates an action config with no endpoint or payload.
    #[must_use]
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            endpoint: None,
            method: None,
            payload: JsonValue::Null,
        }
    }

    /// Sets the endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the HTTP method.
    #[must_use]
    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = Some(method);
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload = payload;
        self
    }
}

/// Configuration for delay nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayConfig {
    /// How long the node waits, in seconds.
    pub duration_secs: u64,
}

impl DelayConfig {
    /// Returns the configured delay.
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }
}

/// Configuration for a node, keyed by node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeConfig {
    /// Trigger node configuration.
    Trigger(TriggerConfig),
    /// Condition node configuration.
    Condition(ConditionConfig),
    /// Action node configuration.
    Action(ActionConfig),
    /// Delay node configuration.
    Delay(DelayConfig),
    /// Fan-out node.
    Branch,
    /// Fan-in node.
    Merge,
}

impl NodeConfig {
    /// Returns the node type this configuration belongs to.
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Trigger(_) => NodeType::Trigger,
            Self::Condition(_) => NodeType::Condition,
            Self::Action(_) => NodeType::Action,
            Self::Delay(_) => NodeType::Delay,
            Self::Branch => NodeType::Branch,
            Self::Merge => NodeType::Merge,
        }
    }
}

/// Retry, timeout and failure-handling settings shared by all node types.
///
/// `max_retries` and `timeout_secs` fall back to the engine defaults when
/// unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodePolicy {
    /// Retry failed or timed-out invocations.
    #[serde(default)]
    pub retry_on_error: bool,
    /// Number of retries after the first attempt.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Per-attempt timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Let the run proceed past a failure of this node.
    #[serde(default)]
    pub continue_on_error: bool,
}

impl NodePolicy {
    /// Enables retries, up to `max_retries` after the first attempt.
    #[must_use]
    pub fn retrying(mut self, max_retries: u32) -> Self {
        self.retry_on_error = true;
        self.max_retries = Some(max_retries);
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    /// Lets the run proceed past a failure of this node.
    #[must_use]
    pub fn continuing_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    /// Fills unset fields from the engine defaults.
    #[must_use]
    pub fn resolve(&self, defaults: &EngineConfig) -> ResolvedPolicy {
        let max_retries = self.max_retries.unwrap_or(defaults.default_max_retries);
        ResolvedPolicy {
            max_attempts: if self.retry_on_error {
                max_retries.saturating_add(1)
            } else {
                1
            },
            timeout: Duration::from_secs(
                self.timeout_secs.unwrap_or(defaults.default_timeout_secs),
            ),
            continue_on_error: self.continue_on_error,
        }
    }
}

/// A [`NodePolicy`] with engine defaults applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPolicy {
    /// Total invocations allowed, including the first.
    pub max_attempts: u32,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Let the run proceed past a failure of this node.
    pub continue_on_error: bool,
}

/// A workflow node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Unique identifier within the workflow.
    pub id: NodeId,
    /// Display title.
    pub title: String,
    /// Optional longer description.
    #[serde(default)]
    pub description: Option<String>,
    /// Type-specific configuration.
    pub config: NodeConfig,
    /// Retry, timeout and failure handling.
    #[serde(default)]
    pub policy: NodePolicy,
}

impl WorkflowNode {
    /// Creates a node with the default policy.
    #[must_use]
    pub fn new(id: impl Into<NodeId>, title: impl Into<String>, config: NodeConfig) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            config,
            policy: NodePolicy::default(),
        }
    }

    /// Creates a manually started trigger node.
    #[must_use]
    pub fn manual_trigger(id: impl Into<NodeId>, title: impl Into<String>) -> Self {
        Self::new(id, title, NodeConfig::Trigger(TriggerConfig::Manual))
    }

    /// Creates an action node.
    #[must_use]
    pub fn action(id: impl Into<NodeId>, title: impl Into<String>, config: ActionConfig) -> Self {
        Self::new(id, title, NodeConfig::Action(config))
    }

    /// Creates a condition node.
    #[must_use]
    pub fn condition(
        id: impl Into<NodeId>,
        title: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        Self::new(
            id,
            title,
            NodeConfig::Condition(ConditionConfig {
                expression: expression.into(),
            }),
        )
    }

    /// Creates a delay node.
    #[must_use]
    pub fn delay(id: impl Into<NodeId>, title: impl Into<String>, duration_secs: u64) -> Self {
        Self::new(id, title, NodeConfig::Delay(DelayConfig { duration_secs }))
    }

    /// Creates a branch node.
    #[must_use]
    pub fn branch(id: impl Into<NodeId>, title: impl Into<String>) -> Self {
        Self::new(id, title, NodeConfig::Branch)
    }

    /// Creates a merge node.
    #[must_use]
    pub fn merge(id: impl Into<NodeId>, title: impl Into<String>) -> Self {
        Self::new(id, title, NodeConfig::Merge)
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Replaces the policy.
    #[must_use]
    pub fn with_policy(mut self, policy: NodePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the node type.
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        self.config.node_type()
    }

    /// Returns true for trigger nodes.
    #[must_use]
    pub fn is_trigger(&self) -> bool {
        self.node_type() == NodeType::Trigger
    }
}
