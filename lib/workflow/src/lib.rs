//! Workflow automation engine for taskflow.
//!
//! This crate provides everything needed to define and run workflows:
//!
//! - **Graph Model**: nodes and connections in a petgraph-backed DAG, edited
//!   through [`Workflow`] or [`WorkflowGraph`]
//! - **Validation**: [`build_plan`] checks a graph and groups its reachable
//!   nodes into dependency levels
//! - **Executors**: the [`NodeExecutor`] seam and the [`ExecutorRegistry`]
//! - **Runs**: [`Engine`] starts runs, [`RunHandle`] observes and cancels
//!   them, and every decision lands in the run's [`ExecutionLog`]
//! - **Persistence**: the [`WorkflowStore`] trait with in-memory and
//!   file-backed implementations

pub mod config;
pub mod connection;
pub mod context;
pub mod definition;
pub mod engine;
pub mod error;
pub mod execution;
pub mod executor;
pub mod expression;
pub mod graph;
mod ids;
pub mod log;
pub mod node;
pub mod plan;
pub mod run_state;
mod scheduler;
pub mod store;
pub mod validator;

pub use config::EngineConfig;
pub use connection::{ConnectionId, WorkflowConnection};
pub use context::VariableContext;
pub use definition::{Workflow, WorkflowSummary};
pub use engine::{Engine, RunHandle};
pub use error::{EngineError, GraphError, ValidationError};
pub use execution::{NodeStatus, RunStatus, TerminalReason};
pub use executor::{ExecutionRequest, ExecutorError, ExecutorRegistry, NodeExecutor};
pub use expression::Expression;
pub use graph::WorkflowGraph;
pub use log::{ExecutionLog, LogEntry, LogEvent, Severity};
pub use node::{NodeConfig, NodeId, NodePolicy, NodeType, WorkflowNode};
pub use plan::{ExecutionPlan, PlanWarning};
pub use store::{FileWorkflowStore, InMemoryWorkflowStore, StoreError, WorkflowStore};
pub use validator::build_plan;
