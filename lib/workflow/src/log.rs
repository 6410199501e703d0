//! The execution log.
//!
//! An append-only, ordered record of what the scheduler decided during one
//! run. Sequence numbers are assigned by the log itself while the run state
//! lock is held, so concurrent node tasks can never duplicate or reorder
//! them. Observers read the log from a status snapshot or follow it live
//! through [`ExecutionLog::subscribe`].
//!
//! Every entry is mirrored to `tracing` at the matching level.

use crate::execution::TerminalReason;
use crate::node::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use taskflow_core::WorkflowRunId;
use tokio::sync::broadcast;

/// How serious a log entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

/// The decision an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEvent {
    NodeStarted,
    NodeSucceeded,
    /// An attempt failed and another will follow.
    NodeRetrying { attempt: u32, max_attempts: u32 },
    NodeFailed,
    NodeSkipped,
    NodeWaiting,
    /// The node was running when the run was cancelled.
    NodeCancelled,
    RunCancelled,
    RunFinished { reason: TerminalReason },
}

impl LogEvent {
    /// Returns the severity entries of this kind are recorded at.
    #[must_use]
    pub fn severity(self) -> Severity {
        match self {
            Self::NodeFailed
            | Self::RunFinished {
                reason: TerminalReason::HaltedOnError,
            } => Severity::Error,
            Self::NodeRetrying { .. }
            | Self::NodeCancelled
            | Self::RunCancelled
            | Self::RunFinished {
                reason: TerminalReason::Cancelled,
            } => Severity::Warning,
            Self::NodeStarted
            | Self::NodeSucceeded
            | Self::NodeSkipped
            | Self::NodeWaiting
            | Self::RunFinished {
                reason: TerminalReason::Completed,
            } => Severity::Info,
        }
    }
}

/// One entry of the execution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position in the log, starting at 1.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    /// `None` for run-level entries.
    pub node_id: Option<NodeId>,
    pub severity: Severity,
    pub message: String,
    pub event: LogEvent,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} [{}]",
            self.seq,
            self.timestamp.format("%H:%M:%S%.3f"),
            self.severity
        )?;
        if let Some(node_id) = &self.node_id {
            write!(f, " {node_id}:")?;
        }
        write!(f, " {}", self.message)
    }
}

/// Append-only log of one run.
#[derive(Debug)]
pub struct ExecutionLog {
    run_id: WorkflowRunId,
    entries: Vec<LogEntry>,
    next_seq: u64,
    live: broadcast::Sender<LogEntry>,
}

impl ExecutionLog {
    /// Creates an empty log whose live subscribers buffer up to `capacity`
    /// entries.
    #[must_use]
    pub fn new(run_id: WorkflowRunId, capacity: usize) -> Self {
        let (live, _) = broadcast::channel(capacity.max(1));
        Self {
            run_id,
            entries: Vec::new(),
            next_seq: 1,
            live,
        }
    }

    /// Appends an entry and returns it.
    pub fn append(
        &mut self,
        node_id: Option<&NodeId>,
        event: LogEvent,
        message: impl Into<String>,
    ) -> &LogEntry {
        let entry = LogEntry {
            seq: self.next_seq,
            timestamp: Utc::now(),
            node_id: node_id.cloned(),
            severity: event.severity(),
            message: message.into(),
            event,
        };
        self.next_seq += 1;
        self.mirror(&entry);

        // No subscribers is fine.
        let _ = self.live.send(entry.clone());

        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    /// Returns every entry in order.
    #[must_use]
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Follows entries appended from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.live.subscribe()
    }

    fn mirror(&self, entry: &LogEntry) {
        let node_id = entry.node_id.as_ref().map(NodeId::as_str).unwrap_or("-");
        match entry.severity {
            Severity::Info => {
                tracing::info!(run_id = %self.run_id, node_id, seq = entry.seq, "{}", entry.message);
            }
            Severity::Warning => {
                tracing::warn!(run_id = %self.run_id, node_id, seq = entry.seq, "{}", entry.message);
            }
            Severity::Error => {
                tracing::error!(run_id = %self.run_id, node_id, seq = entry.seq, "{}", entry.message);
            }
        }
    }
}
