//! CLI error type.

use std::fmt;
use std::path::PathBuf;

/// Errors surfaced by `taskflow` subcommands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliError {
    /// Configuration could not be loaded.
    Config { reason: String },
    /// A workflow file could not be read or written.
    File { path: PathBuf, reason: String },
    /// A workflow file did not contain a valid definition.
    Parse { path: PathBuf, reason: String },
    /// An `--input` argument was malformed.
    Input { argument: String, reason: String },
    /// The workflow failed validation.
    Invalid,
    /// The run could not be started.
    Run,
    /// The workflow store failed.
    Store,
    /// A workflow id argument could not be parsed.
    WorkflowId { value: String },
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { reason } => write!(f, "failed to load configuration: {reason}"),
            Self::File { path, reason } => write!(f, "{}: {reason}", path.display()),
            Self::Parse { path, reason } => {
                write!(f, "{} is not a valid workflow: {reason}", path.display())
            }
            Self::Input { argument, reason } => write!(f, "bad --input {argument:?}: {reason}"),
            Self::Invalid => write!(f, "workflow is invalid"),
            Self::Run => write!(f, "failed to start run"),
            Self::Store => write!(f, "workflow store error"),
            Self::WorkflowId { value } => write!(f, "not a workflow id: {value}"),
        }
    }
}

impl std::error::Error for CliError {}
