//! Error taxonomy shared by every collector component
//!
//! Errors are grouped by how the process reacts to them: `MissingInput`
//! and `InvalidEnv` map onto dedicated exit codes, everything else is
//! either transient (reported on the poll result) or fatal at construction.

use std::fmt;
use thiserror::Error;

/// Errors produced by the collection library
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Flag or configuration problem detected before any work starts
    #[error("{0}")]
    MissingInput(String),

    /// The environment was measured and does not meet requirements
    #[error("{0}")]
    InvalidEnv(String),

    /// A collector cannot run in this environment and should be skipped
    #[error("{0}")]
    RequirementsNotMet(String),

    /// No pod in the namespace matched the prefix
    #[error("no pod with prefix {prefix} found in namespace {namespace}")]
    NoSuchPod { namespace: String, prefix: String },

    /// More than one pod matched the prefix
    #[error("too many pods with prefix {prefix} found in namespace {namespace}: {candidates:?}")]
    AmbiguousPod {
        namespace: String,
        prefix: String,
        candidates: Vec<String>,
    },

    /// The API server reported that the targeted pod no longer exists
    #[error("pod {pod} not found in namespace {namespace}")]
    PodNotFound { namespace: String, pod: String },

    /// Transport or remote execution failure
    #[error("remote command failed: {0}")]
    Remote(String),

    /// A tagged command's output was missing from the captured stdout
    #[error("failed to find result for key: {0}")]
    KeyNotFound(String),

    /// A per-command output processor rejected the captured value
    #[error("failed to cleanup value {value:?} of key {key}: {reason}")]
    OutputProcessor {
        key: String,
        value: String,
        reason: String,
    },

    /// A fetched value did not have the type the target record expects
    #[error("incoming value {value} for key {key} with type {got} not of expected type {expected}")]
    TypeMismatch {
        key: String,
        value: String,
        got: &'static str,
        expected: &'static str,
    },

    /// Output could not be parsed
    #[error("{0}")]
    Parse(String),

    /// A wait on a cluster resource exceeded its deadline
    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CollectorError {
    /// Build a parse error from anything displayable
    pub fn parse(message: impl fmt::Display) -> Self {
        CollectorError::Parse(message.to_string())
    }

    /// Wrap a list of errors into one composite `InvalidEnv`
    pub fn composite_invalid_env<E: fmt::Display>(errors: &[E]) -> Self {
        CollectorError::InvalidEnv(composite_message("The following issues where found", errors))
    }

    pub fn is_invalid_env(&self) -> bool {
        matches!(self, CollectorError::InvalidEnv(_))
    }

    pub fn is_requirements_not_met(&self) -> bool {
        matches!(self, CollectorError::RequirementsNotMet(_))
    }
}

/// Render a list of errors under a prefix, one tab-indented line per error
pub fn composite_message<E: fmt::Display>(prefix: &str, errors: &[E]) -> String {
    let mut message = format!("{}:\n", prefix);
    for err in errors {
        message.push('\t');
        message.push_str(&err.to_string());
        message.push('\n');
    }
    message
}

/// Process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Failure = 1,
    InvalidEnv = 2,
    MissingInput = 3,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Map an error chain onto the exit code the process should use
pub fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    for cause in err.chain() {
        if let Some(collector_err) = cause.downcast_ref::<CollectorError>() {
            match collector_err {
                CollectorError::InvalidEnv(_) => return ExitCode::InvalidEnv,
                CollectorError::MissingInput(_) => return ExitCode::MissingInput,
                _ => {}
            }
        }
    }
    ExitCode::Failure
}

pub type Result<T, E = CollectorError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_composite_message_format() {
        let message = composite_message("prefix", &["first", "second"]);
        assert_eq!(message, "prefix:\n\tfirst\n\tsecond\n");
    }

    #[test]
    fn test_exit_code_walks_context_chain() {
        let err: anyhow::Error = Err::<(), _>(CollectorError::InvalidEnv("bad nic".into()))
            .context("verification failed")
            .unwrap_err();
        assert_eq!(exit_code_for(&err), ExitCode::InvalidEnv);

        let err = anyhow::Error::new(CollectorError::MissingInput("no kubeconfig".into()));
        assert_eq!(exit_code_for(&err), ExitCode::MissingInput);
        assert_eq!(exit_code_for(&err).code(), 3);
    }

    #[test]
    fn test_unhandled_errors_map_to_failure() {
        let err = anyhow::anyhow!("something unexpected");
        assert_eq!(exit_code_for(&err), ExitCode::Failure);

        let err = anyhow::Error::new(CollectorError::Remote("stream closed".into()));
        assert_eq!(exit_code_for(&err), ExitCode::Failure);
    }

    #[test]
    fn test_composite_invalid_env() {
        let err = CollectorError::composite_invalid_env(&["NIC device is not based on E810"]);
        assert!(err.is_invalid_env());
        assert!(err.to_string().contains("\tNIC device is not based on E810\n"));
    }
}
