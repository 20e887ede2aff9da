use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::control::RequestId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Suspension requested outside a driven computation")]
    OutsideDrivenContext,

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Response {got} does not match outstanding request {expected}")]
    MismatchedResponse { expected: RequestId, got: RequestId },

    #[error("Computation abandoned by its driver")]
    Abandoned,

    #[error("Computation already finished")]
    ComputationFinished,

    #[error("Model error: {0}")]
    Model(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Delegation depth {depth} exceeds maximum {max}")]
    DelegationDepthExceeded { depth: usize, max: usize },

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Stable classification of an error, used when a failure is turned into
/// data at an isolation boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Protocol,
    Model,
    Executor,
    Delegation,
    Timeout,
    Panic,
    Config,
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::Protocol => "protocol",
            FailureKind::Model => "model",
            FailureKind::Executor => "executor",
            FailureKind::Delegation => "delegation",
            FailureKind::Timeout => "timeout",
            FailureKind::Panic => "panic",
            FailureKind::Config => "config",
            FailureKind::Internal => "internal",
        };
        write!(f, "{}", name)
    }
}

impl Error {
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::OutsideDrivenContext
            | Error::ProtocolViolation(_)
            | Error::MismatchedResponse { .. }
            | Error::Abandoned
            | Error::ComputationFinished => FailureKind::Protocol,
            Error::Model(_) => FailureKind::Model,
            Error::Executor(_) => FailureKind::Executor,
            Error::DelegationDepthExceeded { .. } => FailureKind::Delegation,
            Error::Timeout(_) => FailureKind::Timeout,
            Error::TomlParse(_) | Error::TomlSerialize(_) | Error::NoHomeDir | Error::Validation(_) => {
                FailureKind::Config
            }
            Error::Io(_) | Error::Json(_) | Error::TaskJoin(_) => FailureKind::Internal,
        }
    }

    /// Protocol violations are never retried and never recorded as step errors.
    pub fn is_protocol_violation(&self) -> bool {
        self.kind() == FailureKind::Protocol
    }
}
