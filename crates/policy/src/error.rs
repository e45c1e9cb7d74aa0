//! Policy errors

use thiserror::Error;
use uuid::Uuid;

/// Policy engine errors
///
/// Compile errors only ever belong to the activation attempt that raised
/// them; the previously active policy keeps serving.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("bad policy module")]
    BadPolicyModule,

    #[error("rule engine error: {0}")]
    RuleEngine(String),

    #[error("invalid policy document: {0}")]
    InvalidDocument(String),

    #[error("invalid compiled policy")]
    InvalidCompiledPolicy,

    #[error("Unknown policy engine: {0}")]
    UnknownEngine(String),

    #[error("Policy not found: {0}")]
    PolicyNotFound(Uuid),

    #[error("Policy {policy_id} has no version {version}")]
    VersionNotFound { policy_id: Uuid, version: u32 },

    #[error("Policy {0} has no active version")]
    NoActiveVersion(Uuid),

    #[error("Policy version {version} refused by simulation: {reason}")]
    SimulationDenied { version: u32, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PolicyError {
    /// Create an invalid document error
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidDocument(msg.into())
    }

    /// Whether the error came from compiling a document
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            Self::BadPolicyModule | Self::RuleEngine(_) | Self::InvalidDocument(_)
        )
    }
}

/// Result type for policy operations
pub type PolicyResult<T> = Result<T, PolicyError>;
