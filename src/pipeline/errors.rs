//! Error types for pipeline domain

use thiserror::Error;

/// Errors that can occur while loading or preparing a pipeline
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Validation failed with specified reason
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Pipeline definition could not be parsed
    #[error("Invalid pipeline definition: {0}")]
    Definition(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_yaml::Error> for PipelineError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Definition(err.to_string())
    }
}

/// Validation errors for pipeline components
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Name cannot be empty
    #[error("Name cannot be empty")]
    EmptyName,

    /// Name too long
    #[error("Name too long: max {max} characters, got {len}")]
    NameTooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual length of the name.
        len: usize,
    },

    /// Pipeline must have at least one stage
    #[error("Pipeline must have at least one stage")]
    EmptyPipeline,

    /// Two stages share a name
    #[error("Duplicate stage name: '{name}'")]
    DuplicateStage {
        /// The repeated name.
        name: String,
    },

    /// Ordinals must strictly increase in declared order
    #[error("Stage '{stage}' has ordinal {ordinal}, which does not follow {previous}")]
    OrdinalOrder {
        /// Name of the out-of-order stage.
        stage: String,
        /// Its ordinal.
        ordinal: u32,
        /// Ordinal of the stage declared before it.
        previous: u32,
    },

    /// Command stage must have at least one command
    #[error("Stage '{stage}' must have at least one command")]
    EmptyStage {
        /// Name of the empty stage.
        stage: String,
    },

    /// Invalid timeout value
    #[error("Invalid timeout for stage '{stage}': must be positive")]
    InvalidTimeout {
        /// Name of the stage.
        stage: String,
    },

    /// Poll interval is zero or longer than the stage budget
    #[error("Invalid poll interval for stage '{stage}': {interval}s with a {timeout}s budget")]
    InvalidInterval {
        /// Name of the stage.
        stage: String,
        /// Declared interval in seconds.
        interval: u64,
        /// Stage timeout in seconds.
        timeout: u64,
    },

    /// A secret is declared twice in one stage
    #[error("Stage '{stage}' declares secret '{secret}' more than once")]
    DuplicateSecret {
        /// Name of the stage.
        stage: String,
        /// Name of the secret.
        secret: String,
    },

    /// A template references a secret the stage did not declare
    #[error("Stage '{stage}' references undeclared secret '{secret}'")]
    UndeclaredSecret {
        /// Name of the stage.
        stage: String,
        /// Name of the secret.
        secret: String,
    },

    /// A template cannot be split into arguments
    #[error("Stage '{stage}' has a malformed command template: {reason}")]
    MalformedTemplate {
        /// Name of the stage.
        stage: String,
        /// Why the template was rejected.
        reason: String,
    },

    /// A secret name that `${secret:...}` placeholders cannot address
    #[error("Invalid secret name: '{name}' (letters, digits, '_' and '-' only)")]
    InvalidSecretName {
        /// The invalid name.
        name: String,
    },

    /// Invalid characters in an environment binding name
    #[error("Invalid environment variable name: '{name}'")]
    InvalidEnvName {
        /// The invalid name.
        name: String,
    },
}
