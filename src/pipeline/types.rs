//! Core types for pipeline domain
//!
//! This module contains the run status state machine and the validation
//! trait shared by all declarative pipeline types.

#![allow(clippy::must_use_candidate)]

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a pipeline run
///
/// `Pending -> Running -> {Succeeded, Failed, Aborted}`. The three last
/// states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Created, not started
    #[default]
    Pending,
    /// Stages are executing
    Running,
    /// Every stage resolved without an aborting failure
    Succeeded,
    /// The run could not be carried out (invalid definition, internal fault)
    Failed,
    /// A stage failure or an operator cancellation stopped the run
    Aborted,
}

impl RunStatus {
    /// Returns true if no further transition is allowed
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }

    /// Returns true if `next` is a legal successor of this status
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Succeeded | Self::Failed | Self::Aborted)
        )
    }

    /// Process exit code equivalent of a terminal status
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Succeeded => 0,
            Self::Failed | Self::Pending | Self::Running => 1,
            Self::Aborted => 2,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Trait for types that can be validated
#[allow(clippy::missing_errors_doc)]
pub trait Validate {
    /// Type of validation error
    type Error;

    /// Validates this type
    fn validate(&self) -> std::result::Result<(), Self::Error>;
}
