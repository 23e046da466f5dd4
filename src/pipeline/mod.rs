//! Pipeline domain types and logic

// Make submodules public
pub mod errors;
pub mod notification;
pub mod pipeline_def;
pub mod run;
pub mod secrets;
pub mod stage;
pub mod template;
pub mod types;


// Add serde use for derive macros in this module
pub use serde::{Deserialize, Serialize};

// Re-export public types from submodules
pub use errors::{PipelineError, ValidationError};
pub use notification::{NotificationPayload, NotifyResult, RunReport, StageSummary, StatusColor};
pub use pipeline_def::{NotificationSettings, PipelineBuilder, PipelineSpec};
pub use run::{CommandRecord, PipelineRun, StageFailure, StageResult};
pub use secrets::{SecretRef, SecretShape};
pub use stage::{
    DEFAULT_STAGE_TIMEOUT_SECS, GatePolicy, QualityGate, RolloutCheck, StageBuilder, StageKind,
    StageSpec,
};
pub use template::{CommandTemplate, RenderError, SecretPlaceholder, expand_variables};
pub use types::{RunStatus, Validate};

/// Defines environment variables that can be used in stage commands.
///
/// Values are exposed to every stage's processes and expand `${VAR}`
/// placeholders in command templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Environment {
    /// Environment variables as key-value pairs.
    #[serde(flatten)]
    pub vars: std::collections::HashMap<String, String>,
}

impl Environment {
    /// Creates a new empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an environment variable.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Gets an environment variable by name.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&String> {
        self.vars.get(key)
    }
}
