//! Prelude module for common imports

// Re-export pipeline types
pub use crate::pipeline::errors::{PipelineError, ValidationError};
pub use crate::pipeline::pipeline_def::{NotificationSettings, PipelineBuilder, PipelineSpec};
pub use crate::pipeline::run::{PipelineRun, StageFailure, StageResult};
pub use crate::pipeline::secrets::{SecretRef, SecretShape};
pub use crate::pipeline::stage::{GatePolicy, StageBuilder, StageKind, StageSpec};
pub use crate::pipeline::types::{RunStatus, Validate};
pub use crate::pipeline::{Environment, NotificationPayload, NotifyResult, RunReport};

// Re-export executor types
pub use crate::executor::{
    CancellationToken, CommandRunner, Notifier, PipelineEngine, ProcessRunner, RunContext,
    SecretResolver, TempFileManager,
};

// Re-export infrastructure types
pub use crate::infrastructure::{Config, LogNotifier, SecretStore, WebhookNotifier};
