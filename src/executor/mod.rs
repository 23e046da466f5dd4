//! Pipeline execution layer
//!
//! This module contains the execution seams ([`CommandRunner`],
//! [`SecretResolver`], [`Notifier`]), the process runner, per-stage secret
//! scoping and the engine that drives a run.

mod cancel;
mod engine;
mod secrets;
mod shell;
mod stage;
mod temp_files;
mod traits;
mod wait;

#[cfg(test)]
pub(crate) mod testing;

pub use cancel::CancellationToken;
pub use engine::{DEFAULT_NOTIFY_TIMEOUT, PipelineEngine, PlannedStage, RunContext};
pub use secrets::SecretScope;
pub use shell::{ProcessRunner, RunnerConfig, run_variables};
pub use stage::StageExecutor;
pub use temp_files::TempFileManager;
pub use traits::{
    CommandRunner, Invocation, Notifier, NotifyError, ResolvedSecret, RunOutput, RunnerFault,
    SecretError, SecretResolver,
};
pub use wait::{Budget, Poller, Verdict};
