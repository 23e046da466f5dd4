//! Pipeline engine
//!
//! The engine drives the stages of a [`PipelineSpec`] strictly in declared
//! order, owns the [`PipelineRun`] state machine and notifies exactly once
//! per run, whatever the terminal status.
//!
//! ## Terminal status
//!
//! | Status | Cause |
//! |--------|-------|
//! | `Succeeded` | every stage resolved, possibly with tolerated failures |
//! | `Aborted` | a non-tolerated stage failure, or cancellation |
//! | `Failed` | the definition is invalid, or stage execution panicked |

use super::cancel::CancellationToken;
use super::shell::run_variables;
use super::stage::StageExecutor;
use super::traits::{CommandRunner, Notifier, NotifyError, SecretResolver};
use crate::pipeline::{
    GatePolicy, NotificationPayload, NotifyResult, PipelineRun, PipelineSpec, RunReport,
    RunStatus, StageKind, StageSpec, Validate, ValidationError, expand_variables,
};
use futures::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Default bound on one notification attempt
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Identity and location of one run
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Job name; defaults to the pipeline name
    pub job_name: Option<String>,

    /// Build number
    pub build_number: u64,

    /// Directory commands run in
    pub workspace: PathBuf,
}

impl RunContext {
    /// Build number 1 of the pipeline's own job in `workspace`
    #[must_use]
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            job_name: None,
            build_number: 1,
            workspace: workspace.into(),
        }
    }

    /// Sets the job name
    #[must_use]
    pub fn with_job_name(mut self, job_name: impl Into<String>) -> Self {
        self.job_name = Some(job_name.into());
        self
    }

    /// Sets the build number
    #[must_use]
    pub fn with_build_number(mut self, build_number: u64) -> Self {
        self.build_number = build_number;
        self
    }
}

/// A stage as it would run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStage {
    /// Stage ordinal
    pub ordinal: u32,
    /// Stage name
    pub name: String,
    /// Kind summary
    pub kind: String,
    /// Stage budget in seconds
    pub timeout_secs: u64,
    /// What a failure does: `abort`, `tolerate` or `advisory`
    pub on_failure: String,
    /// Declared secret names
    pub secrets: Vec<String>,
}

impl From<&StageSpec> for PlannedStage {
    fn from(stage: &StageSpec) -> Self {
        let on_failure = match &stage.kind {
            StageKind::QualityGate(gate) => match gate.on_unfavorable {
                GatePolicy::Advisory => "advisory",
                GatePolicy::Abort => "abort",
            },
            StageKind::Rollout(_) => "abort",
            StageKind::Commands(_) if stage.tolerate_failure => "tolerate",
            StageKind::Commands(_) => "abort",
        };
        Self {
            ordinal: stage.ordinal,
            name: stage.name.clone(),
            kind: stage.kind.to_string(),
            timeout_secs: stage.timeout_secs,
            on_failure: on_failure.to_string(),
            secrets: stage.secrets.iter().map(|s| s.name.clone()).collect(),
        }
    }
}

impl fmt::Display for PlannedStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>3}. {} {} timeout={}s on_failure={}",
            self.ordinal, self.name, self.kind, self.timeout_secs, self.on_failure
        )?;
        if !self.secrets.is_empty() {
            write!(f, " secrets=[{}]", self.secrets.join(", "))?;
        }
        Ok(())
    }
}

/// Runs pipelines
///
/// The engine holds no per-run state; one engine may drive any number of
/// runs concurrently.
#[derive(Clone)]
pub struct PipelineEngine {
    runner: Arc<dyn CommandRunner>,
    resolver: Arc<dyn SecretResolver>,
    notifier: Arc<dyn Notifier>,
    notify_timeout: Duration,
}

impl PipelineEngine {
    /// Creates an engine over the three execution seams
    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        resolver: Arc<dyn SecretResolver>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            runner,
            resolver,
            notifier,
            notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
        }
    }

    /// Bounds how long the notifier may take before delivery counts as failed
    #[must_use]
    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    /// Validates a pipeline definition
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found.
    pub fn validate(&self, spec: &PipelineSpec) -> Result<(), ValidationError> {
        spec.validate()
    }

    /// Lists the stages a run would execute, without side effects
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] when the definition is invalid.
    pub fn plan(&self, spec: &PipelineSpec) -> Result<Vec<PlannedStage>, ValidationError> {
        spec.validate()?;
        tracing::info!(pipeline = %spec.name, stages = spec.stages.len(), "Planned pipeline");
        Ok(spec.stages.iter().map(PlannedStage::from).collect())
    }

    /// Runs `spec` to a terminal status and notifies once
    ///
    /// Never fails: problems are reported in the returned run.
    pub async fn run(
        &self,
        spec: &PipelineSpec,
        ctx: &RunContext,
        cancel: &CancellationToken,
    ) -> RunReport {
        let job_name = ctx.job_name.clone().unwrap_or_else(|| spec.name.clone());
        let mut run = PipelineRun::new(job_name, ctx.build_number);
        let vars = Self::variables(spec, &run, &ctx.workspace);

        run.start();
        tracing::info!(
            run_id = %run.id,
            job = %run.job_name,
            build_number = run.build_number,
            stages = spec.stages.len(),
            "Starting pipeline run"
        );

        let driven = AssertUnwindSafe(self.drive(spec, &mut run, &vars, ctx, cancel))
            .catch_unwind()
            .await;
        let (status, reason) = driven.unwrap_or_else(|panic| {
            let message = panic_message(panic.as_ref());
            tracing::error!(run_id = %run.id, panic = %message, "Stage execution panicked");
            (
                RunStatus::Failed,
                Some(format!("stage execution panicked: {message}")),
            )
        });
        run.finish(status, reason);

        tracing::info!(
            run_id = %run.id,
            status = %run.status(),
            stages_run = run.stages().len(),
            "Pipeline run finished"
        );

        let notification = self.notify(&run, spec, &vars).await;
        RunReport { run, notification }
    }

    async fn drive(
        &self,
        spec: &PipelineSpec,
        run: &mut PipelineRun,
        vars: &HashMap<String, String>,
        ctx: &RunContext,
        cancel: &CancellationToken,
    ) -> (RunStatus, Option<String>) {
        if let Err(err) = spec.validate() {
            tracing::error!(error = %err, "Invalid pipeline definition");
            return (
                RunStatus::Failed,
                Some(format!("invalid pipeline definition: {err}")),
            );
        }

        let executor = StageExecutor::new(
            self.runner.as_ref(),
            self.resolver.as_ref(),
            cancel,
            vars,
        )
        .with_cwd(&ctx.workspace);

        for stage in &spec.stages {
            if cancel.is_cancelled() {
                tracing::warn!(stage = %stage.name, "Run cancelled, not starting stage");
                return (
                    RunStatus::Aborted,
                    Some(format!("cancelled before stage '{}'", stage.name)),
                );
            }

            let result = executor.execute(stage).await;
            let stop = result
                .aborts_run()
                .then(|| match &result.failure {
                    Some(failure) => format!("stage '{}' failed: {failure}", stage.name),
                    None => format!("stage '{}' failed", stage.name),
                });
            run.record(result);

            if let Some(reason) = stop {
                return (RunStatus::Aborted, Some(reason));
            }
        }

        (RunStatus::Succeeded, None)
    }

    async fn notify(
        &self,
        run: &PipelineRun,
        spec: &PipelineSpec,
        vars: &HashMap<String, String>,
    ) -> NotifyResult {
        let payload = NotificationPayload::from_run(run, &spec.notification, vars);
        let delivery = tokio::time::timeout(self.notify_timeout, self.notifier.notify(&payload))
            .await
            .unwrap_or(Err(NotifyError::Timeout(self.notify_timeout)));
        match delivery {
            Ok(()) => {
                tracing::info!(run_id = %run.id, color = %payload.color, "Notification delivered");
                NotifyResult::Delivered
            }
            Err(err) => {
                tracing::warn!(run_id = %run.id, error = %err, "Notification failed");
                NotifyResult::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    /// Pipeline environment, expanded against the run variables, plus the
    /// run variables themselves
    fn variables(
        spec: &PipelineSpec,
        run: &PipelineRun,
        workspace: &Path,
    ) -> HashMap<String, String> {
        let run_vars = run_variables(workspace, &run.job_name, run.build_number, &run.id.to_string());
        let mut vars: HashMap<String, String> = spec
            .environment
            .vars
            .iter()
            .map(|(k, v)| (k.clone(), expand_variables(v, &run_vars)))
            .collect();
        vars.extend(run_vars);
        vars
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
