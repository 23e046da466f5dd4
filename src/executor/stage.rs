//! Stage execution
//!
//! [`StageExecutor`] runs one [`StageSpec`] to a [`StageResult`]: it acquires
//! the stage's secrets, renders and runs its commands (or polls its quality
//! gate or rollout probe) within the stage budget, releases the secrets and
//! decides whether a failure is tolerated. It never returns an error; every
//! stage-local problem ends up in the result.

use super::cancel::CancellationToken;
use super::secrets::SecretScope;
use super::traits::{CommandRunner, Invocation, RunOutput, SecretResolver};
use super::wait::{Budget, Poller, Verdict};
use crate::pipeline::{
    CommandRecord, CommandTemplate, GatePolicy, QualityGate, RenderError, RolloutCheck,
    StageFailure, StageKind, StageResult, StageSpec,
};
use std::collections::HashMap;
use std::path::Path;
use tracing::Instrument;

/// Runs single stages against a runner and a secret resolver
pub struct StageExecutor<'a> {
    runner: &'a dyn CommandRunner,
    resolver: &'a dyn SecretResolver,
    cancel: &'a CancellationToken,
    variables: &'a HashMap<String, String>,
    cwd: Option<&'a Path>,
}

/// What a stage produced before it finished or failed
#[derive(Default)]
struct Trace {
    commands: Vec<CommandRecord>,
    verdict: Option<String>,
}

impl<'a> StageExecutor<'a> {
    /// Creates an executor
    ///
    /// `variables` are the pipeline environment and run variables; they
    /// expand `${VAR}` placeholders and are passed to every process.
    #[must_use]
    pub fn new(
        runner: &'a dyn CommandRunner,
        resolver: &'a dyn SecretResolver,
        cancel: &'a CancellationToken,
        variables: &'a HashMap<String, String>,
    ) -> Self {
        Self {
            runner,
            resolver,
            cancel,
            variables,
            cwd: None,
        }
    }

    /// Runs processes in `cwd`
    #[must_use]
    pub fn with_cwd(mut self, cwd: &'a Path) -> Self {
        self.cwd = Some(cwd);
        self
    }

    /// Executes one stage
    pub async fn execute(&self, spec: &StageSpec) -> StageResult {
        let span = tracing::info_span!("stage", stage = %spec.name, ordinal = spec.ordinal);
        self.execute_inner(spec).instrument(span).await
    }

    async fn execute_inner(&self, spec: &StageSpec) -> StageResult {
        tracing::info!(kind = %spec.kind, timeout_secs = spec.timeout_secs, "Executing stage");

        let budget = Budget::start(spec.timeout());
        let mut trace = Trace::default();

        let failure = match SecretScope::acquire(&spec.secrets, self.resolver) {
            Err(failure) => Some(failure),
            Ok(scope) => {
                let mut vars = self.variables.clone();
                vars.insert("STAGE_NAME".to_string(), spec.name.clone());

                let run = StageRun {
                    executor: self,
                    scope: &scope,
                    vars: &vars,
                    budget,
                };
                let outcome = match &spec.kind {
                    StageKind::Commands(commands) => run.commands(commands, &mut trace).await,
                    StageKind::QualityGate(gate) => run.quality_gate(gate, &mut trace).await,
                    StageKind::Rollout(rollout) => run.rollout(rollout, &mut trace).await,
                };
                scope.release();
                outcome.err()
            }
        };

        let tolerated = failure.as_ref().is_some_and(|f| tolerates(spec, f));
        let result = StageResult {
            name: spec.name.clone(),
            ordinal: spec.ordinal,
            commands: trace.commands,
            failure,
            tolerated,
            verdict: trace.verdict,
            duration: budget.elapsed(),
        };

        match &result.failure {
            None => tracing::info!(duration_ms = result.duration.as_millis(), "Stage succeeded"),
            Some(failure) if tolerated => tracing::warn!(
                failure = %failure,
                duration_ms = result.duration.as_millis(),
                "Stage failed, failure tolerated"
            ),
            Some(failure) => tracing::error!(
                failure = %failure,
                duration_ms = result.duration.as_millis(),
                "Stage failed"
            ),
        }

        result
    }
}

/// Decides whether `failure` of `spec` lets the run continue
fn tolerates(spec: &StageSpec, failure: &StageFailure) -> bool {
    if failure.is_always_fatal() {
        return false;
    }
    match (&spec.kind, failure) {
        (StageKind::QualityGate(gate), StageFailure::GateRejected { .. }) => {
            gate.on_unfavorable == GatePolicy::Advisory
        }
        _ => spec.tolerate_failure,
    }
}

/// One stage invocation with its secrets in scope
struct StageRun<'s, 'a> {
    executor: &'s StageExecutor<'a>,
    scope: &'s SecretScope,
    vars: &'s HashMap<String, String>,
    budget: Budget,
}

impl StageRun<'_, '_> {
    async fn commands(
        &self,
        commands: &[CommandTemplate],
        trace: &mut Trace,
    ) -> Result<(), StageFailure> {
        for (index, template) in commands.iter().enumerate() {
            let output = self.invoke(template, trace).await?;
            if !output.is_success() {
                return Err(StageFailure::CommandFailed {
                    index,
                    exit_code: output.exit_code,
                });
            }
        }
        Ok(())
    }

    async fn quality_gate(&self, gate: &QualityGate, trace: &mut Trace) -> Result<(), StageFailure> {
        let mut poller = Poller::new(
            self.budget,
            std::time::Duration::from_secs(gate.interval_secs),
        );
        loop {
            poller.tick(self.executor.cancel).await?;
            let output = self.invoke(&gate.check, trace).await?;
            let verdict = Verdict::classify(output.exit_code, &output.stdout);
            trace.verdict = verdict.text().map(|v| self.scope.mask(v));

            match verdict {
                Verdict::Pass => return Ok(()),
                Verdict::Unfavorable(verdict) => {
                    return Err(StageFailure::GateRejected { verdict });
                }
                Verdict::Pending(_) => tracing::debug!(
                    attempt = poller.attempts(),
                    verdict = trace.verdict.as_deref().unwrap_or(""),
                    "Quality gate pending"
                ),
            }
        }
    }

    async fn rollout(&self, rollout: &RolloutCheck, trace: &mut Trace) -> Result<(), StageFailure> {
        let mut poller = Poller::new(
            self.budget,
            std::time::Duration::from_secs(rollout.interval_secs),
        );
        loop {
            poller.tick(self.executor.cancel).await?;
            let output = self.invoke(&rollout.probe, trace).await?;
            if output.is_success() {
                return Ok(());
            }
            tracing::debug!(
                attempt = poller.attempts(),
                exit_code = output.exit_code,
                "Rollout not ready"
            );
        }
    }

    /// Renders and runs one template, recording the masked outcome
    ///
    /// Termination by timeout or cancellation is returned as a failure; a
    /// non-zero exit is left to the caller.
    async fn invoke(
        &self,
        template: &CommandTemplate,
        trace: &mut Trace,
    ) -> Result<RunOutput, StageFailure> {
        let cancel = self.executor.cancel;
        if cancel.is_cancelled() {
            return Err(StageFailure::Cancelled);
        }
        if self.budget.is_spent() {
            return Err(self.budget.exceeded());
        }

        let argv = template
            .render(self.vars, |name, field| self.scope.value(name, field))
            .map_err(|err| match err {
                RenderError::Malformed(reason) => StageFailure::Template { reason },
                RenderError::Secret(failure) => failure,
            })?;
        let mut invocation = Invocation::from_argv(argv)
            .ok_or_else(|| StageFailure::Template {
                reason: "command is empty".to_string(),
            })?
            .with_env(self.vars.clone())
            .with_env(self.scope.env_bindings())
            .with_timeout(self.budget.remaining());
        if let Some(cwd) = self.executor.cwd {
            invocation = invocation.with_cwd(cwd);
        }

        tracing::info!(command = %template, "Running command");
        let output = self
            .executor
            .runner
            .run(&invocation, cancel)
            .await
            .map_err(|fault| StageFailure::RunnerFault {
                reason: fault.to_string(),
            })?;

        trace.commands.push(CommandRecord {
            command: template.as_str().to_string(),
            exit_code: output.exit_code,
            stdout: self.scope.mask(&output.stdout),
            stderr: self.scope.mask(&output.stderr),
            timed_out: output.timed_out,
            duration: output.duration,
        });
        tracing::debug!(
            exit_code = output.exit_code,
            duration_ms = output.duration.as_millis(),
            "Command finished"
        );

        if output.cancelled || cancel.is_cancelled() {
            return Err(StageFailure::Cancelled);
        }
        if output.timed_out {
            return Err(self.budget.exceeded());
        }
        Ok(output)
    }
}
