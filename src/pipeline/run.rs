//! Run state: one execution of a pipeline and the results of its stages
//!
//! A [`PipelineRun`] is created at invocation and mutated only by the
//! engine. Once it reaches a terminal status it no longer changes.

#![allow(clippy::must_use_candidate)]

use super::secrets::SecretShape;
use super::types::RunStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Why a stage failed
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageFailure {
    /// A declared secret is unknown to the resolver
    #[error("secret '{name}' not found")]
    SecretNotFound {
        /// Secret name.
        name: String,
    },

    /// A secret exists but has a different shape than declared or used
    #[error("secret '{name}' is {actual}, expected {expected}")]
    SecretShapeMismatch {
        /// Secret name.
        name: String,
        /// Shape the stage asked for.
        expected: String,
        /// Shape that is available.
        actual: String,
    },

    /// A command template could not be rendered
    #[error("template error: {reason}")]
    Template {
        /// Description of the problem.
        reason: String,
    },

    /// The environment could not execute a command
    #[error("runner fault: {reason}")]
    RunnerFault {
        /// Description of the fault.
        reason: String,
    },

    /// A command exited non-zero
    #[error("command #{index} exited with code {exit_code}")]
    CommandFailed {
        /// Zero-based position of the command within the stage.
        index: usize,
        /// Exit code.
        exit_code: i32,
    },

    /// A bounded wait or the stage budget ran out
    #[error("timeout exceeded after {after:?}")]
    TimeoutExceeded {
        /// Elapsed stage time.
        after: Duration,
    },

    /// A quality gate reported an unfavorable verdict
    #[error("quality gate verdict {verdict}")]
    GateRejected {
        /// Verdict text.
        verdict: String,
    },

    /// The run was cancelled while the stage was in flight
    #[error("cancelled")]
    Cancelled,
}

impl StageFailure {
    /// Shape mismatch between two known shapes
    pub fn shape_mismatch(name: impl Into<String>, expected: SecretShape, actual: SecretShape) -> Self {
        Self::SecretShapeMismatch {
            name: name.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Returns true if no stage policy can tolerate this failure
    pub fn is_always_fatal(&self) -> bool {
        matches!(
            self,
            Self::RunnerFault { .. } | Self::TimeoutExceeded { .. } | Self::Cancelled
        )
    }
}

/// Outcome of one command invocation inside a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    /// Template text as declared, placeholders unexpanded
    pub command: String,

    /// Exit code (128 + signal for terminated processes)
    pub exit_code: i32,

    /// Captured standard output with secrets masked
    pub stdout: String,

    /// Captured standard error with secrets masked
    pub stderr: String,

    /// The runner terminated the command at its deadline
    pub timed_out: bool,

    /// Time spent in the command
    pub duration: Duration,
}

/// Outcome of executing one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage name
    pub name: String,

    /// Stage ordinal
    pub ordinal: u32,

    /// Commands run, in order
    pub commands: Vec<CommandRecord>,

    /// Failure, if the stage did not succeed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageFailure>,

    /// The failure is recorded without aborting the run
    pub tolerated: bool,

    /// Last verdict seen by a quality gate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<String>,

    /// Total stage time
    pub duration: Duration,
}

impl StageResult {
    /// Returns true if the stage did not succeed
    pub fn failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Returns true if the stage succeeded
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    /// Returns true if this result must stop the run
    pub fn aborts_run(&self) -> bool {
        self.failed() && !self.tolerated
    }

    /// Exit code of the last command run, if any
    pub fn exit_code(&self) -> Option<i32> {
        self.commands.last().map(|c| c.exit_code)
    }
}

/// One execution of a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Unique run id
    pub id: Uuid,

    /// Job (pipeline) name
    pub job_name: String,

    /// Build number
    pub build_number: u64,

    status: RunStatus,
    stages: Vec<StageResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    finished_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl PipelineRun {
    /// Creates a pending run
    pub fn new(job_name: impl Into<String>, build_number: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_name: job_name.into(),
            build_number,
            status: RunStatus::Pending,
            stages: Vec::new(),
            started_at: None,
            finished_at: None,
            reason: None,
        }
    }

    /// Current status
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Stage results in execution order
    pub fn stages(&self) -> &[StageResult] {
        &self.stages
    }

    /// Result of a stage by name
    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// When the run started
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// When the run reached a terminal status
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Why the run did not succeed
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Returns true if some stage failed but was tolerated
    pub fn has_tolerated_failures(&self) -> bool {
        self.stages.iter().any(|s| s.failed() && s.tolerated)
    }

    /// Wall-clock run time, once finished
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.finished_at? - self.started_at?)
    }

    /// `Pending -> Running`
    pub(crate) fn start(&mut self) {
        if self.transition(RunStatus::Running) {
            self.started_at = Some(Utc::now());
        }
    }

    /// Appends a stage result while running
    pub(crate) fn record(&mut self, result: StageResult) {
        if self.status != RunStatus::Running {
            tracing::warn!(
                run_id = %self.id,
                status = %self.status,
                stage = %result.name,
                "Ignoring stage result for a run that is not running"
            );
            return;
        }
        self.stages.push(result);
    }

    /// `Running -> terminal`
    pub(crate) fn finish(&mut self, status: RunStatus, reason: Option<String>) {
        if self.transition(status) {
            self.finished_at = Some(Utc::now());
            self.reason = reason;
        }
    }

    fn transition(&mut self, next: RunStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                run_id = %self.id,
                from = %self.status,
                to = %next,
                "Rejected run status transition"
            );
            return false;
        }
        self.status = next;
        true
    }
}
