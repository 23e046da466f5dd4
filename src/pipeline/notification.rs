//! Final run report
//!
//! A [`NotificationPayload`] is a read-only view of a terminal
//! [`PipelineRun`], built once and handed to the notifier.

#![allow(clippy::must_use_candidate)]

use super::pipeline_def::NotificationSettings;
use super::run::{PipelineRun, StageResult};
use super::template::expand_variables;
use super::types::RunStatus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;

/// Color code of a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusColor {
    /// Succeeded without failures
    Green,
    /// Succeeded with tolerated failures
    Yellow,
    /// Failed or aborted
    Red,
}

impl StatusColor {
    /// Color for a finished run
    pub fn for_run(run: &PipelineRun) -> Self {
        match run.status() {
            RunStatus::Succeeded if run.has_tolerated_failures() => Self::Yellow,
            RunStatus::Succeeded => Self::Green,
            _ => Self::Red,
        }
    }
}

impl fmt::Display for StatusColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Green => write!(f, "green"),
            Self::Yellow => write!(f, "yellow"),
            Self::Red => write!(f, "red"),
        }
    }
}

/// One line of the report per executed stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSummary {
    /// Stage name
    pub name: String,
    /// Stage ordinal
    pub ordinal: u32,
    /// `succeeded`, `tolerated` or `failed`
    pub outcome: String,
    /// Failure description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Stage duration in milliseconds
    pub duration_ms: u128,
}

impl From<&StageResult> for StageSummary {
    fn from(result: &StageResult) -> Self {
        let outcome = match (&result.failure, result.tolerated) {
            (None, _) => "succeeded",
            (Some(_), true) => "tolerated",
            (Some(_), false) => "failed",
        };
        Self {
            name: result.name.clone(),
            ordinal: result.ordinal,
            outcome: outcome.to_string(),
            failure: result.failure.as_ref().map(ToString::to_string),
            duration_ms: result.duration.as_millis(),
        }
    }
}

/// Report sent once a run is terminal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Job name
    pub job_name: String,
    /// Build number
    pub build_number: u64,
    /// Terminal status
    pub status: RunStatus,
    /// Status color
    pub color: StatusColor,
    /// One-line subject
    pub subject: String,
    /// Plain-text body
    pub body: String,
    /// Recipients
    pub recipients: Vec<String>,
    /// Link to the run, variables expanded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Artifact references
    pub attachments: Vec<String>,
    /// Per-stage outcomes in execution order
    pub stages: Vec<StageSummary>,
}

impl NotificationPayload {
    /// Builds the report for `run`
    ///
    /// `vars` expand `${VAR}` placeholders in the link.
    pub fn from_run(
        run: &PipelineRun,
        settings: &NotificationSettings,
        vars: &HashMap<String, String>,
    ) -> Self {
        let status = run.status();
        let color = StatusColor::for_run(run);
        let link = settings
            .link
            .as_deref()
            .map(|link| expand_variables(link, vars));
        let stages: Vec<StageSummary> = run.stages().iter().map(StageSummary::from).collect();

        let mut body = format!(
            "Job {} build #{} finished with status {status}.\n",
            run.job_name, run.build_number
        );
        if let Some(reason) = run.reason() {
            let _ = writeln!(body, "Reason: {reason}");
        }
        if !stages.is_empty() {
            body.push_str("\nStages:\n");
            for stage in &stages {
                let _ = write!(
                    body,
                    "  {}. {} [{}] {}ms",
                    stage.ordinal, stage.name, stage.outcome, stage.duration_ms
                );
                if let Some(ref failure) = stage.failure {
                    let _ = write!(body, ": {failure}");
                }
                body.push('\n');
            }
        }
        if let Some(ref link) = link {
            let _ = write!(body, "\nDetails: {link}\n");
        }

        Self {
            job_name: run.job_name.clone(),
            build_number: run.build_number,
            status,
            color,
            subject: format!("{status}: Job {} [{}]", run.job_name, run.build_number),
            body,
            recipients: settings.recipients.clone(),
            link,
            attachments: settings.attachments.clone(),
            stages,
        }
    }
}

/// Outcome of the notification attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum NotifyResult {
    /// The channel accepted the report
    Delivered,
    /// The report could not be sent; the run status is unaffected
    Failed {
        /// Why delivery failed.
        reason: String,
    },
}

impl NotifyResult {
    /// Returns true if the report was delivered
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// A terminal run and the outcome of its notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// The run
    pub run: PipelineRun,
    /// Notification outcome
    pub notification: NotifyResult,
}

impl RunReport {
    /// Terminal status of the run
    pub fn status(&self) -> RunStatus {
        self.run.status()
    }

    /// Process exit code for the run
    pub fn exit_code(&self) -> u8 {
        self.run.status().exit_code()
    }
}
