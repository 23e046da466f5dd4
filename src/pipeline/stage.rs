//! Stage types for pipeline definition
//!
//! This module defines stage specifications and their builder pattern.

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

use super::Validate;
use super::errors::ValidationError;
use super::secrets::SecretRef;
use super::template::CommandTemplate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

/// Budget given to stages built without an explicit timeout
pub const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 600;

const MAX_NAME_LEN: usize = 100;

/// What to do when a quality gate reports an unfavorable verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatePolicy {
    /// Record the verdict as a tolerated failure and continue
    Advisory,
    /// Abort the run
    Abort,
}

/// Bounded wait for an external pass/fail verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityGate {
    /// Command printing the current verdict on its last output line
    pub check: CommandTemplate,

    /// Seconds between checks
    pub interval_secs: u64,

    /// Policy for `WARN`/`ERROR` verdicts
    pub on_unfavorable: GatePolicy,
}

/// Polling of a deployment's readiness signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutCheck {
    /// Command exiting 0 once the rollout is ready
    pub probe: CommandTemplate,

    /// Seconds between probes
    pub interval_secs: u64,
}

/// The work a stage performs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Commands run in declared order, stopping at the first failure
    Commands(Vec<CommandTemplate>),

    /// Wait for a quality verdict
    QualityGate(QualityGate),

    /// Wait for a rollout to become ready
    Rollout(RolloutCheck),
}

impl StageKind {
    /// Every template this stage can run
    pub fn templates(&self) -> Vec<&CommandTemplate> {
        match self {
            Self::Commands(commands) => commands.iter().collect(),
            Self::QualityGate(gate) => vec![&gate.check],
            Self::Rollout(rollout) => vec![&rollout.probe],
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Commands(commands) => write!(f, "commands({})", commands.len()),
            Self::QualityGate(gate) => write!(
                f,
                "quality_gate(every {}s, {:?})",
                gate.interval_secs, gate.on_unfavorable
            ),
            Self::Rollout(rollout) => write!(f, "rollout(every {}s)", rollout.interval_secs),
        }
    }
}

/// Declarative description of one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    /// Stage name, unique within a pipeline
    pub name: String,

    /// Position; strictly increasing in declared order
    pub ordinal: u32,

    /// Work performed by the stage
    #[serde(flatten)]
    pub kind: StageKind,

    /// Secrets acquired for the duration of the stage
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretRef>,

    /// Budget for the whole stage
    pub timeout_secs: u64,

    /// A non-zero exit is recorded but does not abort the run
    #[serde(default)]
    pub tolerate_failure: bool,
}

impl StageSpec {
    /// Stage budget as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate_templates(&self) -> Result<(), ValidationError> {
        let declared: HashSet<&str> = self.secrets.iter().map(|s| s.name.as_str()).collect();

        for template in self.kind.templates() {
            template
                .split()
                .map_err(|reason| ValidationError::MalformedTemplate {
                    stage: self.name.clone(),
                    reason,
                })?;

            for placeholder in template.secret_placeholders() {
                if !declared.contains(placeholder.name) {
                    return Err(ValidationError::UndeclaredSecret {
                        stage: self.name.clone(),
                        secret: placeholder.name.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl Validate for StageSpec {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName);
        }

        if self.name.len() > MAX_NAME_LEN {
            return Err(ValidationError::NameTooLong {
                max: MAX_NAME_LEN,
                len: self.name.len(),
            });
        }

        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout {
                stage: self.name.clone(),
            });
        }

        match &self.kind {
            StageKind::Commands(commands) if commands.is_empty() => {
                return Err(ValidationError::EmptyStage {
                    stage: self.name.clone(),
                });
            }
            StageKind::QualityGate(QualityGate { interval_secs, .. })
            | StageKind::Rollout(RolloutCheck { interval_secs, .. })
                if *interval_secs == 0 || *interval_secs > self.timeout_secs =>
            {
                return Err(ValidationError::InvalidInterval {
                    stage: self.name.clone(),
                    interval: *interval_secs,
                    timeout: self.timeout_secs,
                });
            }
            _ => {}
        }

        let mut seen = HashSet::new();
        for secret in &self.secrets {
            secret.validate()?;
            if !seen.insert(secret.name.as_str()) {
                return Err(ValidationError::DuplicateSecret {
                    stage: self.name.clone(),
                    secret: secret.name.clone(),
                });
            }
        }

        self.validate_templates()
    }
}

impl fmt::Display for StageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stage({}#{}): {}", self.name, self.ordinal, self.kind)
    }
}

/// Builder for creating stage specifications
pub struct StageBuilder {
    stage: StageSpec,
}

impl StageBuilder {
    fn with_kind(name: impl Into<String>, ordinal: u32, kind: StageKind) -> Self {
        Self {
            stage: StageSpec {
                name: name.into(),
                ordinal,
                kind,
                secrets: Vec::new(),
                timeout_secs: DEFAULT_STAGE_TIMEOUT_SECS,
                tolerate_failure: false,
            },
        }
    }

    /// Starts a stage running the given commands in order
    pub fn commands<I, C>(name: impl Into<String>, ordinal: u32, commands: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<CommandTemplate>,
    {
        let commands = commands.into_iter().map(Into::into).collect();
        Self::with_kind(name, ordinal, StageKind::Commands(commands))
    }

    /// Starts a quality gate stage
    pub fn quality_gate(
        name: impl Into<String>,
        ordinal: u32,
        check: impl Into<CommandTemplate>,
        interval_secs: u64,
        on_unfavorable: GatePolicy,
    ) -> Self {
        Self::with_kind(
            name,
            ordinal,
            StageKind::QualityGate(QualityGate {
                check: check.into(),
                interval_secs,
                on_unfavorable,
            }),
        )
    }

    /// Starts a rollout verification stage
    pub fn rollout(
        name: impl Into<String>,
        ordinal: u32,
        probe: impl Into<CommandTemplate>,
        interval_secs: u64,
    ) -> Self {
        Self::with_kind(
            name,
            ordinal,
            StageKind::Rollout(RolloutCheck {
                probe: probe.into(),
                interval_secs,
            }),
        )
    }

    /// Sets the stage budget
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.stage.timeout_secs = secs;
        self
    }

    /// Marks non-zero exits as tolerated
    pub fn tolerate_failure(mut self, tolerate: bool) -> Self {
        self.stage.tolerate_failure = tolerate;
        self
    }

    /// Declares a secret
    pub fn secret(mut self, secret: SecretRef) -> Self {
        self.stage.secrets.push(secret);
        self
    }

    /// Builds the stage
    #[allow(clippy::missing_errors_doc)]
    pub fn build(self) -> Result<StageSpec, ValidationError> {
        self.stage.validate()?;
        Ok(self.stage)
    }

    /// Builds the stage without validation (for internal use)
    #[must_use]
    pub fn build_unchecked(self) -> StageSpec {
        self.stage
    }
}
