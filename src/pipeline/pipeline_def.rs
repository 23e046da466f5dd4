//! Pipeline definition and builder
//!
//! A [`PipelineSpec`] is the declarative, ordered list of stages plus the
//! pipeline-level environment and notification settings.

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

use super::errors::{PipelineError, ValidationError};
use super::stage::StageSpec;
use super::{Environment, Validate};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Where and to whom the final report goes
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// Recipients of the report
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<String>,

    /// Link to the run, `${VAR}` expanded with run variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,

    /// Artifact references attached to the report
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
}

/// Complete pipeline definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Pipeline (job) name
    pub name: String,

    /// Pipeline-level variables
    #[serde(default)]
    pub environment: Environment,

    /// Final report settings
    #[serde(default)]
    pub notification: NotificationSettings,

    /// Stages in execution order
    pub stages: Vec<StageSpec>,
}

impl PipelineSpec {
    /// Parses a pipeline definition from YAML text
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Definition`] when the YAML does not describe a
    /// pipeline. The result is not validated.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, PipelineError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Reads a pipeline definition file without validating it
    ///
    /// # Errors
    ///
    /// Returns an IO or parse error.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Reads and validates a pipeline definition file
    ///
    /// # Errors
    ///
    /// Returns an IO, parse or validation error.
    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        let spec = Self::load(path)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Looks up a stage by name
    pub fn stage(&self, name: &str) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.name == name)
    }
}

impl Validate for PipelineSpec {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName);
        }

        if self.stages.is_empty() {
            return Err(ValidationError::EmptyPipeline);
        }

        let mut names = HashSet::new();
        let mut previous: Option<u32> = None;
        for stage in &self.stages {
            stage.validate()?;

            if !names.insert(stage.name.as_str()) {
                return Err(ValidationError::DuplicateStage {
                    name: stage.name.clone(),
                });
            }

            if let Some(prev) = previous
                && stage.ordinal <= prev
            {
                return Err(ValidationError::OrdinalOrder {
                    stage: stage.name.clone(),
                    ordinal: stage.ordinal,
                    previous: prev,
                });
            }
            previous = Some(stage.ordinal);
        }

        Ok(())
    }
}

/// Builder for creating pipelines
pub struct PipelineBuilder {
    spec: PipelineSpec,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            spec: PipelineSpec {
                name: name.into(),
                environment: Environment::new(),
                notification: NotificationSettings::default(),
                stages: Vec::new(),
            },
        }
    }

    /// Sets a pipeline-level variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.environment = self.spec.environment.set(key, value);
        self
    }

    /// Sets the notification settings
    pub fn notification(mut self, notification: NotificationSettings) -> Self {
        self.spec.notification = notification;
        self
    }

    /// Appends a stage
    pub fn stage(mut self, stage: StageSpec) -> Self {
        self.spec.stages.push(stage);
        self
    }

    /// Builds the pipeline
    #[allow(clippy::missing_errors_doc)]
    pub fn build(self) -> Result<PipelineSpec, ValidationError> {
        self.spec.validate()?;
        Ok(self.spec)
    }

    /// Builds the pipeline without validation (for internal use)
    #[must_use]
    pub fn build_unchecked(self) -> PipelineSpec {
        self.spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stage::{GatePolicy, StageBuilder, StageKind};

    fn stage(name: &str, ordinal: u32) -> StageSpec {
        StageBuilder::commands(name, ordinal, ["true"]).build_unchecked()
    }

    #[test]
    fn test_pipeline_builder() {
        let pipeline = PipelineBuilder::new("demo")
            .env("IMAGE", "registry.local/demo")
            .stage(stage("Build", 1))
            .stage(stage("Test", 2))
            .build()
            .unwrap();

        assert_eq!(pipeline.stages.len(), 2);
        assert_eq!(
            pipeline.environment.get("IMAGE").map(String::as_str),
            Some("registry.local/demo")
        );
        assert!(pipeline.stage("Test").is_some());
    }

    #[test]
    fn test_pipeline_validation_empty() {
        let result = PipelineBuilder::new("demo").build();
        assert!(matches!(result, Err(ValidationError::EmptyPipeline)));
    }

    #[test]
    fn test_pipeline_validation_duplicate_names() {
        let result = PipelineBuilder::new("demo")
            .stage(stage("Build", 1))
            .stage(stage("Build", 2))
            .build();
        assert!(matches!(result, Err(ValidationError::DuplicateStage { .. })));
    }

    #[test]
    fn test_pipeline_validation_ordinals_strictly_increase() {
        let result = PipelineBuilder::new("demo")
            .stage(stage("Build", 2))
            .stage(stage("Test", 2))
            .build();
        assert!(matches!(
            result,
            Err(ValidationError::OrdinalOrder {
                ordinal: 2,
                previous: 2,
                ..
            })
        ));

        let result = PipelineBuilder::new("demo")
            .stage(stage("Build", 5))
            .stage(stage("Test", 3))
            .build();
        assert!(matches!(result, Err(ValidationError::OrdinalOrder { .. })));

        let gaps_are_fine = PipelineBuilder::new("demo")
            .stage(stage("Build", 10))
            .stage(stage("Test", 20))
            .build();
        assert!(gaps_are_fine.is_ok());
    }

    #[test]
    fn test_pipeline_from_yaml() {
        let yaml = r#"
name: demo-app
environment:
  IMAGE: registry.local/demo
notification:
  recipients: [team@example.com]
  link: https://ci.example.com/job/${JOB_NAME}/${BUILD_NUMBER}
  attachments: [trivy-report.html]
stages:
  - name: Build
    ordinal: 1
    timeout_secs: 600
    commands: ["mvn -B package"]
  - name: Scan Image
    ordinal: 2
    timeout_secs: 300
    tolerate_failure: true
    commands: ["trivy image --exit-code 1 ${IMAGE}"]
  - name: Quality Gate
    ordinal: 3
    timeout_secs: 300
    quality_gate: { check: "sonar-verdict", interval_secs: 10, on_unfavorable: abort }
  - name: Verify Rollout
    ordinal: 4
    timeout_secs: 120
    rollout: { probe: "kubectl rollout status deployment/demo", interval_secs: 5 }
"#;
        let pipeline = PipelineSpec::from_yaml_str(yaml).unwrap();
        pipeline.validate().unwrap();

        assert_eq!(pipeline.name, "demo-app");
        assert_eq!(pipeline.notification.recipients, vec!["team@example.com"]);
        assert!(pipeline.stages[1].tolerate_failure);
        assert!(matches!(
            &pipeline.stages[2].kind,
            StageKind::QualityGate(gate) if gate.on_unfavorable == GatePolicy::Abort
        ));
        assert!(matches!(&pipeline.stages[3].kind, StageKind::Rollout(_)));
    }

    #[test]
    fn test_pipeline_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pipeline.yaml");
        std::fs::write(
            &path,
            "name: demo\nstages:\n  - { name: Build, ordinal: 1, timeout_secs: 5, commands: [\"true\"] }\n",
        )
        .unwrap();

        let pipeline = PipelineSpec::from_file(&path).unwrap();
        assert_eq!(pipeline.stages[0].name, "Build");

        let missing = PipelineSpec::from_file(&dir.path().join("missing.yaml"));
        assert!(matches!(missing, Err(PipelineError::Io(_))));
    }

    #[test]
    fn test_load_defers_validation() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pipeline.yaml");
        std::fs::write(&path, "name: demo\nstages: []\n").unwrap();

        let pipeline = PipelineSpec::load(&path).unwrap();
        assert!(pipeline.stages.is_empty());
        assert!(matches!(
            PipelineSpec::from_file(&path),
            Err(PipelineError::Validation(ValidationError::EmptyPipeline))
        ));
    }

    #[test]
    fn test_pipeline_from_yaml_rejects_garbage() {
        let result = PipelineSpec::from_yaml_str("stages: 3");
        assert!(matches!(result, Err(PipelineError::Definition(_))));
    }
}
