//! `stageline check` - Validate a pipeline definition
//!
//! Parses and validates the definition, then prints the stages a run would
//! execute. Nothing is executed.
//!
//! ## Usage
//!
//! ```bash
//! stageline check pipeline.yaml
//! #   1. Build commands(1) timeout=600s on_failure=abort
//! #   2. Scan Image commands(1) timeout=300s on_failure=tolerate
//! ```

use anyhow::{Context, Result};
use stageline::executor::PlannedStage;
use stageline::pipeline::PipelineSpec;
use std::path::Path;

/// Validates `file` and prints its plan
pub fn check_pipeline(file: &Path, json: bool) -> Result<()> {
    let plan = plan_pipeline(file)?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&plan).context("Failed to serialize plan")?
        );
    } else {
        for stage in &plan {
            println!("{stage}");
        }
    }
    Ok(())
}

/// Loads `file` and lists its stages in execution order
pub fn plan_pipeline(file: &Path) -> Result<Vec<PlannedStage>> {
    if !file.exists() {
        anyhow::bail!("Pipeline file not found: {}", file.display());
    }

    let spec = PipelineSpec::from_file(file)
        .with_context(|| format!("Invalid pipeline: {}", file.display()))?;

    tracing::debug!(pipeline = %spec.name, stages = spec.stages.len(), "Pipeline is valid");
    Ok(spec.stages.iter().map(PlannedStage::from).collect())
}
