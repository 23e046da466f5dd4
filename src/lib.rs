//! # Stageline - a sequential CI/CD pipeline engine
//!
//! Stageline runs declaratively defined pipelines: ordered stages of shell
//! commands, polled quality gates and rollout checks. Each stage sees only
//! the secrets it declares, runs under a time budget and fails according to
//! its declared policy. Whatever happens, the run ends in exactly one
//! terminal status and one notification.
//!
//! ## Quick Start
//!
//! ```no_run
//! use stageline::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let spec = PipelineBuilder::new("demo-app")
//!     .stage(StageBuilder::commands("Build", 1, ["mvn -B package"]).build()?)
//!     .stage(
//!         StageBuilder::commands("Scan Image", 2, ["trivy image demo"])
//!             .tolerate_failure(true)
//!             .build()?,
//!     )
//!     .build()?;
//!
//! let workspace = std::env::current_dir()?;
//! let files = TempFileManager::new(&workspace, "demo-app", "1")?;
//! let engine = PipelineEngine::new(
//!     Arc::new(ProcessRunner::new()),
//!     Arc::new(SecretStore::new(files)),
//!     Arc::new(LogNotifier::new()),
//! );
//!
//! let report = engine
//!     .run(&spec, &RunContext::new(workspace), &CancellationToken::new())
//!     .await;
//! println!("{}", report.status());
//! # Ok(())
//! # }
//! ```
//!
//! ## Layout
//!
//! - [`pipeline`]: definitions, validation, run records and notifications
//! - [`executor`]: execution seams, secret scoping and the engine
//! - [`infrastructure`]: configuration, logging, secret store and notifiers

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod executor;
pub mod infrastructure;
pub mod pipeline;

// Prelude module for common imports
pub mod prelude;

// Re-export commonly used types
pub use executor::{
    CancellationToken, CommandRunner, Notifier, PipelineEngine, PlannedStage, ProcessRunner,
    RunContext, SecretResolver, TempFileManager,
};
pub use infrastructure::{Config, LogNotifier, SecretStore, WebhookNotifier};
pub use pipeline::{
    Environment, PipelineBuilder, PipelineRun, PipelineSpec, RunReport, RunStatus, StageBuilder,
    StageResult, StageSpec, Validate, expand_variables,
};

/// Version of the stageline crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
