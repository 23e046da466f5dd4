//! `stageline run` - Execute a pipeline
//!
//! Loads configuration and secrets, runs the pipeline with the local process
//! runner and exits with the run status:
//!
//! | Status | Exit code |
//! |--------|-----------|
//! | `SUCCEEDED` | 0 |
//! | `FAILED` | 1 |
//! | `ABORTED` | 2 |
//!
//! ## Usage
//!
//! ```bash
//! stageline run pipeline.yaml --job demo-app --build-number 42
//! stageline run pipeline.yaml --secrets secrets.yaml --json > report.json
//! ```

use anyhow::{Context, Result};
use stageline::executor::{
    CancellationToken, Notifier, PipelineEngine, ProcessRunner, RunContext, RunnerConfig,
    TempFileManager,
};
use stageline::infrastructure::{Config, LogNotifier, SecretStore, WebhookNotifier, init_logging};
use stageline::pipeline::{NotifyResult, PipelineSpec, RunReport};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

/// Arguments of `stageline run`
#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Pipeline definition (YAML)
    pub file: PathBuf,

    /// Job name (defaults to the pipeline name)
    #[arg(long, env = "JOB_NAME")]
    pub job: Option<String>,

    /// Build number
    #[arg(long, env = "BUILD_NUMBER")]
    pub build_number: Option<u64>,

    /// Secrets file (YAML)
    #[arg(long)]
    pub secrets: Option<PathBuf>,

    /// Webhook receiving the final report
    #[arg(long)]
    pub webhook: Option<String>,

    /// Directory stages run in
    #[arg(long)]
    pub workspace: Option<PathBuf>,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Runs the pipeline and maps its status to an exit code
pub fn execute(config_path: Option<&Path>, args: &RunArgs) -> Result<ExitCode> {
    let mut config = Config::load(config_path).context("Failed to load configuration")?;
    if let Some(ref workspace) = args.workspace {
        config.workspace.clone_from(workspace);
    }
    if let Some(ref secrets) = args.secrets {
        config.secrets_file = Some(secrets.clone());
    }
    if let Some(ref webhook) = args.webhook {
        config.webhook_url = Some(webhook.clone());
    }
    config.validate().context("Invalid configuration")?;
    init_logging(&config.log_level);

    // Validation happens in the engine so an invalid definition still
    // yields a FAILED run and a notification.
    let spec = PipelineSpec::load(&args.file)
        .with_context(|| format!("Failed to load pipeline: {}", args.file.display()))?;

    std::fs::create_dir_all(&config.workspace).with_context(|| {
        format!("Failed to create workspace: {}", config.workspace.display())
    })?;
    let workspace = config.workspace.canonicalize().with_context(|| {
        format!("Failed to resolve workspace: {}", config.workspace.display())
    })?;

    let build_number = args.build_number.unwrap_or(1);
    let job_name = args.job.clone().unwrap_or_else(|| spec.name.clone());
    let files = TempFileManager::new(&workspace, &job_name, &build_number.to_string())
        .context("Failed to prepare secret directory")?;

    let mut store = SecretStore::new(files.clone());
    if let Some(ref path) = config.secrets_file {
        store.load_file(path)?;
    }
    store.load_env_vars(&config.secret_env_prefix, std::env::vars());

    let runner = ProcessRunner::with_config(RunnerConfig {
        cwd: None,
        max_output_bytes: config.max_output_bytes,
        drain_grace: config.kill_grace(),
        scrub_env_prefixes: vec![config.secret_env_prefix.clone()],
    });
    let notifier: Arc<dyn Notifier> = match config.webhook_url {
        Some(ref url) => Arc::new(WebhookNotifier::new(url.clone(), config.notify_timeout())?),
        None => Arc::new(LogNotifier::new()),
    };
    let engine = PipelineEngine::new(Arc::new(runner), Arc::new(store), notifier)
        .with_notify_timeout(config.notify_timeout());
    let ctx = RunContext::new(workspace)
        .with_job_name(job_name)
        .with_build_number(build_number);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let report = runtime.block_on(async {
        let cancel = CancellationToken::new();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received, cancelling run");
                    cancel.cancel();
                }
            })
        };
        let report = engine.run(&spec, &ctx, &cancel).await;
        watcher.abort();
        report
    });

    match files.cleanup() {
        Ok(0) => {}
        Ok(removed) => tracing::warn!(removed, "Removed leftover secret files"),
        Err(err) => tracing::warn!(error = %err, "Failed to sweep secret files"),
    }

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize run report")?
        );
    } else {
        print!("{}", format_summary(&report));
    }

    Ok(ExitCode::from(report.exit_code()))
}

/// Human-readable run summary
pub fn format_summary(report: &RunReport) -> String {
    let run = &report.run;
    let mut out = format!("Pipeline {} #{}: {}", run.job_name, run.build_number, run.status());
    if let Some(duration) = run.duration() {
        let _ = write!(out, " ({:.1}s)", duration.num_milliseconds() as f64 / 1000.0);
    }
    out.push('\n');

    for stage in run.stages() {
        let marker = match (&stage.failure, stage.tolerated) {
            (None, _) => "ok",
            (Some(_), true) => "warn",
            (Some(_), false) => "fail",
        };
        let _ = write!(
            out,
            "  [{marker:<4}] {}. {} ({:.1}s)",
            stage.ordinal,
            stage.name,
            stage.duration.as_secs_f64()
        );
        if let Some(ref failure) = stage.failure {
            let _ = write!(out, ": {failure}");
        }
        out.push('\n');
    }

    if let Some(reason) = run.reason() {
        let _ = writeln!(out, "Reason: {reason}");
    }
    match report.notification {
        NotifyResult::Delivered => out.push_str("Notification: delivered\n"),
        NotifyResult::Failed { ref reason } => {
            let _ = writeln!(out, "Notification: failed ({reason})");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use stageline::executor::{
        CommandRunner, Invocation, NotifyError, ResolvedSecret, RunOutput, RunnerFault,
        SecretError, SecretResolver,
    };
    use stageline::pipeline::{
        NotificationPayload, PipelineBuilder, RunStatus, SecretRef, StageBuilder,
    };

    struct ExitWith(i32);

    #[async_trait::async_trait]
    impl CommandRunner for ExitWith {
        async fn run(&self, _: &Invocation, _: &CancellationToken) -> Result<RunOutput, RunnerFault> {
            Ok(RunOutput {
                exit_code: self.0,
                ..RunOutput::default()
            })
        }
    }

    struct NoSecrets;

    impl SecretResolver for NoSecrets {
        fn resolve(&self, reference: &SecretRef) -> Result<ResolvedSecret, SecretError> {
            Err(SecretError::NotFound {
                name: reference.name.clone(),
            })
        }
    }

    struct Unreachable;

    #[async_trait::async_trait]
    impl Notifier for Unreachable {
        async fn notify(&self, _: &NotificationPayload) -> Result<(), NotifyError> {
            Err(NotifyError::Rejected { status: 502 })
        }
    }

    async fn report(exit_code: i32, tolerate: bool) -> RunReport {
        let spec = PipelineBuilder::new("demo-app")
            .stage(StageBuilder::commands("Build", 1, ["mvn package"]).build_unchecked())
            .stage(
                StageBuilder::commands("Scan Image", 2, ["trivy image demo"])
                    .tolerate_failure(tolerate)
                    .build_unchecked(),
            )
            .build()
            .unwrap();
        let engine = PipelineEngine::new(
            Arc::new(ExitWith(exit_code)),
            Arc::new(NoSecrets),
            Arc::new(Unreachable),
        );
        engine
            .run(
                &spec,
                &RunContext::new(std::env::temp_dir()).with_build_number(9),
                &CancellationToken::new(),
            )
            .await
    }

    #[tokio::test]
    async fn test_summary_for_aborted_run() {
        let report = report(1, false).await;
        assert_eq!(report.status(), RunStatus::Aborted);

        let summary = format_summary(&report);
        assert!(summary.starts_with("Pipeline demo-app #9: ABORTED"));
        assert!(summary.contains("[fail] 1. Build"));
        assert!(summary.contains("Reason: stage 'Build' failed"));
        assert!(summary.contains("Notification: failed (notification rejected with HTTP status 502)"));
        assert_eq!(report.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_summary_for_succeeded_run() {
        let report = report(0, false).await;
        let summary = format_summary(&report);
        assert!(summary.contains("[ok  ] 1. Build"));
        assert!(summary.contains("[ok  ] 2. Scan Image"));
        assert!(!summary.contains("Reason"));
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_report_json_round_trip_fields() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let report = runtime.block_on(report(0, false));
        let json: serde_json::Value = serde_json::to_value(&report).unwrap();
        assert_eq!(json["run"]["status"], "succeeded");
        assert_eq!(json["run"]["stages"].as_array().unwrap().len(), 2);
        assert_eq!(json["notification"]["result"], "failed");
    }
}
