//! stageline - run sequential CI/CD pipelines from the command line
//!
//! ## Commands
//!
//! - `stageline run` - Execute a pipeline; the exit code reflects its status
//! - `stageline check` - Validate a pipeline and print its plan
//! - `stageline completions` - Generate shell completions
//!
//! ## Quick Start
//!
//! ```bash
//! # Validate a pipeline
//! stageline check pipeline.yaml
//!
//! # Run it with a secrets file
//! stageline run pipeline.yaml --job demo-app --build-number 42 --secrets secrets.yaml
//!
//! # Generate shell completions
//! stageline completions bash > /etc/bash_completion.d/stageline
//! ```

use std::process::ExitCode;

mod cli;

fn main() -> ExitCode {
    match cli::run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            if std::env::var("STAGELINE_VERBOSE").is_ok() {
                eprintln!("{e:?}");
            }
            ExitCode::FAILURE
        }
    }
}
