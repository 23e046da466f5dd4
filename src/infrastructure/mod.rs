//! Infrastructure layer
//!
//! This module contains external integrations and adapters.

mod config;
mod logging;
mod notifier;
mod secret_store;

pub use config::{Config, ConfigError};
pub use logging::init_logging;
pub use notifier::{LogNotifier, WebhookNotifier};
pub use secret_store::{SecretStore, SecretStoreError};
