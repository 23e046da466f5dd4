//! Stage-scoped secrets
//!
//! A [`SecretScope`] holds every secret a stage declared, from acquisition
//! until the stage ends. Dropping the scope erases materialized files, so
//! secrets never outlive the stage on any exit path.

use super::traits::{ResolvedSecret, SecretError, SecretResolver};
use crate::pipeline::{SecretRef, SecretShape, StageFailure};
const MASK: &str = "****";

struct ScopedSecret {
    reference: SecretRef,
    value: ResolvedSecret,
    /// Texts replaced by `****` in captured output
    needles: Vec<String>,
}

/// Secrets acquired for one stage invocation
pub struct SecretScope {
    secrets: Vec<ScopedSecret>,
}

impl SecretScope {
    /// An empty scope
    #[must_use]
    pub fn empty() -> Self {
        Self {
            secrets: Vec::new(),
        }
    }

    /// Resolves every reference, in order
    ///
    /// Secrets acquired before a failing reference are erased before the
    /// error is returned.
    ///
    /// # Errors
    ///
    /// Returns the stage failure matching the first resolution error.
    pub fn acquire(refs: &[SecretRef], resolver: &dyn SecretResolver) -> Result<Self, StageFailure> {
        let mut scope = Self::empty();
        for reference in refs {
            let value = resolver.resolve(reference).map_err(|err| to_failure(&err))?;
            if value.shape() != reference.shape {
                return Err(StageFailure::shape_mismatch(
                    &reference.name,
                    reference.shape,
                    value.shape(),
                ));
            }
            let needles = mask_needles(&value).map_err(|err| StageFailure::RunnerFault {
                reason: format!("failed to read back secret '{}': {err}", reference.name),
            })?;
            tracing::debug!(secret = %reference.name, shape = %reference.shape, "Acquired secret");
            scope.secrets.push(ScopedSecret {
                reference: reference.clone(),
                value,
                needles,
            });
        }
        Ok(scope)
    }

    /// Number of secrets held
    #[must_use]
    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    /// Returns true if no secret is held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Value substituted for `${secret:name}` or `${secret:name.field}`
    ///
    /// # Errors
    ///
    /// Returns [`StageFailure::SecretShapeMismatch`] when `field` does not
    /// exist on the secret's shape and [`StageFailure::Template`] for unknown
    /// names or fields.
    pub fn value(&self, name: &str, field: Option<&str>) -> Result<String, StageFailure> {
        let secret = self
            .secrets
            .iter()
            .find(|s| s.reference.name == name)
            .ok_or_else(|| StageFailure::Template {
                reason: format!("secret '{name}' is not declared by this stage"),
            })?;

        let wanted = match field {
            None => None,
            Some("username" | "password") => Some(SecretShape::UsernamePassword),
            Some("path") => Some(SecretShape::File),
            Some(other) => {
                return Err(StageFailure::Template {
                    reason: format!("unknown secret field '{other}'"),
                });
            }
        };
        let actual = secret.value.shape();
        if let Some(wanted) = wanted
            && wanted != actual
        {
            return Err(StageFailure::shape_mismatch(name, wanted, actual));
        }

        Ok(match (&secret.value, field) {
            (ResolvedSecret::UsernamePassword { username, .. }, Some("username")) => username.clone(),
            (ResolvedSecret::UsernamePassword { password, .. }, Some("password")) => password.clone(),
            (value, _) => whole_value(value),
        })
    }

    /// Environment variables for secrets declared with an `env` binding
    ///
    /// Pairs bind `VAR=user:pass`, `VAR_USR` and `VAR_PSW`; files bind the
    /// file path; text binds the value.
    #[must_use]
    pub fn env_bindings(&self) -> Vec<(String, String)> {
        let mut vars = Vec::new();
        for secret in &self.secrets {
            let Some(ref var) = secret.reference.env else {
                continue;
            };
            if let ResolvedSecret::UsernamePassword { username, password } = &secret.value {
                vars.push((format!("{var}_USR"), username.clone()));
                vars.push((format!("{var}_PSW"), password.clone()));
            }
            vars.push((var.clone(), whole_value(&secret.value)));
        }
        vars
    }

    /// Replaces every secret value occurring in `text` with `****`
    #[must_use]
    pub fn mask(&self, text: &str) -> String {
        let mut needles: Vec<&str> = self
            .secrets
            .iter()
            .flat_map(|s| s.needles.iter().map(String::as_str))
            .filter(|n| !n.is_empty())
            .collect();
        needles.sort_by_key(|n| std::cmp::Reverse(n.len()));

        let mut masked = text.to_string();
        for needle in needles {
            if masked.contains(needle) {
                masked = masked.replace(needle, MASK);
            }
        }
        masked
    }

    /// Erases every secret, reporting files that could not be removed
    pub fn release(self) {
        for secret in self.secrets {
            if let ResolvedSecret::File(file) = secret.value {
                let path = file.path().to_path_buf();
                if let Err(err) = file.close() {
                    tracing::warn!(
                        secret = %secret.reference.name,
                        path = %path.display(),
                        error = %err,
                        "Failed to remove secret file"
                    );
                }
            }
        }
    }
}

fn whole_value(value: &ResolvedSecret) -> String {
    match value {
        ResolvedSecret::UsernamePassword { username, password } => format!("{username}:{password}"),
        ResolvedSecret::File(file) => file.path().to_string_lossy().to_string(),
        ResolvedSecret::Text(text) => text.clone(),
    }
}

/// File secrets are masked by their contents, read back from disk
fn mask_needles(value: &ResolvedSecret) -> std::io::Result<Vec<String>> {
    Ok(match value {
        ResolvedSecret::UsernamePassword { username, password } => {
            vec![format!("{username}:{password}"), password.clone()]
        }
        ResolvedSecret::Text(text) => vec![text.clone()],
        ResolvedSecret::File(file) => {
            let contents = String::from_utf8_lossy(&std::fs::read(file.path())?).into_owned();
            let trimmed = contents.trim().to_string();
            if trimmed == contents {
                vec![contents]
            } else {
                vec![contents, trimmed]
            }
        }
    })
}

fn to_failure(err: &SecretError) -> StageFailure {
    match err {
        SecretError::NotFound { name } => StageFailure::SecretNotFound { name: name.clone() },
        SecretError::ShapeMismatch {
            name,
            expected,
            actual,
        } => StageFailure::shape_mismatch(name, *expected, *actual),
        SecretError::Materialize { .. } => StageFailure::RunnerFault {
            reason: err.to_string(),
        },
    }
}
