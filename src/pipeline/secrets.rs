//! Secret references declared by stages
//!
//! A [`SecretRef`] names a credential and the shape the stage expects it to
//! have. It never carries the secret value itself.

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

use super::Validate;
use super::errors::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Expected shape of a resolved secret
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretShape {
    /// Username and password pair
    UsernamePassword,
    /// File contents, materialized as a transient file
    File,
    /// Opaque string such as a token
    Text,
}

impl fmt::Display for SecretShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UsernamePassword => write!(f, "username_password"),
            Self::File => write!(f, "file"),
            Self::Text => write!(f, "text"),
        }
    }
}

/// A named credential requirement of a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    /// Name the resolver looks the secret up by
    pub name: String,

    /// Shape the stage expects
    pub shape: SecretShape,

    /// Environment variable to bind the value to for the stage's processes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
}

impl SecretRef {
    /// Creates a new secret reference
    pub fn new(name: impl Into<String>, shape: SecretShape) -> Self {
        Self {
            name: name.into(),
            shape,
            env: None,
        }
    }

    /// Username/password reference
    pub fn username_password(name: impl Into<String>) -> Self {
        Self::new(name, SecretShape::UsernamePassword)
    }

    /// File reference
    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, SecretShape::File)
    }

    /// Opaque text reference
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, SecretShape::Text)
    }

    /// Binds the resolved value to an environment variable
    pub fn bind_env(mut self, var: impl Into<String>) -> Self {
        self.env = Some(var.into());
        self
    }
}

pub(crate) fn is_valid_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Names addressable as `${secret:NAME}`: `[A-Za-z0-9_][A-Za-z0-9_-]*`
fn is_valid_secret_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphanumeric() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl Validate for SecretRef {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if !is_valid_secret_name(&self.name) {
            return Err(ValidationError::InvalidSecretName {
                name: self.name.clone(),
            });
        }
        if let Some(ref var) = self.env
            && !is_valid_env_name(var)
        {
            return Err(ValidationError::InvalidEnvName { name: var.clone() });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_ref_constructors() {
        assert_eq!(
            SecretRef::username_password("nexus").shape,
            SecretShape::UsernamePassword
        );
        assert_eq!(SecretRef::file("kubeconfig").shape, SecretShape::File);
        assert_eq!(SecretRef::text("sonar").shape, SecretShape::Text);
    }

    #[test]
    fn test_secret_ref_env_binding_validation() {
        assert!(SecretRef::text("token").bind_env("SONAR_TOKEN").validate().is_ok());
        assert!(matches!(
            SecretRef::text("token").bind_env("1BAD").validate(),
            Err(ValidationError::InvalidEnvName { .. })
        ));
        assert!(matches!(
            SecretRef::text("").validate(),
            Err(ValidationError::EmptyName)
        ));
    }

    #[test]
    fn test_secret_name_must_be_addressable() {
        for name in ["nexus", "ssh-key", "SONAR_TOKEN", "0day"] {
            assert!(SecretRef::text(name).validate().is_ok(), "{name}");
        }
        for name in ["nexus.creds", "a/b", "-lead", "with space", "}"] {
            assert!(
                matches!(
                    SecretRef::text(name).validate(),
                    Err(ValidationError::InvalidSecretName { .. })
                ),
                "{name}"
            );
        }
    }

    #[test]
    fn test_secret_shape_deserialize() {
        let shape: SecretShape = serde_yaml::from_str("username_password").unwrap();
        assert_eq!(shape, SecretShape::UsernamePassword);
        assert_eq!(SecretShape::File.to_string(), "file");
    }
}
