//! Command templates
//!
//! A template is opaque command text with declared placeholders:
//!
//! | Placeholder | Expands to |
//! |-------------|------------|
//! | `${VAR}` | a pipeline or run variable (`JOB_NAME`, `BUILD_NUMBER`, ...) |
//! | `${secret:NAME}` | the secret's text, file path, or `user:pass` |
//! | `${secret:NAME.username}` | username of a pair |
//! | `${secret:NAME.password}` | password of a pair |
//! | `${secret:NAME.path}` | path of a materialized file |
//!
//! The text is split into arguments with shell quoting rules *before*
//! substitution, so a substituted value always stays inside the argument it
//! was written in and is never re-parsed by a shell.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

static PLACEHOLDER: once_cell::sync::Lazy<Regex> = once_cell::sync::Lazy::new(|| {
    Regex::new(
        r"\$\{(?:secret:([A-Za-z0-9_][A-Za-z0-9_\-]*)(?:\.([a-z]+))?|([A-Za-z_][A-Za-z0-9_]*))\}",
    )
    .expect("placeholder pattern is valid")
});

/// One declared command of a stage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandTemplate(String);

/// A `${secret:...}` occurrence in a template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecretPlaceholder<'a> {
    /// Secret name
    pub name: &'a str,
    /// Optional field (`username`, `password`, `path`)
    pub field: Option<&'a str>,
}

impl CommandTemplate {
    /// Creates a template from raw text
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Raw template text, placeholders unexpanded
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits the template into arguments without substituting anything
    ///
    /// # Errors
    ///
    /// Returns a description of the problem when quoting is unbalanced or the
    /// template is empty.
    pub fn split(&self) -> Result<Vec<String>, String> {
        let words = shell_words::split(&self.0).map_err(|e| e.to_string())?;
        if words.is_empty() {
            return Err("command is empty".to_string());
        }
        Ok(words)
    }

    /// Lists every secret placeholder in the template
    #[must_use]
    pub fn secret_placeholders(&self) -> Vec<SecretPlaceholder<'_>> {
        PLACEHOLDER
            .captures_iter(&self.0)
            .filter_map(|caps| {
                caps.get(1).map(|name| SecretPlaceholder {
                    name: name.as_str(),
                    field: caps.get(2).map(|m| m.as_str()),
                })
            })
            .collect()
    }

    /// Splits the template and expands placeholders in each argument
    ///
    /// Variables missing from `vars` are left as written. Secret
    /// placeholders are passed to `secret` and its error aborts rendering.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Malformed`] when the template cannot be split
    /// and [`RenderError::Secret`] when `secret` fails.
    pub fn render<E, F>(
        &self,
        vars: &HashMap<String, String>,
        mut secret: F,
    ) -> Result<Vec<String>, RenderError<E>>
    where
        F: FnMut(&str, Option<&str>) -> Result<String, E>,
    {
        let words = self.split().map_err(RenderError::Malformed)?;
        words
            .iter()
            .map(|word| expand_word(word, vars, &mut secret).map_err(RenderError::Secret))
            .collect()
    }
}

impl From<&str> for CommandTemplate {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for CommandTemplate {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Failure while rendering a template
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError<E> {
    /// The template could not be split into arguments
    #[error("malformed command template: {0}")]
    Malformed(String),

    /// A secret placeholder could not be filled
    #[error("{0}")]
    Secret(E),
}

fn expand_word<E, F>(word: &str, vars: &HashMap<String, String>, secret: &mut F) -> Result<String, E>
where
    F: FnMut(&str, Option<&str>) -> Result<String, E>,
{
    let mut out = String::with_capacity(word.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(word) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&word[last..whole.start()]);
        if let Some(name) = caps.get(1) {
            out.push_str(&secret(name.as_str(), caps.get(2).map(|m| m.as_str()))?);
        } else {
            out.push_str(&lookup_var(&caps, vars));
        }
        last = whole.end();
    }
    out.push_str(&word[last..]);
    Ok(out)
}

fn lookup_var(caps: &Captures<'_>, vars: &HashMap<String, String>) -> String {
    let name = caps.get(3).map_or("", |m| m.as_str());
    vars.get(name).cloned().unwrap_or_else(|| {
        caps.get(0)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    })
}

/// Expands `${VAR}` variables in free text
///
/// Secret placeholders and unknown variables are kept unchanged. Used for
/// non-command text such as notification links.
///
/// # Example
///
/// ```rust
/// use std::collections::HashMap;
/// use stageline::expand_variables;
///
/// let env = HashMap::from([("BUILD_NUMBER".to_string(), "7".to_string())]);
/// assert_eq!(expand_variables("build #${BUILD_NUMBER}", &env), "build #7");
/// ```
#[must_use]
pub fn expand_variables(input: &str, env: &HashMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(input, |caps: &Captures<'_>| {
            if caps.get(1).is_some() {
                caps.get(0)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default()
            } else {
                lookup_var(caps, env)
            }
        })
        .to_string()
}
