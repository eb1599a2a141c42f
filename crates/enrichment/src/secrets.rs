//! API token resolution.
//!
//! The enrichment API token can be supplied three ways, checked in this order:
//!
//! 1. **Inline** - `apiToken` in the client config (local testing)
//! 2. **File** - `apiTokenFile`, e.g. a mounted Docker secret
//! 3. **Environment** - `apiTokenEnvVar`, naming the variable that holds it

use secrecy::SecretString;
use std::fs;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No token source provided (need one of: inline value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read token from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Token source '{0}' resolved to an empty value")]
    Empty(String),
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Where a token was configured to come from.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenSource<'a> {
    pub inline: Option<&'a str>,
    pub file: Option<&'a str>,
    pub env_var: Option<&'a str>,
}

impl<'a> TokenSource<'a> {
    pub fn is_configured(&self) -> bool {
        non_empty(self.inline).is_some()
            || non_empty(self.file).is_some()
            || non_empty(self.env_var).is_some()
    }

    /// Resolves the token, failing when nothing is configured.
    pub fn resolve(&self) -> Result<SecretString> {
        if let Some(value) = non_empty(self.inline) {
            return Ok(SecretString::from(value.to_string()));
        }

        if let Some(path) = non_empty(self.file) {
            let expanded = expand_home(path);
            let content = fs::read_to_string(&expanded).map_err(|e| SecretError::FileReadError {
                path: expanded.clone(),
                source: e,
            })?;
            let token = content.trim();
            if token.is_empty() {
                return Err(SecretError::Empty(expanded));
            }
            return Ok(SecretString::from(token.to_string()));
        }

        if let Some(name) = non_empty(self.env_var) {
            return match std::env::var(name) {
                Ok(value) if value.trim().is_empty() => Err(SecretError::Empty(name.to_string())),
                Ok(value) => Ok(SecretString::from(value.trim().to_string())),
                Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                    name: name.to_string(),
                }),
                Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                    name: name.to_string(),
                }),
            };
        }

        Err(SecretError::NoSourceProvided)
    }

    /// Like [`resolve`](Self::resolve) but `None` when no source is configured.
    pub fn resolve_optional(&self) -> Result<Option<SecretString>> {
        if !self.is_configured() {
            return Ok(None);
        }
        self.resolve().map(Some)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.is_empty())
}

/// Expands a leading `~` to the home directory. `~user` is not supported.
fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            let home = home.to_string_lossy();
            if path == "~" {
                return home.into_owned();
            }
            return path.replacen('~', &home, 1);
        }
    }
    path.to_string()
}
