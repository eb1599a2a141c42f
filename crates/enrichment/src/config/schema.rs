use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::secrets::TokenSource;

/// Path prefix of the enrichment API on the backend.
pub const API_PREFIX: &str = "/api/enrichment";

pub const ENV_API_URL: &str = "ENRICHMENT_API_URL";
pub const ENV_API_TOKEN: &str = "ENRICHMENT_API_TOKEN";
pub const ENV_JOB_POLL_SECS: &str = "ENRICHMENT_JOB_POLL_SECS";
pub const ENV_EXPORT_POLL_SECS: &str = "ENRICHMENT_EXPORT_POLL_SECS";

/// Upper bound for every timeout and poll interval: one day.
pub const MAX_PERIOD_SECS: u64 = 86_400;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Refresh period of a single job watch.
    #[serde(default = "default_job_poll")]
    pub job_poll_interval_secs: u64,
    /// Refresh period of an export's job panel.
    #[serde(default = "default_export_poll")]
    pub export_poll_interval_secs: u64,
    #[serde(default, skip_serializing)]
    pub api_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token_env_var: Option<String>,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_job_poll() -> u64 {
    5
}

fn default_export_poll() -> u64 {
    10
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            job_poll_interval_secs: default_job_poll(),
            export_poll_interval_secs: default_export_poll(),
            api_token: None,
            api_token_file: None,
            api_token_env_var: None,
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with `ENRICHMENT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Overlays `ENRICHMENT_*` environment variables onto this config.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(url) = env_value(ENV_API_URL) {
            self.base_url = url;
        }
        if let Some(token) = env_value(ENV_API_TOKEN) {
            self.api_token = Some(token);
        }
        if let Some(secs) = env_secs(ENV_JOB_POLL_SECS)? {
            self.job_poll_interval_secs = secs;
        }
        if let Some(secs) = env_secs(ENV_EXPORT_POLL_SECS)? {
            self.export_poll_interval_secs = secs;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.base_url.trim();
        if url.is_empty() {
            return Err(ConfigError::Validation {
                message: "baseUrl must not be empty".to_string(),
            });
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Validation {
                message: format!("baseUrl must be an http(s) URL, got '{}'", url),
            });
        }

        for (name, secs) in [
            ("requestTimeoutSecs", self.request_timeout_secs),
            ("connectTimeoutSecs", self.connect_timeout_secs),
            ("jobPollIntervalSecs", self.job_poll_interval_secs),
            ("exportPollIntervalSecs", self.export_poll_interval_secs),
        ] {
            if !(1..=MAX_PERIOD_SECS).contains(&secs) {
                return Err(ConfigError::Validation {
                    message: format!(
                        "{} must be between 1 and {} seconds, got {}",
                        name, MAX_PERIOD_SECS, secs
                    ),
                });
            }
        }

        Ok(())
    }

    /// `{baseUrl}/api/enrichment` without a trailing slash.
    pub fn api_root(&self) -> String {
        format!("{}{}", self.base_url.trim().trim_end_matches('/'), API_PREFIX)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn job_poll_interval(&self) -> Duration {
        Duration::from_secs(self.job_poll_interval_secs)
    }

    pub fn export_poll_interval(&self) -> Duration {
        Duration::from_secs(self.export_poll_interval_secs)
    }

    pub fn token_source(&self) -> TokenSource<'_> {
        TokenSource {
            inline: self.api_token.as_deref(),
            file: self.api_token_file.as_deref(),
            env_var: self.api_token_env_var.as_deref(),
        }
    }

    pub fn resolve_token(&self) -> Result<Option<SecretString>, ConfigError> {
        Ok(self.token_source().resolve_optional()?)
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_secs(name: &str) -> Result<Option<u64>, ConfigError> {
    match env_value(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::Validation {
                message: format!("{} must be a whole number of seconds: {}", name, e),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;

    fn clear_env() {
        for name in [
            ENV_API_URL,
            ENV_API_TOKEN,
            ENV_JOB_POLL_SECS,
            ENV_EXPORT_POLL_SECS,
        ] {
            std::env::remove_var(name);
        }
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.job_poll_interval(), Duration::from_secs(5));
        assert_eq!(config.export_poll_interval(), Duration::from_secs(10));
        assert_eq!(config.api_root(), "http://localhost:8000/api/enrichment");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_api_root_strips_trailing_slash() {
        let config = ClientConfig {
            base_url: "https://investors.example.com/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.api_root(),
            "https://investors.example.com/api/enrichment"
        );
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = ClientConfig {
            job_poll_interval_secs: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn test_oversized_interval_rejected() {
        let config = ClientConfig {
            export_poll_interval_secs: 100_000_000_000,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("exportPollIntervalSecs"));

        let config = ClientConfig {
            request_timeout_secs: MAX_PERIOD_SECS,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_from_env_overlay() {
        clear_env();
        std::env::set_var(ENV_API_URL, "https://api.example.com");
        std::env::set_var(ENV_API_TOKEN, "tok-123");
        std::env::set_var(ENV_JOB_POLL_SECS, "2");

        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.base_url, "https://api.example.com");
        assert_eq!(config.job_poll_interval_secs, 2);
        assert_eq!(config.export_poll_interval_secs, 10);
        let token = config.resolve_token().unwrap().unwrap();
        assert_eq!(token.expose_secret(), "tok-123");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_bad_interval() {
        clear_env();
        std::env::set_var(ENV_EXPORT_POLL_SECS, "soon");
        assert!(ClientConfig::from_env().is_err());
        clear_env();
    }

    #[test]
    fn test_token_never_serialized() {
        let config = ClientConfig {
            api_token: Some("secret".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }
}
