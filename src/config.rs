//! # Client Configuration
//!
//! [`ClientConfig`] gathers the knobs for an HTTP-backed
//! [`ResourceFactory`](crate::ResourceFactory). Values come from code through the
//! `with_*` builders or from the environment through [`ClientConfig::from_env`]:
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `TASTY_API_URL` | Root of the TastyPie API, e.g. `http://localhost:8000/api/v1/` | required |
//! | `TASTY_TIMEOUT_SECS` | Per-request timeout | `30` |
//! | `TASTY_USER_AGENT` | `User-Agent` header | `tastytopping/<version>` |
//! | `TASTY_CACHING` | Whether resources cache their fields (`true`/`false`) | `true` |

use crate::error::{Result, TastyError};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api_url: String,
    pub timeout: Duration,
    pub user_agent: String,
    pub caching: bool,
}

impl ClientConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            timeout: Duration::from_secs(30),
            user_agent: concat!("tastytopping/", env!("CARGO_PKG_VERSION")).to_string(),
            caching: true,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_caching(mut self, caching: bool) -> Self {
        self.caching = caching;
        self
    }

    /// Reads the configuration from `TASTY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_url = lookup("TASTY_API_URL").ok_or(TastyError::Config {
            key: "TASTY_API_URL",
            reason: "not set".into(),
        })?;
        let mut config = Self::new(api_url);

        if let Some(raw) = lookup("TASTY_TIMEOUT_SECS") {
            let secs = raw.parse::<u64>().map_err(|e| TastyError::Config {
                key: "TASTY_TIMEOUT_SECS",
                reason: e.to_string(),
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(agent) = lookup("TASTY_USER_AGENT") {
            config.user_agent = agent;
        }
        if let Some(raw) = lookup("TASTY_CACHING") {
            config.caching = match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(TastyError::Config {
                        key: "TASTY_CACHING",
                        reason: format!("expected a boolean, got '{other}'"),
                    })
                }
            };
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn reads_all_variables() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("TASTY_API_URL", "http://localhost:8111/test/api/v1/"),
            ("TASTY_TIMEOUT_SECS", "5"),
            ("TASTY_USER_AGENT", "forestry-bot"),
            ("TASTY_CACHING", "off"),
        ]))
        .unwrap();
        assert_eq!(config.api_url, "http://localhost:8111/test/api/v1/");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.user_agent, "forestry-bot");
        assert!(!config.caching);
    }

    #[test]
    fn missing_url_is_an_error() {
        let result = ClientConfig::from_lookup(lookup(&[]));
        assert!(matches!(result, Err(TastyError::Config { key: "TASTY_API_URL", .. })));
    }

    #[test]
    fn malformed_timeout_is_an_error() {
        let result = ClientConfig::from_lookup(lookup(&[
            ("TASTY_API_URL", "http://localhost/api/v1/"),
            ("TASTY_TIMEOUT_SECS", "soon"),
        ]));
        assert!(matches!(result, Err(TastyError::Config { key: "TASTY_TIMEOUT_SECS", .. })));
    }
}
