use std::{net::SocketAddr, time::Duration};

use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MAX_TOKENS: u32 = 150;
pub const MAX_TOKENS_CEILING: u32 = 4096;
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing upstream API key (set OPENROUTER_API_KEY)")]
    MissingApiKey,
    #[error("{var} must be a positive integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
    #[error("BIND_ADDR is not a socket address: {0:?}")]
    InvalidBindAddr(String),
}

/// Process configuration for the proxy server.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub upstream_timeout: Duration,
    pub bind_addr: SocketAddr,
}

impl AppConfig {
    /// Reads the configuration from the environment. `.env` must already be
    /// loaded by the caller.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| dotenvy::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = var("OPENROUTER_API_KEY")
            .or_else(|| var("OPENROUTER_API_KEY_FREE"))
            .ok_or(ConfigError::MissingApiKey)?;

        let base_url = var("UPSTREAM_BASE_URL")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let max_tokens = match var("COMPLETION_MAX_TOKENS") {
            Some(raw) => {
                let n = parse_positive("COMPLETION_MAX_TOKENS", &raw)?;
                n.min(u64::from(MAX_TOKENS_CEILING)) as u32
            }
            None => DEFAULT_MAX_TOKENS,
        };

        let timeout_secs = match var("UPSTREAM_TIMEOUT_SECS") {
            Some(raw) => parse_positive("UPSTREAM_TIMEOUT_SECS", &raw)?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        let bind_raw = var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidBindAddr(bind_raw.clone()))?;

        Ok(Self {
            api_key,
            base_url,
            max_tokens,
            upstream_timeout: Duration::from_secs(timeout_secs),
            bind_addr,
        })
    }
}

fn parse_positive(var: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidNumber {
            var,
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn applies_defaults() {
        let cfg = load(&[("OPENROUTER_API_KEY", "sk-1")]).unwrap();
        assert_eq!(cfg.api_key, "sk-1");
        assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(cfg.upstream_timeout, Duration::from_secs(60));
        assert_eq!(cfg.bind_addr.port(), 3000);
    }

    #[test]
    fn falls_back_to_free_tier_key() {
        let cfg = load(&[("OPENROUTER_API_KEY_FREE", "sk-free")]).unwrap();
        assert_eq!(cfg.api_key, "sk-free");
    }

    #[test]
    fn requires_an_api_key() {
        assert!(matches!(
            load(&[("OPENROUTER_API_KEY", "  ")]),
            Err(ConfigError::MissingApiKey)
        ));
    }

    #[test]
    fn clamps_token_budget_and_strips_trailing_slash() {
        let cfg = load(&[
            ("OPENROUTER_API_KEY", "sk"),
            ("COMPLETION_MAX_TOKENS", "100000"),
            ("UPSTREAM_BASE_URL", "http://localhost:8080/v1/"),
        ])
        .unwrap();
        assert_eq!(cfg.max_tokens, MAX_TOKENS_CEILING);
        assert_eq!(cfg.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn rejects_bad_numbers() {
        for bad in ["0", "-3", "lots"] {
            let err = load(&[("OPENROUTER_API_KEY", "sk"), ("COMPLETION_MAX_TOKENS", bad)])
                .unwrap_err();
            assert!(matches!(
                err,
                ConfigError::InvalidNumber {
                    var: "COMPLETION_MAX_TOKENS",
                    ..
                }
            ));
        }
    }

    #[test]
    fn rejects_bad_bind_addr() {
        let err = load(&[("OPENROUTER_API_KEY", "sk"), ("BIND_ADDR", "localhost")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBindAddr(_)));
    }
}
