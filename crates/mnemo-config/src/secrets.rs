//! API key resolution.
//!
//! Resolution order:
//! 1. Config file value (with a load-time warning)
//! 2. Environment variable

/// Environment variable read for OpenAI-compatible credentials.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Result of API key resolution with provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSecret {
    pub value: String,
    pub source: SecretSource,
}

/// Where a secret was resolved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    /// Config file (plaintext).
    ConfigFile,
    /// Environment variable.
    EnvVar(String),
}

impl std::fmt::Display for SecretSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretSource::ConfigFile => write!(f, "config file (plaintext)"),
            SecretSource::EnvVar(var) => write!(f, "env var {}", var),
        }
    }
}

/// Resolve an API key from the config value, then `env_var`. Empty values are skipped.
pub fn resolve_api_key(config_value: Option<&str>, env_var: &str) -> Option<ResolvedSecret> {
    if let Some(value) = config_value
        && !value.is_empty()
    {
        return Some(ResolvedSecret {
            value: value.to_string(),
            source: SecretSource::ConfigFile,
        });
    }

    std::env::var(env_var)
        .ok()
        .filter(|v| !v.is_empty())
        .map(|value| ResolvedSecret {
            value,
            source: SecretSource::EnvVar(env_var.to_string()),
        })
}
