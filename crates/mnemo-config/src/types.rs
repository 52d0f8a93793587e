//! Configuration types.
//!
//! Every section is optional so a layer can override just what it names.
//! Merging replaces whole sections, later layers winning.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Application name for directory resolution.
pub(crate) const APP_NAME: &str = "mnemo";

/// Default SQLite file name under the data directory.
const DEFAULT_DB_FILE: &str = "mnemo.db";

/// Overrides the data directory holding the default SQLite file.
pub const DATA_DIR_ENV: &str = "MNEMO_DATA_DIR";

/// Default embedding dimension when none is configured.
pub const DEFAULT_DIMENSIONS: usize = 384;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MnemoConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyConfig>,
    /// Chat-completion model for the PII transform and result filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmConfig>,
}

impl MnemoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: MnemoConfig) {
        if other.store.is_some() {
            self.store = other.store;
        }
        if other.embedding.is_some() {
            self.embedding = other.embedding;
        }
        if other.policy.is_some() {
            self.policy = other.policy;
        }
        if other.llm.is_some() {
            self.llm = other.llm;
        }
    }

    pub fn store(&self) -> StoreConfig {
        self.store.clone().unwrap_or_default()
    }

    pub fn embedding(&self) -> EmbeddingConfig {
        self.embedding.clone().unwrap_or_default()
    }

    pub fn policy(&self) -> PolicyConfig {
        self.policy.clone().unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// Which entity store backend to use.
///
/// SQLite is the default so memories outlive the process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    Sqlite,
}

/// `[store]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// SQLite file; `~` expands to the home directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    /// The SQLite path to use: the configured one, or `mnemo.db` under [`user_data_dir`].
    pub fn effective_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(expand_home(path)),
            None => user_data_dir()
                .map(|d| d.join(DEFAULT_DB_FILE))
                .ok_or(ConfigError::NoDataDir),
        }
    }
}

/// `MNEMO_DATA_DIR` if set, else the platform data dir joined with `mnemo`.
pub fn user_data_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::data_dir().map(|d| d.join(APP_NAME))
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &std::path::Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedding
// ─────────────────────────────────────────────────────────────────────────────

/// Embedding provider selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Mock,
    #[serde(rename = "openai")]
    OpenAi,
    Local,
    Process,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Mock => "mock",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Local => "local",
            ProviderKind::Process => "process",
        }
    }
}

/// `[embedding]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: ProviderKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
    pub cache: bool,
    pub fallback_to_mock: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai: Option<OpenAiSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessSection>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Mock,
            model: None,
            dimensions: None,
            cache: true,
            fallback_to_mock: true,
            max_concurrency: None,
            openai: None,
            local: None,
            process: None,
        }
    }
}

impl EmbeddingConfig {
    /// Configured dimension, or the default for the provider and model.
    pub fn effective_dimensions(&self) -> usize {
        if let Some(dims) = self.dimensions {
            return dims;
        }
        match self.provider {
            ProviderKind::OpenAi => match self.model.as_deref() {
                Some(m) if m.contains("large") => 3072,
                _ => 1536,
            },
            _ => DEFAULT_DIMENSIONS,
        }
    }

    /// The `[embedding.process]` section, required for the process provider.
    pub fn require_process(&self) -> Result<&ProcessSection> {
        self.process.as_ref().ok_or_else(|| ConfigError::MissingField {
            field: "process".to_string(),
            context: "[embedding] with provider = \"process\"".to_string(),
        })
    }
}

/// `[embedding.openai]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenAiSection {
    /// Prefer `OPENAI_API_KEY`; a key here triggers a warning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// `[embedding.local]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
}

/// `[embedding.process]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessSection {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Policy and LLM
// ─────────────────────────────────────────────────────────────────────────────

/// `[policy]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub strip_pii_by_default: bool,
    pub filter_by_default: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_importance: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_limit: Option<usize>,
}

/// `[llm]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl LlmConfig {
    pub fn has_plaintext_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_defaults() {
        let config = MnemoConfig::from_toml("").unwrap();
        assert_eq!(config.store().backend, StoreBackend::Sqlite);
        let embedding = config.embedding();
        assert_eq!(embedding.provider, ProviderKind::Mock);
        assert!(embedding.cache);
        assert!(embedding.fallback_to_mock);
        assert_eq!(embedding.effective_dimensions(), DEFAULT_DIMENSIONS);
        assert!(!config.policy().strip_pii_by_default);
    }

    #[test]
    fn test_full_config() {
        let toml = r#"
[store]
backend = "sqlite"
path = "/var/lib/mnemo/db.sqlite"

[embedding]
provider = "process"
dimensions = 8
cache = false
max_concurrency = 2

[embedding.process]
command = "/usr/local/bin/embed"
args = ["--fast"]
timeout_secs = 5

[policy]
strip_pii_by_default = true
default_importance = 3.0

[llm]
model = "gpt-4o-mini"
"#;
        let config = MnemoConfig::from_toml(toml).unwrap();
        let store = config.store();
        assert_eq!(store.backend, StoreBackend::Sqlite);
        assert_eq!(
            store.effective_path().unwrap(),
            PathBuf::from("/var/lib/mnemo/db.sqlite")
        );

        let embedding = config.embedding();
        assert_eq!(embedding.provider, ProviderKind::Process);
        assert!(!embedding.cache);
        assert!(embedding.fallback_to_mock);
        assert_eq!(embedding.effective_dimensions(), 8);
        let process = embedding.require_process().unwrap();
        assert_eq!(process.args, vec!["--fast"]);
        assert_eq!(process.timeout_secs, Some(5));

        assert!(config.policy().strip_pii_by_default);
        assert_eq!(config.policy().default_importance, Some(3.0));
        assert_eq!(config.llm.unwrap().model.as_deref(), Some("gpt-4o-mini"));
    }

    #[test]
    fn test_openai_dimension_defaults() {
        let mut embedding = EmbeddingConfig {
            provider: ProviderKind::OpenAi,
            ..EmbeddingConfig::default()
        };
        assert_eq!(embedding.effective_dimensions(), 1536);
        embedding.model = Some("text-embedding-3-large".into());
        assert_eq!(embedding.effective_dimensions(), 3072);
    }

    #[test]
    fn test_process_section_required() {
        let embedding = EmbeddingConfig {
            provider: ProviderKind::Process,
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            embedding.require_process(),
            Err(ConfigError::MissingField { .. })
        ));
    }

    #[test]
    fn test_merge_replaces_sections() {
        let mut base = MnemoConfig::from_toml("[store]\nbackend = \"sqlite\"\n[policy]\nfilter_by_default = true").unwrap();
        let top = MnemoConfig::from_toml("[store]\nbackend = \"memory\"").unwrap();
        base.merge(top);
        assert_eq!(base.store().backend, StoreBackend::Memory);
        assert!(base.policy().filter_by_default);
    }

    #[test]
    fn test_round_trip_toml() {
        let config = MnemoConfig::from_toml("[embedding]\nprovider = \"openai\"\n").unwrap();
        let text = config.to_toml().unwrap();
        assert!(text.contains("provider = \"openai\""));
        assert_eq!(MnemoConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_expand_home() {
        let plain = PathBuf::from("/tmp/x.db");
        assert_eq!(expand_home(&plain), plain);
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home(std::path::Path::new("~/x.db")), home.join("x.db"));
        }
    }
}
