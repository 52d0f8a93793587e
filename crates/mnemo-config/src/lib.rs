//! Configuration for mnemo.
//!
//! TOML files with optional `[store]`, `[embedding]`, `[policy]`, and `[llm]`
//! sections, layered from the user config directory and a project-local
//! `mnemo.toml`. API keys come from the config file or `OPENAI_API_KEY`.

pub mod discovery;
pub mod error;
pub mod secrets;
pub mod types;

pub use discovery::{
    CONFIG_DIR_ENV, ConfigSource, LoadedConfig, load_config, load_config_file,
    load_config_with_options, load_explicit, user_config_dir, user_config_path,
};
pub use error::{ConfigError, Result};
pub use secrets::{OPENAI_API_KEY_ENV, ResolvedSecret, SecretSource, resolve_api_key};
pub use types::*;
