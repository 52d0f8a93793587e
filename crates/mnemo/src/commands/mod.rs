//! CLI command handlers.

use anyhow::{Context as _, Result};
use console::{Style, style};

use mnemo_config::LoadedConfig;
use mnemo_store::Metadata;

use crate::app::App;

pub mod config;
pub mod facts;
pub mod memory;
pub mod stats;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
    /// Owner of every memory the command touches.
    pub user_id: String,
    /// Merged configuration and where it came from.
    pub loaded: LoadedConfig,
}

impl Context {
    /// Open the configured store and embedder.
    pub async fn open(&self) -> Result<App> {
        App::build(&self.loaded.config).await
    }
}

/// Parse a `--meta` argument holding a JSON object.
pub fn parse_metadata(raw: Option<&str>) -> Result<Option<Metadata>> {
    raw.map(|s| serde_json::from_str::<Metadata>(s).context("--meta must be a JSON object"))
        .transpose()
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_header(title: &str) {
    let dim = Style::new().dim();
    println!("{}", style(title).bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!();
}

/// Truncate to `max` characters, appending an ellipsis.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
