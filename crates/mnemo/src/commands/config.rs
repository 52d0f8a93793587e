//! Config command - configuration inspection.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::{Style, style};

use mnemo_config::MnemoConfig;

use super::{Context, print_header, print_json};

const REDACTED: &str = "********";

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the merged configuration with secrets redacted
    Show,

    /// Show which config files were checked and loaded
    Which,
}

pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Which => cmd_which(ctx),
    }
}

/// Copy of `config` with API keys masked.
fn redacted(config: &MnemoConfig) -> MnemoConfig {
    let mut config = config.clone();
    if let Some(ref mut embedding) = config.embedding
        && let Some(ref mut openai) = embedding.openai
        && openai.api_key.is_some()
    {
        openai.api_key = Some(REDACTED.to_string());
    }
    if let Some(ref mut llm) = config.llm
        && llm.api_key.is_some()
    {
        llm.api_key = Some(REDACTED.to_string());
    }
    config
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let config = redacted(&ctx.loaded.config);

    if ctx.json_output {
        return print_json(&config);
    }

    let dim = Style::new().dim();
    let store = config.store();
    let embedding = config.embedding();
    let policy = config.policy();

    print_header("Store");
    println!("  Backend:     {}", style(format!("{:?}", store.backend).to_lowercase()).cyan());
    match store.effective_path() {
        Ok(path) => println!("  Path:        {}", path.display()),
        Err(e) => println!("  Path:        {}", dim.apply_to(e.to_string())),
    }
    println!();

    print_header("Embedding");
    println!("  Provider:    {}", style(embedding.provider.as_str()).cyan());
    if let Some(ref model) = embedding.model {
        println!("  Model:       {}", model);
    }
    println!("  Dimensions:  {}", embedding.effective_dimensions());
    println!("  Cache:       {}", embedding.cache);
    println!("  Fallback:    {}", embedding.fallback_to_mock);
    println!();

    print_header("Policy");
    println!("  Strip PII:   {}", policy.strip_pii_by_default);
    println!("  Filter:      {}", policy.filter_by_default);
    println!();

    if let Some(ref llm) = config.llm {
        print_header("LLM");
        println!(
            "  Model:       {}",
            llm.model.as_deref().unwrap_or("(default)")
        );
        if let Some(ref url) = llm.base_url {
            println!("  Base URL:    {}", url);
        }
        println!();
    }

    if ctx.verbose {
        println!("{}", dim.apply_to("Raw TOML:"));
        println!("{}", config.to_toml()?);
    }

    for warning in &ctx.loaded.warnings {
        println!("{} {}", Style::new().yellow().apply_to("Warning:"), warning);
    }

    Ok(())
}

fn cmd_which(ctx: &Context) -> Result<()> {
    if ctx.json_output {
        let sources: Vec<_> = ctx
            .loaded
            .sources
            .iter()
            .map(|s| serde_json::json!({ "path": s.path, "loaded": s.loaded }))
            .collect();
        return print_json(&sources);
    }

    println!("Config file search order (later overrides earlier):\n");
    for source in &ctx.loaded.sources {
        let status = if source.loaded {
            "✓ loaded"
        } else {
            "· not found"
        };
        println!("  {} {}", status, source.path.display());
    }

    println!();
    let loaded_count = ctx.loaded.loaded_from().len();
    if loaded_count == 0 {
        println!("No config files found. Using defaults.");
    } else {
        println!("{} config file(s) loaded.", loaded_count);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacted_masks_keys() {
        let config = MnemoConfig::from_toml(
            r#"
[embedding.openai]
api_key = "sk-secret"

[llm]
api_key = "sk-other"
model = "gpt-4o-mini"
"#,
        )
        .unwrap();

        let shown = redacted(&config).to_toml().unwrap();
        assert!(!shown.contains("sk-secret"));
        assert!(!shown.contains("sk-other"));
        assert!(shown.contains(REDACTED));
        assert!(shown.contains("gpt-4o-mini"));
    }
}
