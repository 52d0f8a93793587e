//! Stats command - row counts and embedding configuration.

use anyhow::Result;
use clap::Args;
use console::{Style, style};

use super::{Context, print_header, print_json};
use crate::app::App;

#[derive(Args, Debug)]
pub struct StatsArgs {}

pub async fn run(_args: StatsArgs, ctx: &Context) -> Result<()> {
    let app = ctx.open().await?;
    let result = report(&app, ctx);
    app.finish(result).await
}

fn report(app: &App, ctx: &Context) -> Result<()> {
    let stats = app.service.stats()?;
    let provider = app.service.embedder().name().to_string();

    if ctx.json_output {
        print_json(&serde_json::json!({ "store": stats, "provider": provider }))?;
    } else {
        let dim = Style::new().dim();
        print_header("Store Statistics");
        println!("  Backend:         {}", style(&stats.backend).cyan());
        println!("  Projects:        {}", style(stats.projects).cyan());
        println!("  Memories:        {}", style(stats.memories).cyan());
        println!("  Knowledge bases: {}", style(stats.knowledge_bases).cyan());
        println!("  Facts:           {}", style(stats.facts).cyan());
        println!("  Chat sessions:   {}", style(stats.chat_sessions).cyan());
        println!("  Chat messages:   {}", style(stats.chat_messages).cyan());
        println!("  Embeddings:      {}", style(stats.embeddings).cyan());
        println!();

        print_header("Embedding Configuration");
        println!("  Provider:        {}", style(&provider).cyan());
        println!("  Dimensions:      {}", style(stats.dimensions).cyan());
        if ctx.verbose {
            for path in ctx.loaded.loaded_from() {
                println!("  {}", dim.apply_to(format!("config: {}", path.display())));
            }
        }
    }

    Ok(())
}
