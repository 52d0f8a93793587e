//! Memory commands: remember, search, list, forget, purge.

use anyhow::{Result, bail};
use clap::Args;
use console::{Style, style};

use mnemo_service::{RememberRequest, SearchRequest};
use mnemo_store::{Memory, Scored};

use super::{Context, parse_metadata, print_header, print_json, truncate};
use crate::app::App;

#[derive(Args, Debug)]
pub struct RememberArgs {
    /// Text to remember
    pub content: String,

    /// Project the memory belongs to
    #[arg(short, long)]
    pub project: Option<String>,

    /// Importance from 0 to 10
    #[arg(short, long)]
    pub importance: Option<f32>,

    /// Metadata as a JSON object
    #[arg(long)]
    pub meta: Option<String>,

    /// Strip personal data before storing (overrides the policy default)
    #[arg(long, conflicts_with = "keep_pii")]
    pub strip_pii: bool,

    /// Store the text unchanged (overrides the policy default)
    #[arg(long)]
    pub keep_pii: bool,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Search query; omit to list with a perfect score
    pub query: Option<String>,

    /// Restrict to one project
    #[arg(short, long)]
    pub project: Option<String>,

    /// Maximum results to return
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Narrow results with the configured LLM filter
    #[arg(long, conflicts_with = "no_filter")]
    pub filter: bool,

    /// Skip the LLM filter even if the policy enables it
    #[arg(long)]
    pub no_filter: bool,

    /// Extra context passed to the filter
    #[arg(long)]
    pub context: Option<String>,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Restrict to one project
    #[arg(short, long)]
    pub project: Option<String>,

    /// Maximum memories to show
    #[arg(short, long, default_value = "20")]
    pub limit: usize,

    /// Skip this many memories
    #[arg(long, default_value = "0")]
    pub offset: usize,
}

#[derive(Args, Debug)]
pub struct ForgetArgs {
    /// Memory id
    pub id: String,
}

#[derive(Args, Debug)]
pub struct PurgeArgs {
    /// Confirm deleting every memory of the user
    #[arg(long)]
    pub yes: bool,
}

/// Resolve a `--x` / `--no-x` pair into an optional override.
fn flag_pair(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

fn without_embedding(mut memory: Memory) -> Memory {
    memory.embedding = None;
    memory
}

pub async fn remember(args: RememberArgs, ctx: &Context) -> Result<()> {
    let app = ctx.open().await?;
    let result = remember_with(&app, args, ctx).await;
    app.finish(result).await
}

async fn remember_with(app: &App, args: RememberArgs, ctx: &Context) -> Result<()> {
    let mut request = RememberRequest::new(&ctx.user_id, args.content);
    request.project_id = args.project;
    request.importance = args.importance;
    request.metadata = parse_metadata(args.meta.as_deref())?;
    request.strip_pii = flag_pair(args.strip_pii, args.keep_pii);

    let memory = app.service.remember(request).await?;

    if ctx.json_output {
        print_json(&without_embedding(memory))?;
    } else {
        let green = Style::new().green();
        println!("{} {}", green.apply_to("Remembered"), style(&memory.id).cyan());
        if ctx.verbose {
            println!("  {}", truncate(&memory.content, 70));
        }
    }

    Ok(())
}

pub async fn search(args: SearchArgs, ctx: &Context) -> Result<()> {
    let app = ctx.open().await?;
    let result = search_with(&app, args, ctx).await;
    app.finish(result).await
}

async fn search_with(app: &App, args: SearchArgs, ctx: &Context) -> Result<()> {
    let mut request = SearchRequest::new(&ctx.user_id);
    request.query = args.query.clone();
    request.project_id = args.project;
    request.limit = args.limit;
    request.filter = flag_pair(args.filter, args.no_filter);
    request.context = args.context;

    let results: Vec<Scored<Memory>> = app
        .service
        .search_memories(request)
        .await?
        .into_iter()
        .map(|s| Scored::new(without_embedding(s.item), s.similarity_score))
        .collect();

    if ctx.json_output {
        print_json(&results)?;
    } else if results.is_empty() {
        println!("{}", Style::new().dim().apply_to("No results found"));
    } else {
        print_header("Memory Search Results");
        print_scored(&results, ctx.verbose);
    }

    Ok(())
}

fn print_scored(results: &[Scored<Memory>], verbose: bool) {
    let dim = Style::new().dim();
    for (i, result) in results.iter().enumerate() {
        println!("{}. {}", style(i + 1).cyan(), truncate(&result.item.content, 70));
        let mut detail = format!(
            "score: {:.3}  importance: {}",
            result.similarity_score, result.item.importance
        );
        if verbose {
            detail.push_str(&format!("  id: {}", result.item.id));
        }
        println!("   {}", dim.apply_to(detail));
        println!();
    }
}

pub async fn list(args: ListArgs, ctx: &Context) -> Result<()> {
    let app = ctx.open().await?;
    let result = list_with(&app, args, ctx);
    app.finish(result).await
}

fn list_with(app: &App, args: ListArgs, ctx: &Context) -> Result<()> {
    let memories: Vec<Memory> = app
        .service
        .list_memories(
            &ctx.user_id,
            args.project.as_deref(),
            Some(args.limit),
            args.offset,
        )?
        .into_iter()
        .map(without_embedding)
        .collect();

    if ctx.json_output {
        print_json(&memories)?;
    } else if memories.is_empty() {
        println!("{}", Style::new().dim().apply_to("No memories"));
    } else {
        let dim = Style::new().dim();
        print_header("Memories");
        for memory in &memories {
            println!(
                "{}  {}",
                style(&memory.id).cyan(),
                truncate(&memory.content, 60)
            );
            println!(
                "   {}",
                dim.apply_to(memory.created_at.format("%Y-%m-%d %H:%M").to_string())
            );
        }
    }

    Ok(())
}

pub async fn forget(args: ForgetArgs, ctx: &Context) -> Result<()> {
    let app = ctx.open().await?;
    let result = forget_with(&app, args, ctx);
    app.finish(result).await
}

fn forget_with(app: &App, args: ForgetArgs, ctx: &Context) -> Result<()> {
    let deleted = app.service.delete_memory(&ctx.user_id, &args.id)?;

    if ctx.json_output {
        print_json(&serde_json::json!({ "id": args.id, "deleted": deleted }))?;
    } else if deleted {
        println!("{} {}", Style::new().green().apply_to("Forgot"), args.id);
    } else {
        println!(
            "{}",
            Style::new()
                .dim()
                .apply_to(format!("No memory {} for user {}", args.id, ctx.user_id))
        );
    }

    Ok(())
}

pub async fn purge(args: PurgeArgs, ctx: &Context) -> Result<()> {
    if !args.yes {
        bail!(
            "Refusing to delete all memories of '{}' without --yes",
            ctx.user_id
        );
    }

    let app = ctx.open().await?;
    let result = purge_with(&app, ctx);
    app.finish(result).await
}

fn purge_with(app: &App, ctx: &Context) -> Result<()> {
    let removed = app.service.delete_user_memories(&ctx.user_id)?;

    if ctx.json_output {
        print_json(&serde_json::json!({ "user_id": ctx.user_id, "deleted": removed }))?;
    } else {
        println!(
            "Deleted {} memories for {}",
            style(removed).cyan(),
            ctx.user_id
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_pair() {
        assert_eq!(flag_pair(false, false), None);
        assert_eq!(flag_pair(true, false), Some(true));
        assert_eq!(flag_pair(false, true), Some(false));
    }
}
