//! Facts command - knowledge base facts.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::{Style, style};

use mnemo_service::FactInput;
use mnemo_store::{Fact, Scored};

use super::{Context, parse_metadata, print_header, print_json, truncate};
use crate::app::App;

/// Arguments for the facts command.
#[derive(Args, Debug)]
pub struct FactsArgs {
    /// Knowledge base id
    #[arg(long, global = true, default_value = "default")]
    pub kb: String,

    #[command(subcommand)]
    pub command: FactsCommand,
}

#[derive(Subcommand, Debug)]
pub enum FactsCommand {
    /// Add one or more facts (embedded in a single batch)
    Add {
        /// Fact texts
        #[arg(required = true)]
        contents: Vec<String>,

        /// Confidence from 0 to 1, applied to every fact
        #[arg(short, long)]
        confidence: Option<f32>,

        /// Metadata as a JSON object, applied to every fact
        #[arg(long)]
        meta: Option<String>,
    },

    /// Semantic search within the knowledge base
    Search {
        /// Search query; omit to list with a perfect score
        query: Option<String>,

        /// Maximum results to return
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// List facts in insertion order
    List {
        #[arg(short, long, default_value = "20")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },
}

fn without_embedding(mut fact: Fact) -> Fact {
    fact.embedding = None;
    fact
}

pub async fn run(args: FactsArgs, ctx: &Context) -> Result<()> {
    let app = ctx.open().await?;
    let result = run_with(&app, args, ctx).await;
    app.finish(result).await
}

async fn run_with(app: &App, args: FactsArgs, ctx: &Context) -> Result<()> {
    let service = &app.service;

    match args.command {
        FactsCommand::Add {
            contents,
            confidence,
            meta,
        } => {
            let metadata = parse_metadata(meta.as_deref())?;
            let inputs = contents
                .into_iter()
                .map(|content| FactInput {
                    content,
                    metadata: metadata.clone(),
                    confidence,
                })
                .collect();
            let facts: Vec<Fact> = service
                .add_facts(&args.kb, inputs)
                .await?
                .into_iter()
                .map(without_embedding)
                .collect();

            if ctx.json_output {
                print_json(&facts)?;
            } else {
                let green = Style::new().green();
                for fact in &facts {
                    println!("{} {}", green.apply_to("Added"), style(&fact.id).cyan());
                }
            }
        }
        FactsCommand::Search { query, limit } => {
            let results: Vec<Scored<Fact>> = service
                .search_facts(&args.kb, query.as_deref(), limit)
                .await?
                .into_iter()
                .map(|s| Scored::new(without_embedding(s.item), s.similarity_score))
                .collect();

            if ctx.json_output {
                print_json(&results)?;
            } else if results.is_empty() {
                println!("{}", Style::new().dim().apply_to("No results found"));
            } else {
                let dim = Style::new().dim();
                print_header("Fact Search Results");
                for (i, result) in results.iter().enumerate() {
                    println!("{}. {}", style(i + 1).cyan(), truncate(&result.item.content, 70));
                    println!(
                        "   {}",
                        dim.apply_to(format!(
                            "score: {:.3}  confidence: {}",
                            result.similarity_score, result.item.confidence
                        ))
                    );
                    println!();
                }
            }
        }
        FactsCommand::List { limit, offset } => {
            let facts: Vec<Fact> = service
                .list_facts(&args.kb, Some(limit), offset)?
                .into_iter()
                .map(without_embedding)
                .collect();

            if ctx.json_output {
                print_json(&facts)?;
            } else if facts.is_empty() {
                println!("{}", Style::new().dim().apply_to("No facts"));
            } else {
                print_header(&format!("Facts in {}", args.kb));
                for fact in &facts {
                    println!("{}  {}", style(&fact.id).cyan(), truncate(&fact.content, 60));
                }
            }
        }
    }

    Ok(())
}
