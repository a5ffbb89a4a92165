//! Toolweave CLI - inspect and drive the tool registry and orchestrator

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use toolweave_core::prelude::*;

#[derive(Parser)]
#[command(name = "toolweave")]
#[command(about = "Toolweave tool registry and orchestration CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file; without it toolweave.toml, TOOLWEAVE_CONFIG_PATH
    /// and TOOLWEAVE_ env vars are used
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tool catalog commands
    Tools {
        #[command(subcommand)]
        command: ToolCommands,
    },
    /// Recommend tools for a goal
    Recommend {
        goal: String,
        /// Only consider tools in this category
        #[arg(long)]
        category: Option<String>,
    },
    /// Execute a single tool
    Run {
        tool: String,
        /// Capability whose parameter schema applies
        #[arg(long)]
        capability: Option<String>,
        /// Parameters as a JSON object
        #[arg(long)]
        params: Option<String>,
    },
    /// Plan and run a goal, then print the final status
    Orchestrate {
        goal: String,
        /// Restrict planning to these tools, in order
        #[arg(long = "prefer")]
        preferred: Vec<String>,
        #[arg(long, default_value = "cli")]
        user: String,
        /// Seconds to wait for the plan to finish
        #[arg(long, default_value_t = 60)]
        wait: u64,
    },
    /// Registry and orchestrator statistics
    Stats,
    /// Version information
    Version,
}

#[derive(Subcommand)]
enum ToolCommands {
    /// List all tools
    List,
    /// Search tools by text, category and tags
    Search {
        text: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("toolweave {}", env!("CARGO_PKG_VERSION"));
        println!("toolweave-core {}", toolweave_core::VERSION);
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => ToolweaveConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ToolweaveConfig::load()?,
    };
    let manager = ToolManager::start(config, Arc::new(EchoExecutor)).await?;

    let outcome = run(&manager, cli.command).await;
    manager.shutdown().await;
    outcome
}

async fn run(manager: &ToolManager, command: Commands) -> Result<()> {
    match command {
        Commands::Version => {}
        Commands::Tools { command } => match command {
            ToolCommands::List => print_tools(&manager.tools().await),
            ToolCommands::Search {
                text,
                category,
                tags,
            } => {
                let mut query = SearchQuery::new();
                if let Some(text) = text {
                    query = query.text(text);
                }
                if let Some(category) = category {
                    query = query.category(category);
                }
                if !tags.is_empty() {
                    query = query.tags(tags);
                }
                print_tools(&manager.search_tools(&query).await);
            }
        },
        Commands::Recommend { goal, category } => {
            let context = category.map(|c| RecommendationContext::default().with_category(c));
            let picks = manager.recommend_tools(&goal, context.as_ref()).await;
            for (tier, tools) in [
                ("primary", &picks.primary),
                ("secondary", &picks.secondary),
                ("alternative", &picks.alternative),
            ] {
                println!("{tier}:");
                for pick in tools {
                    println!("  {:<24} {:>6.1}  {}", pick.tool.name, pick.relevance, pick.tool.description);
                }
            }
        }
        Commands::Run {
            tool,
            capability,
            params,
        } => {
            let mut request = ExecutionRequest::new(tool);
            if let Some(capability) = capability {
                request = request.with_capability(capability);
            }
            if let Some(params) = params {
                let params: Value = serde_json::from_str(&params).context("--params must be JSON")?;
                request = request.with_params(params);
            }
            let result = manager.execute_tool(request).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Orchestrate {
            goal,
            preferred,
            user,
            wait,
        } => {
            let mut request = OrchestrationRequest::new(goal);
            if !preferred.is_empty() {
                request = request.with_preferred_tools(preferred);
            }
            let plan_id = manager.execute_orchestration(&request, &user, None).await?;
            tracing::info!(%plan_id, "Plan submitted");

            let status = tokio::time::timeout(Duration::from_secs(wait), async {
                loop {
                    match manager.execution_status(&plan_id).await {
                        Some(status) if status.is_finished() => return Some(status),
                        Some(_) => tokio::time::sleep(Duration::from_millis(50)).await,
                        None => return None,
                    }
                }
            })
            .await
            .with_context(|| format!("plan {plan_id} did not finish within {wait}s"))?
            .with_context(|| format!("plan {plan_id} is no longer tracked"))?;

            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Stats => {
            let stats = manager.system_statistics().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }
    Ok(())
}

fn print_tools(tools: &[ToolDefinition]) {
    if tools.is_empty() {
        println!("No tools found");
        return;
    }
    for tool in tools {
        println!(
            "{:<24} {:<8} {:<14} {:<10} {}",
            tool.name,
            tool.version,
            tool.category,
            tool.status.to_string(),
            tool.description
        );
    }
}
