//! Overseer CLI
//!
//! Command-line front end for single-shot queries, the chat REPL, and
//! agent listing.

use std::io::{self, BufRead, Write};
use std::time::Instant;

use clap::{Parser, Subcommand};
use overseer::agent::AgentResponse;
use overseer::config::load_config;
use overseer::context::Context;
use overseer::delegate::{AgentExecutor, AgentSelector, TaskExecutor};
use overseer::llm::PromptKwargs;
use overseer::{Result, VERSION};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "overseer",
    author = "Overseer Contributors",
    version = VERSION,
    about = "Overseer - agent orchestration runtime",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single query through the delegation pipeline
    Ask {
        /// The query to process
        query: String,
        /// Route directly to one agent instead of delegating
        #[arg(short, long)]
        agent: Option<String>,
    },

    /// Interactive chat mode
    Chat {
        /// Route every message to one agent instead of delegating
        #[arg(short, long)]
        agent: Option<String>,
    },

    /// List registered agents and their capabilities
    ListAgents,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("overseer=info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config()?;
    let context = Context::initialize(config).await?;
    info!(
        "Context ready: {} agents, {} MCP servers",
        context.agents.len(),
        context.mcp_server_count()
    );

    let outcome = match cli.command {
        Commands::Ask { query, agent } => ask(&context, &query, agent.as_deref()).await,
        Commands::Chat { agent } => chat(&context, agent.as_deref()).await,
        Commands::ListAgents => {
            list_agents(&context);
            Ok(())
        }
    };

    context.shutdown().await;
    outcome
}

async fn ask(context: &Context, query: &str, agent: Option<&str>) -> Result<()> {
    let session_id = Uuid::new_v4().to_string();
    let started = Instant::now();

    match agent {
        Some(name) => {
            let response = run_single_agent(context, query, Some(name)).await?;
            println!("{}", response.response);
            record_exchange(
                context,
                &session_id,
                name,
                query,
                &response.response,
                started,
                true,
                None,
            )
            .await;
            Ok(())
        }
        None => {
            let pipeline = context.pipeline();
            let state = pipeline.run(query).await?;
            println!("{}", state.report);

            // Per-task failures surface through the exit code
            let outcome = TaskExecutor::ensure_all_succeeded(&state.results);
            record_exchange(
                context,
                &session_id,
                "delegate",
                query,
                &state.report,
                started,
                outcome.is_ok(),
                state.error.as_deref(),
            )
            .await;
            outcome
        }
    }
}

/// Persist the exchange when a history store is configured; persistence
/// failures never fail the command.
#[allow(clippy::too_many_arguments)]
async fn record_exchange(
    context: &Context,
    session_id: &str,
    agent_name: &str,
    query: &str,
    response: &str,
    started: Instant,
    success: bool,
    error: Option<&str>,
) {
    let Some(history) = &context.history else {
        return;
    };

    let title: String = query.chars().take(80).collect();
    let result = async {
        history
            .create_conversation(session_id, agent_name, &title, serde_json::json!({}))
            .await?;
        history
            .add_message(session_id, "user", query, serde_json::json!({}))
            .await?;
        history
            .add_message(session_id, "assistant", response, serde_json::json!({}))
            .await?;
        history
            .add_agent_session(
                session_id,
                agent_name,
                query,
                response,
                serde_json::json!([]),
                started.elapsed().as_millis() as i64,
                success,
                error,
            )
            .await
    }
    .await;

    if let Err(e) = result {
        warn!("Failed to persist conversation history: {}", e);
    }
}

async fn chat(context: &Context, agent: Option<&str>) -> Result<()> {
    println!("overseer chat - empty line or Ctrl-D to exit");
    let session_id = Uuid::new_v4().to_string();
    let stdin = io::stdin();

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let query = line.trim();
        if query.is_empty() {
            break;
        }

        let started = Instant::now();
        let result = match agent {
            Some(name) => run_single_agent(context, query, Some(name))
                .await
                .map(|response| response.response),
            None => {
                let pipeline = context.pipeline();
                pipeline.run(query).await.map(|state| state.report)
            }
        };

        match result {
            Ok(text) => {
                println!("{text}\n");
                record_exchange(
                    context,
                    &session_id,
                    agent.unwrap_or("delegate"),
                    query,
                    &text,
                    started,
                    true,
                    None,
                )
                .await;
            }
            Err(e) => eprintln!("Error: {e}\n"),
        }
    }

    Ok(())
}

/// One-shot execution against a named agent, or a routed one when `name`
/// is absent.
async fn run_single_agent(
    context: &Context,
    query: &str,
    name: Option<&str>,
) -> Result<AgentResponse> {
    let agent = match name {
        Some(name) => context
            .agents
            .get(name)
            .ok_or_else(|| overseer::Error::InvalidInput(format!("Unknown agent: {name}")))?,
        None => {
            let selector = AgentSelector::new(context.client.clone());
            selector
                .select_agent(query, &context.agents.all())
                .await?
                .ok_or_else(|| {
                    overseer::Error::Execution("No agent fits this query".to_string())
                })?
        }
    };

    let executor = AgentExecutor::new(context.client.clone(), context.memory.clone());
    executor
        .execute(query.to_string(), agent, PromptKwargs::new(), true)
        .await
}

fn list_agents(context: &Context) {
    if context.agents.is_empty() {
        println!("No agents registered.");
        return;
    }
    for agent in context.agents.all() {
        println!("{}\n", agent.full_description());
    }
}
