use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::sync::Arc;
use toolmesh_core::{AgentError, Config, Provider, agent, auth, client, providers, server, tools};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "toolmesh")]
#[command(about = "toolmesh - host, aggregate and call remote tools from a reasoning loop", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Host the demo tool registry over HTTP
    Serve {
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
    /// Print the aggregated tool catalog
    Tools,
    /// Ask the agent a question, or start an interactive session
    Chat {
        #[arg(short, long)]
        message: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,toolmesh=info,toolmesh_core=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command.unwrap_or(Commands::Chat { message: None }) {
        Commands::Serve { bind, name } => run_serve(config, bind, name).await,
        Commands::Tools => run_tools(config).await,
        Commands::Chat { message } => run_chat(config, message).await,
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

async fn run_serve(mut config: Config, bind: Option<String>, name: Option<String>) -> Result<()> {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(name) = name {
        config.server.name = name;
    }
    config.validate_server()?;

    let mut registry = server::ToolRegistry::new();
    registry.register(tools::LookupPartTool)?;
    info!(tools = registry.len(), name = %config.server.name, "Registry ready");

    let router = server::router(Arc::new(registry), config.server.endpoint_config());
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    server::serve(listener, router, shutdown_signal()).await?;

    info!("Server stopped");
    Ok(())
}

fn build_aggregator(config: &Config) -> client::ToolAggregator {
    client::ToolAggregator::new(config.sources.clone()).with_policy(config.agent.policy)
}

async fn run_tools(config: Config) -> Result<()> {
    config.validate_client()?;

    let aggregator = build_aggregator(&config);
    let table = aggregator.refresh_table().await;
    let excluded = aggregator.excluded_sources().await;
    aggregator.close().await;
    let table = table?;

    for tool in &table {
        println!(
            "{:<32} {:<16} {}",
            tool.resolved_name, tool.source, tool.spec.description
        );
    }
    if !excluded.is_empty() {
        eprintln!("⚠️  Unavailable sources: {}", excluded.join(", "));
    }

    Ok(())
}

fn report(error: &AgentError) {
    eprintln!("❌ Error [{}]: {}", error.kind(), error);
}

async fn run_chat(config: Config, message: Option<String>) -> Result<()> {
    config.validate_client()?;
    config.validate_model()?;

    let credential = auth::acquire_credential(&config.model).await?;
    let provider: Arc<dyn Provider> =
        Arc::from(providers::create_provider(&config.model, credential)?);
    let aggregator = Arc::new(build_aggregator(&config));

    let mut agent_loop = agent::AgentLoop::new(provider, aggregator.clone())
        .with_max_turns(config.agent.max_turns())
        .with_model_timeout(config.agent.model_timeout())
        .with_tool_timeout(config.agent.tool_timeout());
    if let Some(prompt) = &config.agent.system_prompt {
        agent_loop = agent_loop.with_system_prompt(prompt.clone());
    }

    let outcome = match message {
        Some(msg) => {
            println!("\n🤔 Processing...\n");
            match agent_loop.run(&msg).await {
                Ok(run) => {
                    println!("{}", run.answer);
                    Ok(())
                }
                Err(e) => {
                    report(&e);
                    Err(anyhow::anyhow!("Agent run failed: {}", e))
                }
            }
        }
        None => {
            repl(&agent_loop).await;
            Ok(())
        }
    };

    aggregator.close().await;
    outcome
}

async fn repl(agent_loop: &agent::AgentLoop) {
    use std::io::{self, BufRead};

    println!("🔧 toolmesh");
    println!("Type your message (Ctrl+D to exit):\n");
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut stdout_lock = stdout.lock();

    loop {
        print!("> ");
        let _ = stdout_lock.flush();

        let mut input = String::new();
        let mut reader = stdin.lock();

        match reader.read_line(&mut input) {
            Ok(0) | Err(_) => {
                println!("\n👋 Goodbye!");
                break;
            }
            Ok(_) => {
                let input = input.trim();
                if input.is_empty() {
                    continue;
                }

                println!("\n🤔 Processing...\n");

                match agent_loop.run(input).await {
                    Ok(run) => println!("{}", run.answer),
                    Err(e) => report(&e),
                }

                println!();
            }
        }
    }
}
