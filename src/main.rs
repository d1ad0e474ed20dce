//! Parley CLI entry point

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use parley::adapters::{Channel, ChannelRegistry, CliChannel, Gateway};
use parley::agent::llm::models;
use parley::agent::{ProviderRegistry, SessionFactory};
use parley::ui;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "💬 Parley - agent execution loop over WebSocket")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize Parley configuration and workspace
    Onboard,

    /// Start the WebSocket gateway
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Gateway port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Chat with the agent locally
    Chat {
        /// Message to send to the agent
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Show Parley status
    Status,

    /// List known models and aliases
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let verbose = matches!(cli.command, Commands::Serve { verbose: true, .. });
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Onboard => {
            println!("💬 Initializing Parley...");
            let config = parley::config::onboard()?;
            println!("✓ Parley is ready!");
            println!("\nWorkspace: {:?}", config.workspace);
            println!("\nNext steps:");
            println!("  1. Add your Gemini API key to ~/.parley/config.json");
            println!("     OR set \"provider\": \"openai\" and \"openai_api_key\"");
            println!("  2. Optional: add a Tavily key under \"search\" for web search");
            println!("  3. Chat: parley chat -m \"Hello!\"");
        }

        Commands::Serve { host, port, .. } => {
            let mut config = parley::config::load_or_default()?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            run_gateway(config).await?;
        }

        Commands::Chat { message } => {
            let config = parley::config::load_or_default()?;
            run_chat(config, message).await?;
        }

        Commands::Status => {
            let config = parley::config::load_or_default()?;
            let set = |value: &str| if value.is_empty() { "not set" } else { "✓" };

            println!("💬 Parley Status\n");
            println!("Config: {:?}", parley::config::config_path());
            println!("Workspace: {:?}", config.workspace);
            println!("Model: {} ({})", models::resolve(&config.model), config.provider);
            println!("Context budget: {} tokens", config.token_budget());
            println!("Gemini API: {}", set(&config.gemini_api_key));
            println!("OpenAI API: {}", set(&config.openai_api_key));
            println!("Web search: {}", set(&config.search.api_key));
            println!("Providers: {}", ProviderRegistry::available().join(", "));
            println!("\nChannels:");
            for name in ChannelRegistry::available() {
                println!("  {:<10} {}", name, ChannelRegistry::description(name));
            }
            println!("\nGateway: ws://{}", config.server.addr());
        }

        Commands::Models => {
            for provider in ProviderRegistry::available() {
                println!("{}:", provider);
                for spec in models::by_provider(provider) {
                    println!(
                        "  {:<24} {:>9} ctx  {:>6} out  ${}/${} per 1k",
                        spec.id,
                        spec.context_window,
                        spec.max_output_tokens,
                        spec.cost_per_1k_input,
                        spec.cost_per_1k_output
                    );
                }
            }
            println!("\nAliases:");
            for (alias, id) in models::aliases() {
                println!("  {:<12} → {}", alias, id);
            }
        }
    }

    Ok(())
}

async fn run_gateway(config: parley::config::Config) -> Result<()> {
    ui::print_header(models::resolve(&config.model), &config.provider);
    ui::print_step(&format!("Workspace: {}", config.workspace.display()));
    std::fs::create_dir_all(config.archive_dir())?;

    let gateway = Arc::new(Gateway::from_config(&config)?);
    ui::print_success(&format!("Gateway starting on ws://{}", gateway.addr()));

    let signal = gateway.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n👋 Shutting down...");
            let _ = signal.stop().await;
        }
    });

    gateway.start().await?;
    Ok(())
}

async fn run_chat(config: parley::config::Config, message: Option<String>) -> Result<()> {
    std::fs::create_dir_all(config.archive_dir())?;
    let factory = SessionFactory::from_config(&config)?;
    let channel = Arc::new(CliChannel::new(factory.create("cli")));

    match message {
        Some(message) => {
            let response = channel.run_once(&message).await?;
            println!("\n💬 {}", response.content);
        }
        None => {
            ui::print_header(factory.model_id(), &config.provider);
            println!("💬 Interactive mode (Ctrl+C or 'exit' to quit)");

            let signal = channel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    println!("\n👋 Bye!");
                    let _ = signal.stop().await;
                }
            });

            channel.start().await?;
        }
    }

    Ok(())
}
