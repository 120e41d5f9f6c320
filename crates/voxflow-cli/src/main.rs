use std::sync::Arc;

use clap::{Parser, Subcommand};

use voxflow_core::config::{Config, LoggingConfig};
use voxflow_gateway::GatewayState;

mod loopback;

#[derive(Parser)]
#[command(
    name = "voxflow",
    about = "Streaming voice-assistant response gateway",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Gateway {
        /// Port to listen on (default: 18650)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show gateway status
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Validate the configuration file
    Check,
}

fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let base = if verbose {
        "debug".to_string()
    } else {
        logging.level.clone().unwrap_or_else(|| "info".to_string())
    };
    let mut directives = vec![base];
    directives.extend(logging.filters.iter().cloned());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directives.join(",")));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;

    init_logging(&config.logging.clone().unwrap_or_default(), cli.verbose);

    match cli.command {
        Commands::Gateway { port } => {
            let (warnings, errors) = config.validate();
            for warning in &warnings {
                tracing::warn!("Config: {warning}");
            }
            if !errors.is_empty() {
                anyhow::bail!("invalid configuration: {}", errors.join("; "));
            }

            let port = port.unwrap_or_else(|| config.gateway_port());
            tracing::info!("Starting Voxflow gateway on port {port}");
            tracing::warn!("No provider adapters configured; running with loopback providers");

            let state = Arc::new(GatewayState::new(
                Arc::new(config),
                Arc::new(loopback::LoopbackGenerator),
                Arc::new(loopback::NullSynthesizer),
            ));
            voxflow_gateway::start_gateway(state, port).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Check => {
                let (warnings, errors) = config.validate();
                for warning in &warnings {
                    println!("warning: {warning}");
                }
                for error in &errors {
                    println!("error: {error}");
                }
                if errors.is_empty() {
                    println!("Config OK: {}", config_path.display());
                } else {
                    anyhow::bail!("{} config error(s)", errors.len());
                }
            }
        },
        Commands::Status => {
            let port = config.gateway_port();
            println!("Voxflow v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            println!("Gateway port: {port}");
            match reqwest::get(format!("http://127.0.0.1:{port}/health")).await {
                Ok(resp) => {
                    let health: serde_json::Value = resp.json().await?;
                    println!("Status: running");
                    println!("Active streams: {}", health["streams"]);
                    println!("Active sessions: {}", health["sessions"]);
                    println!("Pending buffers: {}", health["pending_buffers"]);
                }
                Err(_) => {
                    println!("Status: not running");
                }
            }
        }
    }

    Ok(())
}
