use anyhow::Result;
use clap::{Parser, Subcommand};
use medrelay::config::Config;
use medrelay::voice::LanguageRegistry;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Live medical interpretation relay.
#[derive(Debug, Parser)]
#[command(name = "medrelay", version, about)]
struct Cli {
    /// Path to config.toml (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the WebSocket server (default)
    Serve {
        /// Bind address, overrides [gateway] host
        #[arg(long)]
        host: Option<String>,
        /// Port, overrides [gateway] port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the supported languages
    Languages,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,medrelay=info,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve {
        host: None,
        port: None,
    }) {
        Commands::Serve { host, port } => {
            init_tracing();
            let mut config = Config::resolve(cli.config.as_deref())?;
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            tracing::debug!(?config, "Configuration loaded");
            medrelay::gateway::run_gateway(config).await
        }
        Commands::Languages => {
            let registry = LanguageRegistry::builtin();
            for lang in registry.all() {
                println!(
                    "{:<6} {:<7} {:<11} {}",
                    lang.code, lang.transcription_tag, lang.translation_tag, lang.display
                );
            }
            Ok(())
        }
    }
}
