use std::{path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    eyre::{eyre, Context},
    Result,
};
use synapse::{
    adapters::{MetricsStatsHandler, StaticScheduler},
    config::{self, ServerConfigValidator},
    core::Server,
    ports::{Scheduler, StatsHandler},
    tracing_setup,
    utils::ShutdownSignal,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "synapse.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "synapse.toml")]
        config: String,
    },
    /// Start the configured listeners (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "synapse.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    let (command, config_path) = match args.command {
        Some(Commands::Validate { config }) => ("validate", config),
        Some(Commands::Serve { config }) => ("serve", config),
        None => ("serve", args.config),
    };

    if command == "validate" {
        return validate_config_command(&config_path);
    }

    let provider = rustls::crypto::aws_lc_rs::default_provider();
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(provider) {
        tracing::warn!(
            "CryptoProvider::install_default reported an error: {:?}. \
            This can happen if a provider was already installed.",
            e
        );
    }

    tracing_setup::init_tracing().map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    tracing::info!("Loading configuration from {config_path}");

    let app_config = config::load_config(&config_path)
        .with_context(|| format!("Failed to load config from {config_path}"))?;
    ServerConfigValidator::validate_app(&app_config)
        .map_err(|e| eyre!("Invalid configuration: {e}"))?;

    let mut servers = Vec::new();
    for (name, server_cfg) in app_config.servers {
        let scheduler: Arc<dyn Scheduler> = Arc::new(
            StaticScheduler::new(
                &name,
                &server_cfg.discovery,
                &server_cfg.healthcheck,
                server_cfg.balance,
            )
            .map_err(|e| eyre!("servers.{name}: {e}"))?,
        );
        let stats: Arc<dyn StatsHandler> = Arc::new(MetricsStatsHandler::new(&name));

        let mut server = Server::new(name.clone(), server_cfg, scheduler, stats)
            .map_err(|e| eyre!("servers.{name}: {e}"))?;
        server
            .start()
            .await
            .map_err(|e| eyre!("servers.{name}: {e}"))?;

        if let Some(addr) = server.local_addr() {
            tracing::info!(server = %name, addr = %addr, "Listener running");
        }
        servers.push(server);
    }

    // Wire OS signals to a graceful stop of every listener.
    let shutdown = Arc::new(ShutdownSignal::new());
    let signal_listener = Arc::clone(&shutdown);
    tokio::spawn(async move { signal_listener.listen().await });

    shutdown.triggered().await;
    tracing::info!("Shutting down listeners");

    for server in &servers {
        server.stop().await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Validate configuration file and exit
fn validate_config_command(config_path: &str) -> Result<()> {
    println!("Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("Error: configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match config::load_config(config_path) {
        Ok(config) => {
            println!("Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("Configuration parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    match ServerConfigValidator::validate_app(&config) {
        Ok(()) => {
            println!("Configuration validation: OK");
            println!();
            println!("Configured listeners:");
            for (name, server) in &config.servers {
                println!(
                    "   - {name}: {} ({:?}, {} backends)",
                    server.bind,
                    server.protocol,
                    server.discovery.static_list.len()
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration validation failed:");
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
