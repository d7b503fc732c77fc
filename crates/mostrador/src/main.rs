// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mostrador - WhatsApp customer-service delivery and conversation control-plane.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod responder;
mod serve;
mod settings;
mod shutdown;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use mostrador_config::{ConfigError, MostradorConfig};

/// Mostrador - WhatsApp customer-service control-plane.
#[derive(Parser, Debug)]
#[command(name = "mostrador", version, about, long_about = None)]
struct Cli {
    /// Configuration file; defaults to the standard search path.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Run the webhook receiver, operator API and delivery workers.
    Serve,
    /// Load and validate the configuration, then exit.
    CheckConfig,
}

fn load_config(path: Option<&PathBuf>) -> Result<MostradorConfig, Vec<ConfigError>> {
    match path {
        Some(path) => mostrador_config::load_and_validate_path(path),
        None => mostrador_config::load_and_validate(),
    }
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "mostrador={log_level},mostrador_control={log_level},mostrador_gateway={log_level},\
             mostrador_storage={log_level},mostrador_whatsapp={log_level},mostrador_bus={log_level},\
             mostrador_resilience={log_level},warn"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(errors) => {
            mostrador_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::CheckConfig => {
            println!(
                "mostrador: config ok (gateway={}:{}, operators={}, database={})",
                config.gateway.host,
                config.gateway.port,
                config.operators.len(),
                config.storage.database_path
            );
        }
        Commands::Serve => {
            init_tracing(&config.service.log_level);
            if let Err(e) = serve::run_serve(config).await {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        }
    }
}
