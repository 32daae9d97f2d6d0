// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Monarch CLI
//!
//! Single-instance launcher: the first `monarch run` for a user becomes the
//! leader, later ones hand their request over and exit.

use clap::{Parser, Subcommand};

use monarch_core::{Config, ConfigLoader};

mod commands;
mod session;

/// Monarch - keep one instance per user, forward new-session requests to it
#[derive(Parser)]
#[command(name = "monarch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (built-in defaults when omitted)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Become the running instance, or hand a new-session request to it
    Run {
        /// Command the leader launches for each session (overrides config)
        #[arg(long, num_args = 1.., allow_hyphen_values = true)]
        exec: Vec<String>,
    },

    /// Show identity, resource names and whether a leader is running
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for command output
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .init();

    let config = match cli.config.as_deref() {
        Some(path) => ConfigLoader::load_file(path)
            .unwrap_or_else(|e| commands::fatal("Configuration invalid", e)),
        None => Config::default(),
    };

    // Dispatch to command handlers
    match cli.command {
        Commands::Run { exec } => commands::run::execute(config, exec).await,
        Commands::Status { json } => commands::status::execute(&config, json),
    }
}
