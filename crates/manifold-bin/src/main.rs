// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The `manifold` binary: boots the connection manager, seeds it from the
//! bootstrap file, and runs until a shutdown signal arrives.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use manifold_bin::cli::{Cli, Commands};
use manifold_bin::config::BootstrapConfig;
use manifold_bin::{logging, shutdown::ShutdownCoordinator};
use manifold_core::storage::{MemoryStorage, Storage};
use manifold_core::types::ConnectionRecord;
use manifold_manager::ConnectionManager;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command.clone().unwrap_or(Commands::Run) {
        Commands::Version => {
            println!("manifold {}", manifold_core::VERSION);
            ExitCode::SUCCESS
        }
        Commands::Validate => validate(&cli),
        Commands::Run => run(&cli).await,
    }
}

fn validate(cli: &Cli) -> ExitCode {
    match BootstrapConfig::load(&cli.config) {
        Ok(config) => {
            println!(
                "{}: OK ({} connection(s))",
                cli.config.display(),
                config.connections.len()
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{}: {}", cli.config.display(), err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> ExitCode {
    logging::init_logging(&cli.log_level, cli.log_format);

    info!(version = manifold_core::VERSION, "Starting manifold");

    // A missing bootstrap file just means an empty start; the API surface
    // creates connections at runtime.
    let bootstrap = if cli.config.exists() {
        match BootstrapConfig::load(&cli.config) {
            Ok(config) => config,
            Err(err) => {
                error!(error = %err, "Failed to load bootstrap config");
                return ExitCode::FAILURE;
            }
        }
    } else {
        info!(path = %cli.config.display(), "No bootstrap config, starting empty");
        BootstrapConfig::default()
    };

    let storage = Arc::new(MemoryStorage::new());
    let manager = ConnectionManager::new(storage as Arc<dyn Storage>);

    for entry in &bootstrap.connections {
        let mut record = ConnectionRecord::new(
            entry.session_id(),
            entry.kind,
            entry.name.clone(),
            entry.config.clone(),
        );
        if let Some(parser) = &entry.parser {
            record = record.with_parser(parser.clone());
        }

        match manager.create(record).await {
            Ok(id) => {
                if let Err(err) = manager.start(&id).await {
                    warn!(connection = %entry.name, error = %err, "Failed to start connection");
                }
            }
            Err(err) => {
                warn!(connection = %entry.name, error = %err, "Failed to create connection");
            }
        }
    }

    info!(connections = manager.len().await, "Manifold is running");

    let coordinator = ShutdownCoordinator::new();
    coordinator.wait_for_shutdown().await;

    info!("Shutting down");
    match manager.close().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "Errors during shutdown");
            ExitCode::FAILURE
        }
    }
}
