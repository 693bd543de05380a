#![forbid(unsafe_code)]

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

mod cli;
mod config;
mod discord;
mod mirror;
mod store;
mod utils;

use cli::{Cli, Commands};
use config::{Config, ConfigSource};
use discord::DiscordClient;
use mirror::{DeliveryLedger, IdentityMap, MirrorContext, RetryPolicy, TaskRunner, TaskValidator};
use store::{JsonAliasStore, LineLedgerStore};
use utils::logging::SUCCESS_TARGET;

/// Exit status when the operator has to edit the config before mirroring can start.
const EXIT_NEEDS_SETUP: u8 = 2;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = match Config::load_or_bootstrap(&cli.config)? {
        ConfigSource::Loaded(config) => config,
        ConfigSource::Created(path) => {
            utils::logging::init_tracing(&config::LoggingConfig::default())?;
            info!(
                target: SUCCESS_TARGET,
                "created {} | fill the file now", path.display()
            );
            return Ok(ExitCode::from(EXIT_NEEDS_SETUP));
        }
    };
    utils::logging::init_tracing(&config.logging)?;
    info!("loaded {} successfully", cli.config.display());

    if config.tasks.is_empty() {
        warn!(
            "no tasks configured in {} | add at least one task",
            cli.config.display()
        );
        return Ok(ExitCode::from(EXIT_NEEDS_SETUP));
    }

    let Config {
        discord,
        storage,
        limits,
        identity,
        tasks: entries,
        ..
    } = config;

    let client = Arc::new(DiscordClient::new(&discord)?);
    let identities = Arc::new(
        IdentityMap::load(
            Arc::new(JsonAliasStore::new(&storage.aliases_file)),
            identity.alias_pattern,
        )
        .await?,
    );
    let ledger =
        Arc::new(DeliveryLedger::load(Arc::new(LineLedgerStore::new(&storage.ledger_file))).await?);
    info!(
        "{} known aliases, {} mirrored messages on record",
        identities.len().await,
        ledger.len().await
    );

    let runner = TaskRunner::new(
        TaskValidator::new(client.clone()),
        MirrorContext {
            source: client.clone(),
            sink: client,
            identities,
            ledger,
            avatar_url_template: identity.avatar_url_template,
            retry: RetryPolicy::from(&limits),
        },
    );

    let tasks = match runner.preflight(entries).await {
        Ok(tasks) => tasks,
        Err(err) => {
            error!("{}", err);
            return Ok(ExitCode::FAILURE);
        }
    };
    info!(target: SUCCESS_TARGET, "all {} tasks verified", tasks.len());

    if matches!(cli.command, Some(Commands::Validate)) {
        return Ok(ExitCode::SUCCESS);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = runner.spawn(tasks, &shutdown_rx);
    let all_pipelines = futures::future::join_all(handles);
    tokio::pin!(all_pipelines);

    let stopped_by_signal = tokio::select! {
        _ = tokio::signal::ctrl_c() => true,
        results = &mut all_pipelines => {
            log_join_errors(results);
            warn!("all mirror pipelines exited");
            false
        },
    };

    if stopped_by_signal {
        info!("received Ctrl+C, stopping mirror pipelines");
        let _ = shutdown_tx.send(true);
        log_join_errors(all_pipelines.await);
    }

    info!("discord mirror shut down");
    Ok(ExitCode::SUCCESS)
}

fn log_join_errors(results: Vec<Result<(), tokio::task::JoinError>>) {
    for result in results {
        if let Err(err) = result {
            error!("pipeline task failed: {}", err);
        }
    }
}
