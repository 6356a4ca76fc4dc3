//! FORGE orchestration daemon
//!
//! Wires the ticket store, verifier, merge backend, and review
//! dispatcher together and runs the dispatch loop until SIGINT.

mod config;

use clap::{Arg, Command};
use config::EngineConfig;
use forge_review::{
    CommandVerifier, DispatchConfig, GhCli, MergeBackend, MergeCoordinator, ReviewDispatcher,
    SentinelReviewer, ShutdownFlag, Verifier,
};
use forge_ticket::{SqliteTicketStore, TicketStore};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    let config_arg = Arg::new("config")
        .long("config")
        .short('c')
        .value_name("PATH")
        .help("Path to the engine TOML configuration");

    Command::new("forge-engine")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Autonomous-coding-agent orchestration engine")
        .subcommand_required(true)
        .subcommand(
            Command::new("run")
                .about("Run the review dispatch loop")
                .arg(config_arg.clone()),
        )
        .subcommand(
            Command::new("init-db")
                .about("Create the ticket database and schema")
                .arg(config_arg),
        )
}

fn load_config(args: &clap::ArgMatches) -> anyhow::Result<EngineConfig> {
    match args.get_one::<String>("config") {
        Some(path) => EngineConfig::load(path),
        None => Ok(EngineConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match cli().get_matches().subcommand() {
        Some(("run", args)) => run(load_config(args)?).await,
        Some(("init-db", args)) => init_db(&load_config(args)?),
        _ => unreachable!("subcommand is required"),
    }
}

fn init_db(config: &EngineConfig) -> anyhow::Result<()> {
    let path = config.resolved_database_path();
    SqliteTicketStore::open(&path)?;
    info!(path = %path.display(), "ticket database initialized");
    Ok(())
}

async fn run(config: EngineConfig) -> anyhow::Result<()> {
    let path = config.resolved_database_path();
    let store: Arc<dyn TicketStore> = Arc::new(SqliteTicketStore::open(&path)?);
    info!(path = %path.display(), "ticket store opened");

    let verifier: Arc<dyn Verifier> = Arc::new(
        CommandVerifier::new(&config.verifier_command).with_args(config.verifier_args.clone()),
    );
    let backend: Arc<dyn MergeBackend> = Arc::new(
        GhCli::new()
            .with_program(&config.gh_program)
            .with_timeout(config.merge_timeout()),
    );
    let merger = MergeCoordinator::new(Arc::clone(&store), backend);
    let reviewer = Arc::new(SentinelReviewer::new(
        Arc::clone(&store),
        verifier,
        merger,
        config.reviewer_id.clone(),
    ));

    let shutdown = ShutdownFlag::new();
    let signal_flag = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("SIGINT received, requesting shutdown");
            signal_flag.request();
        }
    });

    let dispatcher = ReviewDispatcher::new(
        store,
        reviewer,
        DispatchConfig {
            tick_interval: config.tick_interval(),
            execution_slots: config.execution_slots,
            reviewer_id: config.reviewer_id,
        },
        shutdown,
    );
    dispatcher.run().await;

    info!("engine stopped");
    Ok(())
}
