pub mod cli;
pub mod config;
pub mod display;
pub mod error;
pub mod ledger;
pub mod models;
pub mod sensing;
pub mod session;
mod utils;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use tokio::sync::broadcast::{self, error::RecvError};

use cli::{Cli, Commands};
use config::EngineConfig;
use ledger::{open_store, LedgerStore, ScoreLedger};
use models::StopReason;
use sensing::ReplayFeed;
use session::{EngineEvent, SessionController, SessionSummary};

pub use error::EngineError;

const SETTINGS_FILE_NAME: &str = "settings.json";

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    utils::logging::init(config.debug);

    info!("posefocus starting up...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?;

    runtime.block_on(async move {
        let store = open_store(&config)?;
        match cli.command {
            Commands::Run { script, seconds } => {
                let feed = Arc::new(ReplayFeed::from_path(&script)?);
                run_session(config, feed, store, seconds.map(Duration::from_secs)).await
            }
            Commands::Scores => print_scores(store).await,
        }
    })
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => EngineConfig::default()
            .with_env_overrides()
            .resolve_data_dir()?
            .join(SETTINGS_FILE_NAME),
    };
    Ok(EngineConfig::load(&path)?.with_env_overrides())
}

async fn run_session(
    config: EngineConfig,
    feed: Arc<ReplayFeed>,
    store: Arc<dyn LedgerStore>,
    limit: Option<Duration>,
) -> Result<()> {
    let controller = SessionController::new(config, feed, store).await;
    let mut updates = controller.subscribe();
    let mut events = controller.events();

    controller.start().await;

    let time_limit = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(time_limit);

    let mut last_line = String::new();
    let summary = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(EngineEvent::SessionCompleted(summary)) => break Some(summary),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break None,
            },
            changed = updates.changed() => {
                if changed.is_err() {
                    break None;
                }
                let snapshot = updates.borrow_and_update().clone();
                if snapshot.active {
                    let line = display::render_status(&snapshot);
                    if line != last_line {
                        println!("{line}");
                        last_line = line;
                    }
                }
            }
            _ = &mut time_limit => {
                info!("time limit reached, stopping session");
                match controller.stop(StopReason::Manual).await {
                    Some(summary) => break Some(summary),
                    // Lost the race to an automatic stop; wait for it to be saved.
                    None => break wait_for_completion(&mut events).await,
                }
            }
        }
    };

    if let Some(summary) = &summary {
        report(summary);
    }

    let ledger = ScoreLedger::from_records(controller.ledger().await);
    print_scoreboard(&ledger);
    Ok(())
}

async fn wait_for_completion(
    events: &mut broadcast::Receiver<EngineEvent>,
) -> Option<SessionSummary> {
    loop {
        match events.recv().await {
            Ok(EngineEvent::SessionCompleted(summary)) => return Some(summary),
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return None,
        }
    }
}

fn report(summary: &SessionSummary) {
    println!(
        "Session ended ({}) after {}",
        summary.reason.as_str(),
        display::format_clock(summary.record.duration_seconds)
    );
    if let Some(warning) = &summary.persistence_warning {
        eprintln!("warning: {warning}");
    }
}

fn print_scoreboard(ledger: &ScoreLedger) {
    if let Some(best) = ledger.best() {
        println!("Best: {}", display::format_clock(best.duration_seconds));
    }
    println!("{}", display::render_scoreboard(&ledger.snapshot()));
}

async fn print_scores(store: Arc<dyn LedgerStore>) -> Result<()> {
    let ledger = ScoreLedger::from_records(store.load_ledger().await?);
    print_scoreboard(&ledger);
    Ok(())
}
