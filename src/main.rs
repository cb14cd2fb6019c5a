//! ACCA — Betting Combination and Settlement Engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores durable state from disk (or creates fresh), and runs the
//! periodic generate→commit→settle→export batch loop with graceful
//! shutdown. An in-flight cycle always runs to completion; Ctrl+C simply
//! stops the next one from being scheduled.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use acca::config::AppConfig;
use acca::engine::{CycleReport, Engine, EngineConfig};
use acca::feedback::{FeedbackExporter, FeedbackSink, JsonlSink, MemorySink};
use acca::generator::kelly::StakingConfig;
use acca::generator::GeneratorFilters;
use acca::settlement::Settler;
use acca::sources::{JsonPredictionFile, JsonResultsFile, PredictionSource, ResultsSource};
use acca::store::Store;

const BANNER: &str = r#"
    _    ____ ____    _
   / \  / ___/ ___|  / \
  / _ \| |  | |     / _ \
 / ___ \ |__| |___ / ___ \
/_/   \_\____\____/_/   \_\

  Accumulator Combination & Settlement Engine
  v0.1.0 — Batch Core
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging();

    // Print startup banner
    println!("{BANNER}");
    info!(
        engine_name = %cfg.engine.name,
        cycle_interval_secs = cfg.engine.cycle_interval_secs,
        opening_balance = %cfg.bankroll.opening_balance,
        currency = %cfg.engine.currency,
        "ACCA starting up"
    );

    // -- Restore or create state -----------------------------------------

    let store = match Store::load(&cfg.storage.state_path, cfg.bankroll.opening_balance).await? {
        Some(store) => {
            info!(
                balance = %store.balance(cfg.bankroll.default_user_id).await,
                tickets = store.tickets().await.len(),
                "Resumed from saved state"
            );
            Arc::new(store)
        }
        None => {
            info!(balance = %cfg.bankroll.opening_balance, "Fresh start");
            Arc::new(Store::new(cfg.bankroll.opening_balance))
        }
    };

    // -- Initialise components -------------------------------------------

    let sink: Box<dyn FeedbackSink> = if cfg.feedback.enabled {
        Box::new(JsonlSink::new(&cfg.feedback.path))
    } else {
        Box::new(MemorySink::new())
    };
    let exporter = FeedbackExporter::new(sink);

    let predictions = JsonPredictionFile::new(&cfg.sources.predictions_path);
    let results = JsonResultsFile::new(&cfg.sources.results_path);

    let engine = Engine::new(
        store.clone(),
        exporter,
        Settler::new(cfg.engine.workers),
        GeneratorFilters {
            min_odds: cfg.generator.min_odds,
            max_odds: cfg.generator.max_odds,
            min_confidence: cfg.generator.min_confidence,
        },
        StakingConfig {
            multiplier: cfg.staking.kelly_multiplier,
            max_stake_pct: cfg.staking.max_stake_pct,
            min_stake: cfg.staking.min_stake,
        },
        EngineConfig {
            default_user_id: cfg.bankroll.default_user_id,
            top_n_per_size: cfg.engine.top_n_per_size,
            max_commits_per_cycle: cfg.engine.max_commits_per_cycle,
        },
    );

    // -- Main loop -------------------------------------------------------

    let cycle_interval = Duration::from_secs(cfg.engine.cycle_interval_secs);
    let mut interval = tokio::time::interval(cycle_interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.engine.cycle_interval_secs,
        "Entering batch loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match run_cycle(&engine, &predictions, &results).await {
                    Ok(report) => {
                        log_cycle_report(&report);
                        // Persist state after each cycle
                        if let Err(e) = store.save(&cfg.storage.state_path).await {
                            error!(error = %e, "Failed to save state");
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Cycle failed — continuing to next");
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    // Save final state
    store.save(&cfg.storage.state_path).await?;
    info!(
        balance = %store.balance(cfg.bankroll.default_user_id).await,
        tickets = store.tickets().await.len(),
        "ACCA shut down cleanly."
    );

    Ok(())
}

/// Run a single fetch→normalize→generate→commit→settle→export cycle.
async fn run_cycle(
    engine: &Engine,
    predictions: &JsonPredictionFile,
    results: &JsonResultsFile,
) -> Result<CycleReport> {
    let rows = predictions.fetch_predictions().await?;
    let finished = results.fetch_finished().await?;
    engine.run_cycle(rows, &finished).await
}

/// Log a human-readable cycle summary.
fn log_cycle_report(report: &CycleReport) {
    info!(
        predictions = report.predictions_in,
        accepted = report.selections_accepted,
        combos = report.combinations,
        committed = report.committed,
        staked = %report.committed_stake,
        settled = report.settled,
        won = report.won,
        lost = report.lost,
        voided = report.voided,
        errors = report.settlement_errors,
        balance = %report.balance_after,
        "Cycle complete"
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("acca=info"));

    let json_logging = std::env::var("ACCA_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
