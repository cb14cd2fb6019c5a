//! Engine — batch-cycle orchestration.
//!
//! One service object, constructed with injected dependencies, drives the
//! whole cycle: normalize predictions → generate the slate → commit the
//! best combinations → settle pending tickets → export feedback. There is
//! no ambient global state; everything flows through the store handle.

use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::{self, RawPrediction};
use crate::feedback::FeedbackExporter;
use crate::generator::kelly::{self, StakingConfig};
use crate::generator::{self, Combination, GeneratorFilters, Slate};
use crate::settlement::Settler;
use crate::store::Store;
use crate::types::{EngineError, FinalScore, Ticket};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The user tickets are committed for in the batch loop.
    pub default_user_id: i64,
    /// Keep only the best N combinations per size before committing.
    pub top_n_per_size: usize,
    /// Hard cap on tickets committed in one cycle.
    pub max_commits_per_cycle: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_user_id: 1,
            top_n_per_size: 5,
            max_commits_per_cycle: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Cycle report
// ---------------------------------------------------------------------------

/// Summary of one normalize → generate → commit → settle → export cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub predictions_in: usize,
    pub selections_accepted: usize,
    pub predictions_skipped: usize,
    pub combinations: usize,
    pub committed: usize,
    pub committed_stake: Decimal,
    pub settled: usize,
    pub won: usize,
    pub lost: usize,
    pub voided: usize,
    pub settlement_errors: usize,
    pub feedback_records: usize,
    pub balance_after: Decimal,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "predictions={}/{} combos={} committed={} (stake {}) settled={} (W{}/L{}/V{}) errors={} feedback={} balance={}",
            self.selections_accepted,
            self.predictions_in,
            self.combinations,
            self.committed,
            self.committed_stake,
            self.settled,
            self.won,
            self.lost,
            self.voided,
            self.settlement_errors,
            self.feedback_records,
            self.balance_after,
        )
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    store: Arc<Store>,
    exporter: FeedbackExporter,
    settler: Settler,
    filters: GeneratorFilters,
    staking: StakingConfig,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        store: Arc<Store>,
        exporter: FeedbackExporter,
        settler: Settler,
        filters: GeneratorFilters,
        staking: StakingConfig,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            exporter,
            settler,
            filters,
            staking,
            config,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Commit a combination as a ticket for a user. The stake debit and the
    /// ticket insert happen in one store transaction.
    pub async fn commit(
        &self,
        user_id: i64,
        combination: &Combination,
        stake: Decimal,
    ) -> Result<Ticket, EngineError> {
        let ticket = combination.to_ticket(user_id, stake)?;
        let (ticket, _entry) = self.store.commit_ticket(ticket).await?;
        info!(
            ticket = %ticket.id,
            user_id,
            legs = ticket.selections.len(),
            odds = format!("{:.2}", ticket.total_odds),
            stake = %ticket.stake,
            ev = format!("{:.1}%", combination.expected_value * 100.0),
            risk = %combination.risk_level,
            "Ticket committed"
        );
        Ok(ticket)
    }

    /// Run one full batch cycle.
    pub async fn run_cycle(
        &self,
        predictions: Vec<RawPrediction>,
        results: &HashMap<i64, FinalScore>,
    ) -> anyhow::Result<CycleReport> {
        let predictions_in = predictions.len();

        // 1. Boundary validation
        let (selections, catalog_report) = catalog::normalize(predictions);

        // 2. Generation
        let mut slate = generator::generate(&selections, &self.filters)?;
        slate.truncate(self.config.top_n_per_size);
        let combinations = slate.total();

        // 3. Commit the best value, highest EV first within each size
        let (committed, committed_stake) =
            self.commit_best(self.config.default_user_id, &slate).await;

        // 4. Settle whatever the finished matches decide
        let settlement = self.settler.settle_pending(&self.store, results).await;

        // 5. Feedback for retraining
        let feedback_records = match self.exporter.export_run(
            settlement.run_id,
            &settlement.settled_tickets,
            results,
        ) {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Feedback export failed");
                0
            }
        };

        let balance_after = self.store.balance(self.config.default_user_id).await;

        let report = CycleReport {
            predictions_in,
            selections_accepted: catalog_report.accepted,
            predictions_skipped: catalog_report.skipped,
            combinations,
            committed,
            committed_stake,
            settled: settlement.settled,
            won: settlement.won,
            lost: settlement.lost,
            voided: settlement.voided,
            settlement_errors: settlement.errors,
            feedback_records,
            balance_after,
        };

        info!(summary = %report, "Cycle complete");
        Ok(report)
    }

    /// Commit the best combinations, sizes 1→4, Kelly-sized against the live
    /// balance. Legs already riding on an open ticket are not re-committed,
    /// within this cycle or across cycles.
    async fn commit_best(&self, user_id: i64, slate: &Slate) -> (usize, Decimal) {
        let mut open: HashSet<(i64, String)> = self
            .store
            .pending_tickets()
            .await
            .iter()
            .filter(|t| t.user_id == user_id)
            .flat_map(|t| {
                t.selections
                    .iter()
                    .map(|s| (s.match_id, s.market.clone()))
            })
            .collect();

        let mut committed = 0;
        let mut committed_stake = Decimal::ZERO;

        'sizes: for size in 1..=generator::MAX_LEGS {
            for combination in slate.by_size(size) {
                if committed >= self.config.max_commits_per_cycle {
                    break 'sizes;
                }
                if combination
                    .legs
                    .iter()
                    .any(|l| open.contains(&(l.match_id, l.market.key())))
                {
                    continue;
                }

                let balance = self.store.balance(user_id).await;
                let Some(stake) =
                    kelly::size_stake(combination.kelly_fraction, balance, &self.staking)
                else {
                    continue;
                };

                match self.commit(user_id, combination, stake).await {
                    Ok(ticket) => {
                        committed += 1;
                        committed_stake += ticket.stake;
                        for leg in &combination.legs {
                            open.insert((leg.match_id, leg.market.key()));
                        }
                    }
                    Err(EngineError::InsufficientBalance { needed, available }) => {
                        debug!(%needed, %available, "Bankroll exhausted for this cycle");
                        break 'sizes;
                    }
                    Err(e) => {
                        warn!(error = %e, "Commit failed — skipping combination");
                    }
                }
            }
        }

        (committed, committed_stake)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
