//! Settlement — resolving committed tickets against finished matches.
//!
//! Per-leg resolution is pure (`rules`); this module aggregates legs to a
//! ticket status, prices the outcome, and drives the batch run. A leg
//! transitions Pending → terminal exactly once; a ticket whose status is
//! already terminal is never touched again. Per-ticket failures are
//! isolated into the run report — one bad record never aborts the batch —
//! except a ledger inconsistency, which halts that user's account.

pub mod rules;

use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ledger::LedgerEntryKind;
use crate::store::Store;
use crate::types::{money_from_f64, BetStatus, EngineError, FinalScore, Ticket};

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Combine leg statuses into a ticket status, if one is decided yet.
///
/// Standard accumulator semantics: any lost leg loses the whole ticket
/// immediately, regardless of legs still pending. Otherwise the ticket
/// settles only once every leg is terminal — won when at least one leg won
/// and the rest won or voided, void when every leg voided.
pub fn aggregate_status(statuses: &[BetStatus]) -> Option<BetStatus> {
    if statuses.iter().any(|s| *s == BetStatus::Lost) {
        return Some(BetStatus::Lost);
    }
    if statuses.iter().any(|s| *s == BetStatus::Pending) {
        return None;
    }
    if statuses.iter().all(|s| *s == BetStatus::Void) {
        return Some(BetStatus::Void);
    }
    Some(BetStatus::Won)
}

// ---------------------------------------------------------------------------
// Ticket resolution
// ---------------------------------------------------------------------------

/// New state for one leg after a resolution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegUpdate {
    pub status: BetStatus,
    pub actual_outcome: Option<String>,
}

/// Everything the store needs to settle a ticket in one transaction: the
/// terminal status, per-leg updates, the priced outcome, and the single
/// ledger entry to append.
#[derive(Debug, Clone)]
pub struct TicketResolution {
    pub status: BetStatus,
    /// Aligned with `ticket.selections`.
    pub legs: Vec<LegUpdate>,
    pub actual_return: Decimal,
    pub profit_loss: Decimal,
    pub entry_kind: LedgerEntryKind,
    /// Amount credited back to the balance by the settlement entry.
    pub credit: Decimal,
}

/// Resolve a ticket against the finished matches available this run.
///
/// Returns `Ok(None)` when the ticket is already terminal (idempotency
/// guard) or not yet decidable — legs whose matches have not finished stay
/// pending, and only a lost leg can settle a ticket early.
pub fn resolve_ticket(
    ticket: &Ticket,
    results: &HashMap<i64, FinalScore>,
) -> Result<Option<TicketResolution>, EngineError> {
    if ticket.is_terminal() {
        return Ok(None);
    }

    let legs: Vec<LegUpdate> = ticket
        .selections
        .iter()
        .map(|leg| {
            if leg.status.is_terminal() {
                return LegUpdate {
                    status: leg.status,
                    actual_outcome: leg.actual_outcome.clone(),
                };
            }
            match results.get(&leg.match_id) {
                Some(score) => LegUpdate {
                    status: rules::resolve_key(&leg.market, score).into(),
                    actual_outcome: Some(score.to_string()),
                },
                None => LegUpdate {
                    status: BetStatus::Pending,
                    actual_outcome: None,
                },
            }
        })
        .collect();

    let statuses: Vec<BetStatus> = legs.iter().map(|l| l.status).collect();
    let Some(status) = aggregate_status(&statuses) else {
        return Ok(None);
    };

    let resolution = match status {
        BetStatus::Won => {
            // Void legs drop out of the accumulator at odds 1.0; with no
            // void legs this is exactly stake × total_odds.
            let effective_odds: f64 = ticket
                .selections
                .iter()
                .zip(&legs)
                .filter(|(_, update)| update.status == BetStatus::Won)
                .map(|(leg, _)| leg.odds)
                .product();
            let actual_return = (ticket.stake * money_from_f64(effective_odds)?).round_dp(2);
            TicketResolution {
                status,
                legs,
                actual_return,
                profit_loss: actual_return - ticket.stake,
                entry_kind: LedgerEntryKind::Win,
                credit: actual_return,
            }
        }
        BetStatus::Lost => TicketResolution {
            status,
            legs,
            actual_return: Decimal::ZERO,
            profit_loss: -ticket.stake,
            entry_kind: LedgerEntryKind::Loss,
            credit: Decimal::ZERO,
        },
        // Every leg void: the stake goes back (see DESIGN.md).
        BetStatus::Void => TicketResolution {
            status,
            legs,
            actual_return: ticket.stake,
            profit_loss: Decimal::ZERO,
            entry_kind: LedgerEntryKind::Refund,
            credit: ticket.stake,
        },
        BetStatus::Pending => unreachable!("aggregate_status never returns Pending"),
    };

    Ok(Some(resolution))
}

// ---------------------------------------------------------------------------
// Batch runner
// ---------------------------------------------------------------------------

/// Outcome counters for one settlement run.
#[derive(Debug, Clone)]
pub struct SettlementReport {
    pub run_id: Uuid,
    pub examined: usize,
    pub settled: usize,
    pub won: usize,
    pub lost: usize,
    pub voided: usize,
    /// Tickets whose matches have not all finished yet.
    pub still_pending: usize,
    pub errors: usize,
    /// Post-settlement snapshots of the tickets settled this run, for
    /// feedback export.
    pub settled_tickets: Vec<Ticket>,
}

impl SettlementReport {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            examined: 0,
            settled: 0,
            won: 0,
            lost: 0,
            voided: 0,
            still_pending: 0,
            errors: 0,
            settled_tickets: Vec::new(),
        }
    }
}

impl fmt::Display for SettlementReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run {}: examined={} settled={} (W{}/L{}/V{}) pending={} errors={}",
            self.run_id,
            self.examined,
            self.settled,
            self.won,
            self.lost,
            self.voided,
            self.still_pending,
            self.errors,
        )
    }
}

enum SettleOutcome {
    Settled(Ticket),
    Unresolved,
    /// Lost the race to another settler — already terminal.
    Skipped,
    Errored,
}

/// Batch settlement driver. Tickets are processed concurrently up to
/// `workers`; the store serializes writes per user, so two tickets for one
/// user can never produce a lost update.
pub struct Settler {
    workers: usize,
}

impl Settler {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Settle every pending ticket decidable from `results`.
    ///
    /// Idempotent: a second run with no newly finished matches settles
    /// nothing and writes no ledger entries.
    pub async fn settle_pending(
        &self,
        store: &Store,
        results: &HashMap<i64, FinalScore>,
    ) -> SettlementReport {
        let pending = store.pending_tickets().await;
        let run_id = Uuid::new_v4();
        let mut report = SettlementReport::new(run_id);
        report.examined = pending.len();

        info!(
            run_id = %run_id,
            pending = pending.len(),
            finished_matches = results.len(),
            "Settlement run started"
        );

        let outcomes: Vec<SettleOutcome> = stream::iter(pending)
            .map(|ticket| settle_one(store, results, ticket))
            .buffer_unordered(self.workers)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                SettleOutcome::Settled(ticket) => {
                    report.settled += 1;
                    match ticket.status {
                        BetStatus::Won => report.won += 1,
                        BetStatus::Lost => report.lost += 1,
                        BetStatus::Void => report.voided += 1,
                        BetStatus::Pending => {}
                    }
                    report.settled_tickets.push(ticket);
                }
                SettleOutcome::Unresolved => report.still_pending += 1,
                SettleOutcome::Skipped => {}
                SettleOutcome::Errored => report.errors += 1,
            }
        }

        info!(
            run_id = %run_id,
            settled = report.settled,
            won = report.won,
            lost = report.lost,
            voided = report.voided,
            still_pending = report.still_pending,
            errors = report.errors,
            "Settlement run complete"
        );

        report
    }
}

async fn settle_one(
    store: &Store,
    results: &HashMap<i64, FinalScore>,
    ticket: Ticket,
) -> SettleOutcome {
    let ticket_id = ticket.id;
    match resolve_ticket(&ticket, results) {
        Ok(Some(resolution)) => match store.apply_settlement(ticket_id, resolution).await {
            Ok(Some(settled)) => {
                debug!(ticket = %ticket_id, status = %settled.status, "Ticket settled");
                SettleOutcome::Settled(settled)
            }
            Ok(None) => SettleOutcome::Skipped,
            Err(e) => {
                warn!(ticket = %ticket_id, error = %e, "Ticket settlement failed");
                SettleOutcome::Errored
            }
        },
        Ok(None) => SettleOutcome::Unresolved,
        Err(e) => {
            warn!(ticket = %ticket_id, error = %e, "Ticket resolution failed");
            SettleOutcome::Errored
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TicketSelection;
    use rust_decimal_macros::dec;

    fn leg(match_id: i64, market: &str, odds: f64) -> TicketSelection {
        TicketSelection {
            match_id,
            market: market.to_string(),
            odds,
            probability: 0.55,
            confidence: 0.75,
            status: BetStatus::Pending,
            actual_outcome: None,
        }
    }

    fn ticket(stake: Decimal, legs: Vec<TicketSelection>) -> Ticket {
        let total_odds: f64 = legs.iter().map(|l| l.odds).product();
        Ticket::new(1, stake, total_odds, legs).unwrap()
    }

    fn results(entries: &[(i64, u32, u32)]) -> HashMap<i64, FinalScore> {
        entries
            .iter()
            .map(|(id, h, a)| (*id, FinalScore::new(*h, *a)))
            .collect()
    }

    // ---- aggregation -------------------------------------------------------

    #[test]
    fn test_aggregate_any_lost_loses() {
        assert_eq!(
            aggregate_status(&[BetStatus::Won, BetStatus::Won, BetStatus::Lost]),
            Some(BetStatus::Lost)
        );
        // Even with legs still pending, one loss decides the ticket.
        assert_eq!(
            aggregate_status(&[BetStatus::Pending, BetStatus::Lost]),
            Some(BetStatus::Lost)
        );
    }

    #[test]
    fn test_aggregate_all_won() {
        assert_eq!(
            aggregate_status(&[BetStatus::Won, BetStatus::Won, BetStatus::Won]),
            Some(BetStatus::Won)
        );
    }

    #[test]
    fn test_aggregate_won_with_void_legs() {
        assert_eq!(
            aggregate_status(&[BetStatus::Won, BetStatus::Void]),
            Some(BetStatus::Won)
        );
    }

    #[test]
    fn test_aggregate_all_void() {
        assert_eq!(
            aggregate_status(&[BetStatus::Void, BetStatus::Void]),
            Some(BetStatus::Void)
        );
    }

    #[test]
    fn test_aggregate_pending_undecided() {
        assert_eq!(aggregate_status(&[BetStatus::Pending]), None);
        assert_eq!(
            aggregate_status(&[BetStatus::Won, BetStatus::Pending]),
            None
        );
        assert_eq!(
            aggregate_status(&[BetStatus::Void, BetStatus::Pending]),
            None
        );
    }

    // ---- resolve_ticket ----------------------------------------------------

    #[test]
    fn test_three_leg_ticket_with_a_loss() {
        let t = ticket(
            dec!(10),
            vec![
                leg(1, "HOME_WIN", 2.0),
                leg(2, "HOME_WIN", 2.0),
                leg(3, "HOME_WIN", 2.0),
            ],
        );
        // Matches 1 and 2 home wins, match 3 away win.
        let r = results(&[(1, 2, 0), (2, 1, 0), (3, 0, 1)]);
        let resolution = resolve_ticket(&t, &r).unwrap().unwrap();
        assert_eq!(resolution.status, BetStatus::Lost);
        assert_eq!(resolution.actual_return, Decimal::ZERO);
        assert_eq!(resolution.profit_loss, dec!(-10));
        assert_eq!(resolution.entry_kind, LedgerEntryKind::Loss);
        assert_eq!(resolution.credit, Decimal::ZERO);
    }

    #[test]
    fn test_three_leg_ticket_all_won() {
        let t = ticket(
            dec!(10),
            vec![
                leg(1, "HOME_WIN", 2.0),
                leg(2, "HOME_WIN", 2.0),
                leg(3, "HOME_WIN", 2.0),
            ],
        );
        let r = results(&[(1, 2, 0), (2, 1, 0), (3, 3, 1)]);
        let resolution = resolve_ticket(&t, &r).unwrap().unwrap();
        assert_eq!(resolution.status, BetStatus::Won);
        // stake × total_odds = 10 × 8 = 80; profit = stake × (odds − 1) = 70
        assert_eq!(resolution.actual_return, dec!(80.00));
        assert_eq!(resolution.profit_loss, dec!(70.00));
        assert_eq!(resolution.entry_kind, LedgerEntryKind::Win);
        for update in &resolution.legs {
            assert_eq!(update.status, BetStatus::Won);
            assert!(update.actual_outcome.is_some());
        }
    }

    #[test]
    fn test_void_leg_drops_out_of_the_return() {
        // FIRST_GOAL_HOME voids when both sides score.
        let t = ticket(
            dec!(10),
            vec![leg(1, "HOME_WIN", 2.0), leg(2, "FIRST_GOAL_HOME", 3.0)],
        );
        let r = results(&[(1, 2, 0), (2, 2, 1)]);
        let resolution = resolve_ticket(&t, &r).unwrap().unwrap();
        assert_eq!(resolution.status, BetStatus::Won);
        // Void leg contributes odds 1.0: return = 10 × 2.0, not 10 × 6.0.
        assert_eq!(resolution.actual_return, dec!(20.00));
        assert_eq!(resolution.profit_loss, dec!(10.00));
        assert_eq!(resolution.legs[1].status, BetStatus::Void);
    }

    #[test]
    fn test_all_void_ticket_refunds() {
        let t = ticket(
            dec!(10),
            vec![
                leg(1, "FIRST_GOAL_HOME", 3.0),
                leg(2, "FIRST_GOAL_AWAY", 3.5),
            ],
        );
        // Both matches had both sides scoring — both legs void.
        let r = results(&[(1, 1, 1), (2, 2, 1)]);
        let resolution = resolve_ticket(&t, &r).unwrap().unwrap();
        assert_eq!(resolution.status, BetStatus::Void);
        assert_eq!(resolution.actual_return, dec!(10));
        assert_eq!(resolution.profit_loss, Decimal::ZERO);
        assert_eq!(resolution.entry_kind, LedgerEntryKind::Refund);
        assert_eq!(resolution.credit, dec!(10));
    }

    #[test]
    fn test_unrecognized_market_leg_voids_instead_of_failing() {
        let t = ticket(
            dec!(10),
            vec![leg(1, "HOME_WIN", 2.0), leg(2, "FOO_BAR_9", 4.0)],
        );
        let r = results(&[(1, 2, 0), (2, 2, 0)]);
        let resolution = resolve_ticket(&t, &r).unwrap().unwrap();
        assert_eq!(resolution.legs[1].status, BetStatus::Void);
        assert_eq!(resolution.status, BetStatus::Won);
        assert_eq!(resolution.actual_return, dec!(20.00));
    }

    #[test]
    fn test_unfinished_match_keeps_ticket_pending() {
        let t = ticket(
            dec!(10),
            vec![leg(1, "HOME_WIN", 2.0), leg(2, "HOME_WIN", 2.0)],
        );
        // Only match 1 finished, and it won — not decidable yet.
        let r = results(&[(1, 2, 0)]);
        assert!(resolve_ticket(&t, &r).unwrap().is_none());
    }

    #[test]
    fn test_lost_leg_settles_early() {
        let t = ticket(
            dec!(10),
            vec![leg(1, "HOME_WIN", 2.0), leg(2, "HOME_WIN", 2.0)],
        );
        // Match 1 lost; match 2 still running. Ticket is lost now.
        let r = results(&[(1, 0, 2)]);
        let resolution = resolve_ticket(&t, &r).unwrap().unwrap();
        assert_eq!(resolution.status, BetStatus::Lost);
        assert_eq!(resolution.legs[1].status, BetStatus::Pending);
    }

    #[test]
    fn test_terminal_ticket_is_a_noop() {
        let mut t = ticket(dec!(10), vec![leg(1, "HOME_WIN", 2.0)]);
        t.status = BetStatus::Won;
        let r = results(&[(1, 2, 0)]);
        assert!(resolve_ticket(&t, &r).unwrap().is_none());
    }

    #[test]
    fn test_no_results_nothing_resolves() {
        let t = ticket(dec!(10), vec![leg(1, "HOME_WIN", 2.0)]);
        assert!(resolve_ticket(&t, &HashMap::new()).unwrap().is_none());
    }

    // ---- batch runner (store-backed) ---------------------------------------

    #[tokio::test]
    async fn test_settle_pending_counts_and_idempotence() {
        let store = Store::new(dec!(100));
        let won = ticket(dec!(10), vec![leg(1, "HOME_WIN", 2.0)]);
        let lost = ticket(dec!(5), vec![leg(2, "HOME_WIN", 2.0)]);
        let waiting = ticket(dec!(5), vec![leg(3, "HOME_WIN", 2.0)]);
        store.commit_ticket(won).await.unwrap();
        store.commit_ticket(lost).await.unwrap();
        store.commit_ticket(waiting).await.unwrap();

        let settler = Settler::new(4);
        let r = results(&[(1, 2, 0), (2, 0, 1)]);

        let report = settler.settle_pending(&store, &r).await;
        assert_eq!(report.examined, 3);
        assert_eq!(report.settled, 2);
        assert_eq!(report.won, 1);
        assert_eq!(report.lost, 1);
        assert_eq!(report.still_pending, 1);
        assert_eq!(report.errors, 0);

        // Second run with the same results: nothing new settles, no new
        // ledger entries are written.
        let entries_before = store.account(1).await.lock().await.entries().len();
        let report2 = settler.settle_pending(&store, &r).await;
        assert_eq!(report2.settled, 0);
        assert_eq!(report2.still_pending, 1);
        let entries_after = store.account(1).await.lock().await.entries().len();
        assert_eq!(entries_before, entries_after);
    }

    #[tokio::test]
    async fn test_settlement_report_display() {
        let report = SettlementReport::new(Uuid::new_v4());
        let display = format!("{report}");
        assert!(display.contains("settled=0"));
        assert!(display.contains("errors=0"));
    }
}
