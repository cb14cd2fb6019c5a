//! Shared types for the ACCA engine.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that catalog, generator, settlement,
//! and ledger modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::market::Market;

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Status of a ticket or a single leg. Transitions Pending → terminal exactly
/// once and never reverts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BetStatus {
    Pending,
    Won,
    Lost,
    Void,
}

impl BetStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BetStatus::Pending)
    }
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetStatus::Pending => write!(f, "PENDING"),
            BetStatus::Won => write!(f, "WON"),
            BetStatus::Lost => write!(f, "LOST"),
            BetStatus::Void => write!(f, "VOID"),
        }
    }
}

/// Terminal outcome of a resolved leg. Settlement rules can only produce one
/// of these three; Pending is not a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegOutcome {
    Won,
    Lost,
    Void,
}

impl From<LegOutcome> for BetStatus {
    fn from(outcome: LegOutcome) -> Self {
        match outcome {
            LegOutcome::Won => BetStatus::Won,
            LegOutcome::Lost => BetStatus::Lost,
            LegOutcome::Void => BetStatus::Void,
        }
    }
}

impl fmt::Display for LegOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegOutcome::Won => write!(f, "WON"),
            LegOutcome::Lost => write!(f, "LOST"),
            LegOutcome::Void => write!(f, "VOID"),
        }
    }
}

/// Risk grade assigned to a generated combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
        }
    }
}

// ---------------------------------------------------------------------------
// Match results
// ---------------------------------------------------------------------------

/// Final score of a finished match. Settlement only ever sees finished
/// matches with both scores present; partial results are filtered at the
/// results-source boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalScore {
    pub home_goals: u32,
    pub away_goals: u32,
}

impl FinalScore {
    pub fn new(home_goals: u32, away_goals: u32) -> Self {
        Self {
            home_goals,
            away_goals,
        }
    }

    pub fn total(&self) -> u32 {
        self.home_goals + self.away_goals
    }

    pub fn both_scored(&self) -> bool {
        self.home_goals > 0 && self.away_goals > 0
    }
}

impl fmt::Display for FinalScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.home_goals, self.away_goals)
    }
}

// ---------------------------------------------------------------------------
// Selections
// ---------------------------------------------------------------------------

/// One predicted outcome for one match/market pair, with the model's
/// probability, the bookmaker odds, and the model's confidence.
/// Immutable; regenerated each scheduling cycle from the prediction model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetSelection {
    pub match_id: i64,
    pub market: Market,
    /// Model win probability (0.0–1.0)
    pub probability: f64,
    /// Decimal odds, ≥ 1.0
    pub odds: f64,
    /// Model self-reported confidence (0.0–1.0)
    pub confidence: f64,
    pub match_date: DateTime<Utc>,
}

impl BetSelection {
    /// Expected value per unit staked: probability × odds − 1.
    pub fn expected_value(&self) -> f64 {
        self.probability * self.odds - 1.0
    }
}

impl fmt::Display for BetSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "match {} {} @ {:.2} (P={:.0}% conf={:.0}%)",
            self.match_id,
            self.market,
            self.odds,
            self.probability * 100.0,
            self.confidence * 100.0,
        )
    }
}

// ---------------------------------------------------------------------------
// Tickets
// ---------------------------------------------------------------------------

/// One leg of a committed ticket.
///
/// The market is kept as the raw wire key: durable tickets may carry keys a
/// later build no longer recognizes, and those must still settle (to VOID)
/// instead of failing to load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketSelection {
    pub match_id: i64,
    pub market: String,
    pub odds: f64,
    pub probability: f64,
    pub confidence: f64,
    pub status: BetStatus,
    /// Final score the leg was resolved against ("2-1"), set at settlement.
    pub actual_outcome: Option<String>,
}

impl TicketSelection {
    pub fn from_selection(selection: &BetSelection) -> Self {
        Self {
            match_id: selection.match_id,
            market: selection.market.key(),
            odds: selection.odds,
            probability: selection.probability,
            confidence: selection.confidence,
            status: BetStatus::Pending,
            actual_outcome: None,
        }
    }
}

/// A committed betting slip: one or more legs, a stake, and a potential
/// return. Created when a generated combination is committed; durable until
/// settled, then kept as history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub user_id: i64,
    pub stake: Decimal,
    pub total_odds: f64,
    pub potential_return: Decimal,
    pub status: BetStatus,
    pub selections: Vec<TicketSelection>,
    pub placed_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    pub actual_return: Option<Decimal>,
    pub profit_loss: Option<Decimal>,
}

impl Ticket {
    /// Build a pending ticket from its legs.
    pub fn new(
        user_id: i64,
        stake: Decimal,
        total_odds: f64,
        selections: Vec<TicketSelection>,
    ) -> Result<Self, EngineError> {
        if selections.is_empty() {
            return Err(EngineError::InvariantViolation(
                "ticket must have at least one leg".to_string(),
            ));
        }
        let potential_return = (stake * money_from_f64(total_odds)?).round_dp(2);
        Ok(Self {
            id: Uuid::new_v4(),
            user_id,
            stake,
            total_odds,
            potential_return,
            status: BetStatus::Pending,
            selections,
            placed_at: Utc::now(),
            settled_at: None,
            actual_return: None,
            profit_loss: None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Match ids referenced by this ticket's legs.
    pub fn match_ids(&self) -> Vec<i64> {
        self.selections.iter().map(|s| s.match_id).collect()
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] user {} | {} leg(s) @ {:.2} | stake {} → {} | {}",
            self.id,
            self.user_id,
            self.selections.len(),
            self.total_odds,
            self.stake,
            self.potential_return,
            self.status,
        )
    }
}

// ---------------------------------------------------------------------------
// Money conversion
// ---------------------------------------------------------------------------

/// Convert a validated f64 (odds, model output) into a Decimal for money
/// arithmetic. Fails only on non-finite input, which boundary validation
/// already excludes.
pub fn money_from_f64(value: f64) -> Result<Decimal, EngineError> {
    Decimal::from_f64(value)
        .ok_or_else(|| EngineError::InvariantViolation(format!("non-finite amount: {value}")))
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Missing or invalid data ({context}): {message}")]
    DataUnavailable { context: String, message: String },

    #[error("Unrecognized market key: {0}")]
    UnrecognizedMarket(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error(
        "Ledger inconsistency for user {user_id}: expected balance_before {expected}, found {found}"
    )]
    LedgerInconsistency {
        user_id: i64,
        expected: Decimal,
        found: Decimal,
    },

    #[error("Ledger halted for user {0} pending manual reconciliation")]
    LedgerHalted(i64),

    #[error("Insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: Decimal, available: Decimal },

    #[error("Duplicate ledger entry for ticket {0}")]
    DuplicateEntry(Uuid),

    #[error("Ticket not found: {0}")]
    TicketNotFound(Uuid),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
