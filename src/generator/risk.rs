//! Risk grading for combinations.
//!
//! Grades a combination from its mean confidence and leg count, flags
//! statistically coupled market pairs on doubles (advisory only, never a
//! rejection), and scores market-type spread for trebles and quads.

use crate::market::{Market, TotalLine};
use crate::types::{BetSelection, RiskLevel};

// ---------------------------------------------------------------------------
// Risk level
// ---------------------------------------------------------------------------

/// Grade a combination.
///
/// LOW needs high confidence and at most two legs; MEDIUM tolerates a third
/// leg at slightly lower confidence; everything else is HIGH.
pub fn grade(combined_confidence: f64, size: usize) -> RiskLevel {
    if combined_confidence >= 0.75 && size <= 2 {
        RiskLevel::Low
    } else if combined_confidence >= 0.65 && size <= 3 {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}

// ---------------------------------------------------------------------------
// Correlation advisory
// ---------------------------------------------------------------------------

/// Whether two legs' markets are known to be statistically coupled.
///
/// The combined probability assumes independence; these pairings are the
/// known offenders where that assumption is optimistic (goal-heavy markets
/// move together, winners tend to keep clean sheets). Used to tag doubles
/// MEDIUM — advisory only.
pub fn correlated(a: &Market, b: &Market) -> bool {
    coupled(a, b) || coupled(b, a)
}

fn coupled(a: &Market, b: &Market) -> bool {
    match (a, b) {
        // High-scoring pairings
        (Market::Over(line), Market::BttsYes) => line.threshold() >= TotalLine::TwoAndHalf.threshold(),
        (Market::FourOrMoreGoals, Market::BttsYes) => true,
        (Market::FourOrMoreGoals, Market::Over(_)) => true,
        // Low-scoring pairings
        (Market::Under(line), Market::BttsNo) => line.threshold() <= TotalLine::TwoAndHalf.threshold(),
        (Market::Under(TotalLine::HalfGoal), Market::NoGoal) => true,
        (Market::ExactGoals(0), Market::NoGoal) => true,
        (Market::ExactGoals(0), Market::Under(_)) => true,
        (Market::BttsNo, Market::CleanSheetHome) => true,
        (Market::BttsNo, Market::CleanSheetAway) => true,
        // Winners keep clean sheets
        (Market::HomeWin, Market::CleanSheetHome) => true,
        (Market::AwayWin, Market::CleanSheetAway) => true,
        _ => false,
    }
}

/// Whether any pair of legs in a double is coupled.
pub fn has_correlated_pair(legs: &[BetSelection]) -> bool {
    for (i, a) in legs.iter().enumerate() {
        for b in &legs[i + 1..] {
            if correlated(&a.market, &b.market) {
                return true;
            }
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Diversification
// ---------------------------------------------------------------------------

/// Market-type spread score for trebles and quads:
/// `(unique_market_groups / size + 1) / 2`, in (0.5, 1.0].
pub fn diversification_score(legs: &[BetSelection]) -> f64 {
    let size = legs.len();
    if size == 0 {
        return 0.0;
    }
    let unique: std::collections::HashSet<_> = legs.iter().map(|l| l.market.group()).collect();
    (unique.len() as f64 / size as f64 + 1.0) / 2.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
