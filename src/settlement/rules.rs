//! Settlement rules — final score to leg outcome, one rule per market kind.
//!
//! `resolve` is a total pure function over the closed `Market` enum: adding
//! a variant without a rule is a compile error, so no market can fall
//! through to an accidental default. The string boundary (`resolve_key`)
//! handles durable legs whose key no longer parses: those resolve VOID with
//! a warning — never silently mis-settled, never fatal to the batch.

use tracing::warn;

use crate::market::Market;
use crate::types::{FinalScore, LegOutcome};

/// Resolve a typed market against a final score.
pub fn resolve(market: &Market, score: &FinalScore) -> LegOutcome {
    let home = score.home_goals;
    let away = score.away_goals;
    let total = score.total();

    match market {
        // 1X2
        Market::HomeWin => won_if(home > away),
        Market::Draw => won_if(home == away),
        Market::AwayWin => won_if(away > home),

        // Double chance: OR of two base outcomes
        Market::HomeOrDraw => won_if(home >= away),
        Market::HomeOrAway => won_if(home != away),
        Market::DrawOrAway => won_if(away >= home),

        // Both teams to score
        Market::BttsYes => won_if(score.both_scored()),
        Market::BttsNo => won_if(!score.both_scored()),

        // Total goals vs a half-goal line
        Market::Over(line) => won_if(f64::from(total) > line.threshold()),
        Market::Under(line) => won_if(f64::from(total) < line.threshold()),

        // Exact totals
        Market::ExactGoals(n) => won_if(total == u32::from(*n)),
        Market::FourOrMoreGoals => won_if(total >= 4),

        // Parity
        Market::OddTotalGoals => won_if(total % 2 == 1),
        Market::EvenTotalGoals => won_if(total % 2 == 0),

        // First goal attribution. Derivable from the aggregate score only
        // when nobody scored or exactly one side did; when both sides
        // scored, which came first is unknowable here, so the leg voids.
        Market::FirstGoalHome => match (home > 0, away > 0) {
            (true, false) => LegOutcome::Won,
            (true, true) => LegOutcome::Void,
            (false, _) => LegOutcome::Lost,
        },
        Market::FirstGoalAway => match (away > 0, home > 0) {
            (true, false) => LegOutcome::Won,
            (true, true) => LegOutcome::Void,
            (false, _) => LegOutcome::Lost,
        },
        Market::NoGoal => won_if(total == 0),

        // Clean sheets
        Market::CleanSheetHome => won_if(away == 0),
        Market::CleanSheetAway => won_if(home == 0),

        // Exact scoreline
        Market::ExactScore { home: h, away: a } => {
            won_if(home == u32::from(*h) && away == u32::from(*a))
        }
    }
}

/// Resolve a durable market key string. Unrecognized keys void the leg.
pub fn resolve_key(key: &str, score: &FinalScore) -> LegOutcome {
    match key.parse::<Market>() {
        Ok(market) => resolve(&market, score),
        Err(_) => {
            warn!(market = key, "Unrecognized market key — resolving leg VOID");
            LegOutcome::Void
        }
    }
}

fn won_if(condition: bool) -> LegOutcome {
    if condition {
        LegOutcome::Won
    } else {
        LegOutcome::Lost
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
