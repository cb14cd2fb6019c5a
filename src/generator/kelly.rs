//! Kelly criterion sizing for combinations.
//!
//! The raw Kelly fraction for a combination is `EV / (combined_odds − 1)`,
//! capped per combination size so no single slip can claim a large share of
//! the bankroll. Stake sizing applies a fractional-Kelly multiplier plus a
//! bankroll-percentage cap and a minimum-stake floor.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

// ---------------------------------------------------------------------------
// Per-size caps
// ---------------------------------------------------------------------------

/// Maximum Kelly fraction per combination size. Larger accumulators carry
/// compounded variance, so their exposure cap shrinks.
pub fn kelly_cap(size: usize) -> f64 {
    match size {
        1 => 0.25,
        2 => 0.15,
        3 => 0.10,
        _ => 0.05,
    }
}

/// Capped Kelly fraction for a combination.
///
/// Returns 0.0 for non-positive EV or degenerate odds — such combinations
/// are filtered out before sizing anyway.
pub fn kelly_fraction(expected_value: f64, combined_odds: f64, size: usize) -> f64 {
    if combined_odds <= 1.0 || expected_value <= 0.0 {
        return 0.0;
    }
    (expected_value / (combined_odds - 1.0)).min(kelly_cap(size))
}

// ---------------------------------------------------------------------------
// Stake sizing
// ---------------------------------------------------------------------------

/// Staking configuration.
#[derive(Debug, Clone)]
pub struct StakingConfig {
    /// Fractional Kelly multiplier (0.25 = quarter-Kelly). Lower = more conservative.
    pub multiplier: f64,
    /// Maximum stake as a fraction of bankroll.
    pub max_stake_pct: f64,
    /// Minimum stake (below this, don't bother).
    pub min_stake: Decimal,
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            multiplier: 0.25,   // Quarter-Kelly: conservative
            max_stake_pct: 0.05, // Max 5% of bankroll per slip
            min_stake: dec!(0.50),
        }
    }
}

/// Size a stake for a combination's capped Kelly fraction.
///
/// Returns None when the bankroll is empty, the fraction is non-positive,
/// or the resulting stake falls below the minimum.
pub fn size_stake(
    kelly_fraction: f64,
    bankroll: Decimal,
    config: &StakingConfig,
) -> Option<Decimal> {
    if bankroll <= Decimal::ZERO || kelly_fraction <= 0.0 {
        return None;
    }

    let fraction = (kelly_fraction * config.multiplier).min(config.max_stake_pct);
    let fraction = Decimal::from_f64(fraction)?;
    let stake = (bankroll * fraction).round_dp(2);

    if stake < config.min_stake {
        debug!(%stake, min = %config.min_stake, "Stake below minimum size");
        return None;
    }

    Some(stake)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
