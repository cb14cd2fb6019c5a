//! Combination generator — singles through quadruples.
//!
//! Enumerates every distinct-match subset of the selection catalog, filters
//! by odds range, size-dependent confidence and expected-value floors, and
//! computes the combined metrics (odds, probability, confidence, EV, Kelly,
//! risk, diversification) for the survivors. Pure and deterministic: the
//! same catalog always produces the same slate in the same order, so the
//! work can be sharded by size across workers and re-invoked safely.

pub mod kelly;
pub mod risk;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::{BetSelection, EngineError, RiskLevel, Ticket, TicketSelection};

/// Largest supported accumulator.
pub const MAX_LEGS: usize = 4;

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Caller-supplied generation filters. The size-dependent confidence and EV
/// floors are fixed policy (see `confidence_floor` / `ev_floor`); these are
/// the per-run knobs.
#[derive(Debug, Clone)]
pub struct GeneratorFilters {
    /// Combined odds must land inside (min_odds, max_odds).
    pub min_odds: f64,
    pub max_odds: f64,
    /// Baseline per-combination confidence floor; size floors can only raise it.
    pub min_confidence: f64,
}

impl Default for GeneratorFilters {
    fn default() -> Self {
        Self {
            min_odds: 1.50,
            max_odds: 100.0,
            min_confidence: 0.55,
        }
    }
}

impl GeneratorFilters {
    fn validate(&self) -> Result<(), EngineError> {
        if !(self.min_odds > 1.0 && self.min_odds < self.max_odds) {
            return Err(EngineError::Config(format!(
                "odds range must satisfy 1.0 < min < max, got ({}, {})",
                self.min_odds, self.max_odds
            )));
        }
        Ok(())
    }
}

/// Confidence floor per combination size. Compounding risk across more legs
/// demands higher per-leg certainty.
fn confidence_floor(size: usize) -> f64 {
    match size {
        0 | 1 => 0.0,
        2 => 0.60,
        3 => 0.65,
        _ => 0.70,
    }
}

/// Expected-value floor per combination size. EV itself shrinks
/// multiplicatively with more legs, so the bar lowers — but stays positive.
fn ev_floor(size: usize) -> f64 {
    match size {
        0 | 1 => 0.08,
        2 => 0.05,
        3 => 0.03,
        _ => 0.02,
    }
}

// ---------------------------------------------------------------------------
// Combination
// ---------------------------------------------------------------------------

/// A scored candidate slip of 1–4 legs on distinct matches. Derived view:
/// recomputed each cycle, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Combination {
    /// Legs ordered by match id.
    pub legs: Vec<BetSelection>,
    /// Product of leg odds.
    pub combined_odds: f64,
    /// Product of leg probabilities (independence-assumed).
    pub combined_probability: f64,
    /// Mean of leg confidences.
    pub combined_confidence: f64,
    /// probability × odds − 1.
    pub expected_value: f64,
    /// EV / (odds − 1), capped per size.
    pub kelly_fraction: f64,
    pub risk_level: RiskLevel,
    /// Market-type spread, graded for trebles and quads only.
    pub diversification_score: Option<f64>,
    /// Set on doubles whose legs sit on statistically coupled markets.
    pub correlation_advisory: bool,
}

impl Combination {
    pub fn size(&self) -> usize {
        self.legs.len()
    }

    /// Lowest match id among the legs — the deterministic final tie-breaker.
    pub fn min_match_id(&self) -> i64 {
        self.legs.iter().map(|l| l.match_id).min().unwrap_or(i64::MAX)
    }

    /// Commit this combination into a pending ticket for a user.
    pub fn to_ticket(&self, user_id: i64, stake: Decimal) -> Result<Ticket, EngineError> {
        if stake <= Decimal::ZERO {
            return Err(EngineError::InvariantViolation(format!(
                "stake must be positive, got {stake}"
            )));
        }
        let selections = self.legs.iter().map(TicketSelection::from_selection).collect();
        Ticket::new(user_id, stake, self.combined_odds, selections)
    }
}

/// Build one combination from explicit legs, applying all filters.
///
/// Returns `Ok(None)` when a filter rejects the subset, and an
/// `InvariantViolation` when the legs themselves are malformed (empty,
/// oversized, or sharing a match).
pub fn build_combination(
    mut legs: Vec<BetSelection>,
    filters: &GeneratorFilters,
) -> Result<Option<Combination>, EngineError> {
    let size = legs.len();
    if size == 0 || size > MAX_LEGS {
        return Err(EngineError::InvariantViolation(format!(
            "combination must have 1–{MAX_LEGS} legs, got {size}"
        )));
    }

    legs.sort_by_key(|l| l.match_id);
    if legs.windows(2).any(|w| w[0].match_id == w[1].match_id) {
        return Err(EngineError::InvariantViolation(
            "combination has two legs on the same match".to_string(),
        ));
    }

    let combined_odds: f64 = legs.iter().map(|l| l.odds).product();
    let combined_probability: f64 = legs.iter().map(|l| l.probability).product();
    let combined_confidence: f64 =
        legs.iter().map(|l| l.confidence).sum::<f64>() / size as f64;

    if combined_odds <= filters.min_odds || combined_odds >= filters.max_odds {
        return Ok(None);
    }

    let floor = filters.min_confidence.max(confidence_floor(size));
    if combined_confidence < floor {
        return Ok(None);
    }

    let expected_value = combined_probability * combined_odds - 1.0;
    if expected_value < ev_floor(size) {
        return Ok(None);
    }

    let kelly_fraction = kelly::kelly_fraction(expected_value, combined_odds, size);

    let mut risk_level = risk::grade(combined_confidence, size);
    let correlation_advisory = size == 2 && risk::has_correlated_pair(&legs);
    if correlation_advisory {
        risk_level = risk_level.max(RiskLevel::Medium);
    }

    let diversification_score = if size >= 3 {
        Some(risk::diversification_score(&legs))
    } else {
        None
    };

    Ok(Some(Combination {
        legs,
        combined_odds,
        combined_probability,
        combined_confidence,
        expected_value,
        kelly_fraction,
        risk_level,
        diversification_score,
        correlation_advisory,
    }))
}

// ---------------------------------------------------------------------------
// Slate
// ---------------------------------------------------------------------------

/// Generated combinations for one cycle, one list per size, each sorted by
/// EV descending (ties: confidence descending, lowest match id ascending).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Slate {
    pub singles: Vec<Combination>,
    pub doubles: Vec<Combination>,
    pub trebles: Vec<Combination>,
    pub quads: Vec<Combination>,
}

impl Slate {
    pub fn total(&self) -> usize {
        self.singles.len() + self.doubles.len() + self.trebles.len() + self.quads.len()
    }

    pub fn by_size(&self, size: usize) -> &[Combination] {
        match size {
            1 => &self.singles,
            2 => &self.doubles,
            3 => &self.trebles,
            4 => &self.quads,
            _ => &[],
        }
    }

    /// Keep only the best `n` combinations per size.
    pub fn truncate(&mut self, n: usize) {
        self.singles.truncate(n);
        self.doubles.truncate(n);
        self.trebles.truncate(n);
        self.quads.truncate(n);
    }
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Generate the full slate: singles, doubles, trebles, quads.
pub fn generate(
    selections: &[BetSelection],
    filters: &GeneratorFilters,
) -> Result<Slate, EngineError> {
    let slate = Slate {
        singles: generate_size(selections, filters, 1)?,
        doubles: generate_size(selections, filters, 2)?,
        trebles: generate_size(selections, filters, 3)?,
        quads: generate_size(selections, filters, 4)?,
    };

    info!(
        selections = selections.len(),
        singles = slate.singles.len(),
        doubles = slate.doubles.len(),
        trebles = slate.trebles.len(),
        quads = slate.quads.len(),
        "Combination generation complete"
    );

    Ok(slate)
}

/// Generate all surviving combinations of exactly `size` legs.
pub fn generate_size(
    selections: &[BetSelection],
    filters: &GeneratorFilters,
    size: usize,
) -> Result<Vec<Combination>, EngineError> {
    filters.validate()?;
    if size == 0 || size > MAX_LEGS {
        return Err(EngineError::Config(format!(
            "combination size must be 1–{MAX_LEGS}, got {size}"
        )));
    }

    // Deterministic enumeration order regardless of catalog order.
    let mut pool: Vec<&BetSelection> = selections.iter().collect();
    pool.sort_by(|a, b| {
        a.match_id
            .cmp(&b.match_id)
            .then_with(|| a.market.key().cmp(&b.market.key()))
    });

    let mut out = Vec::new();
    let mut current: Vec<&BetSelection> = Vec::with_capacity(size);
    enumerate(&pool, 0, size, &mut current, filters, &mut out)?;

    out.sort_by(|a, b| {
        b.expected_value
            .partial_cmp(&a.expected_value)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                b.combined_confidence
                    .partial_cmp(&a.combined_confidence)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(a.min_match_id().cmp(&b.min_match_id()))
    });

    debug!(size, candidates = out.len(), "Size pass complete");
    Ok(out)
}

fn enumerate<'a>(
    pool: &[&'a BetSelection],
    start: usize,
    size: usize,
    current: &mut Vec<&'a BetSelection>,
    filters: &GeneratorFilters,
    out: &mut Vec<Combination>,
) -> Result<(), EngineError> {
    if current.len() == size {
        let legs: Vec<BetSelection> = current.iter().map(|l| (*l).clone()).collect();
        if let Some(combination) = build_combination(legs, filters)? {
            out.push(combination);
        }
        return Ok(());
    }

    let needed = size - current.len();
    for i in start..pool.len() {
        if pool.len() - i < needed {
            break;
        }
        // Independence-assumption guard: never two legs on one match.
        if current.iter().any(|l| l.match_id == pool[i].match_id) {
            continue;
        }
        current.push(pool[i]);
        enumerate(pool, i + 1, size, current, filters, out)?;
        current.pop();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
