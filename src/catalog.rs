//! Selection catalog — boundary validation of model predictions.
//!
//! Raw prediction payloads arrive with every field optional; they are
//! validated exactly once here and normalized into typed `BetSelection`
//! records. A bad row is skipped with a warning and counted — it never
//! aborts the batch. Downstream code can rely on every selection having
//! a parsed market, in-range probability/confidence, and odds ≥ 1.0.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::market::Market;
use crate::types::{BetSelection, EngineError};

// ---------------------------------------------------------------------------
// Raw payload
// ---------------------------------------------------------------------------

/// One prediction row as produced by the external probability model.
/// Every field is optional on the wire; validation happens in `normalize`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPrediction {
    #[serde(default)]
    pub match_id: Option<i64>,
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub probability: Option<f64>,
    #[serde(default)]
    pub odds: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub match_date: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Counters for one normalization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogReport {
    pub accepted: usize,
    pub skipped: usize,
    pub duplicates: usize,
}

/// Validate and deduplicate a batch of raw predictions.
///
/// Rows failing validation are logged and counted in `skipped`; rows
/// repeating an already-seen `(match_id, market)` pair are dropped and
/// counted in `duplicates` (first occurrence wins).
pub fn normalize(rows: Vec<RawPrediction>) -> (Vec<BetSelection>, CatalogReport) {
    let mut report = CatalogReport::default();
    let mut seen: HashSet<(i64, Market)> = HashSet::new();
    let mut selections = Vec::with_capacity(rows.len());

    for row in rows {
        let selection = match validate(&row) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Skipping prediction row");
                report.skipped += 1;
                continue;
            }
        };

        if !seen.insert((selection.match_id, selection.market)) {
            debug!(
                match_id = selection.match_id,
                market = %selection.market,
                "Dropping duplicate prediction"
            );
            report.duplicates += 1;
            continue;
        }

        selections.push(selection);
        report.accepted += 1;
    }

    info!(
        accepted = report.accepted,
        skipped = report.skipped,
        duplicates = report.duplicates,
        "Selection catalog refreshed"
    );

    (selections, report)
}

/// Validate a single raw row into a typed selection.
fn validate(row: &RawPrediction) -> Result<BetSelection, EngineError> {
    let match_id = row.match_id.ok_or_else(|| missing("match_id"))?;

    let key = row.market.as_deref().ok_or_else(|| missing("market"))?;
    let market: Market = key
        .parse()
        .map_err(|_| EngineError::UnrecognizedMarket(key.to_string()))?;

    let probability = row.probability.ok_or_else(|| missing("probability"))?;
    if !probability.is_finite() || !(0.0..=1.0).contains(&probability) {
        return Err(out_of_range("probability", probability));
    }

    let odds = row.odds.ok_or_else(|| missing("odds"))?;
    if !odds.is_finite() || odds < 1.0 {
        return Err(out_of_range("odds", odds));
    }

    let confidence = row.confidence.ok_or_else(|| missing("confidence"))?;
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return Err(out_of_range("confidence", confidence));
    }

    let match_date = row.match_date.ok_or_else(|| missing("match_date"))?;

    Ok(BetSelection {
        match_id,
        market,
        probability,
        odds,
        confidence,
        match_date,
    })
}

fn missing(field: &str) -> EngineError {
    EngineError::DataUnavailable {
        context: "prediction".to_string(),
        message: format!("missing field {field}"),
    }
}

fn out_of_range(field: &str, value: f64) -> EngineError {
    EngineError::DataUnavailable {
        context: "prediction".to_string(),
        message: format!("{field} out of range: {value}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
