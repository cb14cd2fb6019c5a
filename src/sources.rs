//! External collaborator seams.
//!
//! The probability model and the match-results feed are consumed as black
//! boxes behind async traits. The engine core never performs network I/O;
//! the bundled implementations read JSON files dropped by the collection
//! pipeline, and tests mock the traits directly.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::catalog::RawPrediction;
use crate::types::FinalScore;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// The prediction model: one batch of raw predictions per scheduling cycle.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PredictionSource: Send + Sync {
    async fn fetch_predictions(&self) -> Result<Vec<RawPrediction>>;
}

/// The match-results collaborator: final scores of finished matches.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultsSource: Send + Sync {
    async fn fetch_finished(&self) -> Result<HashMap<i64, FinalScore>>;
}

// ---------------------------------------------------------------------------
// File-backed implementations
// ---------------------------------------------------------------------------

/// One result row as delivered by the collaborator. Scores may be missing
/// for matches still in play; the status string is theirs, not ours.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawResult {
    #[serde(default)]
    pub match_id: Option<i64>,
    #[serde(default)]
    pub home_score: Option<u32>,
    #[serde(default)]
    pub away_score: Option<u32>,
    #[serde(default)]
    pub status: Option<String>,
}

fn is_finished(status: &str) -> bool {
    matches!(
        status.trim().to_uppercase().as_str(),
        "FINISHED" | "FT" | "FULL_TIME" | "COMPLETE" | "COMPLETED"
    )
}

/// Reads a JSON array of `RawPrediction` rows. A missing file means no
/// predictions this cycle, not an error.
pub struct JsonPredictionFile {
    path: PathBuf,
}

impl JsonPredictionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PredictionSource for JsonPredictionFile {
    async fn fetch_predictions(&self) -> Result<Vec<RawPrediction>> {
        if !Path::new(&self.path).exists() {
            info!(path = %self.path.display(), "No predictions file this cycle");
            return Ok(Vec::new());
        }
        let json = std::fs::read_to_string(&self.path)
            .context(format!("Failed to read predictions {}", self.path.display()))?;
        let rows: Vec<RawPrediction> = serde_json::from_str(&json)
            .context(format!("Failed to parse predictions {}", self.path.display()))?;
        Ok(rows)
    }
}

/// Reads a JSON array of `RawResult` rows and keeps only finished matches
/// with both scores. Rows claiming to be finished but missing a score are
/// skipped with a warning and picked up again next cycle.
pub struct JsonResultsFile {
    path: PathBuf,
}

impl JsonResultsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ResultsSource for JsonResultsFile {
    async fn fetch_finished(&self) -> Result<HashMap<i64, FinalScore>> {
        if !Path::new(&self.path).exists() {
            info!(path = %self.path.display(), "No results file this cycle");
            return Ok(HashMap::new());
        }
        let json = std::fs::read_to_string(&self.path)
            .context(format!("Failed to read results {}", self.path.display()))?;
        let rows: Vec<RawResult> = serde_json::from_str(&json)
            .context(format!("Failed to parse results {}", self.path.display()))?;

        let mut finished = HashMap::new();
        for row in rows {
            let Some(match_id) = row.match_id else {
                warn!("Skipping result row without match_id");
                continue;
            };
            if !row.status.as_deref().map(is_finished).unwrap_or(false) {
                continue;
            }
            match (row.home_score, row.away_score) {
                (Some(home), Some(away)) => {
                    finished.insert(match_id, FinalScore::new(home, away));
                }
                _ => {
                    warn!(match_id, "Finished match missing a score — skipping");
                }
            }
        }
        Ok(finished)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
