//! Feedback export — settled predictions for retraining.
//!
//! After a settlement run, every finished match that resolved at least one
//! leg is flattened into a `FeedbackRecord`: the final score plus each
//! resolved selection's prediction snapshot (market, probability, odds,
//! confidence) and its outcome. Records are appended through a sink;
//! delivery is at-least-once, so downstream consumers dedupe by
//! `(match_id, settlement_run_id)`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::types::{BetStatus, FinalScore, Ticket};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One resolved selection: what the model predicted and how it went.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackLeg {
    pub market: String,
    pub probability: f64,
    pub odds: f64,
    pub confidence: f64,
    pub outcome: BetStatus,
}

/// Flat per-match record for the retraining pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub match_id: i64,
    /// Dedupe key together with `match_id` — the exporter may deliver a
    /// record more than once.
    pub settlement_run_id: Uuid,
    pub home_score: u32,
    pub away_score: u32,
    pub exported_at: DateTime<Utc>,
    pub legs: Vec<FeedbackLeg>,
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Append-only destination for feedback records.
pub trait FeedbackSink: Send + Sync {
    fn append(&self, record: &FeedbackRecord) -> Result<()>;
}

impl<T: FeedbackSink + ?Sized> FeedbackSink for std::sync::Arc<T> {
    fn append(&self, record: &FeedbackRecord) -> Result<()> {
        (**self).append(record)
    }
}

/// JSONL file sink — one record per line, append-only.
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FeedbackSink for JsonlSink {
    fn append(&self, record: &FeedbackRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("Failed to serialise feedback record")?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context(format!("Failed to open feedback file {}", self.path.display()))?;
        writeln!(file, "{line}")
            .context(format!("Failed to append to {}", self.path.display()))?;
        Ok(())
    }
}

/// In-memory sink for tests and dry runs.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<FeedbackRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<FeedbackRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl FeedbackSink for MemorySink {
    fn append(&self, record: &FeedbackRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Exporter
// ---------------------------------------------------------------------------

pub struct FeedbackExporter {
    sink: Box<dyn FeedbackSink>,
}

impl FeedbackExporter {
    pub fn new(sink: Box<dyn FeedbackSink>) -> Self {
        Self { sink }
    }

    /// Export one record per finished match that resolved at least one leg
    /// in this run. Returns the number of records emitted.
    pub fn export_run(
        &self,
        run_id: Uuid,
        settled_tickets: &[Ticket],
        results: &HashMap<i64, FinalScore>,
    ) -> Result<usize> {
        let mut by_match: HashMap<i64, Vec<FeedbackLeg>> = HashMap::new();
        for ticket in settled_tickets {
            for selection in &ticket.selections {
                if !selection.status.is_terminal() || !results.contains_key(&selection.match_id) {
                    continue;
                }
                by_match.entry(selection.match_id).or_default().push(FeedbackLeg {
                    market: selection.market.clone(),
                    probability: selection.probability,
                    odds: selection.odds,
                    confidence: selection.confidence,
                    outcome: selection.status,
                });
            }
        }

        let mut match_ids: Vec<i64> = by_match.keys().copied().collect();
        match_ids.sort_unstable();

        let mut emitted = 0;
        for match_id in match_ids {
            let score = results[&match_id];
            let record = FeedbackRecord {
                match_id,
                settlement_run_id: run_id,
                home_score: score.home_goals,
                away_score: score.away_goals,
                exported_at: Utc::now(),
                legs: by_match.remove(&match_id).unwrap_or_default(),
            };
            self.sink.append(&record)?;
            emitted += 1;
        }

        if emitted > 0 {
            info!(run_id = %run_id, records = emitted, "Feedback exported");
        }
        Ok(emitted)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
