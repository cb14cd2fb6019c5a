//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. The
//! engine has no secrets of its own; everything here is tuning knobs and
//! file paths for the batch loop.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub engine: EngineSection,
    pub bankroll: BankrollSection,
    pub generator: GeneratorSection,
    pub staking: StakingSection,
    pub sources: SourcesSection,
    pub feedback: FeedbackSection,
    pub storage: StorageSection,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineSection {
    pub name: String,
    pub cycle_interval_secs: u64,
    pub currency: String,
    /// Concurrent settlement workers.
    pub workers: usize,
    pub max_commits_per_cycle: usize,
    pub top_n_per_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BankrollSection {
    pub opening_balance: Decimal,
    pub default_user_id: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorSection {
    pub min_odds: f64,
    pub max_odds: f64,
    pub min_confidence: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StakingSection {
    pub kelly_multiplier: f64,
    pub max_stake_pct: f64,
    pub min_stake: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourcesSection {
    pub predictions_path: String,
    pub results_path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedbackSection {
    pub enabled: bool,
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageSection {
    pub state_path: String,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }
}
