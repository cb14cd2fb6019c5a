//! Market model — the closed set of supported market encodings.
//!
//! Every prediction and every ticket leg references one of these variants.
//! Settlement matches exhaustively over the enum, so a new market kind
//! cannot silently fall through to an unintended default. Legacy wire
//! aliases ("HOME", "1", "GG", …) are normalized at the string boundary
//! in `FromStr`; anything unparseable stays a raw string on the ticket
//! and resolves to VOID at settlement.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Goal lines
// ---------------------------------------------------------------------------

/// Half-goal total lines supported by the over/under family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TotalLine {
    HalfGoal,
    OneAndHalf,
    TwoAndHalf,
    ThreeAndHalf,
    FourAndHalf,
}

impl TotalLine {
    /// All supported lines, lowest first.
    pub const ALL: &'static [TotalLine] = &[
        TotalLine::HalfGoal,
        TotalLine::OneAndHalf,
        TotalLine::TwoAndHalf,
        TotalLine::ThreeAndHalf,
        TotalLine::FourAndHalf,
    ];

    /// The numeric threshold: total goals must exceed this for Over to win.
    pub fn threshold(&self) -> f64 {
        match self {
            TotalLine::HalfGoal => 0.5,
            TotalLine::OneAndHalf => 1.5,
            TotalLine::TwoAndHalf => 2.5,
            TotalLine::ThreeAndHalf => 3.5,
            TotalLine::FourAndHalf => 4.5,
        }
    }

    /// Key fragment used in wire encodings ("2_5" in "OVER_2_5").
    fn fragment(&self) -> &'static str {
        match self {
            TotalLine::HalfGoal => "0_5",
            TotalLine::OneAndHalf => "1_5",
            TotalLine::TwoAndHalf => "2_5",
            TotalLine::ThreeAndHalf => "3_5",
            TotalLine::FourAndHalf => "4_5",
        }
    }

    fn from_fragment(s: &str) -> Option<Self> {
        match s {
            "0_5" => Some(TotalLine::HalfGoal),
            "1_5" => Some(TotalLine::OneAndHalf),
            "2_5" => Some(TotalLine::TwoAndHalf),
            "3_5" => Some(TotalLine::ThreeAndHalf),
            "4_5" => Some(TotalLine::FourAndHalf),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Market groups
// ---------------------------------------------------------------------------

/// Market family, used for diversification scoring and the correlation
/// advisory. Several encodings share a group (e.g. all over/under lines).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketGroup {
    MatchResult,
    DoubleChance,
    BothTeamsToScore,
    TotalGoalsLine,
    TotalGoalsExact,
    GoalParity,
    FirstGoal,
    CleanSheet,
    CorrectScore,
}

impl fmt::Display for MarketGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MarketGroup::MatchResult => "MatchResult",
            MarketGroup::DoubleChance => "DoubleChance",
            MarketGroup::BothTeamsToScore => "BothTeamsToScore",
            MarketGroup::TotalGoalsLine => "TotalGoalsLine",
            MarketGroup::TotalGoalsExact => "TotalGoalsExact",
            MarketGroup::GoalParity => "GoalParity",
            MarketGroup::FirstGoal => "FirstGoal",
            MarketGroup::CleanSheet => "CleanSheet",
            MarketGroup::CorrectScore => "CorrectScore",
        };
        write!(f, "{name}")
    }
}

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

/// One predicted outcome on one market, the unit a bet selection is made on.
///
/// The variant carries everything settlement needs: the over/under threshold
/// lives on the line, the scoreline digits live on `ExactScore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Market {
    // 1X2
    HomeWin,
    Draw,
    AwayWin,
    // Double chance
    HomeOrDraw,
    HomeOrAway,
    DrawOrAway,
    // Both teams to score
    BttsYes,
    BttsNo,
    // Total goals over/under a half-goal line
    Over(TotalLine),
    Under(TotalLine),
    // Exact total goals 0–3, and the open-ended bucket
    ExactGoals(u8),
    FourOrMoreGoals,
    // Total goals parity
    OddTotalGoals,
    EvenTotalGoals,
    // First goal attribution
    FirstGoalHome,
    FirstGoalAway,
    NoGoal,
    // Clean sheets
    CleanSheetHome,
    CleanSheetAway,
    // Exact scoreline
    ExactScore { home: u8, away: u8 },
}

impl Market {
    /// The market family this encoding belongs to.
    pub fn group(&self) -> MarketGroup {
        match self {
            Market::HomeWin | Market::Draw | Market::AwayWin => MarketGroup::MatchResult,
            Market::HomeOrDraw | Market::HomeOrAway | Market::DrawOrAway => {
                MarketGroup::DoubleChance
            }
            Market::BttsYes | Market::BttsNo => MarketGroup::BothTeamsToScore,
            Market::Over(_) | Market::Under(_) => MarketGroup::TotalGoalsLine,
            Market::ExactGoals(_) | Market::FourOrMoreGoals => MarketGroup::TotalGoalsExact,
            Market::OddTotalGoals | Market::EvenTotalGoals => MarketGroup::GoalParity,
            Market::FirstGoalHome | Market::FirstGoalAway | Market::NoGoal => {
                MarketGroup::FirstGoal
            }
            Market::CleanSheetHome | Market::CleanSheetAway => MarketGroup::CleanSheet,
            Market::ExactScore { .. } => MarketGroup::CorrectScore,
        }
    }

    /// Canonical wire key for this encoding.
    pub fn key(&self) -> String {
        match self {
            Market::HomeWin => "HOME_WIN".to_string(),
            Market::Draw => "DRAW".to_string(),
            Market::AwayWin => "AWAY_WIN".to_string(),
            Market::HomeOrDraw => "1X".to_string(),
            Market::HomeOrAway => "12".to_string(),
            Market::DrawOrAway => "X2".to_string(),
            Market::BttsYes => "BTTS_YES".to_string(),
            Market::BttsNo => "BTTS_NO".to_string(),
            Market::Over(line) => format!("OVER_{}", line.fragment()),
            Market::Under(line) => format!("UNDER_{}", line.fragment()),
            Market::ExactGoals(n) => format!("EXACT_GOALS_{n}"),
            Market::FourOrMoreGoals => "FOUR_PLUS_GOALS".to_string(),
            Market::OddTotalGoals => "ODD_GOALS".to_string(),
            Market::EvenTotalGoals => "EVEN_GOALS".to_string(),
            Market::FirstGoalHome => "FIRST_GOAL_HOME".to_string(),
            Market::FirstGoalAway => "FIRST_GOAL_AWAY".to_string(),
            Market::NoGoal => "NO_GOAL".to_string(),
            Market::CleanSheetHome => "CLEAN_SHEET_HOME".to_string(),
            Market::CleanSheetAway => "CLEAN_SHEET_AWAY".to_string(),
            Market::ExactScore { home, away } => format!("SCORE_{home}_{away}"),
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Parse a wire key, normalizing legacy aliases ("HOME" → HOME_WIN,
/// "1" → HOME_WIN, "GG" → BTTS_YES, …). Unknown keys are an error — the
/// settlement layer maps that error to VOID rather than aborting.
impl FromStr for Market {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_uppercase().replace(['.', '-', ' '], "_");

        let market = match norm.as_str() {
            "HOME_WIN" | "HOME" | "1" => Market::HomeWin,
            "DRAW" | "X" => Market::Draw,
            "AWAY_WIN" | "AWAY" | "2" => Market::AwayWin,
            "1X" | "HOME_DRAW" | "DOUBLE_CHANCE_1X" => Market::HomeOrDraw,
            "12" | "HOME_AWAY" | "DOUBLE_CHANCE_12" => Market::HomeOrAway,
            "X2" | "DRAW_AWAY" | "DOUBLE_CHANCE_X2" => Market::DrawOrAway,
            "BTTS_YES" | "GG" | "BOTH_TEAMS_TO_SCORE_YES" => Market::BttsYes,
            "BTTS_NO" | "NG" | "BOTH_TEAMS_TO_SCORE_NO" => Market::BttsNo,
            "FOUR_PLUS_GOALS" | "GOALS_4_PLUS" | "EXACT_GOALS_4_PLUS" => Market::FourOrMoreGoals,
            "ODD_GOALS" | "ODD" => Market::OddTotalGoals,
            "EVEN_GOALS" | "EVEN" => Market::EvenTotalGoals,
            "FIRST_GOAL_HOME" => Market::FirstGoalHome,
            "FIRST_GOAL_AWAY" => Market::FirstGoalAway,
            "NO_GOAL" | "NO_FIRST_GOAL" => Market::NoGoal,
            "CLEAN_SHEET_HOME" | "CS_HOME" => Market::CleanSheetHome,
            "CLEAN_SHEET_AWAY" | "CS_AWAY" => Market::CleanSheetAway,
            _ => {
                if let Some(rest) = norm.strip_prefix("OVER_") {
                    TotalLine::from_fragment(rest)
                        .map(Market::Over)
                        .ok_or_else(|| anyhow::anyhow!("Unsupported over line: {s}"))?
                } else if let Some(rest) = norm.strip_prefix("UNDER_") {
                    TotalLine::from_fragment(rest)
                        .map(Market::Under)
                        .ok_or_else(|| anyhow::anyhow!("Unsupported under line: {s}"))?
                } else if let Some(rest) = norm
                    .strip_prefix("EXACT_GOALS_")
                    .or_else(|| norm.strip_prefix("TOTAL_GOALS_"))
                {
                    let n: u8 = rest
                        .parse()
                        .map_err(|_| anyhow::anyhow!("Bad exact-goals key: {s}"))?;
                    if n > 3 {
                        anyhow::bail!("Exact-goals key out of range (0–3): {s}");
                    }
                    Market::ExactGoals(n)
                } else if let Some(rest) = norm
                    .strip_prefix("SCORE_")
                    .or_else(|| norm.strip_prefix("CORRECT_SCORE_"))
                {
                    let mut parts = rest.split('_');
                    let home = parts.next().and_then(|p| p.parse::<u8>().ok());
                    let away = parts.next().and_then(|p| p.parse::<u8>().ok());
                    match (home, away, parts.next()) {
                        (Some(home), Some(away), None) => Market::ExactScore { home, away },
                        _ => anyhow::bail!("Bad scoreline key: {s}"),
                    }
                } else {
                    anyhow::bail!("Unknown market key: {s}");
                }
            }
        };

        Ok(market)
    }
}

// Serialized as the canonical key string so durable data stays readable and
// stable across enum reshuffles.
impl Serialize for Market {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.key())
    }
}

impl<'de> Deserialize<'de> for Market {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let key = String::deserialize(deserializer)?;
        key.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
