//! Bankroll ledger — append-only transaction log per user.
//!
//! Every bankroll-affecting event is an immutable `LedgerEntry` carrying the
//! balance before and after; `balance_after[n] == balance_before[n+1]` for
//! consecutive entries of one user (the chain invariant). The stake is
//! debited when a ticket is committed; settlement appends exactly one
//! Win/Loss/Refund entry per ticket, deduplicated by ticket id. A chain
//! violation halts the account for manual reconciliation — financial state
//! is never auto-corrected.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, error};
use uuid::Uuid;

use crate::types::EngineError;

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// Kind of bankroll movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEntryKind {
    /// Stake taken at ticket commit.
    StakeDebit,
    /// Full return credited for a won ticket.
    Win,
    /// Settlement marker for a lost ticket (zero amount; stake was
    /// forfeited at commit).
    Loss,
    /// Stake returned for an all-void ticket.
    Refund,
}

impl fmt::Display for LedgerEntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerEntryKind::StakeDebit => write!(f, "STAKE_DEBIT"),
            LedgerEntryKind::Win => write!(f, "WIN"),
            LedgerEntryKind::Loss => write!(f, "LOSS"),
            LedgerEntryKind::Refund => write!(f, "REFUND"),
        }
    }
}

/// One immutable ledger row. `amount` is the absolute movement; the sign is
/// implied by `kind` (StakeDebit decreases the balance, the rest increase
/// or leave it unchanged).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: i64,
    pub ticket_id: Uuid,
    pub kind: LedgerEntryKind,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for LedgerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} | {} → {} | ticket {}",
            self.kind, self.amount, self.user_id, self.balance_before, self.balance_after, self.ticket_id,
        )
    }
}

// ---------------------------------------------------------------------------
// User account
// ---------------------------------------------------------------------------

/// One user's bankroll: running balance, the append-only entry log, and
/// settlement aggregates. All mutation goes through `debit_stake` and
/// `settle`, which enforce idempotency and the chain invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    user_id: i64,
    balance: Decimal,
    halted: bool,
    entries: Vec<LedgerEntry>,
    staked_tickets: HashSet<Uuid>,
    settled_tickets: HashSet<Uuid>,
    total_bets: u64,
    total_staked: Decimal,
    total_return: Decimal,
    total_profit: Decimal,
    greens: u64,
    reds: u64,
}

impl UserAccount {
    pub fn new(user_id: i64, opening_balance: Decimal) -> Self {
        Self {
            user_id,
            balance: opening_balance,
            halted: false,
            entries: Vec::new(),
            staked_tickets: HashSet::new(),
            settled_tickets: HashSet::new(),
            total_bets: 0,
            total_staked: Decimal::ZERO,
            total_return: Decimal::ZERO,
            total_profit: Decimal::ZERO,
            greens: 0,
            reds: 0,
        }
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Whether settlement writes for this user are halted pending manual
    /// reconciliation.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn total_bets(&self) -> u64 {
        self.total_bets
    }

    pub fn total_staked(&self) -> Decimal {
        self.total_staked
    }

    pub fn total_return(&self) -> Decimal {
        self.total_return
    }

    pub fn total_profit(&self) -> Decimal {
        self.total_profit
    }

    pub fn greens(&self) -> u64 {
        self.greens
    }

    pub fn reds(&self) -> u64 {
        self.reds
    }

    /// Fraction of settled green/red tickets that were green. 0.0 with no
    /// resolved tickets.
    pub fn win_rate(&self) -> f64 {
        let resolved = self.greens + self.reds;
        if resolved == 0 {
            0.0
        } else {
            self.greens as f64 / resolved as f64
        }
    }

    /// Return on investment as a percentage of total staked.
    pub fn roi(&self) -> Decimal {
        if self.total_staked == Decimal::ZERO {
            Decimal::ZERO
        } else {
            (self.total_profit / self.total_staked * dec!(100)).round_dp(2)
        }
    }

    /// Whether a settlement entry for this ticket was already written.
    pub fn has_settled(&self, ticket_id: Uuid) -> bool {
        self.settled_tickets.contains(&ticket_id)
    }

    /// Debit the stake for a newly committed ticket.
    pub fn debit_stake(
        &mut self,
        ticket_id: Uuid,
        stake: Decimal,
    ) -> Result<LedgerEntry, EngineError> {
        self.ensure_writable()?;
        if stake <= Decimal::ZERO {
            return Err(EngineError::InvariantViolation(format!(
                "stake debit must be positive, got {stake}"
            )));
        }
        if self.staked_tickets.contains(&ticket_id) {
            return Err(EngineError::DuplicateEntry(ticket_id));
        }
        if stake > self.balance {
            return Err(EngineError::InsufficientBalance {
                needed: stake,
                available: self.balance,
            });
        }

        let entry = self.append(ticket_id, LedgerEntryKind::StakeDebit, stake, -stake)?;
        self.staked_tickets.insert(ticket_id);
        self.total_bets += 1;
        self.total_staked += stake;
        self.total_profit -= stake;
        Ok(entry)
    }

    /// Append the single settlement entry for a ticket.
    ///
    /// `credit` is the amount returned to the balance: the full return for a
    /// Win, the stake for a Refund, zero for a Loss.
    pub fn settle(
        &mut self,
        ticket_id: Uuid,
        kind: LedgerEntryKind,
        credit: Decimal,
    ) -> Result<LedgerEntry, EngineError> {
        self.ensure_writable()?;
        if kind == LedgerEntryKind::StakeDebit {
            return Err(EngineError::InvariantViolation(
                "settlement entry cannot be a stake debit".to_string(),
            ));
        }
        if credit < Decimal::ZERO {
            return Err(EngineError::InvariantViolation(format!(
                "settlement credit cannot be negative, got {credit}"
            )));
        }
        if self.settled_tickets.contains(&ticket_id) {
            return Err(EngineError::DuplicateEntry(ticket_id));
        }

        let entry = self.append(ticket_id, kind, credit, credit)?;
        self.settled_tickets.insert(ticket_id);
        match kind {
            LedgerEntryKind::Win => {
                self.total_return += credit;
                self.total_profit += credit;
                self.greens += 1;
            }
            LedgerEntryKind::Loss => {
                self.reds += 1;
            }
            LedgerEntryKind::Refund => {
                self.total_return += credit;
                self.total_profit += credit;
            }
            LedgerEntryKind::StakeDebit => unreachable!("rejected above"),
        }
        Ok(entry)
    }

    /// Verify the chain invariant over the whole entry log.
    pub fn verify_chain(&self) -> Result<(), EngineError> {
        for window in self.entries.windows(2) {
            if window[0].balance_after != window[1].balance_before {
                return Err(EngineError::LedgerInconsistency {
                    user_id: self.user_id,
                    expected: window[0].balance_after,
                    found: window[1].balance_before,
                });
            }
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<(), EngineError> {
        if self.halted {
            return Err(EngineError::LedgerHalted(self.user_id));
        }
        Ok(())
    }

    fn append(
        &mut self,
        ticket_id: Uuid,
        kind: LedgerEntryKind,
        amount: Decimal,
        delta: Decimal,
    ) -> Result<LedgerEntry, EngineError> {
        // Chain invariant: the running balance must equal the previous
        // entry's balance_after. A mismatch means the account state was
        // corrupted somewhere — halt and surface, never patch over.
        if let Some(last) = self.entries.last() {
            if last.balance_after != self.balance {
                self.halted = true;
                error!(
                    user_id = self.user_id,
                    expected = %last.balance_after,
                    found = %self.balance,
                    "Ledger chain broken — halting account"
                );
                return Err(EngineError::LedgerInconsistency {
                    user_id: self.user_id,
                    expected: last.balance_after,
                    found: self.balance,
                });
            }
        }

        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            ticket_id,
            kind,
            amount,
            balance_before: self.balance,
            balance_after: self.balance + delta,
            created_at: Utc::now(),
        };
        self.balance = entry.balance_after;

        debug!(
            user_id = self.user_id,
            kind = %kind,
            amount = %amount,
            balance = %self.balance,
            "Ledger entry appended"
        );

        self.entries.push(entry.clone());
        Ok(entry)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> UserAccount {
        UserAccount::new(1, dec!(100))
    }

    #[test]
    fn test_new_account() {
        let acc = account();
        assert_eq!(acc.balance(), dec!(100));
        assert_eq!(acc.total_bets(), 0);
        assert!(!acc.is_halted());
        assert_eq!(acc.win_rate(), 0.0);
        assert_eq!(acc.roi(), Decimal::ZERO);
        assert!(acc.entries().is_empty());
    }

    #[test]
    fn test_stake_debit() {
        let mut acc = account();
        let ticket = Uuid::new_v4();
        let entry = acc.debit_stake(ticket, dec!(10)).unwrap();
        assert_eq!(entry.kind, LedgerEntryKind::StakeDebit);
        assert_eq!(entry.amount, dec!(10));
        assert_eq!(entry.balance_before, dec!(100));
        assert_eq!(entry.balance_after, dec!(90));
        assert_eq!(acc.balance(), dec!(90));
        assert_eq!(acc.total_bets(), 1);
        assert_eq!(acc.total_staked(), dec!(10));
        assert_eq!(acc.total_profit(), dec!(-10));
    }

    #[test]
    fn test_duplicate_stake_rejected() {
        let mut acc = account();
        let ticket = Uuid::new_v4();
        acc.debit_stake(ticket, dec!(10)).unwrap();
        assert!(matches!(
            acc.debit_stake(ticket, dec!(10)),
            Err(EngineError::DuplicateEntry(_))
        ));
        assert_eq!(acc.balance(), dec!(90)); // unchanged
    }

    #[test]
    fn test_insufficient_balance() {
        let mut acc = account();
        assert!(matches!(
            acc.debit_stake(Uuid::new_v4(), dec!(150)),
            Err(EngineError::InsufficientBalance { .. })
        ));
        assert_eq!(acc.balance(), dec!(100));
    }

    #[test]
    fn test_non_positive_stake_rejected() {
        let mut acc = account();
        assert!(acc.debit_stake(Uuid::new_v4(), Decimal::ZERO).is_err());
        assert!(acc.debit_stake(Uuid::new_v4(), dec!(-5)).is_err());
    }

    #[test]
    fn test_win_settlement() {
        let mut acc = account();
        let ticket = Uuid::new_v4();
        acc.debit_stake(ticket, dec!(10)).unwrap();
        let entry = acc.settle(ticket, LedgerEntryKind::Win, dec!(36)).unwrap();
        assert_eq!(entry.balance_after, dec!(126));
        assert_eq!(acc.balance(), dec!(126));
        assert_eq!(acc.greens(), 1);
        assert_eq!(acc.reds(), 0);
        assert_eq!(acc.total_return(), dec!(36));
        assert_eq!(acc.total_profit(), dec!(26));
        assert!(acc.has_settled(ticket));
    }

    #[test]
    fn test_loss_settlement_is_zero_amount() {
        let mut acc = account();
        let ticket = Uuid::new_v4();
        acc.debit_stake(ticket, dec!(10)).unwrap();
        let entry = acc.settle(ticket, LedgerEntryKind::Loss, Decimal::ZERO).unwrap();
        assert_eq!(entry.balance_before, entry.balance_after);
        assert_eq!(acc.balance(), dec!(90));
        assert_eq!(acc.reds(), 1);
        assert_eq!(acc.total_profit(), dec!(-10));
    }

    #[test]
    fn test_refund_settlement() {
        let mut acc = account();
        let ticket = Uuid::new_v4();
        acc.debit_stake(ticket, dec!(10)).unwrap();
        acc.settle(ticket, LedgerEntryKind::Refund, dec!(10)).unwrap();
        assert_eq!(acc.balance(), dec!(100));
        assert_eq!(acc.total_profit(), Decimal::ZERO);
        assert_eq!(acc.greens(), 0);
        assert_eq!(acc.reds(), 0);
    }

    #[test]
    fn test_duplicate_settlement_rejected() {
        let mut acc = account();
        let ticket = Uuid::new_v4();
        acc.debit_stake(ticket, dec!(10)).unwrap();
        acc.settle(ticket, LedgerEntryKind::Win, dec!(20)).unwrap();
        assert!(matches!(
            acc.settle(ticket, LedgerEntryKind::Win, dec!(20)),
            Err(EngineError::DuplicateEntry(_))
        ));
        assert_eq!(acc.balance(), dec!(110)); // credited once
    }

    #[test]
    fn test_settlement_kind_cannot_be_stake_debit() {
        let mut acc = account();
        assert!(acc
            .settle(Uuid::new_v4(), LedgerEntryKind::StakeDebit, dec!(5))
            .is_err());
    }

    #[test]
    fn test_chain_invariant_over_sequence() {
        let mut acc = account();
        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();
        acc.debit_stake(t1, dec!(10)).unwrap();
        acc.debit_stake(t2, dec!(5)).unwrap();
        acc.settle(t1, LedgerEntryKind::Win, dec!(25)).unwrap();
        acc.settle(t2, LedgerEntryKind::Loss, Decimal::ZERO).unwrap();

        acc.verify_chain().unwrap();
        for window in acc.entries().windows(2) {
            assert_eq!(window[0].balance_after, window[1].balance_before);
        }
        assert_eq!(acc.balance(), dec!(110)); // 100 - 10 - 5 + 25 + 0
    }

    #[test]
    fn test_tampered_snapshot_halts_account() {
        // Corrupt a serialized account (balance no longer matches the last
        // entry) — the next append must halt instead of papering over it.
        let mut acc = account();
        acc.debit_stake(Uuid::new_v4(), dec!(10)).unwrap();

        let mut value = serde_json::to_value(&acc).unwrap();
        value["balance"] = serde_json::json!(75.0);
        let mut tampered: UserAccount = serde_json::from_value(value).unwrap();

        let err = tampered.debit_stake(Uuid::new_v4(), dec!(5)).unwrap_err();
        assert!(matches!(err, EngineError::LedgerInconsistency { .. }));
        assert!(tampered.is_halted());

        // And every further write is refused.
        assert!(matches!(
            tampered.settle(Uuid::new_v4(), LedgerEntryKind::Win, dec!(1)),
            Err(EngineError::LedgerHalted(1))
        ));
    }

    #[test]
    fn test_verify_chain_detects_tampered_log() {
        let mut acc = account();
        acc.debit_stake(Uuid::new_v4(), dec!(10)).unwrap();
        acc.debit_stake(Uuid::new_v4(), dec!(10)).unwrap();

        let mut value = serde_json::to_value(&acc).unwrap();
        value["entries"][1]["balance_before"] = serde_json::json!(85.0);
        let tampered: UserAccount = serde_json::from_value(value).unwrap();
        assert!(tampered.verify_chain().is_err());
    }

    #[test]
    fn test_win_rate_and_roi() {
        let mut acc = UserAccount::new(1, dec!(1000));
        let tickets: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        for t in &tickets {
            acc.debit_stake(*t, dec!(10)).unwrap();
        }
        // 3 wins at 2.5x, 1 loss
        for t in &tickets[..3] {
            acc.settle(*t, LedgerEntryKind::Win, dec!(25)).unwrap();
        }
        acc.settle(tickets[3], LedgerEntryKind::Loss, Decimal::ZERO).unwrap();

        assert_eq!(acc.greens(), 3);
        assert_eq!(acc.reds(), 1);
        assert!((acc.win_rate() - 0.75).abs() < 1e-10);
        // staked 40, returned 75 → profit 35 → roi 87.5%
        assert_eq!(acc.total_profit(), dec!(35));
        assert_eq!(acc.roi(), dec!(87.50));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut acc = account();
        let ticket = Uuid::new_v4();
        acc.debit_stake(ticket, dec!(10)).unwrap();
        acc.settle(ticket, LedgerEntryKind::Win, dec!(22)).unwrap();

        let json = serde_json::to_string(&acc).unwrap();
        let parsed: UserAccount = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.balance(), dec!(112));
        assert_eq!(parsed.entries().len(), 2);
        assert!(parsed.has_settled(ticket));
        parsed.verify_chain().unwrap();
    }

    #[test]
    fn test_entry_display() {
        let mut acc = account();
        acc.debit_stake(Uuid::new_v4(), dec!(10)).unwrap();
        let display = format!("{}", acc.entries()[0]);
        assert!(display.contains("STAKE_DEBIT"));
        assert!(display.contains("100"));
    }
}
