//! Durable state — tickets and user bankroll accounts.
//!
//! In-memory maps with JSON snapshot persistence. The concrete store engine
//! is deliberately generic: tickets and accounts only ever change through
//! the two transactional operations here, so swapping in a database later
//! means reimplementing exactly these two critical sections.
//!
//! Per-user serialization: each account lives behind its own async mutex.
//! A settlement holds the account lock for the whole ticket-write +
//! ledger-append section, so concurrent settlements for one user cannot
//! produce a lost update, and a ticket can never end up settled without its
//! ledger entry (or the other way round).

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::ledger::{LedgerEntry, UserAccount};
use crate::settlement::TicketResolution;
use crate::types::{EngineError, Ticket};

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct Store {
    opening_balance: Decimal,
    tickets: RwLock<HashMap<Uuid, Ticket>>,
    accounts: RwLock<HashMap<i64, Arc<Mutex<UserAccount>>>>,
}

impl Store {
    /// Fresh store; accounts are created on first touch with this balance.
    pub fn new(opening_balance: Decimal) -> Self {
        Self {
            opening_balance,
            tickets: RwLock::new(HashMap::new()),
            accounts: RwLock::new(HashMap::new()),
        }
    }

    /// Handle to a user's account, created on demand.
    pub async fn account(&self, user_id: i64) -> Arc<Mutex<UserAccount>> {
        {
            let accounts = self.accounts.read().await;
            if let Some(account) = accounts.get(&user_id) {
                return account.clone();
            }
        }
        let mut accounts = self.accounts.write().await;
        accounts
            .entry(user_id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(UserAccount::new(user_id, self.opening_balance)))
            })
            .clone()
    }

    pub async fn balance(&self, user_id: i64) -> Decimal {
        self.account(user_id).await.lock().await.balance()
    }

    pub async fn ticket(&self, id: Uuid) -> Option<Ticket> {
        self.tickets.read().await.get(&id).cloned()
    }

    pub async fn tickets(&self) -> Vec<Ticket> {
        let mut all: Vec<Ticket> = self.tickets.read().await.values().cloned().collect();
        all.sort_by_key(|t| t.placed_at);
        all
    }

    /// All tickets still awaiting settlement, oldest first.
    pub async fn pending_tickets(&self) -> Vec<Ticket> {
        let mut pending: Vec<Ticket> = self
            .tickets
            .read()
            .await
            .values()
            .filter(|t| !t.is_terminal())
            .cloned()
            .collect();
        pending.sort_by_key(|t| t.placed_at);
        pending
    }

    /// Commit a ticket: debit the stake and insert the ticket under the
    /// user's account lock. If the debit fails (insufficient balance, halted
    /// account, duplicate), no ticket is stored.
    pub async fn commit_ticket(
        &self,
        ticket: Ticket,
    ) -> Result<(Ticket, LedgerEntry), EngineError> {
        if self.tickets.read().await.contains_key(&ticket.id) {
            return Err(EngineError::DuplicateEntry(ticket.id));
        }

        let account = self.account(ticket.user_id).await;
        let mut account = account.lock().await;

        let entry = account.debit_stake(ticket.id, ticket.stake)?;
        self.tickets.write().await.insert(ticket.id, ticket.clone());

        debug!(
            ticket = %ticket.id,
            user_id = ticket.user_id,
            stake = %ticket.stake,
            balance = %account.balance(),
            "Ticket committed"
        );

        Ok((ticket, entry))
    }

    /// The single transactional boundary of settlement: append the ledger
    /// entry and write the ticket's terminal state in one critical section.
    ///
    /// The ledger append goes first because it can fail (halted account,
    /// chain violation, duplicate); the ticket write is infallible, so a
    /// settled ticket without its ledger entry — or the reverse — cannot
    /// happen. Returns `Ok(None)` when the ticket is already terminal.
    pub async fn apply_settlement(
        &self,
        ticket_id: Uuid,
        resolution: TicketResolution,
    ) -> Result<Option<Ticket>, EngineError> {
        let user_id = {
            let tickets = self.tickets.read().await;
            let ticket = tickets
                .get(&ticket_id)
                .ok_or(EngineError::TicketNotFound(ticket_id))?;
            if ticket.is_terminal() {
                return Ok(None);
            }
            ticket.user_id
        };

        let account = self.account(user_id).await;
        let mut account = account.lock().await;
        let mut tickets = self.tickets.write().await;

        let ticket = tickets
            .get_mut(&ticket_id)
            .ok_or(EngineError::TicketNotFound(ticket_id))?;
        // Re-check under the lock: another worker may have won the race.
        if ticket.is_terminal() {
            return Ok(None);
        }
        if resolution.legs.len() != ticket.selections.len() {
            return Err(EngineError::InvariantViolation(format!(
                "resolution has {} leg updates for a {}-leg ticket",
                resolution.legs.len(),
                ticket.selections.len()
            )));
        }

        account.settle(ticket_id, resolution.entry_kind, resolution.credit)?;

        for (selection, update) in ticket.selections.iter_mut().zip(&resolution.legs) {
            selection.status = update.status;
            selection.actual_outcome = update.actual_outcome.clone();
        }
        ticket.status = resolution.status;
        ticket.settled_at = Some(Utc::now());
        ticket.actual_return = Some(resolution.actual_return);
        ticket.profit_loss = Some(resolution.profit_loss);

        Ok(Some(ticket.clone()))
    }

    // -- snapshot persistence ----------------------------------------------

    /// Save the full state to a JSON file.
    pub async fn save(&self, path: &str) -> Result<()> {
        let tickets: Vec<Ticket> = self.tickets.read().await.values().cloned().collect();
        let mut accounts = Vec::new();
        for handle in self.accounts.read().await.values() {
            accounts.push(handle.lock().await.clone());
        }

        let snapshot = Snapshot {
            opening_balance: self.opening_balance,
            tickets,
            accounts,
        };
        let json = serde_json::to_string_pretty(&snapshot)
            .context("Failed to serialise store snapshot")?;
        std::fs::write(path, &json).context(format!("Failed to write snapshot to {path}"))?;

        debug!(path, "Store snapshot saved");
        Ok(())
    }

    /// Load state from a JSON file. Returns None if the file doesn't exist
    /// (fresh start). A snapshot whose ledger chains don't verify is refused.
    pub async fn load(path: &str, opening_balance: Decimal) -> Result<Option<Store>> {
        if !Path::new(path).exists() {
            info!(path, "No saved store found, starting fresh");
            return Ok(None);
        }

        let json =
            std::fs::read_to_string(path).context(format!("Failed to read snapshot {path}"))?;
        let snapshot: Snapshot =
            serde_json::from_str(&json).context(format!("Failed to parse snapshot {path}"))?;

        for account in &snapshot.accounts {
            account
                .verify_chain()
                .context(format!("Corrupt ledger chain in snapshot {path}"))?;
        }

        let store = Store::new(opening_balance);
        {
            let mut tickets = store.tickets.write().await;
            for ticket in snapshot.tickets {
                tickets.insert(ticket.id, ticket);
            }
        }
        {
            let mut accounts = store.accounts.write().await;
            for account in snapshot.accounts {
                accounts.insert(account.user_id(), Arc::new(Mutex::new(account)));
            }
        }

        info!(path, "Store snapshot loaded");
        Ok(Some(store))
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    opening_balance: Decimal,
    tickets: Vec<Ticket>,
    accounts: Vec<UserAccount>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerEntryKind;
    use crate::settlement::LegUpdate;
    use crate::types::{BetStatus, TicketSelection};
    use rust_decimal_macros::dec;

    fn make_ticket(user_id: i64, stake: Decimal, odds: f64) -> Ticket {
        let legs = vec![TicketSelection {
            match_id: 1,
            market: "HOME_WIN".to_string(),
            odds,
            probability: 0.55,
            confidence: 0.8,
            status: BetStatus::Pending,
            actual_outcome: None,
        }];
        Ticket::new(user_id, stake, odds, legs).unwrap()
    }

    fn win_resolution(ticket: &Ticket) -> TicketResolution {
        TicketResolution {
            status: BetStatus::Won,
            legs: vec![LegUpdate {
                status: BetStatus::Won,
                actual_outcome: Some("2-0".to_string()),
            }],
            actual_return: ticket.potential_return,
            profit_loss: ticket.potential_return - ticket.stake,
            entry_kind: LedgerEntryKind::Win,
            credit: ticket.potential_return,
        }
    }

    fn temp_path() -> String {
        let mut p = std::env::temp_dir();
        p.push(format!("acca_test_store_{}.json", Uuid::new_v4()));
        p.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn test_commit_debits_and_stores() {
        let store = Store::new(dec!(100));
        let ticket = make_ticket(1, dec!(10), 2.0);
        let (stored, entry) = store.commit_ticket(ticket.clone()).await.unwrap();
        assert_eq!(stored.id, ticket.id);
        assert_eq!(entry.kind, LedgerEntryKind::StakeDebit);
        assert_eq!(store.balance(1).await, dec!(90));
        assert!(store.ticket(ticket.id).await.is_some());
        assert_eq!(store.pending_tickets().await.len(), 1);
    }

    #[tokio::test]
    async fn test_commit_insufficient_balance_stores_nothing() {
        let store = Store::new(dec!(5));
        let ticket = make_ticket(1, dec!(10), 2.0);
        let err = store.commit_ticket(ticket.clone()).await.unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBalance { .. }));
        assert!(store.ticket(ticket.id).await.is_none());
        assert_eq!(store.balance(1).await, dec!(5));
    }

    #[tokio::test]
    async fn test_commit_duplicate_rejected() {
        let store = Store::new(dec!(100));
        let ticket = make_ticket(1, dec!(10), 2.0);
        store.commit_ticket(ticket.clone()).await.unwrap();
        assert!(matches!(
            store.commit_ticket(ticket).await,
            Err(EngineError::DuplicateEntry(_))
        ));
        assert_eq!(store.balance(1).await, dec!(90)); // debited once
    }

    #[tokio::test]
    async fn test_apply_settlement_updates_ticket_and_ledger_together() {
        let store = Store::new(dec!(100));
        let ticket = make_ticket(1, dec!(10), 2.0);
        store.commit_ticket(ticket.clone()).await.unwrap();

        let settled = store
            .apply_settlement(ticket.id, win_resolution(&ticket))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(settled.status, BetStatus::Won);
        assert_eq!(settled.actual_return, Some(dec!(20.00)));
        assert_eq!(settled.profit_loss, Some(dec!(10.00)));
        assert!(settled.settled_at.is_some());
        assert_eq!(settled.selections[0].status, BetStatus::Won);
        assert_eq!(settled.selections[0].actual_outcome.as_deref(), Some("2-0"));

        // Balance: 100 − 10 + 20 = 110, with the chain intact.
        assert_eq!(store.balance(1).await, dec!(110));
        let account = store.account(1).await;
        let account = account.lock().await;
        assert_eq!(account.entries().len(), 2);
        account.verify_chain().unwrap();
    }

    #[tokio::test]
    async fn test_apply_settlement_twice_is_noop() {
        let store = Store::new(dec!(100));
        let ticket = make_ticket(1, dec!(10), 2.0);
        store.commit_ticket(ticket.clone()).await.unwrap();

        store
            .apply_settlement(ticket.id, win_resolution(&ticket))
            .await
            .unwrap()
            .unwrap();
        // Second application: no-op, no double credit.
        let second = store
            .apply_settlement(ticket.id, win_resolution(&ticket))
            .await
            .unwrap();
        assert!(second.is_none());
        assert_eq!(store.balance(1).await, dec!(110));
    }

    #[tokio::test]
    async fn test_apply_settlement_unknown_ticket() {
        let store = Store::new(dec!(100));
        let ticket = make_ticket(1, dec!(10), 2.0);
        let err = store
            .apply_settlement(ticket.id, win_resolution(&ticket))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TicketNotFound(_)));
    }

    #[tokio::test]
    async fn test_apply_settlement_leg_count_mismatch() {
        let store = Store::new(dec!(100));
        let ticket = make_ticket(1, dec!(10), 2.0);
        store.commit_ticket(ticket.clone()).await.unwrap();

        let mut resolution = win_resolution(&ticket);
        resolution.legs.push(LegUpdate {
            status: BetStatus::Won,
            actual_outcome: None,
        });
        let err = store
            .apply_settlement(ticket.id, resolution)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvariantViolation(_)));
        // Nothing was applied.
        assert_eq!(store.balance(1).await, dec!(90));
        assert!(!store.ticket(ticket.id).await.unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_concurrent_same_user_settlements_serialize() {
        let store = Arc::new(Store::new(dec!(100)));
        let t1 = make_ticket(1, dec!(10), 2.0);
        let t2 = make_ticket(1, dec!(10), 3.0);
        store.commit_ticket(t1.clone()).await.unwrap();
        store.commit_ticket(t2.clone()).await.unwrap();

        let s1 = store.clone();
        let r1 = win_resolution(&t1);
        let h1 = tokio::spawn(async move { s1.apply_settlement(t1.id, r1).await });
        let s2 = store.clone();
        let r2 = win_resolution(&t2);
        let h2 = tokio::spawn(async move { s2.apply_settlement(t2.id, r2).await });

        h1.await.unwrap().unwrap().unwrap();
        h2.await.unwrap().unwrap().unwrap();

        // 100 − 10 − 10 + 20 + 30 = 130, and the chain holds.
        assert_eq!(store.balance(1).await, dec!(130));
        let account = store.account(1).await;
        account.lock().await.verify_chain().unwrap();
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let path = temp_path();
        let store = Store::new(dec!(100));
        let ticket = make_ticket(1, dec!(10), 2.0);
        store.commit_ticket(ticket.clone()).await.unwrap();
        store
            .apply_settlement(ticket.id, win_resolution(&ticket))
            .await
            .unwrap();
        store.save(&path).await.unwrap();

        let loaded = Store::load(&path, dec!(100)).await.unwrap().unwrap();
        assert_eq!(loaded.balance(1).await, dec!(110));
        let restored = loaded.ticket(ticket.id).await.unwrap();
        assert_eq!(restored.status, BetStatus::Won);

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let loaded = Store::load("/tmp/acca_nonexistent_12345.json", dec!(100))
            .await
            .unwrap();
        assert!(loaded.is_none());
    }
}
