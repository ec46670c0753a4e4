//! In-memory credit ledger.
//!
//! Counts work each validator has done since its last settlement. The
//! datastore holds the durable copy; this is the view the hub serves.

use std::collections::HashMap;

use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
pub struct CreditLedger {
    entries: Mutex<HashMap<Uuid, u64>>,
}

impl CreditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger seeded with previously persisted balances
    pub fn from_balances(balances: impl IntoIterator<Item = (Uuid, u64)>) -> Self {
        Self { entries: Mutex::new(balances.into_iter().collect()) }
    }

    /// Add `amount` to a validator's pending credit, returning the new balance
    pub async fn credit(&self, validator: Uuid, amount: u64) -> u64 {
        let mut entries = self.entries.lock().await;
        let balance = entries.entry(validator).or_insert(0);
        *balance = balance.saturating_add(amount);
        *balance
    }

    pub async fn pending(&self, validator: Uuid) -> u64 {
        self.entries.lock().await.get(&validator).copied().unwrap_or(0)
    }

    /// Zero a validator's balance after settlement, returning what it was
    pub async fn reset(&self, validator: Uuid) -> u64 {
        self.entries.lock().await.insert(validator, 0).unwrap_or(0)
    }

    pub async fn snapshot(&self) -> HashMap<Uuid, u64> {
        self.entries.lock().await.clone()
    }
}
