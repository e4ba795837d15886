//! Cost accounting types
//!
//! A `CostEntry` is the spend on one provider inside one bloc phase; a
//! `BlocCost` groups them by provider; the `CostLedger` maps ledger keys
//! (bloc or bloc phase) to their `BlocCost`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Spend on one provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
    /// Calls consumed, including empty and failed attempts
    pub provider_calls: u32,
    /// Average cost per call
    pub unit_cost: f64,
    pub total_cost: f64,
}

impl CostEntry {
    fn charge(&mut self, cost: f64) {
        self.provider_calls += 1;
        self.total_cost += cost.max(0.0);
        self.unit_cost = self.total_cost / self.provider_calls as f64;
    }
}

/// Spend of one bloc phase, by provider name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlocCost {
    pub providers: BTreeMap<String, CostEntry>,
}

impl BlocCost {
    pub fn total_cost(&self) -> f64 {
        self.providers.values().map(|e| e.total_cost).sum()
    }

    pub fn provider_calls(&self) -> u32 {
        self.providers.values().map(|e| e.provider_calls).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn charge(&mut self, provider: &str, cost: f64) {
        self.providers
            .entry(provider.to_string())
            .or_default()
            .charge(cost);
    }
}

/// Per-audit ledger: ledger key → bloc cost
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CostLedger {
    pub entries: BTreeMap<String, BlocCost>,
}

impl CostLedger {
    /// Shallow merge: `key` is replaced, every other key is left untouched
    pub fn merge(&mut self, key: &str, cost: BlocCost) {
        self.entries.insert(key.to_string(), cost);
    }

    pub fn get(&self, key: &str) -> Option<&BlocCost> {
        self.entries.get(key)
    }

    /// Sum of every entry in the ledger
    pub fn total(&self) -> f64 {
        self.entries.values().map(BlocCost::total_cost).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Running cost accumulator handed to a bloc while it executes
///
/// Concurrent sub-steps share one tracker by reference; the lock is never
/// held across an await.
#[derive(Debug, Default)]
pub struct CostTracker {
    inner: Mutex<BlocCost>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one consumed provider call
    pub fn charge(&self, provider: &str, cost: f64) {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.charge(provider, cost);
    }

    pub fn snapshot(&self) -> BlocCost {
        match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn calls_for(&self, provider: &str) -> u32 {
        self.snapshot()
            .providers
            .get(provider)
            .map(|e| e.provider_calls)
            .unwrap_or(0)
    }
}
