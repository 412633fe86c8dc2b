use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
};

use rust_decimal::Decimal;

use super::scope::SpendKey;
use crate::errors::SpendStoreError;

/// Persistence boundary for spend counters.
///
/// Implementations must serialize `record_spend` calls for the same key so
/// concurrent increments are never lost. Reads may be stale.
pub trait SpendStore: Send + Sync {
    fn current_spend(&self, key: &SpendKey) -> Result<Decimal, SpendStoreError>;

    /// Add `amount` (negative for compensation) and return the new total.
    fn record_spend(&self, key: &SpendKey, amount: Decimal) -> Result<Decimal, SpendStoreError>;
}

/// In-memory spend store.
///
/// The map lock is only held to find or insert a counter; increments lock
/// the counter itself, so different keys never contend.
#[derive(Debug, Default)]
pub struct SpendLedger {
    counters: RwLock<HashMap<SpendKey, Arc<Mutex<Decimal>>>>,
}

impl SpendLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, key: &SpendKey) -> Arc<Mutex<Decimal>> {
        {
            let counters = self.counters.read().unwrap_or_else(|e| e.into_inner());
            if let Some(counter) = counters.get(key) {
                return Arc::clone(counter);
            }
        }
        let mut counters = self.counters.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(counters.entry(key.clone()).or_default())
    }

    /// Every counter and its total, sorted by key.
    pub fn snapshot(&self) -> Vec<(SpendKey, Decimal)> {
        let counters = self.counters.read().unwrap_or_else(|e| e.into_inner());
        let mut totals: Vec<_> = counters
            .iter()
            .map(|(k, v)| (k.clone(), *v.lock().unwrap_or_else(|e| e.into_inner())))
            .collect();
        totals.sort_by(|a, b| a.0.cmp(&b.0));
        totals
    }
}

impl SpendStore for SpendLedger {
    fn current_spend(&self, key: &SpendKey) -> Result<Decimal, SpendStoreError> {
        let counters = self.counters.read().unwrap_or_else(|e| e.into_inner());
        Ok(counters
            .get(key)
            .map(|c| *c.lock().unwrap_or_else(|e| e.into_inner()))
            .unwrap_or_default())
    }

    fn record_spend(&self, key: &SpendKey, amount: Decimal) -> Result<Decimal, SpendStoreError> {
        let counter = self.counter(key);
        let mut total = counter.lock().unwrap_or_else(|e| e.into_inner());
        *total = total.checked_add(amount).ok_or_else(|| SpendStoreError::Rejected {
            key: key.to_string(),
            reason: "counter overflow".to_string(),
        })?;
        Ok(*total)
    }
}
