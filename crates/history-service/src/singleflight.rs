//! In-process single-flight coalescing (`spec.md` §4.3, §5).
//!
//! A process-local map from repository key to a pending result future,
//! guaranteeing at most one [`HistoryService::get_timeline`] execution per
//! repository per process; concurrent callers share the same future.
//! Entries are removed once the leader's call completes, successfully or
//! not — a later, independent call always starts fresh rather than reusing
//! a cached failure (`spec.md` §4.3: "failures do not poison the slot
//! beyond the single returning call").
//!
//! Built on [`tokio::sync::OnceCell`] rather than a hand-rolled channel: its
//! `get_or_init` already gives exactly the primitive the design calls for —
//! the first caller to reach a given key runs the closure, every other
//! concurrent caller for that key awaits the same result instead of
//! starting its own.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use history_core::GaugeI64;
use tokio::sync::OnceCell;

/// Coalesces concurrent calls keyed by `String`, sharing a cloned `V`
/// across every caller for the same key while one is in flight.
pub struct SingleFlight<V: Clone + Send + Sync + 'static> {
    inflight: Mutex<HashMap<String, Arc<OnceCell<V>>>>,
    outstanding: GaugeI64,
}

impl<V: Clone + Send + Sync + 'static> SingleFlight<V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
            outstanding: GaugeI64::new(),
        }
    }

    /// Number of distinct keys currently in flight. Observability only.
    #[must_use]
    pub fn outstanding(&self) -> i64 {
        self.outstanding.load()
    }

    /// Runs `op` for `key`, coalescing concurrent callers onto the same
    /// underlying future. `op` only actually executes for whichever caller
    /// wins the race to install the slot; every caller — leader and
    /// joiners alike — receives a clone of the same result.
    pub async fn run<F, Fut>(&self, key: &str, op: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let (cell, is_new) = {
            let mut map = self.inflight.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            match map.get(key) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let cell = Arc::new(OnceCell::new());
                    map.insert(key.to_string(), Arc::clone(&cell));
                    (cell, true)
                }
            }
        };
        if is_new {
            self.outstanding.add(1);
        }

        let result = cell.get_or_init(op).await.clone();

        // Remove the slot only if it still points at *this* cell — a later
        // call may already have installed a fresh one for the same key.
        {
            let mut map = self.inflight.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if map.get(key).is_some_and(|c| Arc::ptr_eq(c, &cell)) {
                map.remove(key);
                self.outstanding.add(-1);
            }
        }

        result
    }
}

impl<V: Clone + Send + Sync + 'static> Default for SingleFlight<V> {
    fn default() -> Self {
        Self::new()
    }
}
