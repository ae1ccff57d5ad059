//! Pending-call table.
//!
//! The correlator maps each in-flight `CallKey` to the callback waiting for
//! its result and guarantees that a callback fires at most once. Callbacks
//! are always invoked after the table lock is released, so a callback may
//! re-enter the bridge and a panicking callback cannot poison the table.

use crate::call::{CallKey, ResultCallback};
use crate::config::DuplicateKeyPolicy;
use crate::error::{BridgeError, CallFailure, Result};
use crate::lifecycle::LifecycleState;
use crate::metrics::MetricsCollector;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// A registered callback and its bookkeeping
struct PendingEntry {
    callback: ResultCallback,
    generation: u64,
    registered_at: DateTime<Utc>,
    started: Instant,
    deadline: Option<Instant>,
}

/// Table state guarded by one lock
struct Table {
    entries: HashMap<CallKey, PendingEntry>,
    /// Set on disposal; no registration is accepted afterwards
    closed: bool,
}

/// Receipt for a successful registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Registered key
    pub key: CallKey,
    /// Distinguishes this registration from later ones under the same key
    pub generation: u64,
    /// When the call expires, if a deadline is configured
    pub deadline: Option<Instant>,
    /// Whether a pending callback was replaced
    pub replaced: bool,
}

/// Diagnostic view of one pending call
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCallInfo {
    /// Call key
    pub key: CallKey,
    /// Registration time
    pub registered_at: DateTime<Utc>,
    /// Whether the call has a deadline
    pub has_deadline: bool,
}

/// Call correlator
pub struct CallCorrelator {
    table: Mutex<Table>,
    next_generation: AtomicU64,
    policy: DuplicateKeyPolicy,
    timeout: Option<Duration>,
    metrics: Arc<MetricsCollector>,
}

impl CallCorrelator {
    /// Create an empty correlator
    pub fn new(policy: DuplicateKeyPolicy, timeout: Option<Duration>) -> Self {
        Self::with_metrics(policy, timeout, Arc::new(MetricsCollector::new()))
    }

    /// Create an empty correlator reporting into `metrics`
    pub fn with_metrics(
        policy: DuplicateKeyPolicy,
        timeout: Option<Duration>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            table: Mutex::new(Table {
                entries: HashMap::new(),
                closed: false,
            }),
            next_generation: AtomicU64::new(1),
            policy,
            timeout,
            metrics,
        }
    }

    /// Register `callback` under `key`.
    ///
    /// Under `Replace` an existing entry is dropped without being invoked;
    /// under `Reject` the call fails with `Conflict` and the table is
    /// unchanged. Fails with `InvalidState` once the correlator is closed.
    pub fn register(&self, key: CallKey, callback: ResultCallback) -> Result<Registration> {
        let now = Instant::now();
        let deadline = self.timeout.map(|t| now + t);

        let mut table = self.table.lock();
        if table.closed {
            return Err(BridgeError::invalid_state(
                "register",
                LifecycleState::Disposed,
            ));
        }

        let replaced = table.entries.contains_key(&key);
        if replaced && self.policy == DuplicateKeyPolicy::Reject {
            return Err(BridgeError::Conflict {
                key: key.to_string(),
            });
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        table.entries.insert(
            key.clone(),
            PendingEntry {
                callback,
                generation,
                registered_at: Utc::now(),
                started: now,
                deadline,
            },
        );
        drop(table);

        if replaced {
            self.metrics.record_replaced();
            warn!(key = %key, "Replaced pending callback; previous caller will not be notified");
        }
        debug!(key = %key, generation = generation, "Registered pending call");

        Ok(Registration {
            key,
            generation,
            deadline,
            replaced,
        })
    }

    /// Remove the entry for `key` and invoke it with `result`.
    ///
    /// Returns whether a callback was found. A missing entry is an
    /// unsolicited or duplicate delivery and is logged, not raised.
    pub fn resolve(&self, key: &str, result: String) -> bool {
        let entry = self.table.lock().entries.remove(key);
        match entry {
            Some(entry) => {
                self.metrics.record_resolved(entry.started.elapsed());
                debug!(key = key, generation = entry.generation, "Resolving pending call");
                self.invoke(key, entry.callback, result);
                true
            }
            None => {
                self.metrics.record_unsolicited();
                warn!(key = key, "No pending callback for result");
                false
            }
        }
    }

    /// Fail `registration` with `failure` if it is still pending.
    ///
    /// Used when the engine never ran the script. A newer registration
    /// under the same key is left alone.
    pub fn fail(&self, registration: &Registration, failure: String) -> bool {
        let key = registration.key.as_str();
        match self.take_generation(key, registration.generation) {
            Some(entry) => {
                debug!(key = key, generation = entry.generation, "Failing pending call");
                self.invoke(key, entry.callback, failure);
                true
            }
            None => false,
        }
    }

    /// Expire the registration `generation` under `key` with a timeout failure.
    ///
    /// A newer registration under the same key is left alone.
    pub fn expire(&self, key: &str, generation: u64) -> bool {
        match self.take_generation(key, generation) {
            Some(entry) => {
                self.fire_timeout(key, entry);
                true
            }
            None => false,
        }
    }

    /// Drop the entry for `key` without invoking it; returns whether one existed
    pub fn discard(&self, key: &str) -> bool {
        let entry = self.table.lock().entries.remove(key);
        match entry {
            Some(entry) => {
                debug!(key = key, generation = entry.generation, "Discarding pending call");
                drop(entry);
                true
            }
            None => false,
        }
    }

    fn take_generation(&self, key: &str, generation: u64) -> Option<PendingEntry> {
        let mut table = self.table.lock();
        match table.entries.get(key) {
            Some(entry) if entry.generation == generation => table.entries.remove(key),
            _ => None,
        }
    }

    /// Expire every entry whose deadline has passed; returns how many fired
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(CallKey, PendingEntry)> = {
            let mut table = self.table.lock();
            let keys: Vec<CallKey> = table
                .entries
                .iter()
                .filter(|(_, e)| e.deadline.map_or(false, |d| d <= now))
                .map(|(k, _)| k.clone())
                .collect();
            keys.into_iter()
                .filter_map(|k| table.entries.remove(&k).map(|e| (k, e)))
                .collect()
        };

        let count = expired.len();
        for (key, entry) in expired {
            self.fire_timeout(key.as_str(), entry);
        }
        count
    }

    /// Arm a timer that expires `registration` at its deadline.
    ///
    /// Only effective inside a tokio runtime; elsewhere expiry relies on
    /// `sweep_expired`.
    pub fn schedule_expiry(self: &Arc<Self>, registration: &Registration) {
        let Some(deadline) = registration.deadline else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(key = %registration.key, "No runtime for expiry timer; relying on sweeps");
            return;
        };

        let correlator: Weak<Self> = Arc::downgrade(self);
        let key = registration.key.clone();
        let generation = registration.generation;
        handle.spawn(async move {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
            if let Some(correlator) = correlator.upgrade() {
                correlator.expire(key.as_str(), generation);
            }
        });
    }

    /// Drop every pending callback without invoking it; returns how many
    pub fn clear(&self) -> usize {
        let drained: Vec<PendingEntry> = {
            let mut table = self.table.lock();
            table.entries.drain().map(|(_, e)| e).collect()
        };
        // Callbacks are dropped outside the lock; their destructors may be arbitrary.
        let count = drained.len();
        drop(drained);
        count
    }

    /// Refuse further registrations and drop every pending callback
    pub fn close(&self) -> usize {
        self.table.lock().closed = true;
        let count = self.clear();
        self.metrics.record_abandoned(count);
        count
    }

    /// Whether the correlator has been closed
    pub fn is_closed(&self) -> bool {
        self.table.lock().closed
    }

    /// Number of pending calls
    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    /// Whether no call is pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a call is pending under `key`
    pub fn contains(&self, key: &str) -> bool {
        self.table.lock().entries.contains_key(key)
    }

    /// Pending calls, oldest first
    pub fn pending(&self) -> Vec<PendingCallInfo> {
        let table = self.table.lock();
        let mut pending: Vec<PendingCallInfo> = table
            .entries
            .iter()
            .map(|(key, e)| PendingCallInfo {
                key: key.clone(),
                registered_at: e.registered_at,
                has_deadline: e.deadline.is_some(),
            })
            .collect();
        pending.sort_by(|a, b| a.registered_at.cmp(&b.registered_at));
        pending
    }

    /// Metrics this correlator reports into
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    fn fire_timeout(&self, key: &str, entry: PendingEntry) {
        let timeout_ms = self.timeout.map_or(0, |t| t.as_millis() as u64);
        self.metrics.record_timeout();
        warn!(key = key, timeout_ms = timeout_ms, "Pending call timed out");
        let failure = CallFailure::timeout(key, timeout_ms);
        self.invoke(key, entry.callback, failure.to_result_string());
    }

    fn invoke(&self, key: &str, callback: ResultCallback, result: String) {
        invoke_guarded(&self.metrics, key, callback, result);
    }
}

/// Run `callback` with `result`, containing a panic to the callback.
pub(crate) fn invoke_guarded<F>(metrics: &MetricsCollector, key: &str, callback: F, result: String)
where
    F: FnOnce(String),
{
    if catch_unwind(AssertUnwindSafe(move || callback(result))).is_err() {
        metrics.record_callback_panic();
        error!(key = key, "Result callback panicked");
    }
}

impl std::fmt::Debug for CallCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallCorrelator")
            .field("pending", &self.len())
            .field("policy", &self.policy)
            .field("timeout", &self.timeout)
            .field("closed", &self.is_closed())
            .finish()
    }
}
