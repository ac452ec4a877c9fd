//! Persistence layer.
//!
//! `SignalStore` keeps every logged signal in memory and mirrors the full
//! set to a single JSON array file. The file is read once on construction
//! and rewritten after each mutation (once per batch for `log_batch`).
//!
//! An unreadable or corrupt file is logged and treated as an empty store.
//! Write failures are returned to the caller of the mutating operation; the
//! in-memory change is kept and reaches disk with the next successful save.

pub mod stats;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::types::{Action, Candidate, Outcome, OutcomeUpdate, ScanMode, Signal};

pub use stats::SignalStats;

/// Default signal log path.
pub const DEFAULT_SIGNAL_FILE: &str = "data/signals.json";

// ---------------------------------------------------------------------------
// Query filter
// ---------------------------------------------------------------------------

/// Criteria for `find` / `get_stats`. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct SignalFilter {
    pub chains: Option<Vec<String>>,
    pub modes: Option<Vec<ScanMode>>,
    pub min_score: Option<f64>,
    pub max_score: Option<f64>,
    pub acted: Option<bool>,
    pub has_outcome: Option<bool>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Applied after filtering and sorting.
    pub limit: Option<usize>,
}

impl SignalFilter {
    pub fn matches(&self, signal: &Signal) -> bool {
        let c = &signal.candidate;
        if let Some(chains) = &self.chains {
            if !chains.iter().any(|ch| ch.eq_ignore_ascii_case(&c.chain)) {
                return false;
            }
        }
        if let Some(modes) = &self.modes {
            if !modes.contains(&c.mode) {
                return false;
            }
        }
        if self.min_score.is_some_and(|min| c.score < min) {
            return false;
        }
        if self.max_score.is_some_and(|max| c.score > max) {
            return false;
        }
        if self.acted.is_some_and(|acted| signal.acted != acted) {
            return false;
        }
        if self
            .has_outcome
            .is_some_and(|has| signal.outcome.is_some() != has)
        {
            return false;
        }
        if self.since.is_some_and(|since| signal.logged_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| signal.logged_at > until) {
            return false;
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreInner {
    /// Signals in insertion order.
    signals: Vec<Signal>,
    /// id -> position in `signals`.
    by_id: HashMap<String, usize>,
    /// chain:token:mode -> latest `logged_at`.
    latest: HashMap<String, DateTime<Utc>>,
}

impl StoreInner {
    fn from_signals(signals: Vec<Signal>) -> Self {
        let mut inner = StoreInner::default();
        for signal in signals {
            if inner.by_id.contains_key(&signal.id) {
                continue;
            }
            inner.insert(signal);
        }
        inner
    }

    fn insert(&mut self, signal: Signal) {
        let key = signal.dedupe_key();
        let newest = self
            .latest
            .get(&key)
            .map_or(signal.logged_at, |prev| (*prev).max(signal.logged_at));
        self.latest.insert(key, newest);
        self.by_id.insert(signal.id.clone(), self.signals.len());
        self.signals.push(signal);
    }

    /// Return the stored signal for this candidate, inserting it if new.
    fn log(&mut self, candidate: &Candidate, now: DateTime<Utc>) -> (Signal, bool) {
        let id = candidate.signal_id();
        if let Some(&idx) = self.by_id.get(&id) {
            return (self.signals[idx].clone(), false);
        }
        let signal = Signal::from_candidate(candidate.clone(), now);
        self.insert(signal.clone());
        (signal, true)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Signal> {
        let idx = *self.by_id.get(id)?;
        self.signals.get_mut(idx)
    }
}

/// Durable, deduplicating record of emitted signals.
pub struct SignalStore {
    path: PathBuf,
    inner: Mutex<StoreInner>,
}

impl SignalStore {
    /// Open the store at `path` (or the default path), loading any existing
    /// snapshot.
    pub fn open(path: Option<&Path>) -> Self {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SIGNAL_FILE));
        let signals = load_signals(&path);
        Self {
            path,
            inner: Mutex::new(StoreInner::from_signals(signals)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a candidate as a signal. Logging the same candidate again
    /// returns the stored record unchanged.
    pub fn log(&self, candidate: &Candidate) -> Result<Signal> {
        let mut inner = self.inner.lock();
        let (signal, inserted) = inner.log(candidate, Utc::now());
        if inserted {
            save_signals(&self.path, &inner.signals)?;
            debug!(id = %signal.id, "Signal logged");
        }
        Ok(signal)
    }

    /// Log many candidates with a single write at the end.
    pub fn log_batch(&self, candidates: &[Candidate]) -> Result<Vec<Signal>> {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        let mut inserted = 0usize;
        let signals: Vec<Signal> = candidates
            .iter()
            .map(|c| {
                let (signal, new) = inner.log(c, now);
                if new {
                    inserted += 1;
                }
                signal
            })
            .collect();

        if inserted > 0 {
            save_signals(&self.path, &inner.signals)?;
        }
        info!(
            requested = candidates.len(),
            inserted,
            total = inner.signals.len(),
            "Signal batch logged"
        );
        Ok(signals)
    }

    /// Mark a signal as acted on. Unknown ids return `Ok(None)`.
    pub fn mark_acted(
        &self,
        id: &str,
        action: Action,
        notes: Option<String>,
    ) -> Result<Option<Signal>> {
        let mut inner = self.inner.lock();
        let Some(signal) = inner.get_mut(id) else {
            debug!(id, "mark_acted: unknown signal id");
            return Ok(None);
        };

        signal.acted = true;
        let outcome = signal.outcome.get_or_insert_with(|| Outcome::new(action));
        outcome.action = action;
        if outcome.executed_at.is_none() {
            outcome.executed_at = Some(Utc::now());
        }
        if notes.is_some() {
            outcome.notes = notes;
        }
        let updated = signal.clone();

        save_signals(&self.path, &inner.signals)?;
        info!(id, action = %action, "Signal marked as acted");
        Ok(Some(updated))
    }

    /// Merge outcome fields into a signal. When both entry and exit prices
    /// are known, P&L is recomputed from them. Unknown ids return `Ok(None)`.
    pub fn record_outcome(&self, id: &str, update: OutcomeUpdate) -> Result<Option<Signal>> {
        let mut inner = self.inner.lock();
        let Some(signal) = inner.get_mut(id) else {
            debug!(id, "record_outcome: unknown signal id");
            return Ok(None);
        };

        let outcome = signal
            .outcome
            .get_or_insert_with(|| Outcome::new(update.action.unwrap_or(Action::Skip)));
        merge_outcome(outcome, update);
        let updated = signal.clone();

        save_signals(&self.path, &inner.signals)?;
        info!(
            id,
            pnl = ?updated.outcome.as_ref().and_then(|o| o.pnl),
            "Outcome recorded"
        );
        Ok(Some(updated))
    }

    pub fn get(&self, id: &str) -> Option<Signal> {
        let inner = self.inner.lock();
        inner.by_id.get(id).map(|&idx| inner.signals[idx].clone())
    }

    /// Signals matching `filter`, newest-logged first.
    pub fn find(&self, filter: &SignalFilter) -> Vec<Signal> {
        let inner = self.inner.lock();
        let mut found: Vec<Signal> = inner
            .signals
            .iter()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        // Stable sort keeps later insertions first among equal timestamps.
        found.reverse();
        found.sort_by(|a, b| b.logged_at.cmp(&a.logged_at));
        if let Some(limit) = filter.limit {
            found.truncate(limit);
        }
        found
    }

    /// Whether a signal with the same chain, token and mode was logged
    /// within `window` of now. A zero window never matches.
    pub fn has_recent_signal(&self, candidate: &Candidate, window: Duration) -> bool {
        if window <= Duration::zero() {
            return false;
        }
        let inner = self.inner.lock();
        inner
            .latest
            .get(&candidate.dedupe_key())
            .is_some_and(|logged_at| Utc::now() - *logged_at <= window)
    }

    /// Aggregate statistics over signals matching `filter` (all if `None`).
    pub fn get_stats(&self, filter: Option<&SignalFilter>) -> SignalStats {
        let inner = self.inner.lock();
        let selected = inner
            .signals
            .iter()
            .filter(|s| filter.map_or(true, |f| f.matches(s)));
        SignalStats::from_signals(selected)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every signal and persist the empty log.
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        *inner = StoreInner::default();
        save_signals(&self.path, &inner.signals)?;
        info!(path = %self.path.display(), "Signal store cleared");
        Ok(())
    }
}

/// Apply provided fields; derive P&L from prices when both are present.
fn merge_outcome(outcome: &mut Outcome, update: OutcomeUpdate) {
    if let Some(action) = update.action {
        outcome.action = action;
    }
    if update.executed_at.is_some() {
        outcome.executed_at = update.executed_at;
    }
    if update.entry_price.is_some() {
        outcome.entry_price = update.entry_price;
    }
    if update.exit_price.is_some() {
        outcome.exit_price = update.exit_price;
    }
    if update.pnl.is_some() {
        outcome.pnl = update.pnl;
    }
    if update.pnl_percent.is_some() {
        outcome.pnl_percent = update.pnl_percent;
    }
    if update.notes.is_some() {
        outcome.notes = update.notes;
    }

    if let (Some(entry), Some(exit)) = (outcome.entry_price, outcome.exit_price) {
        // Out-of-range results are left unset.
        let pnl = exit.checked_sub(entry);
        outcome.pnl = pnl;
        outcome.pnl_percent = pnl
            .and_then(|pnl| pnl.checked_div(entry))
            .and_then(|ratio| ratio.checked_mul(dec!(100)));
    }
}

// ---------------------------------------------------------------------------
// File I/O
// ---------------------------------------------------------------------------

/// Read the snapshot. Missing, unreadable or corrupt files yield an empty log.
fn load_signals(path: &Path) -> Vec<Signal> {
    if !path.exists() {
        info!(path = %path.display(), "No signal log found, starting fresh");
        return Vec::new();
    }

    let json = match std::fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read signal log, starting empty");
            return Vec::new();
        }
    };

    match serde_json::from_str::<Vec<Signal>>(&json) {
        Ok(signals) => {
            info!(path = %path.display(), count = signals.len(), "Signal log loaded");
            signals
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Corrupt signal log, starting empty");
            Vec::new()
        }
    }
}

fn save_signals(path: &Path, signals: &[Signal]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(signals).context("Failed to serialise signal log")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write signal log to {}", path.display()))?;
    debug!(path = %path.display(), count = signals.len(), "Signal log saved");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
