//! 观察器: 记录库所/变迁的令牌计数历史, 比较型观察器额外校验期望序列.
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, OnceLock};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::config::SimConfig;
use crate::net::token::Label;

pub type Count = u64;

/// Monotonic time base shared by every observer of one net. Follows the
/// tokio clock, so a paused runtime freezes it.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Seconds elapsed since the clock was started.
    pub fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserverRecord {
    pub timestamp: f64,
    pub counts: Vec<(Label, Count)>,
    pub requester: String,
}

impl ObserverRecord {
    /// Count recorded for `label`, 0 when the label was never seen.
    pub fn count(&self, label: Label) -> Count {
        self.counts
            .iter()
            .find(|(l, _)| *l == label)
            .map_or(0, |(_, c)| *c)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Timestamp,
    Counts,
    Requester,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Timestamp(f64),
    Counts(Vec<(Label, Count)>),
    Requester(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error(
        "{observer}: record #{record}, label {label}: actual count {actual} =/= expected {expected}"
    )]
    Mismatch {
        observer: String,
        record: usize,
        label: Label,
        expected: Count,
        actual: Count,
    },
    #[error("{observer}: record #{record}: actual requester {actual:?} =/= expected {expected:?}")]
    RequesterMismatch {
        observer: String,
        record: usize,
        expected: String,
        actual: String,
    },
}

#[derive(Debug, Clone, Default)]
pub struct ObserverConfig {
    /// Maximum number of records kept, `0` keeps everything. Trimming
    /// never drops the newest record, so a limit of 1 keeps exactly one.
    pub record_limit: usize,
    pub verbose: bool,
    /// Name used in diagnostics; defaults to the owning actor's name.
    pub ident: Option<String>,
}

impl ObserverConfig {
    pub fn with_limit(record_limit: usize) -> Self {
        Self {
            record_limit,
            ..Self::default()
        }
    }
}

impl From<&SimConfig> for ObserverConfig {
    fn from(config: &SimConfig) -> Self {
        Self {
            record_limit: config.record_limit,
            verbose: config.verbose,
            ident: None,
        }
    }
}

/// Values a comparative observer expects, one entry per saved record.
#[derive(Debug, Clone, Default)]
pub struct Expectation {
    counts: IndexMap<Label, Vec<Count>>,
    requesters: Vec<String>,
}

impl Expectation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(mut self, label: Label, expected: impl IntoIterator<Item = Count>) -> Self {
        self.counts.insert(label, expected.into_iter().collect());
        self
    }

    pub fn requesters<S: Into<String>>(mut self, expected: impl IntoIterator<Item = S>) -> Self {
        self.requesters = expected.into_iter().map(Into::into).collect();
        self
    }

    /// Number of records covered by the longest expected sequence.
    pub fn len(&self) -> usize {
        self.counts
            .values()
            .map(Vec::len)
            .chain(std::iter::once(self.requesters.len()))
            .max()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self, ident: &str, index: usize, record: &ObserverRecord) -> Result<(), VerificationError> {
        for (label, expected) in &self.counts {
            let Some(&expected) = expected.get(index) else {
                continue;
            };
            let actual = record.count(*label);
            if actual != expected {
                return Err(VerificationError::Mismatch {
                    observer: ident.to_string(),
                    record: index,
                    label: *label,
                    expected,
                    actual,
                });
            }
            log::trace!("{ident}: ({label}, {actual}) == ({label}, {expected})");
        }
        if let Some(expected) = self.requesters.get(index) {
            if *expected != record.requester {
                return Err(VerificationError::RequesterMismatch {
                    observer: ident.to_string(),
                    record: index,
                    expected: expected.clone(),
                    actual: record.requester.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Called once when a comparative observer has consumed all expected values.
pub type ComparisonEnd = Box<dyn FnOnce(&Observer) + Send>;

struct Comparison {
    expected: Expectation,
    index: usize,
    on_end: Option<ComparisonEnd>,
}

#[derive(Default)]
struct ObserverState {
    records: VecDeque<ObserverRecord>,
    counters: IndexMap<Label, Count>,
    comparison: Option<Comparison>,
}

/// Token-count recorder attached to a place or a transition.
///
/// Counters follow every `put`/`take` of the owning actor; [`Observer::save`]
/// turns the current counters into an [`ObserverRecord`]. None of the
/// operations suspend, so a plain mutex guards the state.
pub struct Observer {
    config: ObserverConfig,
    /// 滞回区间 (下界, 上界): 记录数达到上界时裁剪到下界.
    bounds: (usize, usize),
    ident: OnceLock<String>,
    state: Mutex<ObserverState>,
}

impl Observer {
    pub fn new(config: ObserverConfig) -> Self {
        let bounds = hysteresis_bounds(config.record_limit);
        let ident = OnceLock::new();
        if let Some(name) = config.ident.clone() {
            let _ = ident.set(name);
        }
        Self {
            config,
            bounds,
            ident,
            state: Mutex::new(ObserverState::default()),
        }
    }

    /// Observer that checks every saved record against `expected`.
    pub fn comparative(
        config: ObserverConfig,
        expected: Expectation,
        on_end: Option<ComparisonEnd>,
    ) -> Self {
        let observer = Self::new(config);
        observer.lock().comparison = Some(Comparison {
            expected,
            index: 0,
            on_end,
        });
        observer
    }

    fn lock(&self) -> MutexGuard<'_, ObserverState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn ident(&self) -> &str {
        self.ident.get().map_or("n/a", String::as_str)
    }

    /// Names the observer after the actor it is attached to, unless it
    /// already has a name.
    pub(crate) fn attach(&self, actor: &str) {
        let _ = self.ident.set(actor.to_string());
    }

    pub fn is_comparing(&self) -> bool {
        self.lock().comparison.is_some()
    }

    /// Adds a signed delta to the counter of `label`. Counters never go below zero.
    pub fn inc_token_count(&self, label: Label, delta: i64) {
        let mut state = self.lock();
        let counter = state.counters.entry(label).or_insert(0);
        *counter = counter.saturating_add_signed(delta);
    }

    pub fn counts(&self) -> Vec<(Label, Count)> {
        self.lock()
            .counters
            .iter()
            .map(|(label, count)| (*label, *count))
            .collect()
    }

    /// Snapshots the counters into a new record.
    pub fn save(&self, requester: &str, timestamp: f64) -> Result<(), VerificationError> {
        let requester = if requester.is_empty() {
            "n/a"
        } else {
            requester
        };
        let mut state = self.lock();
        let record = ObserverRecord {
            timestamp,
            counts: state
                .counters
                .iter()
                .map(|(label, count)| (*label, *count))
                .collect(),
            requester: requester.to_string(),
        };

        let mut finished = None;
        if let Some(comparison) = state.comparison.as_mut() {
            comparison
                .expected
                .check(self.ident(), comparison.index, &record)?;
            comparison.index += 1;
            if comparison.index >= comparison.expected.len() {
                finished = state.comparison.take();
            }
        }

        if self.config.verbose {
            log::info!("REC: {}: {:?}", self.ident(), record);
        }
        state.records.push_back(record);
        self.clean_records(&mut state);
        drop(state);

        if let Some(comparison) = finished {
            log::debug!("{}: comparison ends", self.ident());
            if self.config.verbose {
                self.display_records();
            }
            if let Some(on_end) = comparison.on_end {
                on_end(self);
            }
        }
        Ok(())
    }

    fn clean_records(&self, state: &mut ObserverState) {
        if self.config.record_limit == 0 {
            return;
        }
        let (lower, upper) = self.bounds;
        let count = state.records.len();
        if count >= upper {
            state.records.drain(..count - lower);
        }
    }

    fn display_records(&self) {
        let state = self.lock();
        let mut output = format!("{} has {} records\n", self.ident(), state.records.len());
        for record in &state.records {
            output.push_str(&format!("  {record:?}\n"));
        }
        log::info!("{output}");
    }

    pub fn records(&self) -> Vec<ObserverRecord> {
        self.lock().records.iter().cloned().collect()
    }

    pub fn column(&self, column: Column) -> Vec<ColumnValue> {
        self.lock()
            .records
            .iter()
            .map(|record| match column {
                Column::Timestamp => ColumnValue::Timestamp(record.timestamp),
                Column::Counts => ColumnValue::Counts(record.counts.clone()),
                Column::Requester => ColumnValue::Requester(record.requester.clone()),
            })
            .collect()
    }

    /// Recorded counts of a single label, oldest first.
    pub fn history(&self, label: Label) -> Vec<Count> {
        self.lock()
            .records
            .iter()
            .map(|record| record.count(label))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("ident", &self.ident())
            .field("records", &self.len())
            .field("comparing", &self.is_comparing())
            .finish()
    }
}

/// `(⌊0.91·limit⌋, ⌊1.1·limit⌋)` without overflow. The lower bound is at
/// least 1 so a bounded observer always keeps its newest record.
fn hysteresis_bounds(limit: usize) -> (usize, usize) {
    if limit == 0 {
        return (0, 0);
    }
    let lower = limit / 100 * 91 + limit % 100 * 91 / 100;
    let upper = limit.saturating_add(limit / 10);
    (lower.max(1), upper)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn named(config: ObserverConfig) -> Observer {
        let observer = Observer::new(config);
        observer.attach("p1");
        observer
    }

    #[test]
    fn save_snapshots_counters() {
        let observer = named(ObserverConfig::default());
        observer.inc_token_count(Label::GENERIC, 4);
        observer.save("t2", 0.5).unwrap();
        observer.inc_token_count(Label::GENERIC, -2);
        observer.inc_token_count(Label::new(1), 1);
        observer.save("", 0.75).unwrap();

        let records = observer.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].counts, vec![(Label::GENERIC, 4)]);
        assert_eq!(records[0].requester, "t2");
        assert_eq!(records[1].counts, vec![(Label::GENERIC, 2), (Label::new(1), 1)]);
        assert_eq!(records[1].requester, "n/a");
        assert_eq!(observer.history(Label::new(1)), vec![0, 1]);
        assert_eq!(
            observer.column(Column::Timestamp),
            vec![ColumnValue::Timestamp(0.5), ColumnValue::Timestamp(0.75)]
        );
    }

    #[test]
    fn counters_never_go_negative() {
        let observer = named(ObserverConfig::default());
        observer.inc_token_count(Label::GENERIC, 1);
        observer.inc_token_count(Label::GENERIC, -3);
        assert_eq!(observer.counts(), vec![(Label::GENERIC, 0)]);
    }

    #[test]
    fn record_limit_trims_with_hysteresis() {
        let observer = named(ObserverConfig::with_limit(100));
        for i in 0..109 {
            observer.save("t", i as f64).unwrap();
        }
        assert_eq!(observer.len(), 109);
        observer.save("t", 109.0).unwrap();
        assert_eq!(observer.len(), 91);
        // the newest records survive
        let first = observer.records()[0].timestamp;
        assert_eq!(first, 19.0);
        observer.save("t", 110.0).unwrap();
        assert_eq!(observer.len(), 92);
    }

    #[test]
    fn huge_record_limit_keeps_bounds_ordered() {
        let observer = named(ObserverConfig::with_limit(usize::MAX));
        observer.save("t", 0.0).unwrap();
        assert_eq!(observer.len(), 1);

        let (lower, upper) = hysteresis_bounds(usize::MAX);
        assert_eq!(upper, usize::MAX);
        assert!(lower < upper && lower > usize::MAX / 100 * 90);
        assert_eq!(hysteresis_bounds(100), (91, 110));
        assert_eq!(hysteresis_bounds(usize::MAX / 50).1, usize::MAX / 50 + usize::MAX / 500);
    }

    #[test]
    fn limit_of_one_keeps_newest_record() {
        let observer = named(ObserverConfig::with_limit(1));
        observer.save("t", 1.0).unwrap();
        assert_eq!(observer.len(), 1);
        observer.save("t", 2.0).unwrap();
        assert_eq!(observer.len(), 1);
        assert_eq!(observer.records()[0].timestamp, 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn clock_follows_tokio_time() {
        let clock = Clock::start();
        tokio::time::advance(std::time::Duration::from_millis(1500)).await;
        assert_eq!(clock.now(), 1.5);
    }

    #[test]
    fn comparative_observer_detects_mismatch() {
        let expected = Expectation::new().counts(Label::GENERIC, [4, 2, 0]);
        let observer = Observer::comparative(ObserverConfig::default(), expected, None);
        observer.attach("p1");

        observer.inc_token_count(Label::GENERIC, 4);
        observer.save("p1", 0.0).unwrap();
        observer.inc_token_count(Label::GENERIC, -2);
        observer.save("t2", 0.1).unwrap();
        observer.inc_token_count(Label::GENERIC, -1);
        let err = observer.save("t2", 0.2).unwrap_err();
        assert_eq!(
            err,
            VerificationError::Mismatch {
                observer: "p1".into(),
                record: 2,
                label: Label::GENERIC,
                expected: 0,
                actual: 1,
            }
        );
        assert!(err.to_string().contains("actual count 1 =/= expected 0"));
        assert_eq!(observer.len(), 2);
    }

    #[test]
    fn comparison_end_callback_runs_once() {
        let ended = Arc::new(AtomicUsize::new(0));
        let hook = Arc::clone(&ended);
        let expected = Expectation::new()
            .counts(Label::GENERIC, [1, 2])
            .requesters(["a"]);
        let observer = Observer::comparative(
            ObserverConfig::default(),
            expected,
            Some(Box::new(move |obs: &Observer| {
                assert_eq!(obs.len(), 2);
                hook.fetch_add(1, Ordering::SeqCst);
            })),
        );

        observer.inc_token_count(Label::GENERIC, 1);
        observer.save("a", 0.0).unwrap();
        assert!(observer.is_comparing());
        observer.inc_token_count(Label::GENERIC, 1);
        observer.save("b", 0.1).unwrap();
        assert!(!observer.is_comparing());
        // values past the expectation are recorded without checks
        observer.save("c", 0.2).unwrap();
        assert_eq!(ended.load(Ordering::SeqCst), 1);
        assert_eq!(observer.len(), 3);
    }

    #[test]
    fn requester_mismatch_is_reported() {
        let expected = Expectation::new().requesters(["t1"]);
        let observer = Observer::comparative(
            ObserverConfig {
                ident: Some("watch".into()),
                ..ObserverConfig::default()
            },
            expected,
            None,
        );
        observer.attach("p9");
        assert_eq!(observer.ident(), "watch");
        let err = observer.save("t3", 0.0).unwrap_err();
        assert!(matches!(err, VerificationError::RequesterMismatch { record: 0, .. }));
    }
}
