use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::series::{RetentionPolicy, Sample, SampleSeries, StorePolicy};

/// Retained samples for one sensor, copied out of the store.
///
/// `values[i]` and `timestamps[i]` always describe the same sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSnapshot {
    pub identifier: String,
    pub values: Vec<f64>,
    pub timestamps: Vec<DateTime<Utc>>,
}

impl SeriesSnapshot {
    fn from_samples(identifier: String, samples: &[Sample]) -> Self {
        Self {
            identifier,
            values: samples.iter().map(|s| s.value).collect(),
            timestamps: samples.iter().map(|s| s.timestamp).collect(),
        }
    }
}

type SharedSeries = Arc<Mutex<SampleSeries>>;

/// In-memory history of recent samples per sensor identifier.
///
/// Wrapped in `Arc` so it can be cheaply cloned and shared across tasks.
/// The outer `RwLock` only guards the key set; each series has its own
/// mutex, so writers to different sensors never wait on each other for
/// longer than a map lookup.
#[derive(Clone, Default)]
pub struct SeriesStore {
    inner: Arc<RwLock<HashMap<String, SharedSeries>>>,
    policy: StorePolicy,
}

impl SeriesStore {
    pub fn new(policy: StorePolicy) -> Self {
        Self {
            inner: Arc::default(),
            policy,
        }
    }

    pub fn policy(&self) -> StorePolicy {
        self.policy
    }

    /// Append `sample` to the series for `identifier`, creating it on first use.
    pub async fn append(&self, identifier: &str, sample: Sample) -> Sample {
        let series = self.series_entry(identifier).await;
        lock(&series).append(sample, self.policy);
        sample
    }

    async fn series_entry(&self, identifier: &str) -> SharedSeries {
        if let Some(series) = self.inner.read().await.get(identifier) {
            return Arc::clone(series);
        }
        let mut map = self.inner.write().await;
        Arc::clone(map.entry(identifier.to_owned()).or_default())
    }

    /// Copy every non-empty series, ordered by identifier.
    ///
    /// Under a time-window policy each series is first swept of samples
    /// older than `now - window`.
    pub async fn snapshot_all(&self, now: DateTime<Utc>) -> Vec<SeriesSnapshot> {
        let entries: Vec<(String, SharedSeries)> = self
            .inner
            .read()
            .await
            .iter()
            .map(|(id, series)| (id.clone(), Arc::clone(series)))
            .collect();

        let mut snapshots: Vec<SeriesSnapshot> = entries
            .into_iter()
            .filter_map(|(identifier, series)| {
                let samples = self.sweep_and_copy(&series, now);
                (!samples.is_empty()).then(|| SeriesSnapshot::from_samples(identifier, &samples))
            })
            .collect();

        snapshots.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        snapshots
    }

    /// Copy the series for a single identifier, if it has any samples.
    pub async fn series(&self, identifier: &str, now: DateTime<Utc>) -> Option<SeriesSnapshot> {
        let series = self.inner.read().await.get(identifier).cloned()?;
        let samples = self.sweep_and_copy(&series, now);
        (!samples.is_empty()).then(|| SeriesSnapshot::from_samples(identifier.to_owned(), &samples))
    }

    fn sweep_and_copy(&self, series: &SharedSeries, now: DateTime<Utc>) -> Vec<Sample> {
        let mut guard = lock(series);
        if let RetentionPolicy::TimeWindow(window) = self.policy.retention {
            guard.prune_older_than(now - window);
        }
        guard.snapshot()
    }

    /// Number of identifiers seen so far, including ones whose samples
    /// have all expired.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

// A panic mid-append cannot leave a half-written `Sample`, so a poisoned
// series is still consistent.
fn lock(series: &SharedSeries) -> MutexGuard<'_, SampleSeries> {
    series.lock().unwrap_or_else(PoisonError::into_inner)
}
