use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

/// One reading: when it was stamped and what it measured.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// How old or how many samples a series may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Evict samples older than the window, measured from the newest stamp.
    TimeWindow(Duration),
    /// Keep at most this many samples.
    MaxCount(usize),
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::TimeWindow(Duration::minutes(10))
    }
}

/// Whether repeated equal values collapse into a single entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoalescePolicy {
    #[default]
    None,
    /// A value equal to the two before it moves the last entry's timestamp
    /// forward instead of appending.
    PlateauEqual,
}

/// The pair of policies a store applies to every series it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorePolicy {
    pub retention: RetentionPolicy,
    pub coalesce: CoalescePolicy,
}

/// Time-ordered samples for a single sensor, oldest first.
#[derive(Debug, Clone, Default)]
pub struct SampleSeries {
    entries: VecDeque<Sample>,
}

impl SampleSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `sample`, then evict at most one entry according to `policy`.
    ///
    /// Returns `true` when the sample extended a plateau rather than adding
    /// a new entry.
    pub fn append(&mut self, sample: Sample, policy: StorePolicy) -> bool {
        let coalesced = match policy.coalesce {
            CoalescePolicy::PlateauEqual if self.extends_plateau(sample.value) => {
                if let Some(last) = self.entries.back_mut() {
                    last.timestamp = sample.timestamp;
                }
                true
            }
            _ => {
                self.entries.push_back(sample);
                false
            }
        };

        // Single-step eviction; the read path does the full sweep.
        match policy.retention {
            RetentionPolicy::TimeWindow(window) => {
                let cutoff = sample.timestamp - window;
                if self.entries.front().is_some_and(|s| s.timestamp < cutoff) {
                    self.entries.pop_front();
                }
            }
            RetentionPolicy::MaxCount(limit) => {
                if self.entries.len() > limit {
                    self.entries.pop_front();
                }
            }
        }

        coalesced
    }

    fn extends_plateau(&self, value: f64) -> bool {
        let len = self.entries.len();
        len > 2 && self.entries[len - 1].value == value && self.entries[len - 2].value == value
    }

    /// Drop every sample stamped before `cutoff`. A sample stamped exactly at
    /// `cutoff` is kept.
    pub fn prune_older_than(&mut self, cutoff: DateTime<Utc>) {
        self.entries.retain(|s| s.timestamp >= cutoff);
    }

    pub fn snapshot(&self) -> Vec<Sample> {
        self.entries.iter().copied().collect()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
