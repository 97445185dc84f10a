use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{btree_map, BTreeMap, HashMap};

/// A single averaged statistic as returned by the monitoring API.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    pub timestamp: DateTime<Utc>,
    pub average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub metric: String,
    pub timestamp: DateTime<Utc>,
    pub average: f64,
}

impl RawSample {
    pub fn datapoint(&self) -> Datapoint {
        Datapoint {
            timestamp: self.timestamp,
            average: self.average,
        }
    }
}

// One raw metric's averages keyed by timestamp. Keys are unique and iterate
// in ascending order, which is what the resampler walks.
pub type RawSeries = BTreeMap<DateTime<Utc>, f64>;

// Raw series keyed by raw metric name. Lookup only, order is irrelevant.
pub type SeriesMap = HashMap<String, RawSeries>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>, // exclusive
}

impl TimeWindow {
    /// Returns `None` when `end` precedes `start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        if end < start {
            return None;
        }
        Some(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Moves the start earlier by `lead_in`, leaving the end untouched.
    /// Returns `None` if the new start is not representable.
    pub fn widen(&self, lead_in: Duration) -> Option<Self> {
        Some(Self {
            start: self.start.checked_sub_signed(lead_in)?,
            end: self.end,
        })
    }

    /// Splits the window into contiguous sub-windows no longer than
    /// `max_len`. The last sub-window ends exactly at `end`.
    pub fn chunks(&self, max_len: Duration) -> Vec<TimeWindow> {
        let mut chunks = vec![];
        let mut chunk_start = self.start;
        while chunk_start < self.end {
            let chunk_end = chunk_start
                .checked_add_signed(max_len)
                .map_or(self.end, |end| std::cmp::min(end, self.end));
            chunks.push(TimeWindow {
                start: chunk_start,
                end: chunk_end,
            });
            chunk_start = chunk_end;
        }
        chunks
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp < self.end
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResampledPoint {
    pub timestamp: String,
    pub derived_key: String,
    pub value: f64,
}

pub fn iso8601(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Resampled values keyed by ISO-8601 timestamp, then by derived key.
///
/// All timestamps share one fixed format, so lexical order of the outer keys
/// is chronological order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PointTable {
    rows: BTreeMap<String, BTreeMap<String, f64>>,
}

impl PointTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, point: ResampledPoint) {
        self.rows
            .entry(point.timestamp)
            .or_default()
            .insert(point.derived_key, point.value);
    }

    pub fn get(&self, timestamp: &str, derived_key: &str) -> Option<f64> {
        self.rows.get(timestamp)?.get(derived_key).copied()
    }

    pub fn row(&self, timestamp: &str) -> Option<&BTreeMap<String, f64>> {
        self.rows.get(timestamp)
    }

    pub fn timestamps(&self) -> btree_map::Keys<'_, String, BTreeMap<String, f64>> {
        self.rows.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = ResampledPoint> + '_ {
        self.rows.iter().flat_map(|(timestamp, row)| {
            row.iter().map(move |(derived_key, value)| ResampledPoint {
                timestamp: timestamp.clone(),
                derived_key: derived_key.clone(),
                value: *value,
            })
        })
    }

    /// Number of (timestamp, derived key) points.
    pub fn len(&self) -> usize {
        self.rows.values().map(|row| row.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
