use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

/// How the source values present at one timestamp are folded into a single
/// derived value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregation {
    /// Sum of present values, in kilo-units per second of the gap.
    ScaledSumRate,
    /// Arithmetic mean of present values.
    Mean,
}

impl Aggregation {
    /// Returns `None` when `values` is empty. A sum of present zeros is still
    /// a value; having nothing present is not.
    pub fn apply(&self, values: &[f64], gap_secs: i64) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let sum: f64 = values.iter().sum();
        match self {
            Aggregation::ScaledSumRate => Some(sum / 1024.0 / gap_secs as f64),
            Aggregation::Mean => Some(sum / values.len() as f64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rollup {
    Average,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalName {
    Realtime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DerivedMetricSpec {
    pub derived_key: String,
    pub sources: Vec<String>,
    pub aggregation: Aggregation,
    pub unit: String,
    pub precision: u32,
    pub rollup: Rollup,
    pub interval_name: IntervalName,
}

impl DerivedMetricSpec {
    pub fn new(derived_key: &str, sources: &[&str], aggregation: Aggregation) -> Self {
        Self {
            derived_key: derived_key.to_string(),
            sources: sources.iter().map(|s| s.to_string()).collect(),
            aggregation,
            unit: String::new(),
            precision: 1,
            rollup: Rollup::Average,
            interval_name: IntervalName::Realtime,
        }
    }

    pub fn with_unit(mut self, unit: &str, precision: u32) -> Self {
        self.unit = unit.to_string();
        self.precision = precision;
        self
    }

    /// Metadata row for the downstream performance-history schema.
    pub fn metadata(&self, fine_step_secs: i64) -> CounterMetadata {
        CounterMetadata {
            counter_key: self.derived_key.clone(),
            instance: String::new(),
            capture_interval: fine_step_secs.to_string(),
            precision: self.precision,
            rollup: self.rollup,
            unit_key: self.unit.clone(),
            capture_interval_name: self.interval_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterMetadata {
    pub counter_key: String,
    pub instance: String,
    pub capture_interval: String,
    pub precision: u32,
    pub rollup: Rollup,
    pub unit_key: String,
    pub capture_interval_name: IntervalName,
}

#[derive(Error, Debug, PartialEq)]
pub enum CatalogError {
    #[error("derived key {0} is defined more than once")]
    DuplicateKey(String),
    #[error("derived key {0} has no source metrics")]
    NoSources(String),
}

#[derive(Debug, Clone)]
pub struct CounterCatalog {
    specs: Vec<DerivedMetricSpec>,
}

impl CounterCatalog {
    pub fn new(specs: Vec<DerivedMetricSpec>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for spec in specs.iter() {
            if spec.sources.is_empty() {
                return Err(CatalogError::NoSources(spec.derived_key.clone()));
            }
            if !seen.insert(spec.derived_key.as_str()) {
                return Err(CatalogError::DuplicateKey(spec.derived_key.clone()));
            }
        }
        Ok(Self { specs })
    }

    pub fn get(&self, derived_key: &str) -> Option<&DerivedMetricSpec> {
        self.specs.iter().find(|s| s.derived_key == derived_key)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DerivedMetricSpec> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Every raw metric name referenced by any spec, deduplicated.
    pub fn all_raw_names(&self) -> BTreeSet<String> {
        self.specs
            .iter()
            .flat_map(|s| s.sources.iter().cloned())
            .collect()
    }

    pub fn compute_for(&self, derived_key: &str, values: &[f64], gap_secs: i64) -> Option<f64> {
        self.get(derived_key)?.aggregation.apply(values, gap_secs)
    }
}

impl Default for CounterCatalog {
    fn default() -> Self {
        Self {
            specs: vec![
                DerivedMetricSpec::new(
                    "cpu_usage_rate_average",
                    &["CPUUtilization"],
                    Aggregation::Mean,
                )
                .with_unit("percent", 1),
                DerivedMetricSpec::new(
                    "disk_usage_rate_average",
                    &["DiskReadBytes", "DiskWriteBytes"],
                    Aggregation::ScaledSumRate,
                )
                .with_unit("kilobytespersecond", 2),
                DerivedMetricSpec::new(
                    "net_usage_rate_average",
                    &["NetworkIn", "NetworkOut"],
                    Aggregation::ScaledSumRate,
                )
                .with_unit("kilobytespersecond", 2),
                DerivedMetricSpec::new(
                    "mem_usage_absolute_average",
                    &["MemoryUtilization"],
                    Aggregation::Mean,
                )
                .with_unit("percent", 1),
            ],
        }
    }
}
