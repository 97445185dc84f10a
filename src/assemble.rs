use crate::{
    catalog::{CounterCatalog, CounterMetadata},
    config::Config,
    metric::PointTable,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

pub type MetadataTable = BTreeMap<String, CounterMetadata>;

/// What the performance-history consumer receives: counter metadata and
/// resampled values, both keyed by target id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureOutput {
    pub counters_by_target: HashMap<String, MetadataTable>,
    pub values_by_target: HashMap<String, PointTable>,
}

impl CaptureOutput {
    pub fn counters(&self, target_id: &str) -> Option<&MetadataTable> {
        self.counters_by_target.get(target_id)
    }

    pub fn values(&self, target_id: &str) -> Option<&PointTable> {
        self.values_by_target.get(target_id)
    }
}

pub struct OutputAssembler<'a> {
    catalog: &'a CounterCatalog,
    config: &'a Config,
}

impl<'a> OutputAssembler<'a> {
    pub fn new(catalog: &'a CounterCatalog, config: &'a Config) -> Self {
        Self { catalog, config }
    }

    pub fn metadata(&self) -> MetadataTable {
        self.catalog
            .iter()
            .map(|spec| {
                (
                    spec.derived_key.clone(),
                    spec.metadata(self.config.fine_step_secs),
                )
            })
            .collect()
    }

    pub fn assemble(&self, target_id: &str, points: PointTable) -> CaptureOutput {
        CaptureOutput {
            counters_by_target: HashMap::from([(target_id.to_string(), self.metadata())]),
            values_by_target: HashMap::from([(target_id.to_string(), points)]),
        }
    }
}
