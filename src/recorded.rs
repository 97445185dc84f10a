use crate::{
    fetch::{MonitoringApi, StatisticsQuery},
    metric::{Datapoint, RawSample},
};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Recording {
    pub metrics: Vec<String>,
    pub samples: Vec<RawSample>,
}

/// A monitoring API that replays a recording instead of talking to the
/// network. Queries returning more than `max_datapoints` samples fail the
/// same way the real API rejects oversized requests.
pub struct RecordedApi {
    recording: Recording,
    max_datapoints: usize,
}

impl RecordedApi {
    pub fn new(recording: Recording, max_datapoints: usize) -> Self {
        Self {
            recording,
            max_datapoints,
        }
    }

    pub fn open(path: &Path, max_datapoints: usize) -> Result<Self> {
        let file = File::open(path)?;
        let recording: Recording = serde_json::from_reader(BufReader::new(file))?;
        Ok(Self::new(recording, max_datapoints))
    }
}

impl MonitoringApi for RecordedApi {
    fn list_metrics(&self, _target_id: &str) -> Result<Vec<String>> {
        Ok(self.recording.metrics.clone())
    }

    fn get_metric_statistics(&self, query: &StatisticsQuery) -> Result<Vec<Datapoint>> {
        let datapoints: Vec<Datapoint> = self
            .recording
            .samples
            .iter()
            .filter(|s| s.metric == query.metric_name && query.window.contains(s.timestamp))
            .map(RawSample::datapoint)
            .collect();
        if datapoints.len() > self.max_datapoints {
            bail!(
                "query for {} would return {} datapoints, limit is {}",
                query.metric_name,
                datapoints.len(),
                self.max_datapoints
            );
        }
        Ok(datapoints)
    }
}
