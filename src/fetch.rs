use crate::{
    config::Config,
    metric::{Datapoint, RawSeries, SeriesMap, TimeWindow},
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, warn};
use std::{
    collections::BTreeSet,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statistic {
    Average,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsQuery<'a> {
    pub target_id: &'a str,
    pub metric_name: &'a str,
    pub period_secs: i64,
    pub statistic: Statistic,
    pub window: TimeWindow,
}

/// Client side of the cloud monitoring API. Implementations own the
/// authenticated connection and the transport.
pub trait MonitoringApi {
    /// Names of the raw metrics the API reports for `target_id`.
    fn list_metrics(&self, target_id: &str) -> anyhow::Result<Vec<String>>;
    /// Datapoints for one metric within `query.window`, in any order.
    fn get_metric_statistics(&self, query: &StatisticsQuery) -> anyhow::Result<Vec<Datapoint>>;
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("failed to list metrics for {target}")]
    ListMetrics {
        target: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to fetch statistics for {metric}")]
    Transport {
        metric: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("widening the window starting at {start} leaves the representable range")]
    WindowOutOfRange { start: DateTime<Utc> },
    #[error("fetch worker panicked")]
    WorkerPanicked,
}

pub struct MetricsFetcher<'a, A> {
    api: &'a A,
    config: &'a Config,
}

impl<'a, A: MonitoringApi + Sync> MetricsFetcher<'a, A> {
    pub fn new(api: &'a A, config: &'a Config) -> Self {
        Self { api, config }
    }

    /// Catalog names the target actually reports.
    pub fn list_available_counters(
        &self,
        target_id: &str,
        catalog_names: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, FetchError> {
        let listed: BTreeSet<String> = self
            .api
            .list_metrics(target_id)
            .map_err(|source| FetchError::ListMetrics {
                target: target_id.to_string(),
                source,
            })?
            .into_iter()
            .collect();
        for missing in catalog_names.difference(&listed) {
            warn!("target {} does not report {}", target_id, missing);
        }
        Ok(catalog_names.intersection(&listed).cloned().collect())
    }

    /// Fetches every counter over `window` widened by the configured lead-in.
    ///
    /// The widened window is split into sub-windows no longer than the
    /// configured chunk. Every (counter, sub-window) pair becomes one query,
    /// and at most `fetch_workers` queries are in flight at once. After the
    /// first failure no new queries are started. Everything accumulated so far
    /// is dropped, and the failure of the earliest query (in counter, then
    /// sub-window order) is returned.
    pub fn fetch_series(
        &self,
        target_id: &str,
        counters: &BTreeSet<String>,
        window: TimeWindow,
    ) -> Result<SeriesMap, FetchError> {
        let widened = window
            .widen(self.config.lead_in())
            .ok_or(FetchError::WindowOutOfRange {
                start: window.start(),
            })?;
        let chunks = widened.chunks(self.config.chunk());
        let jobs: Vec<(&String, &TimeWindow)> = counters
            .iter()
            .flat_map(|counter| chunks.iter().map(move |chunk| (counter, chunk)))
            .collect();
        let accumulated: DashMap<String, RawSeries> = counters
            .iter()
            .map(|counter| (counter.clone(), RawSeries::new()))
            .collect();

        let workers = usize::try_from(self.config.fetch_workers)
            .unwrap_or(1)
            .clamp(1, jobs.len().max(1));
        let next_job = AtomicUsize::new(0);
        let failed = AtomicBool::new(false);

        let failures = std::thread::scope(|s| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    s.spawn(|| {
                        self.drain_jobs(target_id, &jobs, &next_job, &failed, &accumulated)
                    })
                })
                .collect();

            let mut failures = vec![];
            for handle in handles {
                match handle.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(failure)) => failures.push(failure),
                    Err(_) => failures.push((usize::MAX, FetchError::WorkerPanicked)),
                }
            }
            failures
        });

        if let Some((_, err)) = failures.into_iter().min_by_key(|(job, _)| *job) {
            return Err(err);
        }
        Ok(accumulated.into_iter().collect())
    }

    // Runs queued jobs until the queue is empty or some worker has failed.
    // A failure is reported with the index of the job that caused it.
    fn drain_jobs(
        &self,
        target_id: &str,
        jobs: &[(&String, &TimeWindow)],
        next_job: &AtomicUsize,
        failed: &AtomicBool,
        accumulated: &DashMap<String, RawSeries>,
    ) -> Result<(), (usize, FetchError)> {
        while !failed.load(Ordering::SeqCst) {
            let job = next_job.fetch_add(1, Ordering::SeqCst);
            let (counter, chunk) = match jobs.get(job) {
                Some(job) => *job,
                None => break,
            };
            if let Err(e) = self.fetch_chunk(target_id, counter, chunk, accumulated) {
                failed.store(true, Ordering::SeqCst);
                return Err((job, e));
            }
        }
        Ok(())
    }

    fn fetch_chunk(
        &self,
        target_id: &str,
        metric: &str,
        chunk: &TimeWindow,
        accumulated: &DashMap<String, RawSeries>,
    ) -> Result<(), FetchError> {
        let query = StatisticsQuery {
            target_id,
            metric_name: metric,
            period_secs: self.config.statistic_period_secs,
            statistic: Statistic::Average,
            window: *chunk,
        };
        let datapoints =
            self.api
                .get_metric_statistics(&query)
                .map_err(|source| FetchError::Transport {
                    metric: metric.to_string(),
                    source,
                })?;
        debug!(
            "fetched {} datapoints of {} for {} in [{}, {})",
            datapoints.len(),
            metric,
            target_id,
            chunk.start(),
            chunk.end()
        );

        let mut series = accumulated.entry(metric.to_string()).or_default();
        for datapoint in datapoints {
            series.insert(datapoint.timestamp, datapoint.average);
        }
        Ok(())
    }
}
