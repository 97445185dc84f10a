use crate::{
    assemble::{CaptureOutput, OutputAssembler},
    catalog::CounterCatalog,
    config::{Config, ConfigError},
    fetch::{FetchError, MetricsFetcher, MonitoringApi},
    metric::TimeWindow,
    resample::IntervalResampler,
};
use chrono::{DateTime, Utc};
use log::info;
use thiserror::Error;

/// A monitored resource as seen by the monitoring API.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub id: String,
    // Monitoring endpoint (e.g. region) the target is bound to, if any.
    pub endpoint: Option<String>,
}

impl Target {
    pub fn new(id: &str, endpoint: &str) -> Self {
        Self {
            id: id.to_string(),
            endpoint: Some(endpoint.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("target {0} has no monitoring endpoint")]
    Configuration(String),
    #[error("error validating config")]
    InvalidConfig(#[from] ConfigError),
    // `start` is `None` when the default lookback reaches past the earliest
    // representable instant.
    #[error("capture window from {} to {end} is not valid", window_start(.start))]
    InvalidWindow {
        start: Option<DateTime<Utc>>,
        end: DateTime<Utc>,
    },
    #[error("error talking to the monitoring api")]
    Transport(#[from] FetchError),
}

/// Runs one capture: list, fetch, resample, assemble. Holds no state between
/// captures.
pub struct Collector<'a, A> {
    api: &'a A,
    catalog: CounterCatalog,
    config: Config,
}

impl<'a, A: MonitoringApi + Sync> Collector<'a, A> {
    pub fn new(api: &'a A, catalog: CounterCatalog, config: Config) -> Result<Self, CaptureError> {
        config.validate()?;
        Ok(Self {
            api,
            catalog,
            config,
        })
    }

    pub fn capture(
        &self,
        target: &Target,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<CaptureOutput, CaptureError> {
        self.capture_at(target, start, end, Utc::now())
    }

    /// Like `capture`, with `now` standing in for the current time when the
    /// window bounds are defaulted.
    pub fn capture_at(
        &self,
        target: &Target,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<CaptureOutput, CaptureError> {
        let endpoint = target
            .endpoint
            .as_deref()
            .ok_or_else(|| CaptureError::Configuration(target.id.clone()))?;

        let end = end.unwrap_or(now);
        let start = start.or_else(|| end.checked_sub_signed(self.config.default_lookback()));
        let window = start
            .and_then(|start| TimeWindow::new(start, end))
            .ok_or(CaptureError::InvalidWindow { start, end })?;
        info!(
            "capturing {} via {} from {} to {}",
            target.id,
            endpoint,
            window.start(),
            window.end()
        );

        let fetcher = MetricsFetcher::new(self.api, &self.config);
        let counters = fetcher.list_available_counters(&target.id, &self.catalog.all_raw_names())?;
        let series = fetcher.fetch_series(&target.id, &counters, window)?;

        let points = IntervalResampler::new(&self.catalog, &self.config).resample(&series);
        info!("captured {} points for {}", points.len(), target.id);

        Ok(OutputAssembler::new(&self.catalog, &self.config).assemble(&target.id, points))
    }
}

fn window_start(start: &Option<DateTime<Utc>>) -> String {
    match start {
        Some(start) => start.to_string(),
        None => "before the earliest representable instant".to_string(),
    }
}
