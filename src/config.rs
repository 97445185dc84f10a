use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Longest duration any setting may express. Keeps every derived
// `Duration` and window bound well inside what chrono can represent.
pub const MAX_DURATION_SECS: i64 = 10 * 366 * 24 * 60 * 60;
// Most statistics queries a single fetch keeps in flight.
pub const MAX_FETCH_WORKERS: i64 = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Step of the timestamp grid every derived point is expressed on.
    pub fine_step_secs: i64,
    // The two spacings the monitoring API reports raw datapoints at.
    // Only these exact gaps are trusted.
    pub fine_cadence_secs: i64,
    pub coarse_cadence_secs: i64,
    // Period requested from the statistics query.
    pub statistic_period_secs: i64,
    // Longest sub-window a single statistics query may cover.
    pub chunk_secs: i64,
    // How far the requested start is moved back before fetching, so that the
    // first real interval has a predecessor to be measured against.
    pub lead_in_secs: i64,
    // Window length used when the caller gives no start time.
    pub default_lookback_secs: i64,
    // Upper bound on datapoints the monitoring API returns per query.
    pub max_datapoints_per_query: i64,
    // Statistics queries issued concurrently by one fetch.
    pub fetch_workers: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fine_step_secs: 20,
            fine_cadence_secs: 60,
            coarse_cadence_secs: 300,
            statistic_period_secs: 60,
            chunk_secs: 24 * 60 * 60,
            lead_in_secs: 5 * 60,
            default_lookback_secs: 4 * 60 * 60,
            max_datapoints_per_query: 1440,
            fetch_workers: 8,
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
    #[error("{name} must not exceed {limit}")]
    TooLarge { name: &'static str, limit: i64 },
    #[error("lead_in_secs must not be negative")]
    NegativeLeadIn,
    #[error("cadence of {cadence}s is not a multiple of the {step}s fine step")]
    CadenceNotOnGrid { cadence: i64, step: i64 },
    #[error("fine cadence must be shorter than coarse cadence")]
    CadenceOrder,
    #[error("a {chunk}s sub-window may return {datapoints} datapoints, limit is {limit}")]
    ChunkTooLarge {
        chunk: i64,
        datapoints: i64,
        limit: i64,
    },
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("fine_step_secs", self.fine_step_secs),
            ("fine_cadence_secs", self.fine_cadence_secs),
            ("coarse_cadence_secs", self.coarse_cadence_secs),
            ("statistic_period_secs", self.statistic_period_secs),
            ("chunk_secs", self.chunk_secs),
            ("default_lookback_secs", self.default_lookback_secs),
            ("max_datapoints_per_query", self.max_datapoints_per_query),
            ("fetch_workers", self.fetch_workers),
        ] {
            if value <= 0 {
                return Err(ConfigError::NotPositive(name));
            }
        }
        if self.lead_in_secs < 0 {
            return Err(ConfigError::NegativeLeadIn);
        }
        for (name, value) in [
            ("fine_step_secs", self.fine_step_secs),
            ("fine_cadence_secs", self.fine_cadence_secs),
            ("coarse_cadence_secs", self.coarse_cadence_secs),
            ("statistic_period_secs", self.statistic_period_secs),
            ("chunk_secs", self.chunk_secs),
            ("lead_in_secs", self.lead_in_secs),
            ("default_lookback_secs", self.default_lookback_secs),
        ] {
            if value > MAX_DURATION_SECS {
                return Err(ConfigError::TooLarge {
                    name,
                    limit: MAX_DURATION_SECS,
                });
            }
        }
        if self.fetch_workers > MAX_FETCH_WORKERS {
            return Err(ConfigError::TooLarge {
                name: "fetch_workers",
                limit: MAX_FETCH_WORKERS,
            });
        }
        for cadence in self.cadences() {
            if cadence % self.fine_step_secs != 0 {
                return Err(ConfigError::CadenceNotOnGrid {
                    cadence,
                    step: self.fine_step_secs,
                });
            }
        }
        if self.fine_cadence_secs >= self.coarse_cadence_secs {
            return Err(ConfigError::CadenceOrder);
        }
        let datapoints = self.chunk_secs / self.statistic_period_secs;
        if datapoints > self.max_datapoints_per_query {
            return Err(ConfigError::ChunkTooLarge {
                chunk: self.chunk_secs,
                datapoints,
                limit: self.max_datapoints_per_query,
            });
        }
        Ok(())
    }

    pub fn cadences(&self) -> [i64; 2] {
        [self.fine_cadence_secs, self.coarse_cadence_secs]
    }

    /// True only when `gap` is exactly one of the cadences, to the nanosecond.
    pub fn is_known_cadence(&self, gap: Duration) -> bool {
        self.cadences()
            .iter()
            .any(|cadence| gap == Duration::seconds(*cadence))
    }

    pub fn fine_step(&self) -> Duration {
        Duration::seconds(self.fine_step_secs)
    }

    pub fn chunk(&self) -> Duration {
        Duration::seconds(self.chunk_secs)
    }

    pub fn lead_in(&self) -> Duration {
        Duration::seconds(self.lead_in_secs)
    }

    pub fn default_lookback(&self) -> Duration {
        Duration::seconds(self.default_lookback_secs)
    }
}
