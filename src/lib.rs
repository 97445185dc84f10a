pub mod assemble;
pub mod capture;
pub mod catalog;
pub mod config;
pub mod fetch;
pub mod metric;
pub mod recorded;
pub mod resample;

pub use assemble::CaptureOutput;
pub use capture::{CaptureError, Collector, Target};
pub use catalog::{Aggregation, CounterCatalog, DerivedMetricSpec};
pub use config::Config;
pub use fetch::MonitoringApi;
pub use metric::{Datapoint, PointTable, RawSample, ResampledPoint, TimeWindow};
