use crate::{
    catalog::{CounterCatalog, DerivedMetricSpec},
    config::Config,
    metric::{iso8601, PointTable, ResampledPoint, SeriesMap},
};
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::BTreeSet;

/// Turns raw series into derived values on the fine timestamp grid.
///
/// The monitoring API reports at one of two cadences without saying which,
/// so the cadence of every interval is inferred from the spacing of its
/// bounding timestamps. Only intervals whose length is exactly one of the
/// known cadences are trusted. Everything else, including the interval ending
/// at the very first timestamp, which has no predecessor, produces nothing.
pub struct IntervalResampler<'a> {
    catalog: &'a CounterCatalog,
    config: &'a Config,
}

impl<'a> IntervalResampler<'a> {
    pub fn new(catalog: &'a CounterCatalog, config: &'a Config) -> Self {
        Self { catalog, config }
    }

    pub fn resample(&self, series: &SeriesMap) -> PointTable {
        let mut points = PointTable::new();
        for spec in self.catalog.iter() {
            self.resample_spec(spec, series, &mut points);
        }
        points
    }

    fn resample_spec(
        &self,
        spec: &DerivedMetricSpec,
        series: &SeriesMap,
        points: &mut PointTable,
    ) {
        let timestamps: BTreeSet<DateTime<Utc>> = spec
            .sources
            .iter()
            .filter_map(|source| series.get(source))
            .flat_map(|s| s.keys().copied())
            .collect();

        let mut emitted = 0;
        let mut skipped = 0;
        for (prev, cur) in timestamps.iter().zip(timestamps.iter().skip(1)) {
            // Compared at full precision: 300.9s is not the 300s cadence.
            let gap = *cur - *prev;
            if !self.config.is_known_cadence(gap) {
                skipped += 1;
                continue;
            }
            let gap_secs = gap.num_seconds();

            let values = present_values(spec, series, *cur);
            let value = match self
                .catalog
                .compute_for(&spec.derived_key, &values, gap_secs)
            {
                Some(value) => value,
                // Only reached when no source has a value at `cur`. `cur`
                // comes from the union of this spec's own source timestamps,
                // so at least one source is always present here.
                None => continue,
            };

            let mut tick = prev.checked_add_signed(self.config.fine_step());
            while let Some(at) = tick.filter(|at| at <= cur) {
                points.insert(ResampledPoint {
                    timestamp: iso8601(at),
                    derived_key: spec.derived_key.clone(),
                    value,
                });
                emitted += 1;
                tick = at.checked_add_signed(self.config.fine_step());
            }
        }
        debug!(
            "{}: {} points from {} timestamps, {} intervals skipped",
            spec.derived_key,
            emitted,
            timestamps.len(),
            skipped
        );
    }
}

// Source values recorded exactly at `timestamp`. Missing sources are left out.
fn present_values(
    spec: &DerivedMetricSpec,
    series: &SeriesMap,
    timestamp: DateTime<Utc>,
) -> Vec<f64> {
    spec.sources
        .iter()
        .filter_map(|source| series.get(source)?.get(&timestamp).copied())
        .collect()
}

#[cfg(test)]
pub mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use crate::{
        catalog::{Aggregation, CounterCatalog, DerivedMetricSpec},
        config::Config,
        metric::{iso8601, RawSeries, SeriesMap},
    };

    use super::IntervalResampler;

    fn at(minutes: i64, seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
            + Duration::minutes(minutes)
            + Duration::seconds(seconds)
    }

    fn series(entries: &[(&str, &[(DateTime<Utc>, f64)])]) -> SeriesMap {
        entries
            .iter()
            .map(|(name, points)| (name.to_string(), points.iter().copied().collect::<RawSeries>()))
            .collect()
    }

    fn sum_catalog() -> CounterCatalog {
        CounterCatalog::new(vec![DerivedMetricSpec::new(
            "net",
            &["In", "Out"],
            Aggregation::ScaledSumRate,
        )])
        .unwrap()
    }

    fn mean_catalog() -> CounterCatalog {
        CounterCatalog::new(vec![DerivedMetricSpec::new(
            "cpu",
            &["A", "B"],
            Aggregation::Mean,
        )])
        .unwrap()
    }

    #[test]
    fn test_coarse_interval_step_hold() {
        let catalog = CounterCatalog::new(vec![DerivedMetricSpec::new(
            "net",
            &["In"],
            Aggregation::ScaledSumRate,
        )])
        .unwrap();
        let config = Config::default();
        let raw = series(&[("In", &[(at(0, 0), 999.0), (at(5, 0), 300.0)])]);

        let points = IntervalResampler::new(&catalog, &config).resample(&raw);

        let expected = 300.0 / 1024.0 / 300.0;
        assert_eq!(points.len(), 15);
        let timestamps: Vec<String> = points.timestamps().cloned().collect();
        let expected_timestamps: Vec<String> =
            (1..=15).map(|i| iso8601(at(0, 20 * i))).collect();
        assert_eq!(timestamps, expected_timestamps);
        assert_eq!(timestamps[0], "2024-01-01T00:00:20Z");
        assert_eq!(timestamps[14], "2024-01-01T00:05:00Z");
        assert!(points.iter().all(|p| p.derived_key == "net" && p.value == expected));
        // The first sample only anchors the interval.
        assert_eq!(points.row("2024-01-01T00:00:00Z"), None);
    }

    #[test]
    fn test_fine_interval() {
        let catalog = sum_catalog();
        let config = Config::default();
        let raw = series(&[
            ("In", &[(at(0, 0), 1.0), (at(1, 0), 1024.0), (at(2, 0), 2048.0)]),
            ("Out", &[(at(0, 0), 1.0), (at(1, 0), 1024.0), (at(2, 0), 0.0)]),
        ]);

        let points = IntervalResampler::new(&catalog, &config).resample(&raw);

        assert_eq!(points.len(), 6);
        for s in [20, 40, 60] {
            assert_eq!(points.get(&iso8601(at(0, s)), "net"), Some(2048.0 / 1024.0 / 60.0));
        }
        for s in [80, 100, 120] {
            assert_eq!(points.get(&iso8601(at(0, s)), "net"), Some(2048.0 / 1024.0 / 60.0));
        }
    }

    #[test]
    fn test_first_pair_is_sacrificial() {
        let catalog = sum_catalog();
        let config = Config::default();
        // A lone leading sample followed by a normal one: only one interval,
        // and its value comes from the second sample, never the first.
        let raw = series(&[("In", &[(at(0, 0), 5_000_000.0), (at(1, 0), 0.0)])]);
        let points = IntervalResampler::new(&catalog, &config).resample(&raw);
        assert_eq!(points.len(), 3);
        assert!(points.iter().all(|p| p.value == 0.0));

        let single = series(&[("In", &[(at(0, 0), 10.0)])]);
        assert!(IntervalResampler::new(&catalog, &config)
            .resample(&single)
            .is_empty());
    }

    #[test]
    fn test_unknown_gaps_are_skipped() {
        let catalog = sum_catalog();
        let config = Config::default();
        // Gaps: 120s (skip), 60s (keep), 600s (skip), 300s (keep).
        let raw = series(&[(
            "In",
            &[
                (at(0, 0), 1.0),
                (at(2, 0), 2.0),
                (at(3, 0), 3.0),
                (at(13, 0), 4.0),
                (at(18, 0), 5.0),
            ],
        )]);
        let points = IntervalResampler::new(&catalog, &config).resample(&raw);
        assert_eq!(points.len(), 3 + 15);
        assert_eq!(points.get(&iso8601(at(2, 0)), "net"), None);
        assert_eq!(points.get(&iso8601(at(2, 20)), "net"), Some(3.0 / 1024.0 / 60.0));
        assert_eq!(points.get(&iso8601(at(3, 20)), "net"), None);
        assert_eq!(points.get(&iso8601(at(13, 0)), "net"), None);
        assert_eq!(points.get(&iso8601(at(13, 20)), "net"), Some(5.0 / 1024.0 / 300.0));
    }

    // Gaps are matched exactly with no allowance for clock jitter: one second
    // past a known cadence is discarded like any other irregular gap.
    #[test]
    fn test_cadence_plus_one_second_is_skipped() {
        let catalog = sum_catalog();
        let config = Config::default();
        let coarse = series(&[("In", &[(at(0, 0), 1.0), (at(5, 1), 2.0)])]);
        assert!(IntervalResampler::new(&catalog, &config)
            .resample(&coarse)
            .is_empty());
        let fine = series(&[("In", &[(at(0, 0), 1.0), (at(1, 1), 2.0)])]);
        assert!(IntervalResampler::new(&catalog, &config)
            .resample(&fine)
            .is_empty());
    }

    // 300.9s truncates to 300 whole seconds but is still not the coarse cadence.
    #[test]
    fn test_sub_second_gap_excess_is_skipped() {
        let catalog = sum_catalog();
        let config = Config::default();
        let raw = series(&[(
            "In",
            &[(at(0, 0), 1.0), (at(5, 0) + Duration::milliseconds(900), 2.0)],
        )]);
        assert!(IntervalResampler::new(&catalog, &config)
            .resample(&raw)
            .is_empty());

        let exact = series(&[("In", &[(at(0, 0), 1.0), (at(5, 0), 2.0)])]);
        assert_eq!(
            IntervalResampler::new(&catalog, &config)
                .resample(&exact)
                .len(),
            15
        );
    }

    #[test]
    fn test_missing_source_contributes_nothing_to_sum() {
        let catalog = sum_catalog();
        let config = Config::default();
        let raw = series(&[
            ("In", &[(at(0, 0), 1.0), (at(1, 0), 10.0)]),
            ("Out", &[(at(0, 0), 1.0)]),
        ]);
        let points = IntervalResampler::new(&catalog, &config).resample(&raw);
        assert_eq!(points.len(), 3);
        assert!(points.iter().all(|p| p.value == 10.0 / 1024.0 / 60.0));
    }

    #[test]
    fn test_missing_source_excluded_from_mean() {
        let catalog = mean_catalog();
        let config = Config::default();
        let raw = series(&[
            ("A", &[(at(0, 0), 50.0), (at(1, 0), 40.0), (at(2, 0), 40.0)]),
            ("B", &[(at(0, 0), 50.0), (at(2, 0), 80.0)]),
        ]);
        let points = IntervalResampler::new(&catalog, &config).resample(&raw);
        assert_eq!(points.get(&iso8601(at(0, 60)), "cpu"), Some(40.0));
        assert_eq!(points.get(&iso8601(at(0, 120)), "cpu"), Some(60.0));
    }

    #[test]
    fn test_true_zero_sum_produces_points() {
        let catalog = CounterCatalog::new(vec![
            DerivedMetricSpec::new("net", &["In"], Aggregation::ScaledSumRate),
            DerivedMetricSpec::new("both", &["In", "Out"], Aggregation::ScaledSumRate),
        ])
        .unwrap();
        let config = Config::default();
        let raw = series(&[
            ("In", &[(at(0, 0), 1.0), (at(2, 0), 2.0)]),
            ("Out", &[(at(1, 0), 0.0)]),
        ]);
        let points = IntervalResampler::new(&catalog, &config).resample(&raw);
        // "net" only sees a 120s gap.
        assert!(points.iter().all(|p| p.derived_key == "both"));
        // "both" sees 00:00 -> 01:00 where only Out = 0 is present, and
        // 01:00 -> 02:00 where only In = 2 is present.
        assert_eq!(points.get(&iso8601(at(1, 0)), "both"), Some(0.0));
        assert_eq!(points.get(&iso8601(at(2, 0)), "both"), Some(2.0 / 1024.0 / 60.0));
        assert_eq!(points.len(), 6);
    }

    #[test]
    fn test_specs_without_series_yield_nothing() {
        let catalog = CounterCatalog::default();
        let config = Config::default();
        let raw = series(&[("CPUUtilization", &[(at(0, 0), 10.0), (at(5, 0), 20.0)])]);
        let points = IntervalResampler::new(&catalog, &config).resample(&raw);
        assert_eq!(points.len(), 15);
        assert!(points
            .iter()
            .all(|p| p.derived_key == "cpu_usage_rate_average" && p.value == 20.0));
    }

    #[test]
    fn test_resample_is_idempotent() {
        let catalog = CounterCatalog::default();
        let config = Config::default();
        let raw = series(&[
            ("CPUUtilization", &[(at(0, 0), 10.0), (at(5, 0), 20.0), (at(10, 0), 30.0)]),
            ("NetworkIn", &[(at(0, 0), 100.0), (at(1, 0), 200.0)]),
            ("NetworkOut", &[(at(1, 0), 300.0), (at(2, 0), 400.0)]),
        ]);
        let resampler = IntervalResampler::new(&catalog, &config);
        assert_eq!(resampler.resample(&raw), resampler.resample(&raw));
    }
}
