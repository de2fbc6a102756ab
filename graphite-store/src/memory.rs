use std::time::Duration;

use graphite_metrics::{DataPoint, Metrics, MetricsSet, PartialBatchError, Query};
use graphite_server::{CarbonListener, ListenerError, RenderListener};
use graphite_statsd::metric;
use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;

use crate::pattern::TargetPattern;
use crate::statsd::{StoreCounters, StoreGauges};
use crate::{Store, StoreConfig};

/// Keeps recent data points of every series in memory.
///
/// Finding a target returns the names cut to the number of segments in the target, so
/// `servers.*` lists `servers.web` for a stored `servers.web.cpu`.
///
/// Timestamps are aligned down to the retention interval, so each interval holds at most one data
/// point per series and later writes replace earlier ones. After every write, data points older
/// than the retention period (measured from the newest data point of the series) are dropped.
#[derive(Debug)]
pub struct MemoryStore {
    config: StoreConfig,
    series: RwLock<IndexMap<String, Vec<DataPoint>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            series: RwLock::new(IndexMap::new()),
        }
    }

    /// Returns the number of series.
    pub fn len(&self) -> usize {
        self.series.read().len()
    }

    /// Returns `true` if no series has been stored.
    pub fn is_empty(&self) -> bool {
        self.series.read().is_empty()
    }

    fn matching<T>(
        &self,
        query: &Query,
        mut f: impl FnMut(&str, &[DataPoint]) -> T,
    ) -> Result<Vec<T>, ListenerError> {
        let pattern = TargetPattern::new(&query.target)?;
        let series = self.series.read();

        Ok(series
            .iter()
            .filter(|(name, _)| pattern.is_match(name))
            .map(|(name, points)| f(name, points))
            .collect())
    }
}

/// Returns the first `depth` segments of `name`, or `None` if the name is shorter.
fn prefix(name: &str, depth: usize) -> Option<&str> {
    match name.match_indices('.').nth(depth.checked_sub(1)?) {
        Some((end, _)) => Some(&name[..end]),
        None if name.split('.').count() == depth => Some(name),
        None => None,
    }
}

/// Writes `data_point` into the sorted `points`, replacing a data point with the same timestamp.
fn store(points: &mut Vec<DataPoint>, data_point: DataPoint) {
    match points.binary_search_by_key(&data_point.timestamp(), DataPoint::timestamp) {
        Ok(index) => points[index] = data_point,
        Err(index) => points.insert(index, data_point),
    }
}

/// Drops data points older than `period` before the newest one. Returns the number dropped.
fn vacuum(points: &mut Vec<DataPoint>, period: Duration) -> usize {
    if period.is_zero() {
        return 0;
    }

    let Some(newest) = points.last() else {
        return 0;
    };

    let oldest = newest.timestamp().saturating_sub(period);
    let expired = points.partition_point(|point| point.timestamp() < oldest);
    points.drain(..expired);
    expired
}

impl CarbonListener for MemoryStore {
    fn metrics_received(&self, metrics: &MetricsSet, _error: Option<&PartialBatchError>) {
        let mut stored: i64 = 0;
        let mut vacuumed: i64 = 0;

        let mut series = self.series.write();
        for metrics in metrics.iter() {
            let points = series.entry(metrics.name().to_owned()).or_default();

            for data_point in metrics.data_points() {
                let timestamp = data_point
                    .timestamp()
                    .align_down(self.config.retention_interval);
                store(points, DataPoint::new(data_point.value(), timestamp));
                stored += 1;
            }

            vacuumed += vacuum(points, self.config.retention_period) as i64;
        }
        let series_count = series.len();
        drop(series);

        metric!(counter(StoreCounters::DataPointsStored) += stored);
        metric!(counter(StoreCounters::DataPointsVacuumed) += vacuumed);
        metric!(gauge(StoreGauges::Series) = series_count as u64);
    }
}

impl RenderListener for MemoryStore {
    fn find_metrics(&self, query: &Query) -> Result<Vec<Metrics>, ListenerError> {
        let pattern = TargetPattern::new(&query.target)?;
        let depth = query.target.split('.').count();

        let series = self.series.read();
        let mut found = IndexSet::new();
        for name in series.keys() {
            if let Some(prefix) = prefix(name, depth)
                && pattern.is_match(prefix)
            {
                found.insert(prefix);
            }
        }

        Ok(found.into_iter().map(Metrics::new).collect())
    }

    fn query_metrics(&self, query: &Query) -> Result<Vec<Metrics>, ListenerError> {
        self.matching(query, |name, points| {
            let points = points
                .iter()
                .filter(|point| query.contains(point.timestamp()))
                .copied()
                .collect();

            Metrics::with_data_points(name, points)
        })
    }

    fn index_metrics(&self) -> Result<Vec<Metrics>, ListenerError> {
        Ok(self.series.read().keys().map(Metrics::new).collect())
    }
}

impl Store for MemoryStore {
    fn kind(&self) -> &'static str {
        "memory"
    }
}
