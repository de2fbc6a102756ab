use graphite_metrics::{Metrics, MetricsSet, PartialBatchError, Query};
use graphite_server::{CarbonListener, ListenerError, RenderListener};

use crate::Store;

/// Discards everything it receives and answers every query without series.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyStore;

impl CarbonListener for EmptyStore {
    fn metrics_received(&self, metrics: &MetricsSet, _error: Option<&PartialBatchError>) {
        graphite_log::trace!("discarding {} series", metrics.len());
    }
}

impl RenderListener for EmptyStore {
    fn find_metrics(&self, _query: &Query) -> Result<Vec<Metrics>, ListenerError> {
        Ok(Vec::new())
    }

    fn query_metrics(&self, _query: &Query) -> Result<Vec<Metrics>, ListenerError> {
        Ok(Vec::new())
    }
}

impl Store for EmptyStore {
    fn kind(&self) -> &'static str {
        "empty"
    }
}
