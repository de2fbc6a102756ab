use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::Request;
use axum::response::Response;
use graphite_metrics::{Metrics, MetricsSet, PartialBatchError, Query};
use parking_lot::RwLock;

/// The error type returned by render listeners.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Receives the series ingested by the Carbon engine.
pub trait CarbonListener: Send + Sync {
    /// Called once per parsed feed, on the connection that received it.
    ///
    /// `error` is set if some lines of the feed were rejected. The lines that did parse are still
    /// contained in `metrics`.
    fn metrics_received(&self, metrics: &MetricsSet, error: Option<&PartialBatchError>);
}

/// Resolves the find and render requests of the Render engine.
pub trait RenderListener: Send + Sync {
    /// Returns the series whose names match `query.target`. Data points are not needed.
    fn find_metrics(&self, query: &Query) -> Result<Vec<Metrics>, ListenerError>;

    /// Returns the series matching `query.target` with their data points between `query.from`
    /// and `query.until`.
    fn query_metrics(&self, query: &Query) -> Result<Vec<Metrics>, ListenerError>;

    /// Returns every known series by its full name. Data points are not needed.
    ///
    /// Defaults to [`find_metrics`](Self::find_metrics) with the `*` target.
    fn index_metrics(&self) -> Result<Vec<Metrics>, ListenerError> {
        self.find_metrics(&Query::with_target("*"))
    }
}

/// Handles requests to an additional path of the Render engine.
#[async_trait::async_trait]
pub trait HttpRequestListener: Send + Sync {
    /// Produces the response to `request`.
    async fn handle(&self, request: Request) -> Response;
}

/// A listener registration that can be replaced while the engine is running.
pub(crate) struct ListenerSlot<T: ?Sized>(Arc<RwLock<Option<Arc<T>>>>);

impl<T: ?Sized> ListenerSlot<T> {
    pub fn set(&self, listener: Arc<T>) {
        *self.0.write() = Some(listener);
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.0.read().clone()
    }
}

impl<T: ?Sized> Clone for ListenerSlot<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: ?Sized> Default for ListenerSlot<T> {
    fn default() -> Self {
        Self(Arc::new(RwLock::new(None)))
    }
}

/// Additional request listeners keyed by their exact path.
pub(crate) type HttpRequestListeners = BTreeMap<String, Arc<dyn HttpRequestListener>>;
