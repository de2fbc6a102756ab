//! Common facilities of the render endpoints.

use std::error::Error;
use std::sync::Arc;

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use graphite_metrics::{Metrics, ParseQueryError, Query, QueryFormat};
use graphite_statsd::metric;

use crate::listener::{ListenerError, RenderListener};
use crate::render::RenderState;
use crate::render::endpoints::statics;
use crate::statsd::ServerTimers;

/// A render request that cannot be answered.
#[derive(Debug, thiserror::Error)]
pub enum BadRenderRequest {
    #[error("invalid query parameters")]
    InvalidQuery(#[from] ParseQueryError),

    #[error("no render listener registered")]
    MissingListener,

    #[error("render listener failed")]
    ListenerFailed(#[source] ListenerError),

    #[error("unsupported format {0:?}")]
    UnsupportedFormat(Option<QueryFormat>),

    #[error("failed to serialize response")]
    Serialize(#[from] serde_json::Error),
}

impl BadRenderRequest {
    fn status(&self) -> StatusCode {
        match self {
            Self::MissingListener | Self::Serialize(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidQuery(_) | Self::ListenerFailed(_) | Self::UnsupportedFormat(_) => {
                StatusCode::BAD_REQUEST
            }
        }
    }
}

impl IntoResponse for BadRenderRequest {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            graphite_log::error!(
                error = &self as &dyn Error,
                "failed to handle render request"
            );
        } else {
            graphite_log::debug!(error = &self as &dyn Error, "bad render request");
        }

        statics::status_response(status)
    }
}

/// Which listener callback to invoke.
#[derive(Clone, Copy, Debug)]
pub enum Lookup<'a> {
    Find(&'a Query),
    Query(&'a Query),
    Index,
}

/// Resolves a lookup through the registered render listener.
pub fn lookup(state: &RenderState, lookup: Lookup<'_>) -> Result<Vec<Metrics>, BadRenderRequest> {
    let listener: Arc<dyn RenderListener> = state
        .render_listener()
        .ok_or(BadRenderRequest::MissingListener)?;

    let result = match lookup {
        Lookup::Find(query) => metric!(timer(ServerTimers::ListenerCallback), listener = "find", {
            listener.find_metrics(query)
        }),
        Lookup::Query(query) => {
            metric!(timer(ServerTimers::ListenerCallback), listener = "query", {
                listener.query_metrics(query)
            })
        }
        Lookup::Index => metric!(timer(ServerTimers::ListenerCallback), listener = "index", {
            listener.index_metrics()
        }),
    };

    result.map_err(BadRenderRequest::ListenerFailed)
}

/// Builds a successful response with the content type of `format`.
pub fn content(format: QueryFormat, body: String) -> Response {
    ([(header::CONTENT_TYPE, format.content_type())], body).into_response()
}
