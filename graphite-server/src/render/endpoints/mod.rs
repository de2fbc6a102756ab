//! Web server endpoints.
//!
//! This module contains the find, index and render endpoints of the Render API. Requests to other
//! paths, including `/metrics/expand`, are dispatched to the registered
//! [`HttpRequestListener`](crate::HttpRequestListener)s.

use axum::Router;
use axum::routing::any;
use graphite_metrics::RENDER_PATH;

use crate::render::RenderState;

mod common;
mod extra;
mod find;
mod index;
mod render;
mod statics;

/// Path of the find endpoint.
pub const FIND_PATH: &str = "/metrics/find";
/// Path of the index endpoint.
pub const INDEX_PATH: &str = "/metrics/index.json";

pub(crate) fn routes(state: RenderState) -> Router {
    Router::new()
        .route(FIND_PATH, any(find::handle))
        .route(INDEX_PATH, any(index::handle))
        .route(RENDER_PATH, any(render::handle))
        .fallback(extra::handle)
        .with_state(state)
}
