//! Time-series retrieval for `/render`.

use axum::extract::{RawQuery, State};
use axum::response::Response;
use graphite_metrics::{Query, QueryFormat};

use crate::render::endpoints::common::{self, BadRenderRequest, Lookup};
use crate::render::{RenderState, format};

pub async fn handle(
    State(state): State<RenderState>,
    RawQuery(params): RawQuery,
) -> Result<Response, BadRenderRequest> {
    let query = Query::from_render_params(params.as_deref().unwrap_or_default())?;
    let mut metrics = common::lookup(&state, Lookup::Query(&query))?;

    let (format, body) = match query.format {
        Some(QueryFormat::Raw) => (QueryFormat::Raw, format::raw(&mut metrics)),
        Some(QueryFormat::Csv) => (QueryFormat::Csv, format::csv(&metrics)),
        Some(QueryFormat::Json) => (QueryFormat::Json, format::json(&metrics)?),
        other => return Err(BadRenderRequest::UnsupportedFormat(other)),
    };

    Ok(common::content(format, body))
}
