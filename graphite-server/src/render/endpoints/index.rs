use axum::extract::State;
use axum::response::Response;
use graphite_metrics::{Metrics, QueryFormat};

use crate::render::RenderState;
use crate::render::endpoints::common::{self, BadRenderRequest, Lookup};

/// Lists the full names of all known metrics as JSON array.
pub async fn handle(State(state): State<RenderState>) -> Result<Response, BadRenderRequest> {
    let metrics = common::lookup(&state, Lookup::Index)?;

    let names: Vec<&str> = metrics.iter().map(Metrics::name).collect();
    Ok(common::content(
        QueryFormat::Json,
        serde_json::to_string(&names)?,
    ))
}
