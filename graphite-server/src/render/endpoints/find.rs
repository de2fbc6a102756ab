//! Metric discovery for `/metrics/find`.

use axum::extract::{RawQuery, State};
use axum::response::Response;
use graphite_metrics::{Query, QueryFormat};
use serde::Serialize;

use crate::render::RenderState;
use crate::render::endpoints::common::{self, BadRenderRequest, Lookup};

#[derive(Serialize)]
struct FindResponse<'a> {
    metrics: Vec<FindEntry<'a>>,
}

#[derive(Serialize)]
struct FindEntry<'a> {
    is_leaf: u8,
    name: &'a str,
    path: &'a str,
}

impl<'a> FindEntry<'a> {
    fn new(full_name: &'a str) -> Self {
        let (path, name) = full_name.rsplit_once('.').unwrap_or(("", full_name));
        Self {
            is_leaf: 1,
            name,
            path,
        }
    }
}

pub async fn handle(
    State(state): State<RenderState>,
    RawQuery(params): RawQuery,
) -> Result<Response, BadRenderRequest> {
    let query = Query::from_find_params(params.as_deref().unwrap_or_default())?;
    let metrics = common::lookup(&state, Lookup::Find(&query))?;

    if let Some(QueryFormat::Completer) = query.format {
        return Err(BadRenderRequest::UnsupportedFormat(query.format));
    }

    let response = FindResponse {
        metrics: metrics.iter().map(|m| FindEntry::new(m.name())).collect(),
    };

    Ok(common::content(
        QueryFormat::TreeJson,
        serde_json::to_string(&response)?,
    ))
}
