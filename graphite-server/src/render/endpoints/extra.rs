use axum::extract::{Request, State};
use axum::response::Response;

use crate::render::RenderState;
use crate::render::endpoints::statics;

/// Dispatches requests to the [`HttpRequestListener`](crate::HttpRequestListener) registered for
/// their exact path.
pub async fn handle(State(state): State<RenderState>, request: Request) -> Response {
    match state.http_request_listener(request.uri().path()) {
        Some(listener) => listener.handle(request).await,
        None => statics::not_found().await,
    }
}
