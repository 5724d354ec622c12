//! `GET {sse.path}` and `GET {sse.path}/close`.

use std::collections::HashMap;
use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use serde::Serialize;

use super::stream::event_stream;
use crate::http::{ApiResponse, ApiResult};
use crate::server::AppState;

/// Result of a close request.
#[derive(Debug, Serialize)]
pub struct CloseSummary {
    /// Streams of the caller that were closed.
    pub closed: usize,
}

/// Open a push stream for the caller. `401` when identity cannot be resolved.
pub async fn sse_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let identity = state.identify(&headers, &query)?;
    let (handle, rx) = state.stream.connect(&identity);
    let keep_alive = KeepAlive::new().interval(state.stream.keep_alive()).text("keep-alive");
    Ok(Sse::new(event_stream(handle, rx, state.stream.clone())).keep_alive(keep_alive))
}

/// Close the caller's own streams.
pub async fn sse_close_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<ApiResponse<CloseSummary>> {
    let identity = state.identify(&headers, &query)?;
    let closed = state.stream.disconnect(&identity);
    Ok(ApiResponse::ok(CloseSummary { closed }))
}
