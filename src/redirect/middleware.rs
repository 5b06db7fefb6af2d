use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

/// When the redirect request entered the router. Read by the handler to
/// report total time in `x-tourlink-timing-total-ms`.
#[derive(Debug, Copy, Clone)]
pub struct RequestStart(pub Instant);

pub async fn record_request_start(mut request: Request, next: Next) -> Response {
    let start = RequestStart(Instant::now());
    request.extensions_mut().insert(start);
    next.run(request).await
}
