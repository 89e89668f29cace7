use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::Span;

/// Header a reverse proxy may set to correlate its logs with ours.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Creates one span per HTTP request, carrying the method, the uri and a
/// request id. The id is taken from [REQUEST_ID_HEADER] if present and valid,
/// otherwise a random one is generated.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestSpan;

impl<B> MakeSpan<B> for RequestSpan {
    fn make_span(&mut self, request: &http::Request<B>) -> Span {
        let request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request.id = %request_id,
        )
    }
}

/// A [TraceLayer] logging request start and end inside a [RequestSpan].
pub fn trace_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>, RequestSpan> {
    TraceLayer::new_for_http().make_span_with(RequestSpan)
}
