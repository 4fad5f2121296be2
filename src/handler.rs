use axum::body::Body;
use axum::extract::{Query, Request};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use futures::TryStreamExt;

use crate::error::{Result, SpeedtestError};
use crate::{format_size, parse_size, RandomBody, Ranged, RangedResponse};

/// The speed test handler.
///
/// Carries no state: every request builds its own [`RandomBody`] or byte
/// tally, so one value can serve any number of concurrent requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct Speedtest;

impl Speedtest {
    /// Dispatches on the request method: `GET` downloads, `POST` uploads,
    /// anything else is `405 Method Not Allowed`.
    pub async fn serve(self, request: Request) -> Response {
        match *request.method() {
            Method::GET => self.download(request.uri(), request.headers()).into_response(),
            Method::POST => self.upload(request.into_body()).await.into_response(),
            _ => SpeedtestError::MethodNotAllowed.into_response(),
        }
    }

    /// Streams `?bytes=<size>` deterministic pseudorandom bytes, honouring a
    /// `Range` header when the range starts at byte 0.
    pub fn download(self, uri: &Uri, headers: &HeaderMap) -> Result<RangedResponse<RandomBody>> {
        // a repeated key is not an error, the first value wins
        let spec = Query::<Vec<(String, String)>>::try_from_uri(uri)
            .ok()
            .and_then(|Query(pairs)| pairs.into_iter().find(|(key, _)| key == "bytes"))
            .map(|(_, value)| value)
            .ok_or(SpeedtestError::InvalidSize)?;

        let size = parse_size(&spec).map_err(|e| {
            tracing::debug!(spec = %spec, error = %e, "rejecting download size");
            SpeedtestError::InvalidSize
        })?;

        tracing::debug!(size, "starting download");
        let range = headers.get(header::RANGE).cloned();
        Ranged::new(range, RandomBody::new(size), None).try_respond()
    }

    /// Reads the request body to the end, discarding it, and reports how many
    /// bytes arrived.
    ///
    /// hyper answers `Expect: 100-continue` as soon as the body is first
    /// polled, which is the first thing this does.
    pub async fn upload(self, body: Body) -> Result<String> {
        let received = body
            .into_data_stream()
            .try_fold(0u64, |total, chunk| async move {
                Ok::<_, axum::Error>(total + chunk.len() as u64)
            })
            .await
            .map_err(SpeedtestError::ReadBody)?;

        if received == 0 {
            return Err(SpeedtestError::EmptyBody);
        }

        tracing::debug!(received, "upload complete");
        Ok(format!("Received {}.\n", format_size(received)))
    }
}

/// Builds a router serving the speed test at `path`. Requests for any other
/// path get `404 Not Found`.
pub fn router(path: &str) -> Router {
    let speedtest = Speedtest;
    Router::new()
        .route(path, any(move |request: Request| speedtest.serve(request)))
        .fallback(not_found)
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found\n")
}
