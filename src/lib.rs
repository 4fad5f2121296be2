//! # axum-speedtest
//!
//! An HTTP bandwidth test endpoint for [`axum`][1], meant to be driven by
//! plain command line clients.
//!
//! * `GET /speedtest?bytes=100MB` streams that many deterministic
//!   pseudorandom bytes. `Range` requests starting at byte 0 are answered
//!   with `206 Partial Content`; anything else needs an interior seek, which
//!   the generator refuses, and is answered with `416`.
//! * `POST /speedtest` reads and discards the body and replies with the
//!   number of bytes received, e.g. `Received 100 MB.`
//!
//! ```no_run
//! #[tokio::main]
//! async fn main() {
//!     let app = axum_speedtest::router("/speedtest");
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```
//!
//! The range handling is generic: [`Ranged`] serves any body implementing
//! [`RangeBody`], and [`AsyncSeekStart`] narrows seeking to absolute
//! positions. It is automatically implemented for any type implementing
//! [`AsyncSeek`].
//!
//! [1]: https://docs.rs/axum

pub mod config;
mod error;
mod handler;
mod random;
pub mod size;
mod stream;

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::TypedHeader;
use axum_extra::headers::{AcceptRanges, ContentLength, ContentRange, ContentType};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncSeek};

pub use error::{Result, SpeedtestError};
pub use handler::{router, Speedtest};
pub use random::RandomBody;
pub use size::{format_size, parse_size, ParseSizeError};
pub use stream::RangedStream;

/// [`AsyncSeek`] narrowed to only allow seeking from start.
pub trait AsyncSeekStart {
    /// Same semantics as [`AsyncSeek::start_seek`], always passing position as the `SeekFrom::Start` variant.
    fn start_seek(self: Pin<&mut Self>, position: u64) -> io::Result<()>;

    /// Same semantics as [`AsyncSeek::poll_complete`], returning `()` instead of the new stream position.
    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>>;
}

impl<T: AsyncSeek> AsyncSeekStart for T {
    fn start_seek(self: Pin<&mut Self>, position: u64) -> io::Result<()> {
        AsyncSeek::start_seek(self, io::SeekFrom::Start(position))
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncSeek::poll_complete(self, cx).map_ok(|_| ())
    }
}

/// An [`AsyncRead`] and [`AsyncSeekStart`] with a fixed known byte size.
pub trait RangeBody: AsyncRead + AsyncSeekStart {
    /// The total size of the body.
    ///
    /// This should not change for the lifetime of the object once queried.
    /// Behaviour is not guaranteed if it does change.
    fn byte_size(&self) -> u64;
}

/// Represents a single byte range with start and end positions (exclusive end).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end_exclusive: u64,
}

impl ByteRange {
    /// Create a new byte range with inclusive start and exclusive end.
    pub fn new(start: u64, end_exclusive: u64) -> Self {
        ByteRange { start, end_exclusive }
    }

    pub fn len(&self) -> u64 {
        self.end_exclusive - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end_exclusive
    }
}

/// The main responder type. Implements [`IntoResponse`].
#[derive(Debug)]
pub struct Ranged<B: RangeBody + Unpin + Send + 'static> {
    range: Option<HeaderValue>,
    body: B,
    content_type: Option<ContentType>,
}

impl<B: RangeBody + Unpin + Send + 'static> Ranged<B> {
    /// Construct a ranged response over any type implementing [`RangeBody`]
    /// and the raw value of an optional `Range` header. Without a content
    /// type the response is labelled `application/octet-stream`.
    pub fn new(range: Option<HeaderValue>, body: B, content_type: Option<ContentType>) -> Self {
        Ranged { range, body, content_type }
    }

    /// Responds to the request, returning headers and body as
    /// [`RangedResponse`].
    ///
    /// The body is seeked to the start of the selected range before anything
    /// is returned, so a body that cannot reach that offset produces a
    /// [`SpeedtestError::RangeNotSatisfiable`] carrying the seek error rather
    /// than a truncated response. A header naming several ranges is ignored
    /// and the full body is served.
    pub fn try_respond(self) -> Result<RangedResponse<B>> {
        let total_bytes = self.body.byte_size();

        // lengths are framed as signed integers downstream
        if i64::try_from(total_bytes).is_err() {
            return Err(SpeedtestError::ContentSizeOverflow);
        }

        let content_type = self.content_type.unwrap_or_else(ContentType::octet_stream);

        let range = match &self.range {
            None => None,
            Some(header) => {
                let header = header.to_str().map_err(|_| {
                    not_satisfiable(total_bytes, ParseRangesError::Invalid.to_string())
                })?;
                let mut ranges = parse_range_header(header, total_bytes)
                    .map_err(|e| not_satisfiable(total_bytes, e.to_string()))?;
                if ranges.len() == 1 {
                    ranges.pop()
                } else {
                    tracing::debug!(count = ranges.len(), "multiple ranges requested, serving full body");
                    None
                }
            }
        };

        match range {
            None => {
                tracing::debug!(total_bytes, "serving full body");
                let stream = RangedStream::new(self.body, 0, total_bytes)?;
                Ok(RangedResponse::Full {
                    content_length: ContentLength(total_bytes),
                    stream,
                    content_type,
                })
            }
            Some(range) => {
                tracing::debug!(start = range.start, end = range.end_exclusive, total_bytes, "serving byte range");
                let stream = RangedStream::new(self.body, range.start, range.len())
                    .map_err(|e| not_satisfiable(total_bytes, e.to_string()))?;
                let content_range = ContentRange::bytes(range.start..range.end_exclusive, total_bytes)
                    .map_err(|_| not_satisfiable(total_bytes, ParseRangesError::Invalid.to_string()))?;
                Ok(RangedResponse::Partial {
                    content_range,
                    content_length: ContentLength(range.len()),
                    stream,
                    content_type,
                })
            }
        }
    }
}

fn not_satisfiable(size: u64, reason: String) -> SpeedtestError {
    SpeedtestError::RangeNotSatisfiable { size, reason }
}

impl<B: RangeBody + Unpin + Send + 'static> IntoResponse for Ranged<B> {
    fn into_response(self) -> Response {
        self.try_respond().into_response()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
enum ParseRangesError {
    #[error("invalid range")]
    Invalid,
    #[error("invalid range: failed to overlap")]
    NoOverlap,
}

/// Parses a `Range` header value against a body of `target_size` bytes.
///
/// Each spec is clamped to the body: an end past the last byte is pulled in,
/// and a suffix longer than the body selects all of it. Specs starting at or
/// beyond the end are dropped; if nothing is left the header does not
/// overlap the body at all. Positions must fit in an `i64`.
fn parse_range_header(range_header: &str, target_size: u64) -> std::result::Result<Vec<ByteRange>, ParseRangesError> {
    let specs = range_header
        .trim()
        .strip_prefix("bytes=")
        .ok_or(ParseRangesError::Invalid)?;

    let mut ranges = Vec::new();
    let mut no_overlap = false;

    for spec in specs.split(',') {
        let spec = spec.trim();
        if spec.is_empty() {
            continue;
        }

        let (start, end) = spec.split_once('-').ok_or(ParseRangesError::Invalid)?;
        let (start, end) = (start.trim(), end.trim());

        if start.is_empty() {
            // "-n" selects the last n bytes
            // "-0" is kept as an empty range at the end of the body
            let suffix = parse_position(end)?.min(target_size);
            ranges.push(ByteRange::new(target_size - suffix, target_size));
            continue;
        }

        let start = parse_position(start)?;
        if start >= target_size {
            no_overlap = true;
            continue;
        }

        let end_exclusive = if end.is_empty() {
            target_size
        } else {
            let end = parse_position(end)?;
            if start > end {
                return Err(ParseRangesError::Invalid);
            }
            // HTTP byte ranges are inclusive
            end.saturating_add(1).min(target_size)
        };
        ranges.push(ByteRange::new(start, end_exclusive));
    }

    if ranges.is_empty() {
        return Err(if no_overlap {
            ParseRangesError::NoOverlap
        } else {
            ParseRangesError::Invalid
        });
    }
    Ok(ranges)
}

fn parse_position(s: &str) -> std::result::Result<u64, ParseRangesError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseRangesError::Invalid);
    }
    let position: i64 = s.parse().map_err(|_| ParseRangesError::Invalid)?;
    Ok(position as u64)
}

/// Data type containing computed headers and body for a range response. Implements [`IntoResponse`].
#[derive(Debug)]
pub enum RangedResponse<B> {
    /// Full content response, no usable range requested.
    Full {
        content_length: ContentLength,
        stream: RangedStream<B>,
        content_type: ContentType,
    },
    /// A single byte range of the body.
    Partial {
        content_range: ContentRange,
        content_length: ContentLength,
        stream: RangedStream<B>,
        content_type: ContentType,
    },
}

impl<B: RangeBody + Send + 'static> IntoResponse for RangedResponse<B> {
    fn into_response(self) -> Response {
        let accept_ranges = TypedHeader(AcceptRanges::bytes());

        match self {
            RangedResponse::Full { content_length, stream, content_type } => (
                StatusCode::OK,
                accept_ranges,
                TypedHeader(content_length),
                TypedHeader(content_type),
                stream,
            )
                .into_response(),
            RangedResponse::Partial { content_range, content_length, stream, content_type } => (
                StatusCode::PARTIAL_CONTENT,
                accept_ranges,
                TypedHeader(content_range),
                TypedHeader(content_length),
                TypedHeader(content_type),
                stream,
            )
                .into_response(),
        }
    }
}

#[test]
fn test_parse_range_header() {
    use ParseRangesError::*;

    let tests = [
        ("bytes=0-100", 200, Ok(vec![ByteRange::new(0, 101)])),
        ("bytes=0-100,200-300", 500, Ok(vec![ByteRange::new(0, 101), ByteRange::new(200, 301)])),
        ("bytes=0-", 500, Ok(vec![ByteRange::new(0, 500)])),
        ("bytes=-100", 500, Ok(vec![ByteRange::new(400, 500)])),
        ("bytes=-1000", 500, Ok(vec![ByteRange::new(0, 500)])),
        ("bytes=100-", 500, Ok(vec![ByteRange::new(100, 500)])),
        ("bytes=100-200", 500, Ok(vec![ByteRange::new(100, 201)])),
        ("bytes=-1", 500, Ok(vec![ByteRange::new(499, 500)])),
        ("bytes=0-0", 500, Ok(vec![ByteRange::new(0, 1)])),
        ("bytes = 0-0", 500, Err(Invalid)),
        ("bytes=0-0, -1", 500, Ok(vec![ByteRange::new(0, 1), ByteRange::new(499, 500)])),
        ("bytes=0-24646", 500, Ok(vec![ByteRange::new(0, 500)])),
        ("bytes=600-700,0-9", 500, Ok(vec![ByteRange::new(0, 10)])),
        ("bytes=500-", 500, Err(NoOverlap)),
        ("bytes=-0", 500, Ok(vec![ByteRange::new(500, 500)])),
        ("bytes=30-29", 500, Err(Invalid)),
        ("bytes=a-b", 500, Err(Invalid)),
        ("bytes=+1-2", 500, Err(Invalid)),
        ("bytes=5", 500, Err(Invalid)),
        ("bytes=", 500, Err(Invalid)),
        ("none", 500, Err(Invalid)),
        ("bleets=100-324", 500, Err(Invalid)),
        ("bytes=0-9223372036854775807", 500, Ok(vec![ByteRange::new(0, 500)])),
        ("bytes=0-9223372036854775808", 500, Err(Invalid)),
        ("bytes=0-18446744073709551615", 500, Err(Invalid)),
        ("bytes=-9223372036854775808", 500, Err(Invalid)),
    ];

    for (i, (range_header, target_size, expected)) in tests.iter().enumerate() {
        let result = parse_range_header(range_header, *target_size);
        assert_eq!(result, *expected, "Failed to parse range header #{i}: {}", range_header);
    }
}
