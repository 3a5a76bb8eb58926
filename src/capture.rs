use crate::store::CachedResponse;
use axum::body::{Body, Bytes};
use axum::response::Response;
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use http::StatusCode;

/// Status code and fully buffered body of a downstream response.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub body: Bytes,
    pub captured_at: DateTime<Utc>,
}

impl CapturedResponse {
    pub fn into_cached(self) -> CachedResponse {
        CachedResponse {
            status_code: self.status.as_u16(),
            body: self.body.to_vec(),
            captured_at: self.captured_at,
        }
    }
}

/// Why a response could not be captured.
#[derive(Debug)]
pub enum CaptureOutcome {
    Captured(CapturedResponse),
    /// Body exceeded the configured ceiling; the caller still receives every
    /// byte, nothing is persisted.
    Overflowed { limit: usize },
    /// The body stream failed mid-flight; the error is forwarded to the
    /// caller unaltered.
    Errored,
}

/// Buffers the downstream body so it can be persisted, while handing the
/// caller a response that delivers the identical bytes. The body is read at
/// most once: on overflow or stream error the already-buffered prefix is
/// re-chained in front of whatever remains, so nothing downstream of this
/// stage can observe that capture happened.
pub async fn tee_response(response: Response, max_bytes: usize) -> (Response, CaptureOutcome) {
    let (parts, body) = response.into_parts();
    let status = parts.status;

    let mut body_stream = body.into_data_stream();
    let mut buffered = BytesMut::new();

    while let Some(chunk) = body_stream.next().await {
        match chunk {
            Ok(bytes) => {
                if buffered.len() + bytes.len() > max_bytes {
                    let replay = stream::iter(vec![
                        Ok::<Bytes, axum::Error>(buffered.freeze()),
                        Ok(bytes),
                    ]);
                    let body = Body::from_stream(replay.chain(body_stream));
                    return (
                        Response::from_parts(parts, body),
                        CaptureOutcome::Overflowed { limit: max_bytes },
                    );
                }
                buffered.extend_from_slice(&bytes);
            }
            Err(err) => {
                let replay = stream::iter(vec![
                    Ok::<Bytes, axum::Error>(buffered.freeze()),
                    Err(err),
                ]);
                let body = Body::from_stream(replay);
                return (Response::from_parts(parts, body), CaptureOutcome::Errored);
            }
        }
    }

    let bytes = buffered.freeze();
    let captured = CapturedResponse {
        status,
        body: bytes.clone(),
        captured_at: Utc::now(),
    };
    (
        Response::from_parts(parts, Body::from(bytes)),
        CaptureOutcome::Captured(captured),
    )
}
