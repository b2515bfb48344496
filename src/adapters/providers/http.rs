//! HTTP plumbing shared by the provider clients.

use std::fmt;

use futures::StreamExt;
use reqwest::{RequestBuilder, Response, StatusCode};
use tokio::sync::mpsc;

use super::sse::{SseDecoder, DONE_SENTINEL};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::StreamChunk;
use crate::domain::ports::ModelStream;
use crate::infrastructure::logging::scrub_secrets;

const STREAM_BUFFER: usize = 64;

/// Failed provider call, classified for the retry policy.
#[derive(Debug)]
pub struct HttpFailure {
    pub retryable: bool,
    pub message: String,
}

impl fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<HttpFailure> for DomainError {
    fn from(failure: HttpFailure) -> Self {
        Self::BackendExecutionFailure(failure.message)
    }
}

/// Rate limits and server errors are worth another attempt.
pub fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Send `request`, turning transport errors and non-2xx statuses into
/// [`HttpFailure`]s.
pub async fn send(request: RequestBuilder) -> Result<Response, HttpFailure> {
    let response = request.send().await.map_err(|e| HttpFailure {
        retryable: true,
        message: scrub_secrets(&format!("request failed: {e}")),
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(HttpFailure {
        retryable: is_transient(status),
        message: scrub_secrets(&format!("API error {status}: {body}")),
    })
}

/// Consume an SSE response on a background task.
///
/// `parse` maps each `data:` payload to a chunk, or `None` to skip it.
/// The task stops at the `[DONE]` sentinel, at the end of the body, or
/// as soon as the receiver is dropped.
pub fn spawn_sse_stream<F>(response: Response, mut parse: F) -> ModelStream
where
    F: FnMut(&str) -> Option<DomainResult<StreamChunk>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);

    tokio::spawn(async move {
        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        while let Some(next) = body.next().await {
            let bytes = match next {
                Ok(bytes) => bytes,
                Err(e) => {
                    let _ = tx
                        .send(Err(DomainError::backend(format!("stream interrupted: {e}"))))
                        .await;
                    return;
                }
            };

            for payload in decoder.push(&bytes) {
                if payload == DONE_SENTINEL {
                    return;
                }
                if let Some(item) = parse(&payload) {
                    if tx.send(item).await.is_err() {
                        tracing::debug!("model stream receiver dropped, abandoning");
                        return;
                    }
                }
            }
        }

        if let Some(payload) = decoder.finish() {
            if payload != DONE_SENTINEL {
                if let Some(item) = parse(&payload) {
                    let _ = tx.send(item).await;
                }
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient(StatusCode::BAD_GATEWAY));
        assert!(!is_transient(StatusCode::UNAUTHORIZED));
        assert!(!is_transient(StatusCode::BAD_REQUEST));
    }
}
