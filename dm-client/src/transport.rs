//! Transport abstraction.
//!
//! The client talks to the licensing authority and the update service
//! through this trait so it can run against HTTP, a launcher or a
//! test double.

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// Per-call settings.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Upper bound on the call duration.
    pub timeout: Duration,
    /// Aborts the call when cancelled, if the transport supports it.
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    /// Options with a timeout and no cancellation.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            cancel: None,
        }
    }
}

/// A raw response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP-equivalent status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl TransportResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Channel to the licensing authority and update service.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Posts a canonical JSON payload to `endpoint`.
    async fn post(
        &self,
        endpoint: &str,
        payload: &[u8],
        options: &RequestOptions,
    ) -> Result<TransportResponse, TransportError>;

    /// Fetches up to `max_len` bytes of `url` starting at `offset`.
    ///
    /// An empty chunk means the end of the resource.
    async fn fetch_range(
        &self,
        url: &str,
        offset: u64,
        max_len: u64,
        options: &RequestOptions,
    ) -> Result<Vec<u8>, TransportError>;
}

/// A scripted transport for testing.
pub mod mock {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex, PoisonError};

    /// A request the mock received.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct RecordedRequest {
        /// Endpoint it was posted to.
        pub endpoint: String,
        /// Request body.
        pub payload: Vec<u8>,
    }

    impl RecordedRequest {
        /// Parses the body as JSON.
        #[must_use]
        pub fn json(&self) -> serde_json::Value {
            serde_json::from_slice(&self.payload).unwrap_or_default()
        }
    }

    #[derive(Debug, Default)]
    struct Inner {
        replies: VecDeque<Result<TransportResponse, TransportError>>,
        requests: Vec<RecordedRequest>,
        resources: HashMap<String, Vec<u8>>,
        post_delay: Option<Duration>,
        chunk_delay: Option<Duration>,
    }

    /// Replays queued replies in order and serves in-memory resources.
    ///
    /// With no reply queued, `post` fails with a connection error.
    #[derive(Debug, Clone, Default)]
    pub struct MockTransport {
        inner: Arc<Mutex<Inner>>,
    }

    impl MockTransport {
        /// Creates an empty mock.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
            self.inner.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Queues a reply.
        pub fn push_reply(&self, reply: Result<TransportResponse, TransportError>) {
            self.inner().replies.push_back(reply);
        }

        /// Queues a JSON reply with `status`.
        pub fn push_json(&self, status: u16, body: impl Into<String>) {
            self.push_reply(Ok(TransportResponse::new(status, body.into())));
        }

        /// Queues a transport failure.
        pub fn push_error(&self, err: TransportError) {
            self.push_reply(Err(err));
        }

        /// Serves `bytes` at `url` through `fetch_range`.
        pub fn add_resource(&self, url: impl Into<String>, bytes: Vec<u8>) {
            self.inner().resources.insert(url.into(), bytes);
        }

        /// Delays every `post` by `delay`.
        pub fn set_post_delay(&self, delay: Duration) {
            self.inner().post_delay = Some(delay);
        }

        /// Delays every `fetch_range` by `delay`.
        pub fn set_chunk_delay(&self, delay: Duration) {
            self.inner().chunk_delay = Some(delay);
        }

        /// Returns every request received so far.
        #[must_use]
        pub fn requests(&self) -> Vec<RecordedRequest> {
            self.inner().requests.clone()
        }

        /// Returns the number of `post` calls.
        #[must_use]
        pub fn request_count(&self) -> usize {
            self.inner().requests.len()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn post(
            &self,
            endpoint: &str,
            payload: &[u8],
            _options: &RequestOptions,
        ) -> Result<TransportResponse, TransportError> {
            let (reply, delay) = {
                let mut inner = self.inner();
                inner.requests.push(RecordedRequest {
                    endpoint: endpoint.to_string(),
                    payload: payload.to_vec(),
                });
                (inner.replies.pop_front(), inner.post_delay)
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            reply.unwrap_or_else(|| Err(TransportError::Connection("no reply scripted".into())))
        }

        async fn fetch_range(
            &self,
            url: &str,
            offset: u64,
            max_len: u64,
            _options: &RequestOptions,
        ) -> Result<Vec<u8>, TransportError> {
            let (resource, delay) = {
                let inner = self.inner();
                (inner.resources.get(url).cloned(), inner.chunk_delay)
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let bytes =
                resource.ok_or_else(|| TransportError::Connection(format!("404 {url}")))?;
            let start = usize::try_from(offset).unwrap_or(usize::MAX).min(bytes.len());
            let len = usize::try_from(max_len).unwrap_or(usize::MAX);
            let end = start.saturating_add(len).min(bytes.len());
            Ok(bytes[start..end].to_vec())
        }
    }
}
