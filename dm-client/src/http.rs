//! HTTP transport backed by reqwest.

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, RANGE};
use reqwest::{Client, RequestBuilder, StatusCode};
use std::future::Future;
use tracing::debug;

use crate::env::EnvConfig;
use crate::error::TransportError;
use crate::transport::{RequestOptions, Transport, TransportResponse};

/// Talks to the licensing authority over HTTPS.
///
/// Endpoint paths are resolved against `base_url`. Absolute URLs, such as
/// package download links, are used as given.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpTransport {
    /// Creates a transport for `base_url`.
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be initialized.
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(concat!("dm-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Connection(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Creates a transport for the launcher named in `env`.
    ///
    /// # Errors
    ///
    /// Fails when no launcher endpoint is configured.
    pub fn from_env(env: &EnvConfig) -> Result<Self, TransportError> {
        let endpoint = env
            .launcher_endpoint
            .as_deref()
            .ok_or(TransportError::NoEndpoint("launcher"))?;
        let transport = Self::new(endpoint)?;
        Ok(match &env.launcher_token {
            Some(token) => transport.with_token(token.clone()),
            None => transport,
        })
    }

    /// Sends `token` as a bearer credential.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

async fn run<T>(
    options: &RequestOptions,
    call: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    match &options.cancel {
        Some(token) => tokio::select! {
            result = call => result,
            () = token.cancelled() => Err(TransportError::Cancelled),
        },
        None => call.await,
    }
}

fn connection(options: &RequestOptions) -> impl Fn(reqwest::Error) -> TransportError + '_ {
    move |e| {
        if e.is_timeout() {
            TransportError::Timeout(u64::try_from(options.timeout.as_millis()).unwrap_or(u64::MAX))
        } else {
            TransportError::Connection(e.to_string())
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(
        &self,
        endpoint: &str,
        payload: &[u8],
        options: &RequestOptions,
    ) -> Result<TransportResponse, TransportError> {
        let request = self
            .authorized(self.client.post(self.url(endpoint)))
            .timeout(options.timeout)
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_vec());

        run(options, async {
            let response = request.send().await.map_err(connection(options))?;
            let status = response.status().as_u16();
            debug!("POST {} -> {}", endpoint, status);
            let body = response.bytes().await.map_err(connection(options))?;
            Ok(TransportResponse::new(status, body.to_vec()))
        })
        .await
    }

    async fn fetch_range(
        &self,
        url: &str,
        offset: u64,
        max_len: u64,
        options: &RequestOptions,
    ) -> Result<Vec<u8>, TransportError> {
        let last = offset.saturating_add(max_len.max(1)) - 1;
        let request = self
            .authorized(self.client.get(self.url(url)))
            .timeout(options.timeout)
            .header(RANGE, format!("bytes={offset}-{last}"));

        run(options, async {
            let response = request.send().await.map_err(connection(options))?;
            let status = response.status();
            if status == StatusCode::RANGE_NOT_SATISFIABLE {
                return Ok(Vec::new());
            }
            if !status.is_success() {
                return Err(TransportError::Connection(format!(
                    "download failed with status {status}"
                )));
            }
            let body = response.bytes().await.map_err(connection(options))?;
            if status == StatusCode::PARTIAL_CONTENT {
                return Ok(body.to_vec());
            }
            // Server ignored the range and sent the whole resource.
            let start = usize::try_from(offset).unwrap_or(usize::MAX).min(body.len());
            let len = usize::try_from(max_len).unwrap_or(usize::MAX);
            let end = start.saturating_add(len).min(body.len());
            Ok(body[start..end].to_vec())
        })
        .await
    }
}
