use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Method};

use crate::{ClientConfig, Error, Result};

/// One outbound HTTP exchange, already addressed and encoded.
#[derive(Clone, Debug)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
}

/// A fully read response. The connection is released once this exists.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Why an exchange produced no response.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureKind {
    /// The request could not be built (malformed URL, bad header). Nothing was sent.
    InvalidRequest,
    /// No complete response arrived within the per-attempt timeout.
    TimedOut,
    /// Connect, TLS or body read failure.
    Network,
}

/// The exchange produced no usable response.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransportFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TransportFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TransportFailure {}

/// Performs raw HTTP exchanges for [`crate::UpstreamClient`].
///
/// Implementations do not retry or rate-limit.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: TransportRequest,
    ) -> std::result::Result<TransportResponse, TransportFailure>;
}

#[async_trait]
impl<T> Transport for Arc<T>
where
    T: Transport + ?Sized,
{
    async fn send(
        &self,
        request: TransportRequest,
    ) -> std::result::Result<TransportResponse, TransportFailure> {
        (**self).send(request).await
    }
}

/// [`Transport`] backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|err| Error::Config(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: TransportRequest,
    ) -> std::result::Result<TransportResponse, TransportFailure> {
        let mut builder = self
            .http
            .request(request.method, &request.url)
            .header(header::ACCEPT, "application/json")
            .header(header::CONTENT_TYPE, "application/json")
            .timeout(request.timeout);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(failure)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|err| {
            let read = failure(err);
            TransportFailure::new(
                read.kind,
                format!("failed to read response body: {}", read.message),
            )
        })?;

        Ok(TransportResponse { status, body })
    }
}

fn failure(err: reqwest::Error) -> TransportFailure {
    let kind = if err.is_builder() {
        FailureKind::InvalidRequest
    } else if err.is_timeout() {
        FailureKind::TimedOut
    } else {
        FailureKind::Network
    };
    TransportFailure::new(kind, err.to_string())
}
