//! `ingest-http` is a rate-limited, retrying async HTTP client for pulling
//! records from an upstream JSON API.
//!
//! Every call made through [`UpstreamClient`]:
//! - waits for a token from a per-client [`TokenBucket`] (burst of N, N per second)
//! - is retried with a fixed delay when the failure looks transient
//!   (no response, `408`, `429`, `5xx`)
//! - ends immediately when the caller's [`CancellationToken`] fires
//!
//! The call surface is the [`ApiClient`] trait: `get`, `post`, `put`, `delete`.

mod classify;
mod client;
mod config;
mod error;
mod executor;
mod rate_limit;
mod retry;
mod transport;

pub use classify::is_retryable;
pub use client::{ApiClient, UpstreamClient};
pub use config::{ClientConfig, MAX_RATE_LIMIT};
pub use error::{CallError, CallErrorKind, CancelStage, Error};
pub use executor::join_url;
pub use rate_limit::{RateToken, TokenBucket};
pub use retry::RetryPolicy;
pub use transport::{
    FailureKind, ReqwestTransport, Transport, TransportFailure, TransportRequest,
    TransportResponse,
};

pub use reqwest::Method;
pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, Error>;
