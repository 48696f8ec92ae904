use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    executor::{check_url, decode_body, encode_body, execute_once, join_url, Completed},
    retry::{self, RetryPolicy},
    CallError, ClientConfig, Error, ReqwestTransport, Result, TokenBucket, Transport,
};

/// Call surface offered to ingestion code.
///
/// Every call is rate-limited, retried on transient failures and abandoned as
/// soon as `cancel` fires. Implement this trait to substitute a fake upstream
/// in tests of the calling code.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Fetches `path` and decodes the JSON body into `T`.
    async fn get<T>(&self, cancel: &CancellationToken, path: &str) -> Result<T>
    where
        T: DeserializeOwned + Send + 'static;

    /// Sends `body` as JSON and decodes the response into `T`.
    async fn post<B, T>(&self, cancel: &CancellationToken, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned + Send + 'static;

    /// Replaces the resource at `path` with `body` and decodes the response into `T`.
    async fn put<B, T>(&self, cancel: &CancellationToken, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned + Send + 'static;

    /// Deletes `path`, ignoring any response body.
    async fn delete(&self, cancel: &CancellationToken, path: &str) -> Result<()>;
}

/// Rate-limited, retrying HTTP client for one upstream service.
///
/// Clones share the same rate limiter. The limiter's refill task stops on
/// [`UpstreamClient::close`] or when the last clone is dropped.
#[derive(Clone)]
pub struct UpstreamClient {
    transport: Arc<dyn Transport>,
    limiter: Arc<TokenBucket>,
    config: Arc<ClientConfig>,
}

impl fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("config", &self.config)
            .field("available_tokens", &self.limiter.available())
            .field("closed", &self.limiter.is_closed())
            .finish()
    }
}

impl UpstreamClient {
    /// Creates a client that talks HTTP through `reqwest`.
    ///
    /// The configuration is validated first. Must be called from within a
    /// Tokio runtime, which hosts the rate limiter's refill task.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use ingest_http::{ApiClient, CancellationToken, ClientConfig, UpstreamClient};
    ///
    /// # async fn run() -> ingest_http::Result<()> {
    /// let config = ClientConfig::new("https://jsonplaceholder.typicode.com")
    ///     .with_rate_limit(5)
    ///     .with_max_retries(2);
    /// let client = UpstreamClient::new(config)?;
    ///
    /// let post: serde_json::Value = client.get(&CancellationToken::new(), "/posts/1").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = ReqwestTransport::new(&config)?;
        Self::with_transport(config, transport)
    }

    /// Creates a client over a custom [`Transport`].
    pub fn with_transport(
        config: ClientConfig,
        transport: impl Transport + 'static,
    ) -> Result<Self> {
        config.validate()?;
        let limiter = TokenBucket::new(config.rate_limit)?;
        Ok(Self {
            transport: Arc::new(transport),
            limiter: Arc::new(limiter),
            config: Arc::new(config),
        })
    }

    /// Creates a client from `API_*` environment variables.
    ///
    /// See [`ClientConfig::from_env`] for the variables read.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.config.max_retries, self.config.retry_delay())
    }

    /// Rate tokens that can be taken right now without waiting.
    pub fn available_tokens(&self) -> usize {
        self.limiter.available()
    }

    /// Shuts down the rate limiter for this client and all its clones.
    ///
    /// Calls waiting for a token, and every later call, fail with
    /// [`Error::Closed`]. Attempts already in flight run to completion.
    pub fn close(&self) {
        self.limiter.close();
    }

    pub fn is_closed(&self) -> bool {
        self.limiter.is_closed()
    }

    /// Issues a request with any method, decoding the JSON response into `T`.
    pub async fn request<B, T>(
        &self,
        cancel: &CancellationToken,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(&method, path)?;
        let payload = self.encode(&method, &url, body)?;

        let (this, method, url, payload) = (self, &method, url.as_str(), payload.as_deref());
        retry::run(&self.limiter, self.retry_policy(), cancel, method, url, move || async move {
            let completed = this.attempt(method, url, payload).await?;
            decode_body(method, url, &completed)
        })
        .await
    }

    /// Issues a request with any method, discarding the response body.
    pub async fn send<B>(
        &self,
        cancel: &CancellationToken,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<()>
    where
        B: Serialize + ?Sized,
    {
        let url = self.url(&method, path)?;
        let payload = self.encode(&method, &url, body)?;

        let (this, method, url, payload) = (self, &method, url.as_str(), payload.as_deref());
        retry::run(&self.limiter, self.retry_policy(), cancel, method, url, move || async move {
            this.attempt(method, url, payload).await.map(drop)
        })
        .await
    }

    fn url(&self, method: &Method, path: &str) -> Result<String> {
        let url = join_url(self.config.base_url.as_deref(), path);
        check_url(method, &url).map_err(|err| {
            tracing::error!(%method, url = url.as_str(), error = %err, "request URL is not usable");
            Error::Call(err)
        })?;
        Ok(url)
    }

    fn encode<B>(&self, method: &Method, url: &str, body: Option<&B>) -> Result<Option<Vec<u8>>>
    where
        B: Serialize + ?Sized,
    {
        let Some(body) = body else {
            return Ok(None);
        };
        encode_body(method, url, body).map(Some).map_err(|err| {
            tracing::error!(%method, url, error = %err, "request body could not be encoded");
            Error::Call(err)
        })
    }

    async fn attempt(
        &self,
        method: &Method,
        url: &str,
        payload: Option<&[u8]>,
    ) -> std::result::Result<Completed, CallError> {
        execute_once(
            self.transport.as_ref(),
            method,
            url,
            payload,
            self.config.timeout(),
        )
        .await
    }
}

#[async_trait]
impl ApiClient for UpstreamClient {
    async fn get<T>(&self, cancel: &CancellationToken, path: &str) -> Result<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.request::<(), T>(cancel, Method::GET, path, None).await
    }

    async fn post<B, T>(&self, cancel: &CancellationToken, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned + Send + 'static,
    {
        self.request(cancel, Method::POST, path, Some(body)).await
    }

    async fn put<B, T>(&self, cancel: &CancellationToken, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned + Send + 'static,
    {
        self.request(cancel, Method::PUT, path, Some(body)).await
    }

    async fn delete(&self, cancel: &CancellationToken, path: &str) -> Result<()> {
        self.send::<()>(cancel, Method::DELETE, path, None).await
    }
}
