use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// Highest accepted `rate_limit`; above this the refill period rounds to zero.
pub const MAX_RATE_LIMIT: u32 = 1_000_000;

/// Configures the upstream endpoint, timeout, retry and rate-limit behavior.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Prefix joined to relative request paths.
    pub base_url: Option<String>,
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Fixed delay between attempts in milliseconds.
    pub retry_delay_ms: u64,
    /// Sustained calls per second, also the burst size.
    pub rate_limit: u32,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: 30_000,
            max_retries: 3,
            retry_delay_ms: 1_000,
            rate_limit: 10,
            user_agent: concat!("ingest-http/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::default().with_base_url(base_url)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = duration_to_ms(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = duration_to_ms(delay);
        self
    }

    pub fn with_rate_limit(mut self, calls_per_second: u32) -> Self {
        self.rate_limit = calls_per_second;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Rejects values that would make the client misbehave at call time.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit == 0 {
            return Err(Error::Config("rate limit must be at least 1 call per second".to_owned()));
        }
        if self.rate_limit > MAX_RATE_LIMIT {
            return Err(Error::Config(format!(
                "rate limit {} exceeds the maximum of {MAX_RATE_LIMIT} calls per second",
                self.rate_limit
            )));
        }
        if self.timeout_ms == 0 {
            return Err(Error::Config("timeout must be greater than zero".to_owned()));
        }
        if self.user_agent.trim().is_empty() {
            return Err(Error::Config("user agent must not be empty".to_owned()));
        }
        if let Some(base_url) = &self.base_url {
            let parsed = reqwest::Url::parse(base_url)
                .map_err(|err| Error::Config(format!("invalid base URL '{base_url}': {err}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(Error::Config(format!(
                    "base URL '{base_url}' must use http or https"
                )));
            }
        }
        Ok(())
    }

    /// Loads configuration from `API_*` environment variables.
    ///
    /// Reads:
    /// - `API_BASE_URL`: upstream prefix (e.g. `https://jsonplaceholder.typicode.com`)
    /// - `API_TIMEOUT`: per-attempt timeout (`30s`, `500ms`, or plain milliseconds)
    /// - `API_RETRY_COUNT`: retries after the first attempt
    /// - `API_RETRY_DELAY`: delay between attempts
    /// - `API_RATE_LIMIT`: calls per second
    /// - `API_USER_AGENT`: `User-Agent` header value
    ///
    /// Unset or empty variables keep their defaults. Values that fail to
    /// parse or validate are errors.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use ingest_http::ClientConfig;
    ///
    /// let config = ClientConfig::from_env().expect("invalid API_* settings");
    /// ```
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] over an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();
        if let Some(base_url) = get("API_BASE_URL") {
            config.base_url = Some(base_url);
        }
        if let Some(raw) = get("API_TIMEOUT") {
            config.timeout_ms = parse_duration_ms("API_TIMEOUT", &raw)?;
        }
        if let Some(raw) = get("API_RETRY_COUNT") {
            config.max_retries = parse_number("API_RETRY_COUNT", &raw)?;
        }
        if let Some(raw) = get("API_RETRY_DELAY") {
            config.retry_delay_ms = parse_duration_ms("API_RETRY_DELAY", &raw)?;
        }
        if let Some(raw) = get("API_RATE_LIMIT") {
            config.rate_limit = parse_number("API_RATE_LIMIT", &raw)?;
        }
        if let Some(user_agent) = get("API_USER_AGENT") {
            config.user_agent = user_agent;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|err| Error::Config(format!("{key}='{raw}' is not a valid number: {err}")))
}

/// Parses `250ms`, `30s`, `2m` or a bare millisecond count.
fn parse_duration_ms(key: &str, raw: &str) -> Result<u64> {
    let (digits, scale) = if let Some(value) = raw.strip_suffix("ms") {
        (value, 1)
    } else if let Some(value) = raw.strip_suffix('s') {
        (value, 1_000)
    } else if let Some(value) = raw.strip_suffix('m') {
        (value, 60_000)
    } else {
        (raw, 1)
    };

    let value: u64 = digits.trim().parse().map_err(|_| {
        Error::Config(format!(
            "{key}='{raw}' is not a valid duration (expected e.g. 500ms, 30s, 2m)"
        ))
    })?;
    value
        .checked_mul(scale)
        .ok_or_else(|| Error::Config(format!("{key}='{raw}' is too large")))
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
