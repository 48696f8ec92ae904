use std::fmt;
use std::time::Duration;

use reqwest::Method;

/// Which stage of a single attempt produced a [`CallError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CallErrorKind {
    /// Request body could not be encoded as JSON.
    Serialization,
    /// The request could not be built, usually a malformed or relative URL.
    InvalidRequest,
    /// No response was received (connect, DNS, timeout, body read).
    Transport,
    /// A response was received with a status outside `200..300`.
    Status,
    /// A 2xx response body could not be decoded into the requested type.
    Decode,
}

/// Failure of one HTTP attempt, with enough context to log or report it.
#[derive(Clone, Debug, PartialEq)]
pub struct CallError {
    pub kind: CallErrorKind,
    pub method: Method,
    pub url: String,
    /// HTTP status, or `0` when no response was received.
    pub status: u16,
    pub message: String,
    pub elapsed: Duration,
}

impl CallError {
    pub(crate) fn new(
        kind: CallErrorKind,
        method: &Method,
        url: &str,
        status: u16,
        message: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            kind,
            method: method.clone(),
            url: url.to_owned(),
            status,
            message: message.into(),
            elapsed,
        }
    }

    /// Whether another attempt may succeed. See [`crate::is_retryable`].
    pub fn is_retryable(&self) -> bool {
        crate::classify::is_retryable(self)
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            CallErrorKind::Serialization => write!(
                f,
                "HTTP {} {}: failed to encode request body: {}",
                self.method, self.url, self.message
            ),
            CallErrorKind::InvalidRequest => write!(
                f,
                "HTTP {} {}: invalid request: {}",
                self.method, self.url, self.message
            ),
            CallErrorKind::Decode => write!(
                f,
                "HTTP {} {}: failed to decode response body: {} (took {:?})",
                self.method, self.url, self.message, self.elapsed
            ),
            CallErrorKind::Transport | CallErrorKind::Status if self.status == 0 => write!(
                f,
                "HTTP {} {} failed: {} (took {:?})",
                self.method, self.url, self.message, self.elapsed
            ),
            CallErrorKind::Transport | CallErrorKind::Status => write!(
                f,
                "HTTP {} {} returned {}: {} (took {:?})",
                self.method, self.url, self.status, self.message, self.elapsed
            ),
        }
    }
}

impl std::error::Error for CallError {}

/// Suspension point at which a call observed cancellation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CancelStage {
    TokenWait,
    Request,
    RetryDelay,
}

impl fmt::Display for CancelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TokenWait => "waiting for a rate-limit token",
            Self::Request => "waiting for the response",
            Self::RetryDelay => "waiting to retry",
        })
    }
}

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Non-retryable failure, returned exactly as the attempt produced it.
    #[error(transparent)]
    Call(CallError),
    /// Every allowed attempt failed with a retryable error.
    #[error("request failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: CallError,
    },
    /// The caller's cancellation signal fired.
    #[error("request cancelled while {stage}")]
    Cancelled { stage: CancelStage },
    /// The client was closed; the rate limiter admits no further calls.
    #[error("client is closed")]
    Closed,
    /// Invalid configuration or client construction failure.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// The attempt error behind a `Call` or `Exhausted` failure.
    pub fn call_error(&self) -> Option<&CallError> {
        match self {
            Self::Call(err) | Self::Exhausted { last: err, .. } => Some(err),
            _ => None,
        }
    }

    /// HTTP status of the underlying attempt, `0` if none was received.
    pub fn status(&self) -> Option<u16> {
        self.call_error().map(|err| err.status)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl From<CallError> for Error {
    fn from(err: CallError) -> Self {
        Self::Call(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_error(status: u16) -> CallError {
        CallError::new(
            CallErrorKind::Status,
            &Method::GET,
            "https://api.example.test/items/7",
            status,
            "upstream unavailable",
            Duration::from_millis(12),
        )
    }

    #[test]
    fn status_error_display_includes_status_and_message() {
        let text = status_error(503).to_string();
        assert_eq!(
            text,
            "HTTP GET https://api.example.test/items/7 returned 503: upstream unavailable (took 12ms)"
        );
    }

    #[test]
    fn transport_error_display_omits_status() {
        let err = CallError::new(
            CallErrorKind::Transport,
            &Method::POST,
            "http://127.0.0.1:9/items",
            0,
            "connection refused",
            Duration::from_millis(3),
        );
        assert_eq!(
            err.to_string(),
            "HTTP POST http://127.0.0.1:9/items failed: connection refused (took 3ms)"
        );
    }

    #[test]
    fn invalid_request_display_names_the_url() {
        let err = CallError::new(
            CallErrorKind::InvalidRequest,
            &Method::GET,
            "/items",
            0,
            "relative URL without a base",
            Duration::ZERO,
        );
        assert_eq!(
            err.to_string(),
            "HTTP GET /items: invalid request: relative URL without a base"
        );
    }

    #[test]
    fn exhausted_message_carries_attempt_count() {
        let err = Error::Exhausted {
            attempts: 4,
            last: status_error(503),
        };
        assert!(err.to_string().starts_with("request failed after 4 attempts: "));
        assert_eq!(err.status(), Some(503));
    }

    #[test]
    fn cancelled_names_the_suspension_point() {
        let err = Error::Cancelled {
            stage: CancelStage::RetryDelay,
        };
        assert_eq!(err.to_string(), "request cancelled while waiting to retry");
        assert!(err.is_cancelled());
        assert!(err.call_error().is_none());
    }
}
