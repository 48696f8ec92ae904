use std::time::Duration;

use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};
use tokio::time::Instant;

use crate::{CallError, CallErrorKind, FailureKind, Transport, TransportRequest};

/// Joins `path` onto `base_url` with exactly one `/` between them.
///
/// Absolute `http(s)://` paths and a missing or empty base are passed through.
///
/// Example: `("https://api.test/", "/items/7")` → `"https://api.test/items/7"`
pub fn join_url(base_url: Option<&str>, path: &str) -> String {
    let base = match base_url.map(str::trim) {
        Some(base) if !base.is_empty() => base,
        _ => return path.to_owned(),
    };
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_owned();
    }

    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_owned()
    } else {
        format!("{base}/{path}")
    }
}

/// Rejects URLs that no attempt could ever send, such as a relative path
/// with no base URL configured.
pub(crate) fn check_url(method: &Method, url: &str) -> Result<(), CallError> {
    reqwest::Url::parse(url).map(drop).map_err(|err| {
        CallError::new(
            CallErrorKind::InvalidRequest,
            method,
            url,
            0,
            err.to_string(),
            Duration::ZERO,
        )
    })
}

/// A 2xx response, fully read.
#[derive(Debug)]
pub(crate) struct Completed {
    pub status: u16,
    pub body: String,
    pub elapsed: Duration,
}

/// Encodes a request payload once, before any attempt is made.
pub(crate) fn encode_body<B>(method: &Method, url: &str, body: &B) -> Result<Vec<u8>, CallError>
where
    B: Serialize + ?Sized,
{
    serde_json::to_vec(body).map_err(|err| {
        CallError::new(
            CallErrorKind::Serialization,
            method,
            url,
            0,
            err.to_string(),
            Duration::ZERO,
        )
    })
}

/// Performs one attempt and checks its status.
pub(crate) async fn execute_once(
    transport: &dyn Transport,
    method: &Method,
    url: &str,
    body: Option<&[u8]>,
    timeout: Duration,
) -> Result<Completed, CallError> {
    let request = TransportRequest {
        method: method.clone(),
        url: url.to_owned(),
        body: body.map(<[u8]>::to_vec),
        timeout,
    };

    let started = Instant::now();
    let result = transport.send(request).await;
    let elapsed = started.elapsed();

    let response = result.map_err(|failure| {
        let (kind, message) = match failure.kind {
            FailureKind::InvalidRequest => (CallErrorKind::InvalidRequest, failure.message),
            FailureKind::TimedOut => (
                CallErrorKind::Transport,
                format!("timed out after {timeout:?}: {}", failure.message),
            ),
            FailureKind::Network => (CallErrorKind::Transport, failure.message),
        };
        CallError::new(kind, method, url, 0, message, elapsed)
    })?;

    if !(200..300).contains(&response.status) {
        return Err(CallError::new(
            CallErrorKind::Status,
            method,
            url,
            response.status,
            response.body,
            elapsed,
        ));
    }

    Ok(Completed {
        status: response.status,
        body: response.body,
        elapsed,
    })
}

/// Decodes a successful body as JSON. An empty body reads as `null`.
pub(crate) fn decode_body<T>(
    method: &Method,
    url: &str,
    completed: &Completed,
) -> Result<T, CallError>
where
    T: DeserializeOwned,
{
    let text = if completed.body.trim().is_empty() {
        "null"
    } else {
        completed.body.as_str()
    };
    serde_json::from_str(text).map_err(|err| {
        CallError::new(
            CallErrorKind::Decode,
            method,
            url,
            completed.status,
            format!("{err}; body: {}", completed.body),
            completed.elapsed,
        )
    })
}
