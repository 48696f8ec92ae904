use crate::{CallError, CallErrorKind};

/// Decides whether a failed attempt is worth repeating.
///
/// Transport failures (no response at all) are presumed transient, as are
/// `408`, `429` and every `5xx`. Encoding, request building and decoding
/// failures would repeat identically and are never retried, whatever status
/// came with them.
pub fn is_retryable(err: &CallError) -> bool {
    match err.kind {
        CallErrorKind::Transport => true,
        CallErrorKind::Status => matches!(err.status, 0 | 408 | 429 | 500..=599),
        CallErrorKind::Serialization | CallErrorKind::InvalidRequest | CallErrorKind::Decode => {
            false
        }
    }
}
