//! HTTP outcome -> `TransportError` classification.

use std::time::Duration;

use serde_json::Value;

use crate::domain::errors::TransportError;

/// Classify a non-2xx response.
pub fn classify_status(status: u16, retry_after: Option<&str>, body: &str) -> TransportError {
    let message = error_message(status, body);
    match status {
        401 | 403 => TransportError::Unauthorized(message),
        429 => TransportError::RateLimited {
            retry_after: retry_after.and_then(parse_retry_after),
        },
        404 => TransportError::NotFound(message),
        408 => TransportError::NetworkTimeout(Duration::ZERO),
        400..=499 => TransportError::Validation(message),
        _ => TransportError::ServerError { status, message },
    }
}

/// Classify a failure that produced no usable response.
pub fn classify_reqwest(err: &reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::NetworkTimeout(timeout)
    } else if err.is_decode() || err.is_body() {
        TransportError::Protocol(err.to_string())
    } else if let Some(status) = err.status() {
        classify_status(status.as_u16(), None, "")
    } else {
        TransportError::ConnectionReset(err.to_string())
    }
}

/// `Retry-After` in delta-seconds form. HTTP dates are not used by the service.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Best human readable message: `message`, then `error`, then the status.
fn error_message(status: u16, body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let from_body = parsed.as_ref().and_then(|v| {
        v.get("message")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .or_else(|| match v.get("error")? {
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            })
    });
    from_body
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("HTTP {status}"))
}
