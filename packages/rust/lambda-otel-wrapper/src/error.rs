//! Error types used by the wrapper.
//!
//! Handler errors are never wrapped: they stay `lambda_runtime::Error` from the
//! user's handler to the host. The types here cover the wrapper's own failure
//! modes, none of which may replace a handler result.

use std::time::Duration;

/// Failure reported by [`TelemetryClient::flush`](crate::TelemetryClient::flush).
#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    #[error("telemetry flush did not complete within {0:?}")]
    Timeout(Duration),
    #[error("telemetry export failed: {0}")]
    Export(String),
}

/// Failure writing to a [`ResponseStream`](crate::ResponseStream).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// `end()` was already called on the stream.
    #[error("write after end of response stream")]
    Ended,
    /// The reading side of the stream went away.
    #[error("response stream closed by the host")]
    Closed,
}

/// Returned when a wrapped handler is invoked with the wrong calling convention.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WrapperError {
    #[error("handler is tagged as streaming and must be invoked with a response stream")]
    StreamingHandler,
    #[error("handler is not tagged as streaming")]
    NotStreaming,
}

/// A rejected entry of an all-settled style result, captured as an exception.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct SettledRejection {
    message: String,
    reason: serde_json::Value,
}

impl SettledRejection {
    pub fn new(reason: serde_json::Value) -> Self {
        let message = match &reason {
            serde_json::Value::String(text) => text.clone(),
            serde_json::Value::Object(map) => map
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| reason.to_string()),
            other => other.to_string(),
        };
        Self { message, reason }
    }

    /// The raw `reason` value as it appeared in the handler result.
    pub fn reason(&self) -> &serde_json::Value {
        &self.reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_settled_rejection_message() {
        assert_eq!(SettledRejection::new(json!("boom")).to_string(), "boom");
        assert_eq!(
            SettledRejection::new(json!({"message": "bad item", "code": 3})).to_string(),
            "bad item"
        );
        assert_eq!(SettledRejection::new(json!(42)).to_string(), "42");
    }
}
