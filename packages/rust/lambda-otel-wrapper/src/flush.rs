//! Bounded telemetry flush at the end of every invocation.

use crate::client::TelemetryClient;
use crate::error::FlushError;
use std::time::Duration;

/// Flush `client`, waiting at most `flush_timeout`.
///
/// The client receives exactly `flush_timeout` as its own bound; the wait is also capped
/// here so a client that ignores its bound cannot hold up the response. Failures are
/// logged at debug level and never returned.
pub async fn flush_and_swallow(client: &dyn TelemetryClient, flush_timeout: Duration) {
    let outcome = match tokio::time::timeout(flush_timeout, client.flush(flush_timeout)).await {
        Ok(result) => result,
        Err(_) => Err(FlushError::Timeout(flush_timeout)),
    };

    if let Err(error) = outcome {
        tracing::debug!(
            target: "lambda_otel_wrapper::flush",
            error = %error,
            "flush_and_swallow: telemetry flush failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingClient;

    #[tokio::test]
    async fn test_passes_exact_timeout() {
        let client = RecordingClient::new();
        flush_and_swallow(&client, Duration::from_millis(1337)).await;
        assert_eq!(client.flushes(), vec![Duration::from_millis(1337)]);
    }

    #[tokio::test]
    async fn test_swallows_flush_errors() {
        let client = RecordingClient::failing_flush();
        flush_and_swallow(&client, Duration::from_millis(100)).await;
        assert_eq!(client.flushes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounds_slow_flush() {
        let client = RecordingClient::with_flush_delay(Duration::from_secs(30));
        let started = tokio::time::Instant::now();

        flush_and_swallow(&client, Duration::from_millis(2000)).await;

        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(client.flushes(), vec![Duration::from_millis(2000)]);
    }
}
