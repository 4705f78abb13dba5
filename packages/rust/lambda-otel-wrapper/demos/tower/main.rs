use lambda_otel_wrapper::{init_telemetry, InvocationLayer, TelemetryConfig, WrapperConfig};
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::{json, Value};
use std::time::Duration;
use tower::Layer;
use tracing::info;

/// Sleeps for `delay_ms` from the event, to show the timeout warning on short-lived functions.
async fn handler(event: LambdaEvent<Value>) -> Result<Value, Error> {
    let delay = event.payload["delay_ms"].as_u64().unwrap_or(0);
    info!(delay, "processing event");
    tokio::time::sleep(Duration::from_millis(delay)).await;

    Ok(json!({
        "statusCode": 200,
        "body": format!("Slept {}ms in request {}", delay, event.context.request_id)
    }))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let client = init_telemetry(TelemetryConfig::builder().enable_fmt_layer(true).build()).await?;

    let config = WrapperConfig::builder()
        .timeout_warning_limit(Duration::from_millis(1000))
        .build()
        .resolve();

    let service = InvocationLayer::new(client)
        .with_config(config)
        .layer(service_fn(handler));

    lambda_runtime::run(service).await
}
