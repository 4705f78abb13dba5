use lambda_otel_wrapper::{
    init_telemetry, wrap_handler, Handler, ResponseStream, TelemetryConfig, WrapperConfig,
};
use lambda_runtime::{Context, Error};
use serde_json::Value;
use std::time::Duration;
use tracing::info;

/// Streams `count` lines from the event, one every 100ms.
async fn handler(event: Value, stream: ResponseStream, ctx: Context) -> Result<(), Error> {
    let count = event["count"].as_u64().unwrap_or(3);
    info!(count, request_id = %ctx.request_id, "streaming response");

    for line in 0..count {
        stream.write(format!("line {}\n", line)).await?;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    stream.end();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let client = init_telemetry(TelemetryConfig::default()).await?;

    let service = wrap_handler(
        Handler::streaming(handler).with_high_water_mark(4),
        WrapperConfig::from_env(),
        client,
    )
    .into_streaming_service();

    lambda_runtime::run(service).await
}
