use aws_lambda_events::event::apigw::ApiGatewayV2httpRequest;
use lambda_otel_wrapper::{init_telemetry, wrap_handler, Handler, TelemetryConfig, WrapperConfig};
use lambda_runtime::{Context, Error};
use serde_json::{json, Value};
use std::fmt::{self, Display};
use tracing::{error, info, instrument};

#[derive(Debug)]
enum ErrorType {
    Expected,
    Unexpected,
}

impl Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for ErrorType {}

#[instrument(skip(event), level = "info", err)]
async fn nested_function(event: &ApiGatewayV2httpRequest) -> Result<String, ErrorType> {
    info!("Nested function called");

    match event.raw_path.as_deref() {
        Some("/error") => Err(ErrorType::Expected),
        Some("/crash") => Err(ErrorType::Unexpected),
        _ => Ok("success".to_string()),
    }
}

/// API Gateway handler: `/error` answers 400, `/crash` fails the invocation.
async fn handler(event: ApiGatewayV2httpRequest, ctx: Context) -> Result<Value, Error> {
    info!(
        request_id = %ctx.request_id,
        path = event.raw_path.as_deref().unwrap_or("/"),
        "handling request"
    );

    match nested_function(&event).await {
        Ok(_) => Ok(json!({
            "statusCode": 200,
            "body": format!("Hello from request {}", ctx.request_id)
        })),
        Err(ErrorType::Expected) => {
            error!("Expected error occurred");
            Ok(json!({
                "statusCode": 400,
                "body": "{\"message\": \"This is an expected error\"}"
            }))
        }
        Err(ErrorType::Unexpected) => Err(ErrorType::Unexpected.into()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let client = init_telemetry(TelemetryConfig::default()).await?;

    let wrapped = wrap_handler(
        Handler::with_context(handler),
        WrapperConfig::from_env(),
        client,
    );

    lambda_runtime::run(wrapped).await
}
