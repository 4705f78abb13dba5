//! Constants for the lambda-otel-wrapper package.
//!
//! This file centralizes all constants to ensure consistency across the codebase
//! and provide a single source of truth for configuration parameters.

/// Environment variable names for configuration.
pub mod env_vars {
    /// Overrides `WrapperConfig::flush_timeout` (milliseconds).
    pub const FLUSH_TIMEOUT_MS: &str = "LAMBDA_WRAPPER_FLUSH_TIMEOUT_MS";

    /// Overrides `WrapperConfig::capture_timeout_warning` ("true"/"false").
    pub const CAPTURE_TIMEOUT_WARNING: &str = "LAMBDA_WRAPPER_CAPTURE_TIMEOUT_WARNING";

    /// Overrides `WrapperConfig::timeout_warning_limit` (milliseconds).
    pub const TIMEOUT_WARNING_LIMIT_MS: &str = "LAMBDA_WRAPPER_TIMEOUT_WARNING_LIMIT_MS";

    /// Overrides `WrapperConfig::start_trace` ("true"/"false").
    pub const START_TRACE: &str = "LAMBDA_WRAPPER_START_TRACE";

    /// Controls whether to enable the fmt layer for logging regardless of code settings.
    pub const ENABLE_FMT_LAYER: &str = "LAMBDA_TRACING_ENABLE_FMT_LAYER";

    /// Set by the platform to "provisioned-concurrency" for pre-warmed environments.
    pub const INITIALIZATION_TYPE: &str = "AWS_LAMBDA_INITIALIZATION_TYPE";

    /// Region used to build the CloudWatch console URL.
    pub const AWS_REGION: &str = "AWS_REGION";

    /// AWS Lambda function name (used as fallback service name).
    pub const AWS_LAMBDA_FUNCTION_NAME: &str = "AWS_LAMBDA_FUNCTION_NAME";

    /// AWS Lambda function version.
    pub const AWS_LAMBDA_FUNCTION_VERSION: &str = "AWS_LAMBDA_FUNCTION_VERSION";

    /// Service name for telemetry.
    pub const SERVICE_NAME: &str = "OTEL_SERVICE_NAME";

    /// Candidates for the `server_name` tag, in order of preference.
    pub const SERVER_NAME_SOURCES: [&str; 3] = ["_AWS_XRAY_DAEMON_ADDRESS", "SENTRY_NAME", "HOSTNAME"];

    /// Log format selected for the function ("JSON" or "Text").
    pub const LOG_FORMAT: &str = "AWS_LAMBDA_LOG_FORMAT";
}

/// Default values for configuration parameters.
pub mod defaults {
    /// Default bound on the telemetry flush after each invocation.
    pub const FLUSH_TIMEOUT_MS: u64 = 2000;

    /// Default lead time before the deadline at which the timeout warning fires.
    pub const TIMEOUT_WARNING_LIMIT_MS: u64 = 500;

    /// Invocations arriving later than this after environment init are not cold starts.
    pub const MAX_INIT_DURATION_MS: u64 = 10_000;

    /// Default number of chunks buffered by a response stream.
    pub const STREAM_HIGH_WATER_MARK: usize = 16;
}

/// Header and client-context keys consumed by trace propagation.
pub mod headers {
    pub const TRACE_PARENT: &str = "sentry-trace";
    pub const BAGGAGE: &str = "baggage";
}

/// Span and event attribute keys.
pub mod attributes {
    pub const OP: &str = "sentry.op";
    pub const SOURCE: &str = "sentry.source";
    pub const ORIGIN: &str = "sentry.origin";
    pub const FAAS_COLDSTART: &str = "faas.coldstart";
    pub const FAAS_INVOCATION_ID: &str = "faas.invocation_id";
    pub const CLOUD_RESOURCE_ID: &str = "cloud.resource_id";
    pub const CLOUD_ACCOUNT_ID: &str = "cloud.account.id";
    pub const EXCEPTION_TYPE: &str = "exception.type";
    pub const EXCEPTION_MESSAGE: &str = "exception.message";
    pub const MECHANISM_TYPE: &str = "exception.mechanism.type";
    pub const MECHANISM_HANDLED: &str = "exception.mechanism.handled";
    pub const MESSAGE_LEVEL: &str = "message.level";
}

/// Fixed values written on the invocation span and captured events.
pub mod values {
    pub const OP_FUNCTION: &str = "function.aws.lambda";
    pub const SOURCE_COMPONENT: &str = "component";
    pub const ORIGIN_SERVERLESS: &str = "auto.function.serverless";
    pub const MECHANISM_HANDLER: &str = "auto.function.aws_serverless.handler";
    pub const MECHANISM_STREAM: &str = "auto.function.aws_serverless.stream";
    pub const PROVISIONED_CONCURRENCY: &str = "provisioned-concurrency";
}
