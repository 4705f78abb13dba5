//! Invocation wrapper for AWS Lambda handlers.
//!
//! Wraps a handler so that every invocation continues the caller's trace, reports handler
//! errors, warns shortly before the function times out, and flushes telemetry before the
//! result goes back to the runtime. The handler's result or error is always returned
//! unchanged.
//!
//! # Features
//!
//! - **Handler styles**: direct (`async fn`), callback, and response streaming handlers,
//!   normalized once when the handler is built
//! - **Trace continuation**: `sentry-trace` and `baggage` from the invocation client
//!   context or the event headers
//! - **Timeout warning**: a one-shot warning message fired ahead of the deadline
//! - **Bounded flush**: flush failures and slow exporters never affect the response
//! - **Cold-start detection**: per-process state, aware of provisioned concurrency
//! - **OpenTelemetry client**: bundled [`TelemetryClient`] on `opentelemetry_sdk`
//!
//! # Quick Start
//!
//! ```no_run
//! use lambda_otel_wrapper::{init_telemetry, wrap_handler, Handler, TelemetryConfig, WrapperConfig};
//! use lambda_runtime::{Context, Error};
//! use serde_json::{json, Value};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let client = init_telemetry(TelemetryConfig::default()).await?;
//!
//!     let handler = Handler::with_context(|event: Value, ctx: Context| async move {
//!         Ok::<_, Error>(json!({ "request_id": ctx.request_id, "event": event }))
//!     });
//!
//!     lambda_runtime::run(wrap_handler(handler, WrapperConfig::from_env(), client)).await
//! }
//! ```
//!
//! # Callback handlers
//!
//! A callback handler settles through [`Callback`]; it may also return a [`Deferred`]
//! future, in which case whichever settles first wins.
//!
//! ```no_run
//! use lambda_otel_wrapper::{Callback, Handler};
//! use lambda_runtime::Context;
//! use serde_json::{json, Value};
//!
//! let handler = Handler::callback(|event: Value, _ctx: Context, callback: Callback<Value>| {
//!     callback.succeed(json!({ "ok": event }));
//! });
//! ```
//!
//! # Configuration
//!
//! [`WrapperConfig`] defaults can be changed in code with its builder, and overridden with
//! environment variables through [`WrapperConfig::resolve`]:
//!
//! - `LAMBDA_WRAPPER_FLUSH_TIMEOUT_MS`
//! - `LAMBDA_WRAPPER_CAPTURE_TIMEOUT_WARNING`
//! - `LAMBDA_WRAPPER_TIMEOUT_WARNING_LIMIT_MS`
//! - `LAMBDA_WRAPPER_START_TRACE`

mod adapter;
mod client;
mod cold_start;
mod config;
pub mod constants;
mod deadline;
mod error;
mod flush;
mod layer;
mod propagation;
mod resource;
mod span;
mod streaming;
mod telemetry;
mod watchdog;
mod wrapper;

#[cfg(test)]
mod test_support;

pub use adapter::{Callback, Deferred, Handler, HandlerFuture, HandlerTags};
pub use client::{InvocationSpan, Level, Mechanism, Scope, SpanOptions, TelemetryClient};
pub use cold_start::ColdStartState;
pub use config::{WrapperConfig, WrapperConfigBuilder};
pub use deadline::{format_timeout, remaining_time};
pub use error::{FlushError, SettledRejection, StreamError, WrapperError};
pub use flush::flush_and_swallow;
pub use layer::InvocationLayer;
pub use propagation::{extract as extract_propagation, EventHeaders, PropagationContext};
pub use resource::lambda_resource;
pub use streaming::{channel, ResponseBody, ResponseStream, StreamingBody};
pub use telemetry::{
    init_telemetry, parse_trace_parent, OtelClient, TelemetryConfig, TelemetryConfigBuilder,
};
pub use watchdog::TIMEOUT_TAG;
pub use wrapper::{wrap_handler, StreamingService, WrappedHandler, WrapperBuilder};

#[cfg(doctest)]
#[macro_use]
extern crate doc_comment;

#[cfg(doctest)]
use doc_comment::doctest;

#[cfg(doctest)]
doctest!("../README.md", readme);
