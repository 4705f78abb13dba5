//! The invocation wrapper.
//!
//! [`wrap_handler`] turns a [`Handler`] into a [`WrappedHandler`] that runs every
//! invocation through the same pipeline:
//!
//! 1. Read the remaining time and render the timeout string
//! 2. Classify the cold start
//! 3. Extract the upstream trace and enrich the invocation scope
//! 4. Open the invocation span
//! 5. Arm the timeout watchdog
//! 6. Run the handler
//! 7. Capture the handler error, or the rejected entries of an all-settled result
//! 8. Disarm the watchdog, close the span, flush with a bounded wait
//! 9. Return exactly what the handler returned
//!
//! A [`WrappedHandler`] is also a [`tower::Service`], so it can be handed to
//! `lambda_runtime::run` directly. Streaming handlers go through
//! [`WrappedHandler::into_streaming_service`] instead, which answers with a
//! `lambda_runtime::StreamResponse`.
//!
//! # Example
//!
//! ```no_run
//! use lambda_otel_wrapper::{init_telemetry, wrap_handler, Handler, TelemetryConfig, WrapperConfig};
//! use lambda_runtime::{Error, LambdaEvent};
//! use serde_json::{json, Value};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let client = init_telemetry(TelemetryConfig::default()).await?;
//!
//!     let handler = Handler::from_fn(|event: Value| async move {
//!         Ok::<_, Error>(json!({ "received": event }))
//!     });
//!     let wrapped = wrap_handler(handler, WrapperConfig::from_env(), client);
//!
//!     lambda_runtime::run(wrapped).await
//! }
//! ```

use crate::adapter::{Handler, HandlerFuture, HandlerTags};
use crate::client::{Mechanism, Scope, TelemetryClient};
use crate::cold_start::ColdStartState;
use crate::config::WrapperConfig;
use crate::deadline;
use crate::error::{SettledRejection, WrapperError};
use crate::flush::flush_and_swallow;
use crate::propagation::{self, EventHeaders, PropagationContext};
use crate::span;
use crate::streaming::{self, ResponseBody, ResponseStream, StreamingBody};
use crate::watchdog::{self, TimeoutWarning};
use futures_util::future::BoxFuture;
use lambda_runtime::{Context, Error, LambdaEvent, MetadataPrelude, StreamResponse};
use opentelemetry::trace::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::task::Poll;
use std::time::Instant;
use tokio::sync::oneshot;
use tower::Service;

struct Inner<E, R> {
    handler: Handler<E, R>,
    config: WrapperConfig,
    client: Arc<dyn TelemetryClient>,
    cold_start: Arc<ColdStartState>,
    wrapped_at: Instant,
}

/// A handler running every invocation through the instrumentation pipeline.
///
/// Cloning is cheap; clones share the handler, configuration, client and cold-start state.
pub struct WrappedHandler<E, R> {
    inner: Arc<Inner<E, R>>,
}

impl<E, R> Clone for WrappedHandler<E, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Builder for a [`WrappedHandler`] with non-default collaborators.
pub struct WrapperBuilder<E, R> {
    handler: Handler<E, R>,
    client: Arc<dyn TelemetryClient>,
    config: WrapperConfig,
    cold_start: Option<Arc<ColdStartState>>,
}

impl<E, R> WrapperBuilder<E, R> {
    pub fn new(handler: Handler<E, R>, client: Arc<dyn TelemetryClient>) -> Self {
        Self {
            handler,
            client,
            config: WrapperConfig::default(),
            cold_start: None,
        }
    }

    pub fn config(mut self, config: WrapperConfig) -> Self {
        self.config = config;
        self
    }

    /// Share cold-start state between wrappers, or control it in tests.
    pub fn cold_start(mut self, state: Arc<ColdStartState>) -> Self {
        self.cold_start = Some(state);
        self
    }

    pub fn build(self) -> WrappedHandler<E, R> {
        WrappedHandler {
            inner: Arc::new(Inner {
                handler: self.handler,
                config: self.config,
                client: self.client,
                cold_start: self
                    .cold_start
                    .unwrap_or_else(|| Arc::new(ColdStartState::from_env())),
                wrapped_at: Instant::now(),
            }),
        }
    }
}

/// Wrap `handler` so every invocation is traced, watched for timeouts and flushed.
///
/// `config` is used as given; call [`WrapperConfig::resolve`] first to apply environment
/// overrides.
pub fn wrap_handler<E, R>(
    handler: Handler<E, R>,
    config: WrapperConfig,
    client: Arc<dyn TelemetryClient>,
) -> WrappedHandler<E, R> {
    WrapperBuilder::new(handler, client).config(config).build()
}

impl<E, R> WrappedHandler<E, R>
where
    E: EventHeaders + Send + 'static,
    R: Serialize + Send + 'static,
{
    /// Same tags as the wrapped handler.
    pub fn tags(&self) -> HandlerTags {
        self.inner.handler.tags()
    }

    pub fn config(&self) -> &WrapperConfig {
        &self.inner.config
    }

    /// Stream/body pair sized by the handler's high-water mark.
    pub fn response_channel(&self) -> (ResponseStream, ResponseBody) {
        streaming::channel(self.tags().high_water_mark)
    }

    /// Host-facing service for a streaming handler.
    pub fn into_streaming_service(self) -> StreamingService<E, R> {
        StreamingService { wrapped: self }
    }

    /// Invoke a direct or callback style handler.
    pub async fn invoke(&self, event: E, ctx: Context) -> Result<R, Error> {
        if self.tags().streaming {
            return Err(WrapperError::StreamingHandler.into());
        }

        let propagation = propagation::extract(&event, &ctx);
        let handler = &self.inner.handler;
        let handler_ctx = ctx.clone();
        self.instrument(&ctx, propagation, None, move || {
            handler.call(event, handler_ctx)
        })
        .await
    }

    /// Invoke a streaming handler, which writes its response to `stream`.
    pub async fn invoke_streaming(
        &self,
        event: E,
        stream: ResponseStream,
        ctx: Context,
    ) -> Result<R, Error> {
        if !self.tags().streaming {
            return Err(WrapperError::NotStreaming.into());
        }

        let propagation = propagation::extract(&event, &ctx);
        let handler = &self.inner.handler;
        let handler_ctx = ctx.clone();
        let handler_stream = stream.clone();
        self.instrument(&ctx, propagation, Some(&stream), move || {
            handler.call_streaming(event, handler_stream, handler_ctx)
        })
        .await
    }

    async fn instrument<F>(
        &self,
        ctx: &Context,
        propagation: PropagationContext,
        stream: Option<&ResponseStream>,
        start: F,
    ) -> Result<R, Error>
    where
        F: FnOnce() -> Result<HandlerFuture<R>, WrapperError>,
    {
        let inner = &self.inner;
        let remaining = deadline::remaining_time(ctx);
        let timeout = deadline::format_timeout(remaining);
        let cold_start = inner.cold_start.on_invocation();

        tracing::debug!(
            request_id = %ctx.request_id,
            remaining_ms = remaining.as_millis() as u64,
            cold_start,
            "WrappedHandler.invoke: starting invocation"
        );

        let mut scope = Scope::new();
        span::enrich_scope(
            &mut scope,
            ctx,
            inner.wrapped_at.elapsed(),
            remaining,
            &inner.config,
            &propagation,
        );

        let traced = inner.config.start_trace && !inner.handler.is_externally_traced();
        let mut span = span::open(
            inner.client.as_ref(),
            ctx,
            cold_start,
            &propagation,
            traced,
            &mut scope,
        );

        let mut watchdog = watchdog::arm(
            remaining,
            &inner.config,
            &inner.client,
            TimeoutWarning {
                function_name: span::function_name(ctx).to_string(),
                timeout,
                scope: scope.clone(),
            },
        );

        if let Some(stream) = stream {
            let client = Arc::clone(&inner.client);
            let stream_scope = scope.clone();
            stream.on_error(move |error| {
                client.capture_exception(error, &Mechanism::stream(), &stream_scope);
            });
        }

        let future = start()?;
        let result = match span.otel_context() {
            Some(cx) => future.with_context(cx).await,
            None => future.await,
        };

        match &result {
            Ok(value) if inner.config.capture_all_settled_reasons => {
                self.capture_settled_rejections(value, &scope);
            }
            Ok(_) => {}
            Err(error) => {
                inner
                    .client
                    .capture_exception(error.as_ref(), &Mechanism::handler(), &scope);
            }
        }

        watchdog.disarm();
        let error_message = result.as_ref().err().map(|e| e.to_string());
        span.close(error_message.as_deref());
        flush_and_swallow(inner.client.as_ref(), inner.config.flush_timeout).await;

        result
    }

    fn capture_settled_rejections(&self, value: &R, scope: &Scope) {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(error) => {
                tracing::debug!(
                    error = %error,
                    "WrappedHandler.invoke: result is not serializable, skipping settled check"
                );
                return;
            }
        };

        for reason in rejected_reasons(&value) {
            let rejection = SettledRejection::new(reason.clone());
            self.inner
                .client
                .capture_exception(&rejection, &Mechanism::handler(), scope);
        }
    }
}

/// Rejected reasons of an all-settled style array, in order.
///
/// Returns nothing unless every element is an object with `status` and either `value`
/// or `reason`.
pub(crate) fn rejected_reasons(value: &Value) -> Vec<&Value> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };

    let all_settled = items.iter().all(|item| {
        item.as_object().is_some_and(|entry| {
            entry.contains_key("status")
                && (entry.contains_key("value") || entry.contains_key("reason"))
        })
    });
    if !all_settled {
        return Vec::new();
    }

    items
        .iter()
        .filter(|item| item["status"] == "rejected")
        .filter_map(|item| item.get("reason"))
        .filter(|reason| is_truthy(reason))
        .collect()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

impl<E, R> Service<LambdaEvent<E>> for WrappedHandler<E, R>
where
    E: EventHeaders + Send + 'static,
    R: Serialize + Send + 'static,
{
    type Response = R;
    type Error = Error;
    type Future = BoxFuture<'static, Result<R, Error>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: LambdaEvent<E>) -> Self::Future {
        let wrapped = self.clone();
        Box::pin(async move {
            let (event, ctx) = req.into_parts();
            wrapped.invoke(event, ctx).await
        })
    }
}

/// [`Service`] running a wrapped streaming handler for `lambda_runtime::run`.
///
/// Each call starts the invocation on its own task and answers right away with a
/// [`StreamingBody`], so chunks reach the runtime while the handler is still writing.
pub struct StreamingService<E, R> {
    wrapped: WrappedHandler<E, R>,
}

impl<E, R> Clone for StreamingService<E, R> {
    fn clone(&self) -> Self {
        Self {
            wrapped: self.wrapped.clone(),
        }
    }
}

impl<E, R> Service<LambdaEvent<E>> for StreamingService<E, R>
where
    E: EventHeaders + Send + 'static,
    R: Serialize + Send + 'static,
{
    type Response = StreamResponse<StreamingBody>;
    type Error = Error;
    type Future = BoxFuture<'static, Result<Self::Response, Error>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: LambdaEvent<E>) -> Self::Future {
        let wrapped = self.wrapped.clone();
        Box::pin(async move {
            if !wrapped.tags().streaming {
                return Err(WrapperError::NotStreaming.into());
            }

            let (event, ctx) = req.into_parts();
            let (stream, body) = wrapped.response_channel();
            let (outcome_tx, outcome_rx) = oneshot::channel();

            tokio::spawn(async move {
                let outcome = wrapped.invoke_streaming(event, stream, ctx).await;
                if outcome_tx.send(outcome.map(|_| ())).is_err() {
                    tracing::debug!("streaming_service: response body dropped before completion");
                }
            });

            Ok(StreamResponse {
                metadata_prelude: MetadataPrelude::default(),
                stream: StreamingBody::new(body, outcome_rx),
            })
        })
    }
}
