//! OpenTelemetry-backed telemetry client and process-wide setup.
//!
//! - [`OtelClient`]: the bundled [`TelemetryClient`], built on an [`SdkTracerProvider`]
//! - [`TelemetryConfig`]: builder for processors, propagators, resource and logging
//! - [`init_telemetry`]: installs the provider, propagators and `tracing` subscriber and
//!   returns the client to pass to [`wrap_handler`](crate::wrap_handler)
//!
//! # Trace continuation
//!
//! The invocation span continues the trace named by the `sentry-trace` value of the
//! invocation (`<32 hex trace id>-<16 hex span id>[-<0|1>]`). The `baggage` value is
//! decoded with the W3C baggage propagator and attached to the handler's context.
//!
//! # Captured events
//!
//! Exceptions and messages become short child spans of the invocation span carrying an
//! `exception` or `message` event. Scope tags, contexts and the transaction name are
//! recorded as attributes (`tag.<key>`, `context.<name>`, `transaction`).
//!
//! # Environment Variables
//!
//! - `RUST_LOG` or `AWS_LAMBDA_LOG_LEVEL`: log filter for the `tracing` subscriber
//! - `AWS_LAMBDA_LOG_FORMAT`: "JSON" switches the fmt layer to JSON output
//! - `LAMBDA_TRACING_ENABLE_FMT_LAYER`: "true" forces the fmt layer on
//! - `OTEL_EXPORTER_OTLP_*`: endpoint and headers of the default OTLP exporter

use crate::client::{InvocationSpan, Level, Mechanism, Scope, SpanOptions, TelemetryClient};
use crate::constants::{attributes, env_vars, headers};
use crate::error::FlushError;
use crate::propagation::PropagationContext;
use crate::resource::lambda_resource;
use crate::span::TRACE_CONTEXT;
use bon::Builder;
use futures_util::future::BoxFuture;
use lambda_runtime::Error;
use opentelemetry::propagation::{TextMapCompositePropagator, TextMapPropagator};
use opentelemetry::trace::{
    Span as _, SpanContext, SpanId, SpanKind, Status, TraceContextExt, TraceFlags, TraceId,
    TraceState, Tracer as _, TracerProvider,
};
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::{Protocol, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_sdk::trace::{
    BatchSpanProcessor, SdkTracerProvider, SpanProcessor, TracerProviderBuilder,
};
use opentelemetry_sdk::Resource;
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;

const TRACER_NAME: &str = env!("CARGO_PKG_NAME");

type WrapperTracer = <SdkTracerProvider as TracerProvider>::Tracer;

/// Parse a `sentry-trace` value into a remote span context.
///
/// A missing sampling flag defers the decision to this process and is treated as sampled.
pub fn parse_trace_parent(value: &str) -> Option<SpanContext> {
    let mut parts = value.trim().split('-');
    let trace_id = parts.next().filter(|p| p.len() == 32)?;
    let span_id = parts.next().filter(|p| p.len() == 16)?;
    let sampled = match parts.next() {
        None => true,
        Some("1") => true,
        Some("0") => false,
        Some(_) => return None,
    };
    if parts.next().is_some() {
        return None;
    }

    let trace_id = TraceId::from_hex(trace_id).ok()?;
    let span_id = SpanId::from_hex(span_id).ok()?;
    if trace_id == TraceId::INVALID || span_id == SpanId::INVALID {
        return None;
    }

    let flags = if sampled {
        TraceFlags::SAMPLED
    } else {
        TraceFlags::default()
    };
    Some(SpanContext::new(
        trace_id,
        span_id,
        flags,
        true,
        TraceState::default(),
    ))
}

/// Parent context for an invocation span: remote span from `sentry-trace`, plus baggage.
fn parent_context(parent: &PropagationContext) -> opentelemetry::Context {
    let mut cx = opentelemetry::Context::new();

    if let Some(baggage) = &parent.baggage {
        let carrier = HashMap::from([(headers::BAGGAGE.to_string(), baggage.clone())]);
        cx = BaggagePropagator::new().extract_with_context(&cx, &carrier);
    }

    if let Some(span_context) = parent.trace_parent.as_deref().and_then(parse_trace_parent) {
        cx = cx.with_remote_span_context(span_context);
    }

    cx
}

/// Parent for spans recorded from a scope: the invocation span when known, else the upstream trace.
fn scope_parent(scope: &Scope) -> opentelemetry::Context {
    let Some(trace) = scope.context(TRACE_CONTEXT) else {
        return opentelemetry::Context::new();
    };

    let ids = trace["trace_id"].as_str().zip(trace["span_id"].as_str());
    if let Some((trace_id, span_id)) = ids {
        if let Some(span_context) = parse_trace_parent(&format!("{}-{}-1", trace_id, span_id)) {
            return opentelemetry::Context::new().with_remote_span_context(span_context);
        }
    }

    match trace["sentry_trace"].as_str().and_then(parse_trace_parent) {
        Some(span_context) => opentelemetry::Context::new().with_remote_span_context(span_context),
        None => opentelemetry::Context::new(),
    }
}

fn scope_attributes(scope: &Scope) -> Vec<KeyValue> {
    let mut attrs: Vec<KeyValue> = scope
        .tags()
        .iter()
        .map(|(key, value)| KeyValue::new(format!("tag.{}", key), value.clone()))
        .collect();

    attrs.extend(scope.contexts().iter().map(|(name, value)| {
        KeyValue::new(format!("context.{}", name), value.to_string())
    }));

    if let Some(transaction) = scope.transaction() {
        attrs.push(KeyValue::new("transaction", transaction.to_string()));
    }
    attrs
}

/// Leading type-like identifier of an error's debug output, `"Error"` when there is none.
fn error_type(error: &(dyn std::error::Error + 'static)) -> String {
    let debug = format!("{:?}", error);
    let name: String = debug
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == ':')
        .collect();
    if name.is_empty() {
        "Error".to_string()
    } else {
        name
    }
}

/// [`TelemetryClient`] recording everything as OpenTelemetry spans.
pub struct OtelClient {
    provider: SdkTracerProvider,
    tracer: WrapperTracer,
}

impl OtelClient {
    pub fn new(provider: SdkTracerProvider) -> Self {
        let tracer = provider.tracer(TRACER_NAME);
        Self { provider, tracer }
    }

    pub fn provider(&self) -> &SdkTracerProvider {
        &self.provider
    }

    pub fn tracer(&self) -> &WrapperTracer {
        &self.tracer
    }
}

impl TelemetryClient for OtelClient {
    fn capture_exception(
        &self,
        error: &(dyn std::error::Error + 'static),
        mechanism: &Mechanism,
        scope: &Scope,
    ) {
        let message = error.to_string();
        let exception_attrs = vec![
            KeyValue::new(attributes::EXCEPTION_TYPE, error_type(error)),
            KeyValue::new(attributes::EXCEPTION_MESSAGE, message.clone()),
            KeyValue::new(attributes::MECHANISM_TYPE, mechanism.kind),
            KeyValue::new(attributes::MECHANISM_HANDLED, mechanism.handled),
        ];

        let mut span = self
            .tracer
            .span_builder("exception")
            .with_kind(SpanKind::Internal)
            .with_attributes(scope_attributes(scope))
            .start_with_context(&self.tracer, &scope_parent(scope));
        span.add_event("exception", exception_attrs);
        span.set_status(Status::error(message));
        span.end();
    }

    fn capture_message(&self, message: &str, level: Level, scope: &Scope) {
        let mut span = self
            .tracer
            .span_builder("message")
            .with_kind(SpanKind::Internal)
            .with_attributes(scope_attributes(scope))
            .start_with_context(&self.tracer, &scope_parent(scope));
        span.add_event(
            "message",
            vec![
                KeyValue::new("message", message.to_string()),
                KeyValue::new(attributes::MESSAGE_LEVEL, level.as_str()),
            ],
        );
        span.end();
    }

    fn flush(&self, timeout: Duration) -> BoxFuture<'static, Result<(), FlushError>> {
        let provider = self.provider.clone();
        Box::pin(async move {
            let flush = tokio::task::spawn_blocking(move || provider.force_flush());
            match tokio::time::timeout(timeout, flush).await {
                Ok(Ok(Ok(()))) => Ok(()),
                Ok(Ok(Err(error))) => Err(FlushError::Export(error.to_string())),
                Ok(Err(join_error)) => Err(FlushError::Export(join_error.to_string())),
                Err(_) => Err(FlushError::Timeout(timeout)),
            }
        })
    }

    fn start_span(&self, options: SpanOptions) -> Box<dyn InvocationSpan> {
        let parent = parent_context(&options.parent);
        let mut attrs = options.attributes;
        attrs.push(KeyValue::new(attributes::OP, options.op));

        let span = self
            .tracer
            .span_builder(options.name)
            .with_kind(SpanKind::Server)
            .with_attributes(attrs)
            .start_with_context(&self.tracer, &parent);

        Box::new(OtelInvocationSpan {
            cx: parent.with_span(span),
        })
    }
}

struct OtelInvocationSpan {
    cx: opentelemetry::Context,
}

impl InvocationSpan for OtelInvocationSpan {
    fn set_error_status(&mut self, message: &str) {
        self.cx.span().set_status(Status::error(message.to_string()));
    }

    fn end(&mut self) {
        self.cx.span().end();
    }

    fn otel_context(&self) -> Option<opentelemetry::Context> {
        Some(self.cx.clone())
    }
}

/// Configuration for [`init_telemetry`].
///
/// ```no_run
/// use lambda_otel_wrapper::TelemetryConfig;
/// use opentelemetry::KeyValue;
/// use opentelemetry_sdk::Resource;
///
/// let config = TelemetryConfig::builder()
///     .resource(Resource::builder()
///         .with_attributes(vec![KeyValue::new("service.version", "1.0.0")])
///         .build())
///     .enable_fmt_layer(true)
///     .build();
/// ```
#[derive(Builder, Debug)]
pub struct TelemetryConfig {
    #[builder(field)]
    provider_builder: TracerProviderBuilder,

    #[builder(field)]
    has_processor: bool,

    #[builder(field)]
    propagators: Vec<Box<dyn TextMapPropagator + Send + Sync>>,

    /// Print log events to stdout in addition to exporting spans.
    ///
    /// Default: `false`
    #[builder(default = false)]
    pub enable_fmt_layer: bool,

    /// Register the provider as the global OpenTelemetry tracer provider.
    ///
    /// Default: `true`
    #[builder(default = true)]
    pub set_global_provider: bool,

    /// Resource attached to all spans.
    ///
    /// Default: `None` (detected from the Lambda environment)
    pub resource: Option<Resource>,

    /// Environment variable holding the log filter.
    ///
    /// Default: `None` (uses `RUST_LOG`, or `AWS_LAMBDA_LOG_LEVEL` when unset)
    pub env_var_name: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl<S: telemetry_config_builder::State> TelemetryConfigBuilder<S> {
    /// Add a span processor. Without one, spans go to an OTLP/HTTP exporter in a batch processor.
    pub fn with_span_processor<T>(mut self, processor: T) -> Self
    where
        T: SpanProcessor + 'static,
    {
        self.provider_builder = self.provider_builder.with_span_processor(processor);
        self.has_processor = true;
        self
    }

    /// Add a propagator for the global composite propagator.
    ///
    /// Defaults to W3C trace context and baggage when none is added.
    pub fn with_propagator<T>(mut self, propagator: T) -> Self
    where
        T: TextMapPropagator + Send + Sync + 'static,
    {
        self.propagators.push(Box::new(propagator));
        self
    }
}

fn default_span_processor() -> Result<BatchSpanProcessor, Error> {
    // The blocking client owns a runtime of its own and cannot be built inside tokio.
    let http_client = std::thread::spawn(reqwest::blocking::Client::new)
        .join()
        .map_err(|_| "failed to build blocking HTTP client for the OTLP exporter")?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_http_client(http_client)
        .with_protocol(Protocol::HttpBinary)
        .build()?;

    Ok(BatchSpanProcessor::builder(exporter).build())
}

fn fmt_layer_forced() -> bool {
    env::var(env_vars::ENABLE_FMT_LAYER)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Install the tracer provider, propagators and `tracing` subscriber.
///
/// Call once per process, before the runtime loop starts.
///
/// ```no_run
/// use lambda_otel_wrapper::{init_telemetry, TelemetryConfig};
///
/// # async fn example() -> Result<(), lambda_runtime::Error> {
/// let client = init_telemetry(TelemetryConfig::default()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn init_telemetry(mut config: TelemetryConfig) -> Result<Arc<OtelClient>, Error> {
    if config.propagators.is_empty() {
        config
            .propagators
            .push(Box::new(TraceContextPropagator::new()));
        config.propagators.push(Box::new(BaggagePropagator::new()));
    }
    global::set_text_map_propagator(TextMapCompositePropagator::new(config.propagators));

    if !config.has_processor {
        config.provider_builder = config
            .provider_builder
            .with_span_processor(default_span_processor()?);
    }

    let resource = config.resource.unwrap_or_else(lambda_resource);
    let provider = config.provider_builder.with_resource(resource).build();

    if config.set_global_provider {
        global::set_tracer_provider(provider.clone());
    }

    let client = Arc::new(OtelClient::new(provider));

    let env_var_name = config.env_var_name.as_deref().unwrap_or_else(|| {
        if env::var("RUST_LOG").is_ok() {
            "RUST_LOG"
        } else {
            "AWS_LAMBDA_LOG_LEVEL"
        }
    });
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_env_var(env_var_name)
        .from_env_lossy();

    let subscriber = tracing_subscriber::registry::Registry::default()
        .with(tracing_opentelemetry::OpenTelemetryLayer::new(
            client.tracer().clone(),
        ))
        .with(env_filter);

    if config.enable_fmt_layer || fmt_layer_forced() {
        let is_json = env::var(env_vars::LOG_FORMAT)
            .unwrap_or_default()
            .eq_ignore_ascii_case("JSON");

        if is_json {
            tracing::subscriber::set_global_default(
                subscriber.with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .without_time()
                        .json(),
                ),
            )?;
        } else {
            tracing::subscriber::set_global_default(
                subscriber.with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .without_time()
                        .with_ansi(false),
                ),
            )?;
        }
    } else {
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(client)
}
