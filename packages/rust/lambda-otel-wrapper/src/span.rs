//! Invocation span and scope enrichment.
//!
//! Every invocation gets at most one span, opened before the handler runs and closed
//! after it settles. [`SpanGuard`] owns the span and makes closing idempotent; a guard
//! dropped while the span is still open (the invocation future was cancelled, or a
//! panic unwound through it) closes it.

use crate::client::{InvocationSpan, Scope, SpanOptions, TelemetryClient};
use crate::config::WrapperConfig;
use crate::constants::{attributes, env_vars, values};
use crate::propagation::PropagationContext;
use lambda_runtime::Context;
use opentelemetry::trace::TraceContextExt;
use opentelemetry::KeyValue;
use serde_json::{json, Map, Value};
use std::time::Duration;

pub(crate) const AWS_LAMBDA_CONTEXT: &str = "aws.lambda";
pub(crate) const CLOUDWATCH_LOGS_CONTEXT: &str = "aws.cloudwatch.logs";
pub(crate) const TRACE_CONTEXT: &str = "trace";

/// Owner of the invocation span.
pub(crate) struct SpanGuard {
    span: Option<Box<dyn InvocationSpan>>,
}

impl SpanGuard {
    /// Guard for an invocation that runs without a span of its own.
    pub fn none() -> Self {
        Self { span: None }
    }

    pub fn is_open(&self) -> bool {
        self.span.is_some()
    }

    pub fn otel_context(&self) -> Option<opentelemetry::Context> {
        self.span.as_ref().and_then(|span| span.otel_context())
    }

    /// End the span, recording error status first when `error` is given.
    ///
    /// Only the first call has an effect.
    pub fn close(&mut self, error: Option<&str>) {
        if let Some(mut span) = self.span.take() {
            if let Some(message) = error {
                span.set_error_status(message);
            }
            span.end();
        }
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if self.is_open() {
            tracing::debug!("SpanGuard.drop: invocation span closed without a result");
        }
        self.close(None);
    }
}

/// Name of the function being invoked.
pub(crate) fn function_name(ctx: &Context) -> &str {
    &ctx.env_config.function_name
}

/// Account id segment of a function ARN (`arn:aws:lambda:<region>:<account>:function:<name>`).
pub(crate) fn account_id(arn: &str) -> Option<&str> {
    arn.split(':').nth(4).filter(|id| !id.is_empty())
}

fn span_attributes(ctx: &Context, cold_start: bool) -> Vec<KeyValue> {
    let mut attrs = vec![
        KeyValue::new(attributes::SOURCE, values::SOURCE_COMPONENT),
        KeyValue::new(attributes::ORIGIN, values::ORIGIN_SERVERLESS),
        KeyValue::new(attributes::FAAS_COLDSTART, cold_start),
        KeyValue::new(attributes::FAAS_INVOCATION_ID, ctx.request_id.clone()),
    ];

    if !ctx.invoked_function_arn.is_empty() {
        attrs.push(KeyValue::new(
            attributes::CLOUD_RESOURCE_ID,
            ctx.invoked_function_arn.clone(),
        ));
        if let Some(account) = account_id(&ctx.invoked_function_arn) {
            attrs.push(KeyValue::new(attributes::CLOUD_ACCOUNT_ID, account.to_string()));
        }
    }

    attrs
}

/// Open the invocation span, or return an empty guard when tracing is off for this handler.
///
/// When a span is opened and the client exposes its OpenTelemetry context, the trace and
/// span ids are added to the `trace` context of `scope`.
pub(crate) fn open(
    client: &dyn TelemetryClient,
    ctx: &Context,
    cold_start: bool,
    propagation: &PropagationContext,
    enabled: bool,
    scope: &mut Scope,
) -> SpanGuard {
    if !enabled {
        return SpanGuard::none();
    }

    let span = client.start_span(SpanOptions {
        name: function_name(ctx).to_string(),
        op: values::OP_FUNCTION,
        attributes: span_attributes(ctx, cold_start),
        parent: propagation.clone(),
    });
    let guard = SpanGuard { span: Some(span) };

    if let Some(cx) = guard.otel_context() {
        let span_ref = cx.span();
        let span_context = span_ref.span_context();
        if span_context.is_valid() {
            let mut trace = match scope.context(TRACE_CONTEXT) {
                Some(Value::Object(map)) => map.clone(),
                _ => Map::new(),
            };
            trace.insert("trace_id".into(), json!(span_context.trace_id().to_string()));
            trace.insert("span_id".into(), json!(span_context.span_id().to_string()));
            scope.set_context(TRACE_CONTEXT, Value::Object(trace));
        }
    }

    guard
}

fn server_name() -> Option<String> {
    env_vars::SERVER_NAME_SOURCES
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.is_empty())
}

fn cloudwatch_url(ctx: &Context) -> String {
    let region = std::env::var(env_vars::AWS_REGION).unwrap_or_default();
    format!(
        "https://console.aws.amazon.com/cloudwatch/home?region={}#logsV2:log-groups/log-group/{}/log-events/{}?filterPattern=\"{}\"",
        region,
        urlencoding::encode(&ctx.env_config.log_group),
        urlencoding::encode(&ctx.env_config.log_stream),
        ctx.request_id,
    )
}

/// Add the invocation environment to `scope`.
pub(crate) fn enrich_scope(
    scope: &mut Scope,
    ctx: &Context,
    execution_duration: Duration,
    remaining: Duration,
    config: &WrapperConfig,
    propagation: &PropagationContext,
) {
    scope.set_context(
        AWS_LAMBDA_CONTEXT,
        json!({
            "aws_request_id": ctx.request_id,
            "function_name": ctx.env_config.function_name,
            "function_version": ctx.env_config.version,
            "invoked_function_arn": ctx.invoked_function_arn,
            "execution_duration_in_millis": execution_duration.as_millis() as u64,
            "remaining_time_in_millis": remaining.as_millis() as u64,
            "callback_waits_for_empty_event_loop": config.callback_waits_for_empty_event_loop,
        }),
    );

    scope.set_context(
        CLOUDWATCH_LOGS_CONTEXT,
        json!({
            "log_group": ctx.env_config.log_group,
            "log_stream": ctx.env_config.log_stream,
            "url": cloudwatch_url(ctx),
        }),
    );

    if let Some(name) = server_name() {
        scope.set_tag("server_name", name);
    }
    scope.set_tag("url", format!("awslambda:///{}", function_name(ctx)));
    scope.set_transaction(function_name(ctx));

    if !propagation.is_empty() {
        let mut trace = Map::new();
        if let Some(trace_parent) = &propagation.trace_parent {
            trace.insert("sentry_trace".into(), json!(trace_parent));
        }
        if let Some(baggage) = &propagation.baggage {
            trace.insert("baggage".into(), json!(baggage));
        }
        scope.set_context(TRACE_CONTEXT, Value::Object(trace));
    }
}
