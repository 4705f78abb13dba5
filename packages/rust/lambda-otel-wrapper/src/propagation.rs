//! Trace context extraction.
//!
//! An invocation can carry an upstream trace in two places:
//!
//! 1. The client context custom map (`Context::client_context`), used by direct SDK invocations
//! 2. The header map of the event, for HTTP-shaped events
//!
//! The client context wins as a whole: when it has a `sentry-trace` entry, both values come
//! from it and the event is not consulted, even for `baggage`.
//!
//! Implement [`EventHeaders`] for your own event types to expose their headers:
//!
//! ```
//! use lambda_otel_wrapper::EventHeaders;
//! use std::collections::HashMap;
//!
//! struct QueueMessage {
//!     attributes: HashMap<String, String>,
//! }
//!
//! impl EventHeaders for QueueMessage {
//!     fn header(&self, name: &str) -> Option<String> {
//!         self.attributes.get(name).cloned()
//!     }
//! }
//! ```

use crate::constants::headers;
use aws_lambda_events::event::alb::AlbTargetGroupRequest;
use aws_lambda_events::event::apigw::{ApiGatewayProxyRequest, ApiGatewayV2httpRequest};
use lambda_runtime::Context;
use serde_json::Value;

/// Trace values found for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagationContext {
    /// Raw `sentry-trace` value.
    pub trace_parent: Option<String>,
    /// Raw `baggage` value.
    pub baggage: Option<String>,
}

impl PropagationContext {
    pub fn is_empty(&self) -> bool {
        self.trace_parent.is_none() && self.baggage.is_none()
    }
}

/// Read access to the headers of an event.
pub trait EventHeaders {
    /// Value of header `name`, if the event has one.
    fn header(&self, _name: &str) -> Option<String> {
        None
    }
}

impl EventHeaders for () {}

impl EventHeaders for Value {
    fn header(&self, name: &str) -> Option<String> {
        self.get("headers")?
            .get(name)?
            .as_str()
            .map(str::to_string)
    }
}

impl EventHeaders for ApiGatewayV2httpRequest {
    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

impl EventHeaders for ApiGatewayProxyRequest {
    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

impl EventHeaders for AlbTargetGroupRequest {
    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

/// Find the upstream trace for an invocation. Never fails; missing values are `None`.
pub fn extract<E: EventHeaders + ?Sized>(event: &E, ctx: &Context) -> PropagationContext {
    if let Some(custom) = ctx.client_context.as_ref().map(|c| &c.custom) {
        if let Some(trace_parent) = custom.get(headers::TRACE_PARENT) {
            return PropagationContext {
                trace_parent: Some(trace_parent.clone()),
                baggage: custom.get(headers::BAGGAGE).cloned(),
            };
        }
    }

    PropagationContext {
        trace_parent: event.header(headers::TRACE_PARENT),
        baggage: event.header(headers::BAGGAGE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::set_client_custom;
    use serde_json::json;

    const CONTEXT_TRACE: &str = "12312012123120121231201212312012-1121201211212012-1";
    const EVENT_TRACE: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-bbbbbbbbbbbbbbbb-0";

    fn context_with_custom(entries: &[(&str, &str)]) -> Context {
        let mut ctx = Context::default();
        set_client_custom(&mut ctx, entries);
        ctx
    }

    #[test]
    fn test_client_context_wins_over_event() {
        let ctx = context_with_custom(&[
            ("sentry-trace", CONTEXT_TRACE),
            ("baggage", "sentry-environment=production"),
        ]);
        let event = json!({
            "headers": {"sentry-trace": EVENT_TRACE, "baggage": "sentry-environment=staging"}
        });

        let propagation = extract(&event, &ctx);
        assert_eq!(propagation.trace_parent.as_deref(), Some(CONTEXT_TRACE));
        assert_eq!(
            propagation.baggage.as_deref(),
            Some("sentry-environment=production")
        );
    }

    #[test]
    fn test_context_is_not_merged_with_event() {
        let ctx = context_with_custom(&[("sentry-trace", CONTEXT_TRACE)]);
        let event = json!({"headers": {"baggage": "sentry-environment=staging"}});

        let propagation = extract(&event, &ctx);
        assert_eq!(propagation.trace_parent.as_deref(), Some(CONTEXT_TRACE));
        assert_eq!(propagation.baggage, None);
    }

    #[test]
    fn test_event_headers_used_alone() {
        let event = json!({
            "headers": {"sentry-trace": EVENT_TRACE, "baggage": "sentry-release=1.0"}
        });

        let propagation = extract(&event, &Context::default());
        assert_eq!(propagation.trace_parent.as_deref(), Some(EVENT_TRACE));
        assert_eq!(propagation.baggage.as_deref(), Some("sentry-release=1.0"));
    }

    #[test]
    fn test_context_without_trace_falls_back_to_event() {
        let ctx = context_with_custom(&[("baggage", "sentry-environment=production")]);
        let event = json!({"headers": {"sentry-trace": EVENT_TRACE}});

        let propagation = extract(&event, &ctx);
        assert_eq!(propagation.trace_parent.as_deref(), Some(EVENT_TRACE));
        assert_eq!(propagation.baggage, None);
    }

    #[test]
    fn test_missing_everywhere() {
        let test_cases = [json!({}), json!({"headers": null}), json!([1, 2]), json!("text")];
        for event in test_cases {
            let propagation = extract(&event, &Context::default());
            assert!(propagation.is_empty(), "Failed for {}", event);
        }
        assert!(extract(&(), &Context::default()).is_empty());
    }

    #[test]
    fn test_api_gateway_headers() {
        let mut request = ApiGatewayV2httpRequest::default();
        request
            .headers
            .insert("sentry-trace", EVENT_TRACE.parse().unwrap());

        let propagation = extract(&request, &Context::default());
        assert_eq!(propagation.trace_parent.as_deref(), Some(EVENT_TRACE));
        assert_eq!(propagation.baggage, None);
    }
}
