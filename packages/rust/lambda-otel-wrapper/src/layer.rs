//! Tower layer for instrumenting an existing Lambda service.
//!
//! [`InvocationLayer`] turns any `Service<LambdaEvent<E>>` into a [`WrappedHandler`], so a
//! service built with `lambda_runtime::service_fn` or a `tower::ServiceBuilder` stack gets
//! the same pipeline as a [`Handler`]: cold start, scope, span, timeout warning and flush.
//!
//! ```no_run
//! use lambda_otel_wrapper::{init_telemetry, InvocationLayer, TelemetryConfig, WrapperConfig};
//! use lambda_runtime::{service_fn, Error, LambdaEvent};
//! use serde_json::{json, Value};
//! use tower::Layer;
//!
//! async fn function_handler(event: LambdaEvent<Value>) -> Result<Value, Error> {
//!     Ok(json!({ "statusCode": 200, "body": event.payload }))
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let client = init_telemetry(TelemetryConfig::default()).await?;
//!
//!     let service = InvocationLayer::new(client)
//!         .with_config(WrapperConfig::from_env())
//!         .layer(service_fn(function_handler));
//!
//!     lambda_runtime::run(service).await
//! }
//! ```

use crate::adapter::Handler;
use crate::client::TelemetryClient;
use crate::cold_start::ColdStartState;
use crate::config::WrapperConfig;
use crate::propagation::EventHeaders;
use crate::wrapper::{WrappedHandler, WrapperBuilder};
use lambda_runtime::{Context, Error, LambdaEvent};
use serde::Serialize;
use std::future::poll_fn;
use std::marker::PhantomData;
use std::sync::Arc;
use tower::{Layer, Service};

/// Layer producing a [`WrappedHandler`] around an inner service.
pub struct InvocationLayer<E> {
    client: Arc<dyn TelemetryClient>,
    config: WrapperConfig,
    cold_start: Option<Arc<ColdStartState>>,
    externally_traced: bool,
    _event: PhantomData<fn(E)>,
}

impl<E> Clone for InvocationLayer<E> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            config: self.config.clone(),
            cold_start: self.cold_start.clone(),
            externally_traced: self.externally_traced,
            _event: PhantomData,
        }
    }
}

impl<E> InvocationLayer<E> {
    pub fn new(client: Arc<dyn TelemetryClient>) -> Self {
        Self {
            client,
            config: WrapperConfig::default(),
            cold_start: None,
            externally_traced: false,
            _event: PhantomData,
        }
    }

    pub fn with_config(mut self, config: WrapperConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cold_start(mut self, state: Arc<ColdStartState>) -> Self {
        self.cold_start = Some(state);
        self
    }

    /// The inner service opens its own invocation span; only capture, warn and flush.
    pub fn externally_traced(mut self) -> Self {
        self.externally_traced = true;
        self
    }
}

impl<S, E> Layer<S> for InvocationLayer<E>
where
    S: Service<LambdaEvent<E>> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Error: Into<Error>,
    S::Response: Serialize + Send + 'static,
    E: EventHeaders + Send + 'static,
{
    type Service = WrappedHandler<E, S::Response>;

    fn layer(&self, inner: S) -> Self::Service {
        let mut handler = Handler::with_context(move |event: E, ctx: Context| {
            let mut service = inner.clone();
            async move {
                poll_fn(|cx| service.poll_ready(cx))
                    .await
                    .map_err(|e| -> Error { e.into() })?;
                let response = service
                    .call(LambdaEvent::new(event, ctx))
                    .await
                    .map_err(|e| -> Error { e.into() })?;
                Ok(response)
            }
        });
        if self.externally_traced {
            handler = handler.externally_traced();
        }

        let mut builder = WrapperBuilder::new(handler, Arc::clone(&self.client))
            .config(self.config.clone());
        if let Some(state) = &self.cold_start {
            builder = builder.cold_start(Arc::clone(state));
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{lambda_context, RecordingClient};
    use lambda_runtime::service_fn;
    use serde_json::{json, Value};
    use std::time::Instant;

    fn layer(recording: &Arc<RecordingClient>) -> InvocationLayer<Value> {
        let client: Arc<dyn TelemetryClient> = recording.clone();
        InvocationLayer::new(client)
            .with_cold_start(Arc::new(ColdStartState::new(false, Instant::now())))
    }

    #[tokio::test]
    async fn test_layer_runs_inner_service() {
        let recording = Arc::new(RecordingClient::new());
        let service = layer(&recording).layer(service_fn(|event: LambdaEvent<Value>| async move {
            Ok::<_, Error>(json!({
                "request_id": event.context.request_id,
                "payload": event.payload,
            }))
        }));

        let result = service
            .invoke(json!({"id": 1}), lambda_context("orders", 0))
            .await
            .unwrap();

        assert_eq!(result, json!({"request_id": "req-1", "payload": {"id": 1}}));
        let spans = recording.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "orders");
        assert_eq!(recording.timeline(), vec!["span_start", "span_end", "flush"]);
    }

    #[tokio::test]
    async fn test_layer_captures_service_error() {
        let recording = Arc::new(RecordingClient::new());
        let mut service = layer(&recording).layer(service_fn(|_event: LambdaEvent<Value>| async {
            Err::<Value, Error>("inner service failed".into())
        }));

        let error = service
            .call(LambdaEvent::new(json!({}), lambda_context("orders", 0)))
            .await
            .unwrap_err();

        assert_eq!(error.to_string(), "inner service failed");
        let exceptions = recording.exceptions();
        assert_eq!(exceptions.len(), 1);
        assert_eq!(exceptions[0].message, "inner service failed");
        assert_eq!(
            recording.spans()[0].error.as_deref(),
            Some("inner service failed")
        );
    }

    #[tokio::test]
    async fn test_externally_traced_layer_skips_span() {
        let recording = Arc::new(RecordingClient::new());
        let service = layer(&recording)
            .externally_traced()
            .layer(service_fn(|_event: LambdaEvent<Value>| async {
                Ok::<_, Error>(json!("ok"))
            }));

        assert!(!service.tags().streaming);
        service
            .invoke(json!({}), lambda_context("orders", 0))
            .await
            .unwrap();

        assert!(recording.spans().is_empty());
        assert_eq!(recording.timeline(), vec!["flush"]);
    }
}
