//! Recording telemetry client shared by the unit tests.

use crate::client::{InvocationSpan, Level, Mechanism, Scope, SpanOptions, TelemetryClient};
use crate::error::FlushError;
use crate::propagation::PropagationContext;
use futures_util::future::BoxFuture;
use opentelemetry::KeyValue;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub(crate) struct CapturedException {
    pub message: String,
    pub mechanism: Mechanism,
    pub scope: Scope,
}

#[derive(Debug, Clone)]
pub(crate) struct CapturedMessage {
    pub message: String,
    pub level: Level,
    pub scope: Scope,
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedSpan {
    pub name: String,
    pub op: &'static str,
    pub attributes: Vec<KeyValue>,
    pub parent: PropagationContext,
    pub error: Option<String>,
    pub ended: usize,
}

impl RecordedSpan {
    pub fn attribute(&self, key: &str) -> Option<String> {
        self.attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.to_string())
    }
}

#[derive(Default)]
struct Records {
    exceptions: Vec<CapturedException>,
    messages: Vec<CapturedMessage>,
    flushes: Vec<Duration>,
    spans: Vec<RecordedSpan>,
    timeline: Vec<&'static str>,
}

/// Client that keeps everything it receives in memory.
#[derive(Default)]
pub(crate) struct RecordingClient {
    records: Arc<Mutex<Records>>,
    fail_flush: bool,
    flush_delay: Option<Duration>,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_flush() -> Self {
        Self {
            fail_flush: true,
            ..Self::default()
        }
    }

    pub fn with_flush_delay(delay: Duration) -> Self {
        Self {
            flush_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn exceptions(&self) -> Vec<CapturedException> {
        self.records.lock().unwrap().exceptions.clone()
    }

    pub fn messages(&self) -> Vec<CapturedMessage> {
        self.records.lock().unwrap().messages.clone()
    }

    pub fn flushes(&self) -> Vec<Duration> {
        self.records.lock().unwrap().flushes.clone()
    }

    pub fn spans(&self) -> Vec<RecordedSpan> {
        self.records.lock().unwrap().spans.clone()
    }

    /// Order in which the client was called: "span_start", "exception", "message", "span_end", "flush".
    pub fn timeline(&self) -> Vec<&'static str> {
        self.records.lock().unwrap().timeline.clone()
    }
}

impl TelemetryClient for RecordingClient {
    fn capture_exception(
        &self,
        error: &(dyn std::error::Error + 'static),
        mechanism: &Mechanism,
        scope: &Scope,
    ) {
        let mut records = self.records.lock().unwrap();
        records.exceptions.push(CapturedException {
            message: error.to_string(),
            mechanism: *mechanism,
            scope: scope.clone(),
        });
        records.timeline.push("exception");
    }

    fn capture_message(&self, message: &str, level: Level, scope: &Scope) {
        let mut records = self.records.lock().unwrap();
        records.messages.push(CapturedMessage {
            message: message.to_string(),
            level,
            scope: scope.clone(),
        });
        records.timeline.push("message");
    }

    fn flush(&self, timeout: Duration) -> BoxFuture<'static, Result<(), FlushError>> {
        {
            let mut records = self.records.lock().unwrap();
            records.flushes.push(timeout);
            records.timeline.push("flush");
        }
        let fail = self.fail_flush;
        let delay = self.flush_delay;
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if fail {
                return Err(FlushError::Export("collector unavailable".to_string()));
            }
            Ok(())
        })
    }

    fn start_span(&self, options: SpanOptions) -> Box<dyn InvocationSpan> {
        let mut records = self.records.lock().unwrap();
        let index = records.spans.len();
        records.spans.push(RecordedSpan {
            name: options.name,
            op: options.op,
            attributes: options.attributes,
            parent: options.parent,
            error: None,
            ended: 0,
        });
        records.timeline.push("span_start");
        Box::new(RecordingSpan {
            index,
            records: Arc::clone(&self.records),
        })
    }
}

struct RecordingSpan {
    index: usize,
    records: Arc<Mutex<Records>>,
}

impl InvocationSpan for RecordingSpan {
    fn set_error_status(&mut self, message: &str) {
        self.records.lock().unwrap().spans[self.index].error = Some(message.to_string());
    }

    fn end(&mut self) {
        let mut records = self.records.lock().unwrap();
        records.spans[self.index].ended += 1;
        records.timeline.push("span_end");
    }
}

/// Invocation context for function `function_name` with the given deadline (epoch ms, 0 for none).
pub(crate) fn lambda_context(function_name: &str, deadline: u64) -> lambda_runtime::Context {
    let mut config = lambda_runtime::Config::default();
    config.function_name = function_name.to_string();
    config.version = "$LATEST".to_string();
    config.log_group = format!("/aws/lambda/{}", function_name);
    config.log_stream = "2024/01/01/[$LATEST]abc".to_string();

    let mut ctx = lambda_runtime::Context::default();
    ctx.request_id = "req-1".to_string();
    ctx.invoked_function_arn = format!(
        "arn:aws:lambda:us-east-1:123456789012:function:{}",
        function_name
    );
    ctx.deadline = deadline;
    ctx.env_config = Arc::new(config);
    ctx
}

/// Set the custom entries of the invocation client context.
pub(crate) fn set_client_custom(ctx: &mut lambda_runtime::Context, entries: &[(&str, &str)]) {
    let custom: serde_json::Map<String, serde_json::Value> = entries
        .iter()
        .map(|(key, value)| (key.to_string(), serde_json::json!(value)))
        .collect();
    let client_context = serde_json::json!({
        "client": {
            "installationId": "",
            "appTitle": "",
            "appVersionName": "",
            "appVersionCode": "",
            "appPackageName": ""
        },
        "custom": custom,
        "environment": {}
    });
    ctx.client_context = Some(serde_json::from_value(client_context).unwrap());
}

/// Deadline `remaining_ms` from now, in epoch milliseconds.
pub(crate) fn deadline_in(remaining_ms: u64) -> u64 {
    crate::deadline::now_millis() + remaining_ms
}
