//! The telemetry collaborator used by the wrapper.
//!
//! The wrapper never talks to an exporter directly. Everything it records goes
//! through a [`TelemetryClient`], together with the [`Scope`] of the invocation
//! that produced it. The crate ships an OpenTelemetry-backed implementation in
//! [`OtelClient`](crate::OtelClient); tests and other backends can provide their own.

use crate::error::FlushError;
use crate::propagation::PropagationContext;
use futures_util::future::BoxFuture;
use opentelemetry::KeyValue;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Severity of a captured message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Describes how an exception reached the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mechanism {
    pub kind: &'static str,
    pub handled: bool,
}

impl Mechanism {
    /// An error returned by the wrapped handler.
    pub const fn handler() -> Self {
        Self {
            kind: crate::constants::values::MECHANISM_HANDLER,
            handled: false,
        }
    }

    /// An error emitted on a response stream.
    pub const fn stream() -> Self {
        Self {
            kind: crate::constants::values::MECHANISM_STREAM,
            handled: false,
        }
    }
}

/// Per-invocation tags and structured contexts.
///
/// A scope is built fresh for every invocation and handed to each capture
/// call. Forking is a clone: changes to the fork never reach the original.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    tags: BTreeMap<String, String>,
    contexts: BTreeMap<String, Value>,
    transaction: Option<String>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of this scope that can be changed independently.
    pub fn fork(&self) -> Self {
        self.clone()
    }

    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn set_context(&mut self, key: impl Into<String>, value: Value) {
        self.contexts.insert(key.into(), value);
    }

    pub fn context(&self, key: &str) -> Option<&Value> {
        self.contexts.get(key)
    }

    pub fn contexts(&self) -> &BTreeMap<String, Value> {
        &self.contexts
    }

    pub fn set_transaction(&mut self, name: impl Into<String>) {
        self.transaction = Some(name.into());
    }

    pub fn transaction(&self) -> Option<&str> {
        self.transaction.as_deref()
    }
}

/// Everything a client needs to open the root span of an invocation.
#[derive(Debug, Clone)]
pub struct SpanOptions {
    pub name: String,
    pub op: &'static str,
    pub attributes: Vec<KeyValue>,
    pub parent: PropagationContext,
}

/// A span opened by [`TelemetryClient::start_span`].
///
/// The wrapper guarantees `end` is called exactly once.
pub trait InvocationSpan: Send {
    fn set_error_status(&mut self, message: &str);

    fn end(&mut self);

    /// OpenTelemetry context the handler future should run in, if the backend has one.
    fn otel_context(&self) -> Option<opentelemetry::Context> {
        None
    }
}

/// Backend receiving exceptions, messages and spans from the wrapper.
pub trait TelemetryClient: Send + Sync {
    fn capture_exception(
        &self,
        error: &(dyn std::error::Error + 'static),
        mechanism: &Mechanism,
        scope: &Scope,
    );

    fn capture_message(&self, message: &str, level: Level, scope: &Scope);

    /// Deliver everything buffered so far, waiting at most `timeout`.
    fn flush(&self, timeout: Duration) -> BoxFuture<'static, Result<(), FlushError>>;

    fn start_span(&self, options: SpanOptions) -> Box<dyn InvocationSpan>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scope_fork_is_independent() {
        let mut scope = Scope::new();
        scope.set_tag("url", "awslambda:///orders");
        scope.set_context("aws.lambda", json!({"aws_request_id": "abc"}));

        let mut fork = scope.fork();
        fork.set_tag("timeout", "3s");
        fork.set_transaction("orders");

        assert_eq!(fork.tag("url"), Some("awslambda:///orders"));
        assert_eq!(fork.tag("timeout"), Some("3s"));
        assert_eq!(scope.tag("timeout"), None);
        assert_eq!(scope.transaction(), None);
        assert_eq!(fork.context("aws.lambda"), scope.context("aws.lambda"));
    }

    #[test]
    fn test_mechanisms_are_unhandled() {
        assert_eq!(Mechanism::handler().kind, "auto.function.aws_serverless.handler");
        assert_eq!(Mechanism::stream().kind, "auto.function.aws_serverless.stream");
        assert!(!Mechanism::handler().handled);
        assert!(!Mechanism::stream().handled);
    }

    #[test]
    fn test_level_names() {
        assert_eq!(Level::Warning.to_string(), "warning");
        assert_eq!(Level::Fatal.as_str(), "fatal");
    }
}
