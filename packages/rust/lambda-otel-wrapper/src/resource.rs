//! Resource attributes for the Lambda execution environment.
//!
//! [`lambda_resource`] is used by [`init_telemetry`](crate::init_telemetry) when no resource
//! is configured. It reads:
//!
//! - `AWS_REGION`: `cloud.provider` and `cloud.region`
//! - `AWS_LAMBDA_FUNCTION_NAME`: `faas.name`, and `service.name` unless `OTEL_SERVICE_NAME` is set
//! - `AWS_LAMBDA_FUNCTION_VERSION`: `faas.version`
//! - `AWS_LAMBDA_FUNCTION_MEMORY_SIZE`: `faas.max_memory` in bytes
//! - `AWS_LAMBDA_LOG_STREAM_NAME`: `faas.instance`
//! - `OTEL_RESOURCE_ATTRIBUTES`: extra `key=value` pairs, values may be percent-encoded

use crate::constants::env_vars;
use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;
use std::env;
use urlencoding::decode;

pub fn lambda_resource() -> Resource {
    let mut attributes = Vec::new();

    if let Ok(region) = env::var(env_vars::AWS_REGION) {
        attributes.push(KeyValue::new("cloud.provider", "aws"));
        attributes.push(KeyValue::new("cloud.region", region));
    }

    if let Ok(function_name) = env::var(env_vars::AWS_LAMBDA_FUNCTION_NAME) {
        attributes.push(KeyValue::new("faas.name", function_name.clone()));
        if env::var(env_vars::SERVICE_NAME).is_err() {
            attributes.push(KeyValue::new("service.name", function_name));
        }
    }

    if let Ok(version) = env::var(env_vars::AWS_LAMBDA_FUNCTION_VERSION) {
        attributes.push(KeyValue::new("faas.version", version));
    }

    if let Ok(memory) = env::var("AWS_LAMBDA_FUNCTION_MEMORY_SIZE") {
        if let Ok(memory_mb) = memory.parse::<i64>() {
            attributes.push(KeyValue::new("faas.max_memory", memory_mb * 1024 * 1024));
        }
    }

    if let Ok(log_stream) = env::var("AWS_LAMBDA_LOG_STREAM_NAME") {
        attributes.push(KeyValue::new("faas.instance", log_stream));
    }

    if let Ok(pairs) = env::var("OTEL_RESOURCE_ATTRIBUTES") {
        attributes.extend(parse_resource_attributes(&pairs));
    }

    Resource::builder().with_attributes(attributes).build()
}

fn parse_resource_attributes(pairs: &str) -> Vec<KeyValue> {
    pairs
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .filter_map(|(key, value)| {
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() || value.is_empty() {
                return None;
            }
            let decoded = decode(value).ok()?;
            Some(KeyValue::new(key.to_string(), decoded.into_owned()))
        })
        .collect()
}
