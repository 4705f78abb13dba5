//! Wrapper configuration.
//!
//! [`WrapperConfig`] is resolved once per [`wrap_handler`](crate::wrap_handler) call and
//! is read-only afterwards. Values come from three layers, last one wins:
//!
//! 1. Built-in defaults
//! 2. Builder overrides supplied by the caller
//! 3. Environment variables, applied by [`WrapperConfig::resolve`]
//!
//! # Environment Variables
//!
//! - `LAMBDA_WRAPPER_FLUSH_TIMEOUT_MS`: flush bound in milliseconds (default: 2000)
//! - `LAMBDA_WRAPPER_CAPTURE_TIMEOUT_WARNING`: "true"/"false" (default: true)
//! - `LAMBDA_WRAPPER_TIMEOUT_WARNING_LIMIT_MS`: warning lead time in milliseconds (default: 500)
//! - `LAMBDA_WRAPPER_START_TRACE`: "true"/"false" (default: true)
//!
//! Invalid values are logged and ignored.
//!
//! # Example
//!
//! ```
//! use lambda_otel_wrapper::WrapperConfig;
//! use std::time::Duration;
//!
//! let config = WrapperConfig::builder()
//!     .flush_timeout(Duration::from_millis(1337))
//!     .capture_all_settled_reasons(true)
//!     .build();
//!
//! assert_eq!(config.timeout_warning_limit, Duration::from_millis(500));
//! assert!(config.capture_timeout_warning);
//! ```

use crate::constants::{defaults, env_vars};
use bon::Builder;
use std::env;
use std::time::Duration;

/// Options controlling how each invocation is instrumented.
#[derive(Builder, Debug, Clone, PartialEq, Eq)]
pub struct WrapperConfig {
    /// Upper bound on the telemetry flush that runs after every invocation.
    ///
    /// Default: 2000 ms
    #[builder(default = Duration::from_millis(defaults::FLUSH_TIMEOUT_MS))]
    pub flush_timeout: Duration,

    /// Whether the host should wait for outstanding background work before
    /// returning. A tokio host has no event loop to drain, so the value is
    /// only reported on the `aws.lambda` scope context.
    ///
    /// Default: `false`
    #[builder(default = false)]
    pub callback_waits_for_empty_event_loop: bool,

    /// Emit a warning message shortly before the platform deadline.
    ///
    /// Default: `true`
    #[builder(default = true)]
    pub capture_timeout_warning: bool,

    /// How long before the deadline the timeout warning fires.
    ///
    /// Default: 500 ms
    #[builder(default = Duration::from_millis(defaults::TIMEOUT_WARNING_LIMIT_MS))]
    pub timeout_warning_limit: Duration,

    /// Capture every rejected entry when the handler returns an all-settled
    /// style array, without failing the invocation.
    ///
    /// Default: `false`
    #[builder(default = false)]
    pub capture_all_settled_reasons: bool,

    /// Open an invocation span. Disable when another layer owns the root span.
    ///
    /// Default: `true`
    #[builder(default = true)]
    pub start_trace: bool,
}

impl Default for WrapperConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl WrapperConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().resolve()
    }

    /// Apply environment overrides on top of this configuration.
    ///
    /// Environment variables take precedence over programmatic values.
    pub fn resolve(mut self) -> Self {
        if let Some(ms) = env_millis(env_vars::FLUSH_TIMEOUT_MS) {
            self.flush_timeout = ms;
        }
        if let Some(enabled) = env_flag(env_vars::CAPTURE_TIMEOUT_WARNING) {
            self.capture_timeout_warning = enabled;
        }
        if let Some(ms) = env_millis(env_vars::TIMEOUT_WARNING_LIMIT_MS) {
            self.timeout_warning_limit = ms;
        }
        if let Some(enabled) = env_flag(env_vars::START_TRACE) {
            self.start_trace = enabled;
        }

        tracing::debug!(config = ?self, "WrapperConfig.resolve: using wrapper config");
        self
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            tracing::warn!(
                variable = name,
                value = %raw,
                "WrapperConfig.resolve: invalid millisecond value in env, using config or default"
            );
            None
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let raw = env::var(name).ok()?;
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => {
            tracing::warn!(
                variable = name,
                value = %raw,
                "WrapperConfig.resolve: invalid boolean in env, using config or default"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        env::remove_var(env_vars::FLUSH_TIMEOUT_MS);
        env::remove_var(env_vars::CAPTURE_TIMEOUT_WARNING);
        env::remove_var(env_vars::TIMEOUT_WARNING_LIMIT_MS);
        env::remove_var(env_vars::START_TRACE);
    }

    #[test]
    fn test_defaults() {
        let config = WrapperConfig::default();
        assert_eq!(config.flush_timeout, Duration::from_millis(2000));
        assert!(!config.callback_waits_for_empty_event_loop);
        assert!(config.capture_timeout_warning);
        assert_eq!(config.timeout_warning_limit, Duration::from_millis(500));
        assert!(!config.capture_all_settled_reasons);
        assert!(config.start_trace);
    }

    #[test]
    fn test_builder_overrides_merge_onto_defaults() {
        let config = WrapperConfig::builder()
            .flush_timeout(Duration::from_millis(1337))
            .capture_timeout_warning(false)
            .build();

        assert_eq!(config.flush_timeout, Duration::from_millis(1337));
        assert!(!config.capture_timeout_warning);
        assert_eq!(config.timeout_warning_limit, Duration::from_millis(500));
        assert!(config.start_trace);
    }

    #[test]
    #[serial]
    fn test_env_takes_precedence() {
        clear_env();
        env::set_var(env_vars::FLUSH_TIMEOUT_MS, "5000");
        env::set_var(env_vars::CAPTURE_TIMEOUT_WARNING, "false");
        env::set_var(env_vars::TIMEOUT_WARNING_LIMIT_MS, "750");
        env::set_var(env_vars::START_TRACE, "0");

        let config = WrapperConfig::builder()
            .flush_timeout(Duration::from_millis(100))
            .build()
            .resolve();

        assert_eq!(config.flush_timeout, Duration::from_millis(5000));
        assert!(!config.capture_timeout_warning);
        assert_eq!(config.timeout_warning_limit, Duration::from_millis(750));
        assert!(!config.start_trace);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_env_values_are_ignored() {
        clear_env();
        let test_cases = [
            (env_vars::FLUSH_TIMEOUT_MS, "soon"),
            (env_vars::CAPTURE_TIMEOUT_WARNING, "maybe"),
            (env_vars::TIMEOUT_WARNING_LIMIT_MS, "-5"),
            (env_vars::START_TRACE, ""),
        ];

        for (name, value) in test_cases {
            env::set_var(name, value);
            let config = WrapperConfig::default().resolve();
            assert_eq!(config, WrapperConfig::default(), "Failed for {}={}", name, value);
            env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_without_variables_is_default() {
        clear_env();
        assert_eq!(WrapperConfig::from_env(), WrapperConfig::default());
    }
}
