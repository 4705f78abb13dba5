//! Advisory timeout warning.
//!
//! The watchdog is a spawned task that sleeps until `timeout_warning_limit` before the
//! platform deadline and then captures a warning-level message. It never touches the
//! handler. The [`WatchdogToken`] returned by [`arm`] settles the race: the task and
//! [`WatchdogToken::disarm`] both try to move the shared state out of `ARMED`, and only
//! one of them can win.

use crate::client::{Level, Scope, TelemetryClient};
use crate::config::WrapperConfig;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// Tag set on the forked scope of the warning.
pub const TIMEOUT_TAG: &str = "timeout";

/// What to report if the warning fires.
pub(crate) struct TimeoutWarning {
    pub function_name: String,
    /// Human readable remaining time, see [`format_timeout`](crate::format_timeout).
    pub timeout: String,
    pub scope: Scope,
}

/// Handle on an armed (or inert) watchdog. Dropping it disarms the watchdog.
pub(crate) struct WatchdogToken {
    armed: Option<(Arc<AtomicU8>, JoinHandle<()>)>,
}

impl WatchdogToken {
    fn inert() -> Self {
        Self { armed: None }
    }

    #[cfg(test)]
    pub fn is_inert(&self) -> bool {
        self.armed.is_none()
    }

    /// Cancel the warning. Returns `true` only for the call that actually cancelled it.
    pub fn disarm(&mut self) -> bool {
        let Some((state, handle)) = self.armed.take() else {
            return false;
        };

        match state.compare_exchange(ARMED, CANCELLED, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                handle.abort();
                true
            }
            Err(_) => false,
        }
    }
}

impl Drop for WatchdogToken {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// Arm the watchdog for one invocation.
///
/// Returns an inert token when the warning is disabled or the remaining time is shorter
/// than the configured limit. With exactly the limit left, the warning fires at once.
pub(crate) fn arm(
    remaining: Duration,
    config: &WrapperConfig,
    client: &Arc<dyn TelemetryClient>,
    warning: TimeoutWarning,
) -> WatchdogToken {
    if !config.capture_timeout_warning {
        return WatchdogToken::inert();
    }

    let lead = match remaining.checked_sub(config.timeout_warning_limit) {
        Some(lead) => lead,
        None => {
            tracing::debug!(
                remaining_ms = remaining.as_millis() as u64,
                limit_ms = config.timeout_warning_limit.as_millis() as u64,
                "watchdog.arm: not enough time left to warn before the deadline"
            );
            return WatchdogToken::inert();
        }
    };

    let state = Arc::new(AtomicU8::new(ARMED));
    let task_state = Arc::clone(&state);
    let client = Arc::clone(client);

    let handle = tokio::spawn(async move {
        tokio::time::sleep(lead).await;

        if task_state
            .compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let TimeoutWarning {
            function_name,
            timeout,
            scope,
        } = warning;
        let mut scope = scope.fork();
        scope.set_tag(TIMEOUT_TAG, timeout);
        client.capture_message(
            &format!("Possible function timeout: {}", function_name),
            Level::Warning,
            &scope,
        );
    });

    WatchdogToken {
        armed: Some((state, handle)),
    }
}
