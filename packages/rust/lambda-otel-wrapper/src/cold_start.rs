//! Cold start classification.
//!
//! Only the first invocation handled by an execution environment can be a cold start, and
//! even then not always:
//!
//! - provisioned concurrency (`AWS_LAMBDA_INITIALIZATION_TYPE=provisioned-concurrency`)
//!   initializes environments ahead of traffic
//! - the platform may initialize an environment proactively, in which case the first
//!   invocation arrives long after init
//!
//! The state lives in a [`ColdStartState`] value instead of a process-wide static so tests
//! and multiple wrappers can each own one.

use crate::constants::{defaults, env_vars, values};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct ColdStartState {
    handled_prior_invocation: AtomicBool,
    environment_init: Instant,
    provisioned: bool,
}

impl ColdStartState {
    pub fn new(provisioned: bool, environment_init: Instant) -> Self {
        Self {
            handled_prior_invocation: AtomicBool::new(false),
            environment_init,
            provisioned,
        }
    }

    /// State for the running environment, initialized now.
    pub fn from_env() -> Self {
        let provisioned = std::env::var(env_vars::INITIALIZATION_TYPE)
            .map(|v| v == values::PROVISIONED_CONCURRENCY)
            .unwrap_or(false);
        Self::new(provisioned, Instant::now())
    }

    /// Classify the invocation starting now. Exactly one call ever sees the first invocation.
    pub fn on_invocation(&self) -> bool {
        self.on_invocation_at(Instant::now())
    }

    pub(crate) fn on_invocation_at(&self, now: Instant) -> bool {
        let first = !self.handled_prior_invocation.swap(true, Ordering::SeqCst);
        if !first || self.provisioned {
            return false;
        }

        let since_init = now.saturating_duration_since(self.environment_init);
        since_init <= Duration::from_millis(defaults::MAX_INIT_DURATION_MS)
    }
}

impl Default for ColdStartState {
    fn default() -> Self {
        Self::from_env()
    }
}
