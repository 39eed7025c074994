//! Resource limit enforcement.
//!
//! Soft and hard limits go through `setrlimit`; timed limits are enforced by
//! a [`Watchdog`] that samples the process memory and signals the process
//! once a threshold has been exceeded for long enough.

mod errors;
mod rlimit;
mod watchdog;

use std::sync::Arc;

use axon_config::LimitsChoice;
use tracing::{info, warn};

use crate::worker::WorkerPool;

pub use errors::LimitsError;
pub use rlimit::{LimitScope, RlimitBackend, SystemRlimits, apply_static};
pub use watchdog::{
    BreachCounter, MemorySample, MemorySampler, SelfSignaller, SysinfoSampler, SystemSignaller,
    Verdict, Watchdog,
};

pub(crate) const LIMITS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::limits");

/// Collaborators required to enforce timed limits.
#[derive(Clone)]
pub struct TimedEnforcement {
    /// Source of memory readings.
    pub sampler: Arc<dyn MemorySampler>,
    /// Delivers the configured action to the process.
    pub signaller: Arc<dyn SelfSignaller>,
    /// Pool running the checks.
    pub pool: Arc<WorkerPool>,
}

/// Applies soft, hard and timed limits in that order.
///
/// Returns the watchdogs started for timed limits; dropping them stops the
/// checks. Timed limits are skipped with a warning when `timed` is `None`.
pub fn apply_limits(
    choice: &LimitsChoice,
    backend: &dyn RlimitBackend,
    timed: Option<&TimedEnforcement>,
) -> Result<Vec<Watchdog>, LimitsError> {
    if let Some(soft) = &choice.soft {
        apply_static(soft, LimitScope::Soft, backend)?;
    }
    if let Some(hard) = &choice.hard {
        apply_static(hard, LimitScope::Hard, backend)?;
    }

    let mut watchdogs = Vec::new();
    let Some(limits) = &choice.timed else {
        return Ok(watchdogs);
    };
    let Some(enforcement) = timed else {
        warn!(
            target: LIMITS_TARGET,
            "memory sampling unavailable; timed limits are not enforced"
        );
        return Ok(watchdogs);
    };
    for (kind, limit) in limits.configured() {
        info!(
            target: LIMITS_TARGET,
            limit = %kind,
            value = limit.value,
            unit = kind.unit(),
            period_s = limit.period_s,
            num_breaches = limit.num_breaches,
            action = %limit.action,
            "enabling timed limit"
        );
        if let Some(watchdog) = Watchdog::start(kind, limit, enforcement)? {
            watchdogs.push(watchdog);
        }
    }
    Ok(watchdogs)
}
