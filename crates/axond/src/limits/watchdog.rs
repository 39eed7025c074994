//! Periodic enforcement of timed memory limits.

use std::sync::{Arc, Mutex};
use std::thread;

use axon_config::{LimitAction, LimitKind, TimedLimit};
use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use sysinfo::{ProcessesToUpdate, System};
use tracing::{error, info, warn};

use super::{LIMITS_TARGET, LimitsError, TimedEnforcement};

/// Memory usage of the process in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemorySample {
    /// Resident set size.
    pub resident: u64,
    /// Virtual address space.
    pub virtual_size: u64,
}

impl MemorySample {
    /// Reading compared against a timed limit of `kind`.
    #[must_use]
    pub const fn for_kind(&self, kind: LimitKind) -> Option<u64> {
        match kind {
            LimitKind::Rss => Some(self.resident),
            LimitKind::As => Some(self.virtual_size),
            _ => None,
        }
    }
}

/// Source of memory readings for the current process.
pub trait MemorySampler: Send + Sync {
    /// Takes a fresh reading.
    fn sample(&self) -> Result<MemorySample, LimitsError>;
}

/// Delivers a limit action to the current process.
pub trait SelfSignaller: Send + Sync {
    /// Sends the signal matching `action`.
    fn signal(&self, action: LimitAction) -> Result<(), LimitsError>;
}

/// Sampler backed by `sysinfo`.
#[derive(Debug)]
pub struct SysinfoSampler {
    pid: sysinfo::Pid,
    system: Mutex<System>,
}

impl SysinfoSampler {
    /// Builds a sampler for the current process.
    pub fn new() -> Result<Self, LimitsError> {
        let pid = sysinfo::get_current_pid().map_err(|reason| LimitsError::Sampler {
            reason: reason.to_owned(),
        })?;
        Ok(Self {
            pid,
            system: Mutex::new(System::new()),
        })
    }
}

impl MemorySampler for SysinfoSampler {
    fn sample(&self) -> Result<MemorySample, LimitsError> {
        let mut system = self.system.lock().map_err(|_| LimitsError::Sampler {
            reason: "sampler lock poisoned".to_owned(),
        })?;
        system.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        system
            .process(self.pid)
            .map(|process| MemorySample {
                resident: process.memory(),
                virtual_size: process.virtual_memory(),
            })
            .ok_or_else(|| LimitsError::Sampler {
                reason: format!("process {} not found", self.pid),
            })
    }
}

/// Signaller calling `kill` on the current process.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSignaller;

impl SelfSignaller for SystemSignaller {
    fn signal(&self, action: LimitAction) -> Result<(), LimitsError> {
        let signal = match action {
            LimitAction::Terminate => Signal::SIGTERM,
            LimitAction::Kill => Signal::SIGKILL,
        };
        kill(Pid::this(), signal).map_err(|source| LimitsError::Signal { action, source })
    }
}

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Below the threshold.
    Clear,
    /// Below the threshold after one or more breaches.
    Recovered,
    /// Above the threshold; `remaining` more breaches trigger the action.
    Breach {
        /// Checks left before acting.
        remaining: u32,
    },
    /// The streak reached the configured length; act now.
    Act,
    /// Still above the threshold after acting during this streak.
    Acted,
}

/// Counts consecutive breaches of a threshold.
///
/// The action fires once per streak; the counter resets as soon as a check
/// falls below the threshold.
#[derive(Debug, Default)]
pub struct BreachCounter {
    streak: u32,
    fired: bool,
}

impl BreachCounter {
    /// Records one check and returns what to do about it.
    pub fn observe(&mut self, breached: bool, num_breaches: u32) -> Verdict {
        if !breached {
            let recovered = self.streak > 0;
            self.streak = 0;
            self.fired = false;
            return if recovered {
                Verdict::Recovered
            } else {
                Verdict::Clear
            };
        }
        self.streak = self.streak.saturating_add(1);
        let needed = num_breaches.max(1);
        if self.streak < needed {
            return Verdict::Breach {
                remaining: needed - self.streak,
            };
        }
        if self.fired {
            return Verdict::Acted;
        }
        self.fired = true;
        Verdict::Act
    }

    /// Length of the current streak.
    #[must_use]
    pub const fn streak(&self) -> u32 {
        self.streak
    }
}

pub(crate) struct TimedCheck {
    kind: LimitKind,
    limit: TimedLimit,
    threshold: u64,
    counter: Mutex<BreachCounter>,
    sampler: Arc<dyn MemorySampler>,
    signaller: Arc<dyn SelfSignaller>,
}

impl TimedCheck {
    pub(crate) fn new(
        kind: LimitKind,
        limit: &TimedLimit,
        threshold: u64,
        sampler: Arc<dyn MemorySampler>,
        signaller: Arc<dyn SelfSignaller>,
    ) -> Self {
        Self {
            kind,
            limit: limit.clone(),
            threshold,
            counter: Mutex::new(BreachCounter::default()),
            sampler,
            signaller,
        }
    }

    /// Samples once and acts on the result. Errors are logged, never raised.
    pub(crate) fn run(&self) -> Option<Verdict> {
        let current = match self.sampler.sample() {
            Ok(sample) => sample.for_kind(self.kind)?,
            Err(error) => {
                error!(
                    target: LIMITS_TARGET,
                    limit = %self.kind,
                    error = %error,
                    "memory check failed"
                );
                return None;
            }
        };
        let Ok(mut counter) = self.counter.lock() else {
            error!(target: LIMITS_TARGET, limit = %self.kind, "breach counter poisoned");
            return None;
        };
        let verdict = counter.observe(current >= self.threshold, self.limit.num_breaches);
        let current_mb = current >> 20;
        match verdict {
            Verdict::Clear => {}
            Verdict::Recovered => warn!(
                target: LIMITS_TARGET,
                limit = %self.kind,
                value = self.limit.value,
                current_mb,
                "timed limit went below threshold"
            ),
            Verdict::Breach { remaining } => warn!(
                target: LIMITS_TARGET,
                limit = %self.kind,
                remaining,
                action = %self.limit.action,
                streak = counter.streak(),
                value = self.limit.value,
                current_mb,
                "timed limit reached"
            ),
            Verdict::Act => {
                warn!(
                    target: LIMITS_TARGET,
                    limit = %self.kind,
                    action = %self.limit.action,
                    streak = counter.streak(),
                    value = self.limit.value,
                    current_mb,
                    "timed limit reached, performing action"
                );
                if let Err(error) = self.signaller.signal(self.limit.action) {
                    error!(target: LIMITS_TARGET, error = %error, "timed limit action failed");
                }
            }
            Verdict::Acted => warn!(
                target: LIMITS_TARGET,
                limit = %self.kind,
                action = %self.limit.action,
                streak = counter.streak(),
                value = self.limit.value,
                current_mb,
                "timed limit still exceeded after action"
            ),
        }
        Some(verdict)
    }
}

/// Background ticker submitting timed checks to the worker pool.
#[derive(Debug)]
pub struct Watchdog {
    kind: LimitKind,
    stop: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Watchdog {
    /// Starts checking `limit` every tenth of its period.
    ///
    /// Returns `None` when the threshold is not positive.
    pub fn start(
        kind: LimitKind,
        limit: &TimedLimit,
        enforcement: &TimedEnforcement,
    ) -> Result<Option<Self>, LimitsError> {
        let threshold = match kind.to_native(limit.value) {
            Some(threshold) if threshold > 0 => threshold,
            _ => {
                warn!(
                    target: LIMITS_TARGET,
                    limit = %kind,
                    value = limit.value,
                    "timed limit is not positive; ignoring"
                );
                return Ok(None);
            }
        };
        let check = Arc::new(TimedCheck::new(
            kind,
            limit,
            threshold,
            Arc::clone(&enforcement.sampler),
            Arc::clone(&enforcement.signaller),
        ));
        let pool = Arc::clone(&enforcement.pool);
        let interval = limit.check_interval();
        let (stop, stopped) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name(format!("timed-{kind}"))
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            let check = Arc::clone(&check);
                            if let Err(error) = pool.execute(move || {
                                check.run();
                            }) {
                                warn!(target: LIMITS_TARGET, error = %error, "timed check skipped");
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .map_err(|source| LimitsError::Spawn { kind, source })?;
        info!(
            target: LIMITS_TARGET,
            limit = %kind,
            interval_ms = interval.as_millis(),
            "timed check started"
        );
        Ok(Some(Self {
            kind,
            stop: Some(stop),
            handle: Some(handle),
        }))
    }

    /// Limit being watched.
    #[must_use]
    pub const fn kind(&self) -> LimitKind {
        self.kind
    }

    /// Stops the ticker and waits for it to exit.
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.take();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!(target: LIMITS_TARGET, limit = %self.kind, "watchdog thread panicked");
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.halt();
    }
}
