//! Structured reporting of boot stages.

use std::sync::Arc;

use strum::Display;

use super::{BOOT_TARGET, BootError};

/// Steps of the boot sequence, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum BootStage {
    /// Detaching from the controlling terminal.
    Daemonize,
    /// Changing into the configured working directory.
    WorkingDirectory,
    /// Writing the pid file.
    PidFile,
    /// Installing the log subscriber.
    Logging,
    /// Applying resource limits.
    Limits,
    /// Binding listener sockets.
    Listeners,
    /// Dropping root privileges.
    Privileges,
    /// Opening data stores.
    Stores,
}

/// Observer of boot progress.
pub trait BootReporter: Send + Sync {
    /// Invoked before a stage runs.
    fn stage_starting(&self, stage: BootStage);

    /// Invoked after a stage succeeds.
    fn stage_completed(&self, stage: BootStage);

    /// Invoked when a stage has nothing to do.
    fn stage_skipped(&self, stage: BootStage, reason: &str);

    /// Invoked when a stage fails.
    fn stage_failed(&self, stage: BootStage, error: &BootError);

    /// Invoked once handlers are attached and the daemon serves requests.
    fn serving(&self, listeners: usize);

    /// Invoked after the shutdown sequence finishes.
    fn stopped(&self);
}

impl<T> BootReporter for Arc<T>
where
    T: BootReporter + ?Sized,
{
    fn stage_starting(&self, stage: BootStage) {
        (**self).stage_starting(stage);
    }

    fn stage_completed(&self, stage: BootStage) {
        (**self).stage_completed(stage);
    }

    fn stage_skipped(&self, stage: BootStage, reason: &str) {
        (**self).stage_skipped(stage, reason);
    }

    fn stage_failed(&self, stage: BootStage, error: &BootError) {
        (**self).stage_failed(stage, error);
    }

    fn serving(&self, listeners: usize) {
        (**self).serving(listeners);
    }

    fn stopped(&self) {
        (**self).stopped();
    }
}

/// Default reporter that records boot events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredBootReporter;

impl StructuredBootReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl BootReporter for StructuredBootReporter {
    fn stage_starting(&self, stage: BootStage) {
        tracing::debug!(
            target: BOOT_TARGET,
            event = "stage_starting",
            stage = %stage,
            "boot stage starting"
        );
    }

    fn stage_completed(&self, stage: BootStage) {
        tracing::info!(
            target: BOOT_TARGET,
            event = "stage_completed",
            stage = %stage,
            "boot stage completed"
        );
    }

    fn stage_skipped(&self, stage: BootStage, reason: &str) {
        tracing::debug!(
            target: BOOT_TARGET,
            event = "stage_skipped",
            stage = %stage,
            reason,
            "boot stage skipped"
        );
    }

    fn stage_failed(&self, stage: BootStage, error: &BootError) {
        tracing::error!(
            target: BOOT_TARGET,
            event = "stage_failed",
            stage = %stage,
            exit_code = error.exit_code(),
            error = %error,
            "boot stage failed"
        );
    }

    fn serving(&self, listeners: usize) {
        tracing::info!(
            target: BOOT_TARGET,
            event = "serving",
            listeners,
            "daemon ready"
        );
    }

    fn stopped(&self) {
        tracing::info!(
            target: BOOT_TARGET,
            event = "stopped",
            "shutdown sequence completed"
        );
    }
}
