//! Test double for [`BootReporter`] that records boot events for assertions.

use std::sync::Mutex;

use crate::boot::{BootError, BootReporter, BootStage};

/// Boot events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootEvent {
    /// A stage started.
    Starting(BootStage),
    /// A stage finished its work.
    Completed(BootStage),
    /// A stage had nothing to do.
    Skipped(BootStage),
    /// A stage failed with the given exit code.
    Failed(BootStage, i32),
    /// Handlers were attached.
    Serving(usize),
    /// Shutdown finished.
    Stopped,
}

/// Records boot events for assertions.
#[derive(Debug, Default)]
pub struct RecordingBootReporter {
    events: Mutex<Vec<BootEvent>>,
}

impl RecordingBootReporter {
    /// Captures a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<BootEvent> {
        self.events
            .lock()
            .expect("boot reporter mutex poisoned")
            .clone()
    }

    /// Stages that ran to completion or were skipped, in order.
    #[must_use]
    pub fn finished_stages(&self) -> Vec<BootStage> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                BootEvent::Completed(stage) | BootEvent::Skipped(stage) => Some(stage),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: BootEvent) {
        self.events
            .lock()
            .expect("boot reporter mutex poisoned")
            .push(event);
    }
}

impl BootReporter for RecordingBootReporter {
    fn stage_starting(&self, stage: BootStage) {
        self.record(BootEvent::Starting(stage));
    }

    fn stage_completed(&self, stage: BootStage) {
        self.record(BootEvent::Completed(stage));
    }

    fn stage_skipped(&self, stage: BootStage, _reason: &str) {
        self.record(BootEvent::Skipped(stage));
    }

    fn stage_failed(&self, stage: BootStage, error: &BootError) {
        self.record(BootEvent::Failed(stage, error.exit_code()));
    }

    fn serving(&self, listeners: usize) {
        self.record(BootEvent::Serving(listeners));
    }

    fn stopped(&self) {
        self.record(BootEvent::Stopped);
    }
}
