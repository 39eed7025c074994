//! Test doubles and the scenario world for boot behaviour.

mod doubles;
mod logs;
mod reporter;
mod world;

pub use doubles::{IdentityCall, ImmediateShutdown, RecordingDaemonizer, RecordingPrivileges};
pub use logs::CapturedLogs;
pub use reporter::{BootEvent, RecordingBootReporter};
pub use world::{BootWorld, test_deps};
