//! Behavioural and integration suites for the boot runtime.

mod boot_behaviour;
pub(crate) mod support;
