//! Resource limit configuration.
//!
//! Values are written in human units (megabytes, hours, counts) and converted
//! to the native unit of each limit through [`LimitKind::multiplier`].

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

const MEGABYTE: u64 = 1024 * 1024;
const HOUR: u64 = 3600;

/// Process resource limits understood by the enforcer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum LimitKind {
    /// Maximum core file size.
    Core,
    /// Processor time.
    Cpu,
    /// Maximum size of a created file.
    Fsize,
    /// Heap size.
    Data,
    /// Main thread stack size.
    Stack,
    /// Resident set size.
    Rss,
    /// Number of processes.
    Nproc,
    /// Number of open file descriptors.
    Nofile,
    /// Locked memory.
    Memlock,
    /// Address space.
    As,
}

impl LimitKind {
    /// Factor converting the configured value into the native unit.
    #[must_use]
    pub const fn multiplier(self) -> u64 {
        match self {
            Self::Cpu => HOUR,
            Self::Nproc | Self::Nofile => 1,
            Self::Core | Self::Fsize | Self::Data | Self::Stack | Self::Rss | Self::Memlock | Self::As => {
                MEGABYTE
            }
        }
    }

    /// Human unit suffix used in configuration keys and log lines.
    #[must_use]
    pub const fn unit(self) -> &'static str {
        match self {
            Self::Cpu => "h",
            Self::Nproc | Self::Nofile => "",
            Self::Core | Self::Fsize | Self::Data | Self::Stack | Self::Rss | Self::Memlock | Self::As => {
                "mb"
            }
        }
    }

    /// Converts a configured value into the native unit.
    ///
    /// Returns `None` for negative or non-finite values.
    #[must_use]
    pub fn to_native(self, value: f64) -> Option<u64> {
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        let native = (value * self.multiplier() as f64).round();
        if native > u64::MAX as f64 {
            return Some(u64::MAX);
        }
        Some(native as u64)
    }
}

/// A set of immediate limits applied either as soft or hard values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Core file size in megabytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub core_mb: Option<f64>,
    /// CPU time in hours.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_h: Option<f64>,
    /// Created file size in megabytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fsize_mb: Option<f64>,
    /// Heap size in megabytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_mb: Option<f64>,
    /// Stack size in megabytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_mb: Option<f64>,
    /// Resident set size in megabytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rss_mb: Option<f64>,
    /// Process count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nproc: Option<f64>,
    /// Open file descriptor count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nofile: Option<f64>,
    /// Locked memory in megabytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memlock_mb: Option<f64>,
    /// Address space in megabytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_mb: Option<f64>,
}

impl Limits {
    /// Returns the configured value for `kind`.
    #[must_use]
    pub const fn get(&self, kind: LimitKind) -> Option<f64> {
        match kind {
            LimitKind::Core => self.core_mb,
            LimitKind::Cpu => self.cpu_h,
            LimitKind::Fsize => self.fsize_mb,
            LimitKind::Data => self.data_mb,
            LimitKind::Stack => self.stack_mb,
            LimitKind::Rss => self.rss_mb,
            LimitKind::Nproc => self.nproc,
            LimitKind::Nofile => self.nofile,
            LimitKind::Memlock => self.memlock_mb,
            LimitKind::As => self.as_mb,
        }
    }

    /// Configured limits paired with their kind, in table order.
    pub fn configured(&self) -> impl Iterator<Item = (LimitKind, f64)> + '_ {
        LimitKind::iter().filter_map(|kind| self.get(kind).map(|value| (kind, value)))
    }

    /// Whether no limit is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.configured().next().is_none()
    }
}

/// Action taken once a timed limit has been breached often enough.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
pub enum LimitAction {
    /// Ask the process to terminate.
    #[default]
    #[serde(rename = "SIGTERM")]
    #[strum(serialize = "SIGTERM")]
    Terminate,
    /// Kill the process.
    #[serde(rename = "SIGKILL")]
    #[strum(serialize = "SIGKILL")]
    Kill,
}

/// A threshold enforced by periodic sampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedLimit {
    /// Threshold in the limit's human unit.
    pub value: f64,
    /// Action performed when the breach streak reaches `num_breaches`.
    #[serde(default)]
    pub action: LimitAction,
    /// Sampling window in seconds; checks run every tenth of it.
    #[serde(default = "default_period_s")]
    pub period_s: u32,
    /// Consecutive breaches required before acting.
    #[serde(default = "default_num_breaches")]
    pub num_breaches: u32,
}

const fn default_period_s() -> u32 {
    60
}

const fn default_num_breaches() -> u32 {
    3
}

impl TimedLimit {
    /// Interval between two checks.
    #[must_use]
    pub fn check_interval(&self) -> std::time::Duration {
        let interval = std::time::Duration::from_secs(u64::from(self.period_s)) / 10;
        interval.max(std::time::Duration::from_millis(100))
    }
}

/// Limits enforced by sampling the process memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimedLimits {
    /// Resident set size threshold in megabytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rss_mb: Option<TimedLimit>,
    /// Virtual memory threshold in megabytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_mb: Option<TimedLimit>,
}

impl TimedLimits {
    /// Configured timed limits paired with their kind.
    pub fn configured(&self) -> impl Iterator<Item = (LimitKind, &TimedLimit)> {
        [
            (LimitKind::Rss, self.rss_mb.as_ref()),
            (LimitKind::As, self.as_mb.as_ref()),
        ]
        .into_iter()
        .filter_map(|(kind, limit)| limit.map(|limit| (kind, limit)))
    }
}

/// Soft, hard and timed limits applied in that order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsChoice {
    /// Soft limits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soft: Option<Limits>,
    /// Hard limits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hard: Option<Limits>,
    /// Sampled limits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timed: Option<TimedLimits>,
}

impl LimitsChoice {
    /// Whether nothing is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.soft.is_none() && self.hard.is_none() && self.timed.is_none()
    }
}
