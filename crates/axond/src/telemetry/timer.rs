use std::fmt;
use std::sync::Arc;

use time::format_description::well_known::Rfc3339;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::{FormatTime, UtcTime};

use crate::limits::MemorySampler;

const MEGABYTE: f64 = 1_048_576.0;

/// RFC 3339 UTC timestamps, optionally prefixed with the resident set size
/// in megabytes.
#[derive(Clone)]
pub(super) struct LogTimer {
    rss: Option<Arc<dyn MemorySampler>>,
    clock: UtcTime<Rfc3339>,
}

impl LogTimer {
    pub(super) fn new(rss: Option<Arc<dyn MemorySampler>>) -> Self {
        Self {
            rss,
            clock: UtcTime::rfc_3339(),
        }
    }
}

impl FormatTime for LogTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        if let Some(sampler) = &self.rss {
            match sampler.sample() {
                Ok(sample) => write!(w, "[{:.2}] ", sample.resident as f64 / MEGABYTE)?,
                Err(_) => write!(w, "[rss?] ")?,
            }
        }
        self.clock.format_time(w)
    }
}
