use chrono::{DateTime, Local, SecondsFormat};

use crate::facts::{OsDescriptor, PatchInventory};

/// Everything a run knows about itself, passed explicitly to each component.
#[derive(Debug, Clone)]
pub(crate) struct RunContext {
    pub(crate) started_at: DateTime<Local>,
    pub(crate) os: OsDescriptor,
    pub(crate) inventory: PatchInventory,
    pub(crate) span: tracing::Span,
}

impl RunContext {
    pub(crate) fn start_time(&self) -> String {
        timestamp(&self.started_at)
    }
}

/// ISO 8601 with the local offset, to the second.
pub(crate) fn timestamp(time: &DateTime<Local>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Seconds between two instants, as reported in the run summary.
pub(crate) fn elapsed_secs(start: &DateTime<Local>, end: &DateTime<Local>) -> f64 {
    (*end - *start).num_milliseconds() as f64 / 1000.0
}
