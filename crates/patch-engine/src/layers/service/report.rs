use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use patch_protocol::{ErrorReport, RunReport};

use crate::context::timestamp;
use crate::error::PatchError;
use crate::layers::service::history::{append_history, HistoryRecord};

/// Writes the single JSON document for a run and its history line, in that
/// order.
pub(crate) struct ReportingSink<W> {
    out: W,
    history_file: PathBuf,
}

impl<W: Write> ReportingSink<W> {
    pub(crate) fn new(out: W, history_file: PathBuf) -> Self {
        Self { out, history_file }
    }

    pub(crate) fn success(&mut self, report: &RunReport) -> i32 {
        self.emit(report);
        self.record(&HistoryRecord {
            start_time: report.start_time.clone(),
            message: report.message.clone(),
            code: report.return_code.clone(),
            reboot: report.reboot.to_string(),
            security: report.security_only.to_string(),
            job_id: report.job_id.clone(),
        });
        0
    }

    /// Reports a terminal error and returns the exit code it carries.
    pub(crate) fn failure(&mut self, err: &PatchError, started_at: &DateTime<Local>) -> i32 {
        let start_time = timestamp(started_at);
        let exit_code = err.exit_code();
        let report = ErrorReport::new(
            err.to_string(),
            err.kind(),
            exit_code,
            start_time.clone(),
            timestamp(&Local::now()),
        );
        self.emit(&report);
        self.record(&HistoryRecord::failure(start_time, err.summary(), exit_code));
        tracing::error!(
            kind = err.kind(),
            exit_code,
            tool = err.tool().unwrap_or_default(),
            message = %err,
            "patch run failed"
        );
        exit_code
    }

    fn emit<T: serde::Serialize>(&mut self, document: &T) {
        if let Err(err) = write_document(&mut self.out, document) {
            tracing::error!(error = %err, "failed to write run report");
        }
    }

    fn record(&self, record: &HistoryRecord) {
        if let Err(err) = append_history(&self.history_file, record) {
            tracing::error!(error = %format!("{err:#}"), "failed to append run history");
        }
    }

    #[cfg(test)]
    pub(crate) fn into_output(self) -> W {
        self.out
    }
}

fn write_document<W: Write, T: serde::Serialize>(out: &mut W, document: &T) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, document)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}
