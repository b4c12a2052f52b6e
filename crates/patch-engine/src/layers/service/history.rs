use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::Context;

/// One line of the run history file:
/// `start_time|message|code|reboot|security|job_id`.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct HistoryRecord {
    pub(crate) start_time: String,
    pub(crate) message: String,
    pub(crate) code: String,
    pub(crate) reboot: String,
    pub(crate) security: String,
    pub(crate) job_id: String,
}

impl HistoryRecord {
    /// Failed runs only carry the first line of the message and the exit code.
    pub(crate) fn failure(start_time: String, message: String, code: i32) -> Self {
        Self {
            start_time,
            message,
            code: code.to_string(),
            ..Self::default()
        }
    }

    pub(crate) fn line(&self) -> String {
        [
            self.start_time.as_str(),
            self.message.as_str(),
            self.code.as_str(),
            self.reboot.as_str(),
            self.security.as_str(),
            self.job_id.as_str(),
        ]
        .join("|")
    }
}

pub(crate) fn append_history(path: &Path, record: &HistoryRecord) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open history file {}", path.display()))?;
    writeln!(file, "{}", record.line())
        .with_context(|| format!("failed to append to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_leaves_trailing_fields_empty() {
        let record = HistoryRecord::failure(
            "2024-05-01T10:00:00+00:00".to_string(),
            "Patching blocked".to_string(),
            100,
        );
        assert_eq!(record.line(), "2024-05-01T10:00:00+00:00|Patching blocked|100|||");
    }

    #[test]
    fn appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache/run_history");
        let record = HistoryRecord {
            start_time: "2024-05-01T10:00:00+00:00".to_string(),
            message: "Patching complete".to_string(),
            code: "Success".to_string(),
            reboot: "never".to_string(),
            security: "false".to_string(),
            job_id: "42".to_string(),
        };
        append_history(&path, &record).unwrap();
        append_history(&path, &record).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "2024-05-01T10:00:00+00:00|Patching complete|Success|never|false|42"
        );
    }
}
