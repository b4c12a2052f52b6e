use crate::RebootMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What a patch run changed. Package managers that expose a transaction log
/// report an action per package; the others report the names they were asked
/// to update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PackagesUpdated {
    Actions(BTreeMap<String, String>),
    Names(Vec<String>),
}

impl PackagesUpdated {
    pub fn none() -> Self {
        PackagesUpdated::Names(Vec::new())
    }

    pub fn len(&self) -> usize {
        match self {
            PackagesUpdated::Actions(actions) => actions.len(),
            PackagesUpdated::Names(names) => names.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PackagesUpdated {
    fn default() -> Self {
        Self::none()
    }
}

/// The document written to stdout when a run succeeds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub return_code: String,
    pub reboot: RebootMode,
    pub security_only: bool,
    pub message: String,
    pub packages_updated: PackagesUpdated,
    pub debug_output: String,
    pub job_id: String,
    pub pinned_packages: Vec<String>,
    pub start_time: String,
    pub end_time: String,
    /// Seconds between `start_time` and `end_time`.
    pub duration: f64,
    pub reboot_required: bool,
}

/// The document written to stdout when a run fails.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorReport {
    #[serde(rename = "_error")]
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    #[serde(rename = "msg")]
    pub message: String,
    pub kind: String,
    pub details: ErrorDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorDetails {
    pub exit_code: i32,
    pub start_time: String,
    pub end_time: String,
}

impl ErrorReport {
    pub fn new(
        message: impl Into<String>,
        kind: impl Into<String>,
        exit_code: i32,
        start_time: impl Into<String>,
        end_time: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorBody {
                message: message.into(),
                kind: kind.into(),
                details: ErrorDetails {
                    exit_code,
                    start_time: start_time.into(),
                    end_time: end_time.into(),
                },
            },
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.error.details.exit_code
    }
}
