use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use patch_protocol::{PatchRequest, RebootSetting};
use regex::Regex;

use crate::error::PatchError;

/// Characters that would let an extra-parameter string escape the package
/// manager command line.
static UNSAFE_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[$|/;`&]").expect("constant regex pattern is valid"));

/// Longest run a request may ask for: one week.
const MAX_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// A request that passed validation.
#[derive(Debug, Clone)]
pub(crate) struct JobParams {
    pub(crate) security_only: bool,
    pub(crate) reboot: Option<RebootSetting>,
    pub(crate) timeout: Duration,
    pub(crate) clean_cache: bool,
    pub(crate) yum_params: Option<String>,
    pub(crate) dpkg_params: Option<String>,
    pub(crate) zypper_params: Option<String>,
    pub(crate) pre_patching_command: Option<PathBuf>,
    pub(crate) install_dir: Option<PathBuf>,
}

impl JobParams {
    pub(crate) fn from_request(request: PatchRequest) -> Result<Self, PatchError> {
        let yum_params = checked_param("yum_params", request.yum_params)?;
        let dpkg_params = checked_param("dpkg_params", request.dpkg_params)?;
        let zypper_params = checked_param("zypper_params", request.zypper_params)?;
        let timeout = checked_timeout(request.timeout.as_ref())?;
        Ok(Self {
            security_only: request.security_only,
            reboot: request.reboot,
            timeout,
            clean_cache: request.clean_cache,
            yum_params,
            dpkg_params,
            zypper_params,
            pre_patching_command: request
                .pre_patching_command
                .filter(|path| !path.as_os_str().is_empty()),
            install_dir: request.install_dir,
        })
    }
}

fn checked_param(
    field: &'static str,
    value: Option<String>,
) -> Result<Option<String>, PatchError> {
    let Some(value) = value else {
        return Ok(None);
    };
    if UNSAFE_PARAM.is_match(&value) {
        return Err(PatchError::UnsafeParameter { field });
    }
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(trimmed.to_string()))
    }
}

fn checked_timeout(value: Option<&serde_json::Value>) -> Result<Duration, PatchError> {
    match value.and_then(serde_json::Value::as_u64) {
        Some(secs) if secs > 0 && secs <= MAX_TIMEOUT_SECS => Ok(Duration::from_secs(secs)),
        _ => Err(PatchError::InvalidTimeout {
            value: value.map(|value| value.to_string()).unwrap_or_default(),
        }),
    }
}
