use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub mod report;

pub use report::{ErrorReport, PackagesUpdated, RunReport};

/// Job request read from standard input.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PatchRequest {
    #[serde(default)]
    pub security_only: bool,
    #[serde(default)]
    pub reboot: Option<RebootSetting>,
    /// Kept loose so a malformed value is reported as an invalid timeout
    /// rather than as unparsable input.
    #[serde(default)]
    pub timeout: Option<serde_json::Value>,
    #[serde(default)]
    pub clean_cache: bool,
    #[serde(default)]
    pub yum_params: Option<String>,
    #[serde(default)]
    pub dpkg_params: Option<String>,
    #[serde(default)]
    pub zypper_params: Option<String>,
    #[serde(default)]
    pub pre_patching_command: Option<PathBuf>,
    #[serde(default, rename = "_installdir")]
    pub install_dir: Option<PathBuf>,
}

impl PatchRequest {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// A reboot preference as it appears in a request or in the `reboot_override`
/// fact: either a named mode, a boolean, or something unrecognised.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RebootSetting {
    Flag(bool),
    Named(String),
    Other(serde_json::Value),
}

impl fmt::Display for RebootSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebootSetting::Flag(value) => write!(f, "{value}"),
            RebootSetting::Named(value) => f.write_str(value),
            RebootSetting::Other(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RebootMode {
    Always,
    Never,
    Patched,
    Smart,
}

impl RebootMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RebootMode::Always => "always",
            RebootMode::Never => "never",
            RebootMode::Patched => "patched",
            RebootMode::Smart => "smart",
        }
    }
}

impl fmt::Display for RebootMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_with_only_timeout_uses_defaults() {
        let request = PatchRequest::parse(r#"{"timeout": 120}"#).expect("parse");
        assert!(!request.security_only);
        assert!(!request.clean_cache);
        assert_eq!(request.reboot, None);
        assert_eq!(request.timeout, Some(serde_json::json!(120)));
        assert_eq!(request.yum_params, None);
    }

    #[test]
    fn reboot_accepts_names_and_booleans() {
        let named = PatchRequest::parse(r#"{"timeout": 1, "reboot": "smart"}"#).expect("parse");
        assert_eq!(named.reboot, Some(RebootSetting::Named("smart".to_string())));

        let flag = PatchRequest::parse(r#"{"timeout": 1, "reboot": true}"#).expect("parse");
        assert_eq!(flag.reboot, Some(RebootSetting::Flag(true)));

        let other = PatchRequest::parse(r#"{"timeout": 1, "reboot": 3}"#).expect("parse");
        assert_eq!(other.reboot.expect("reboot").to_string(), "3");
    }

    #[test]
    fn install_dir_uses_underscore_key() {
        let request =
            PatchRequest::parse(r#"{"timeout": 1, "_installdir": "C:/tasks"}"#).expect("parse");
        assert_eq!(request.install_dir, Some(PathBuf::from("C:/tasks")));
    }

    #[test]
    fn empty_body_is_rejected() {
        assert!(PatchRequest::parse("").is_err());
        assert!(PatchRequest::parse("not json").is_err());
    }

    #[test]
    fn reboot_mode_serializes_lowercase() {
        let json = serde_json::to_string(&RebootMode::Patched).expect("serialize");
        assert_eq!(json, "\"patched\"");
    }
}
