//! Reads the node's fact snapshot through an external command.

use std::fmt;
use std::path::PathBuf;

use patch_protocol::RebootSetting;
use serde::{Deserialize, Deserializer};

use crate::error::{lossy, PatchError, GENERIC_FAILURE};
use crate::layers::execution::runner::CommandRunner;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum OsFamily {
    RedHat,
    Debian,
    Suse,
    Windows,
    Other(String),
}

impl OsFamily {
    pub(crate) fn from_fact(value: &str) -> Self {
        match value {
            "RedHat" => OsFamily::RedHat,
            "Debian" => OsFamily::Debian,
            "Suse" => OsFamily::Suse,
            "windows" => OsFamily::Windows,
            other => OsFamily::Other(other.to_string()),
        }
    }

    pub(crate) fn as_str(&self) -> &str {
        match self {
            OsFamily::RedHat => "RedHat",
            OsFamily::Debian => "Debian",
            OsFamily::Suse => "Suse",
            OsFamily::Windows => "windows",
            OsFamily::Other(other) => other,
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OsDescriptor {
    pub(crate) family: OsFamily,
    pub(crate) release_major: i64,
}

#[derive(Debug, Deserialize)]
struct OsFact {
    family: String,
    #[serde(default)]
    release: ReleaseFact,
}

#[derive(Debug, Default, Deserialize)]
struct ReleaseFact {
    #[serde(default, deserialize_with = "lenient_major")]
    major: i64,
}

/// The `os_patching` fact: what is pending and how the node wants it handled.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub(crate) struct PatchInventory {
    #[serde(default)]
    pub(crate) package_update_count: u64,
    #[serde(default)]
    pub(crate) security_package_update_count: u64,
    #[serde(default)]
    pub(crate) package_updates: Vec<String>,
    #[serde(default)]
    pub(crate) security_package_updates: Vec<String>,
    #[serde(default)]
    pub(crate) pinned_packages: Vec<String>,
    #[serde(default)]
    pub(crate) reboot_override: Option<RebootSetting>,
    #[serde(default)]
    pub(crate) blocked: bool,
    #[serde(default)]
    pub(crate) blocked_reasons: Vec<String>,
    #[serde(default)]
    pub(crate) pre_patching_command: Option<PathBuf>,
}

impl PatchInventory {
    pub(crate) fn update_count(&self, security_only: bool) -> u64 {
        if security_only {
            self.security_package_update_count
        } else {
            self.package_update_count
        }
    }

    /// The packages a run is expected to touch.
    pub(crate) fn updates(&self, security_only: bool) -> &[String] {
        if security_only {
            &self.security_package_updates
        } else {
            &self.package_updates
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Facts {
    pub(crate) os: OsDescriptor,
    pub(crate) inventory: PatchInventory,
}

pub(crate) struct FactsGateway<'a> {
    runner: &'a dyn CommandRunner,
    facts_command: &'a str,
    refresh_command: &'a str,
}

impl<'a> FactsGateway<'a> {
    pub(crate) fn new(
        runner: &'a dyn CommandRunner,
        facts_command: &'a str,
        refresh_command: &'a str,
    ) -> Self {
        Self {
            runner,
            facts_command,
            refresh_command,
        }
    }

    pub(crate) async fn gather(&self) -> Result<Facts, PatchError> {
        tracing::debug!(command = self.facts_command, "gathering facts");
        let captured = self
            .runner
            .capture(self.facts_command)
            .await
            .map_err(|err| PatchError::Facts {
                code: GENERIC_FAILURE,
                message: format!("{err:#}"),
            })?;
        if !captured.success() {
            return Err(PatchError::Facts {
                code: captured.code,
                message: lossy(captured.stderr.as_bytes()),
            });
        }
        parse_facts(&captured.stdout)
    }

    /// Regenerates the cached `os_patching` fact on the node.
    pub(crate) async fn refresh(&self) -> Result<(), PatchError> {
        tracing::info!("running os_patching fact refresh");
        let captured = self
            .runner
            .capture(self.refresh_command)
            .await
            .map_err(|err| PatchError::FactRefresh {
                code: GENERIC_FAILURE,
                stderr: format!("{err:#}"),
            })?;
        if captured.success() {
            Ok(())
        } else {
            Err(PatchError::FactRefresh {
                code: captured.code,
                stderr: lossy(captured.stderr.as_bytes()),
            })
        }
    }
}

pub(crate) fn parse_facts(body: &str) -> Result<Facts, PatchError> {
    let facts_error = |message: String| PatchError::Facts {
        code: 200,
        message,
    };
    let document: serde_json::Value = serde_json::from_str(body)
        .map_err(|err| facts_error(format!("Could not parse facts: {err}")))?;
    let (Some(os), Some(inventory)) = (document.get("os"), document.get("os_patching")) else {
        return Err(facts_error("Could not find facts".to_string()));
    };
    let os: OsFact = serde_json::from_value(os.clone())
        .map_err(|err| facts_error(format!("Invalid os fact: {err}")))?;
    let inventory: PatchInventory = serde_json::from_value(inventory.clone())
        .map_err(|err| facts_error(format!("Invalid os_patching fact: {err}")))?;
    Ok(Facts {
        os: OsDescriptor {
            family: OsFamily::from_fact(&os.family),
            release_major: os.release.major,
        },
        inventory,
    })
}

/// Release majors arrive as strings ("8") or numbers; anything without a
/// leading number counts as 0.
fn lenient_major<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|value| value as i64))
            .unwrap_or(0),
        serde_json::Value::String(text) => leading_int(&text),
        _ => 0,
    })
}

fn leading_int(text: &str) -> i64 {
    let digits: String = text
        .trim()
        .chars()
        .take_while(|ch| ch.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}
