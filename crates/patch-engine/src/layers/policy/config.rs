use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Engine configuration. Every value has a platform default, so the file is
/// optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct EngineConfig {
    #[serde(default)]
    pub(crate) paths: PathsConfig,
    #[serde(default)]
    pub(crate) commands: CommandsConfig,
    #[serde(default)]
    pub(crate) limits: LimitsConfig,
}

impl EngineConfig {
    pub(crate) fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct PathsConfig {
    /// Installed by the node's configuration run; its absence means the node
    /// was never set up for patching.
    pub(crate) fact_generation_script: PathBuf,
    pub(crate) fact_generation_command: String,
    pub(crate) facts_command: String,
    pub(crate) history_file: PathBuf,
    pub(crate) windows_patch_script: PathBuf,
    pub(crate) powershell: String,
    pub(crate) needs_restarting: PathBuf,
    pub(crate) reboot_required_marker: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        if cfg!(windows) {
            let powershell = format!(
                "{}/system32/WindowsPowerShell/v1.0/powershell.exe",
                env_or("SystemRoot", "C:/Windows")
            );
            let script = PathBuf::from("C:/ProgramData/os_patching/os_patching_fact_generation.ps1");
            Self {
                fact_generation_command: format!(
                    "{powershell} -ExecutionPolicy RemoteSigned -file {}",
                    script.display()
                ),
                fact_generation_script: script,
                facts_command: format!(
                    "\"{}/Puppet Labs/Puppet/bin/puppet\" facts",
                    env_or("ProgramFiles", "C:/Program Files")
                ),
                history_file: PathBuf::from("C:/ProgramData/os_patching/run_history"),
                windows_patch_script: PathBuf::from(
                    "C:/ProgramData/os_patching/os_patching_windows.ps1",
                ),
                powershell,
                needs_restarting: PathBuf::from("/usr/bin/needs-restarting"),
                reboot_required_marker: PathBuf::from("/var/run/reboot-required"),
            }
        } else {
            let script = PathBuf::from("/usr/local/bin/os_patching_fact_generation.sh");
            Self {
                fact_generation_command: script.display().to_string(),
                fact_generation_script: script,
                facts_command: "/opt/puppetlabs/puppet/bin/puppet facts".to_string(),
                history_file: PathBuf::from("/var/cache/os_patching/run_history"),
                windows_patch_script: PathBuf::from(
                    "C:/ProgramData/os_patching/os_patching_windows.ps1",
                ),
                powershell: "powershell".to_string(),
                needs_restarting: PathBuf::from("/usr/bin/needs-restarting"),
                reboot_required_marker: PathBuf::from("/var/run/reboot-required"),
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct CommandsConfig {
    pub(crate) shutdown: String,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        let shutdown = if cfg!(windows) {
            "shutdown /r /t 60 /c \"Rebooting due to the installation of updates by os_patching\" /d p:2:17"
        } else {
            "/sbin/shutdown -r +1"
        };
        Self {
            shutdown: shutdown.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct LimitsConfig {
    pub(crate) poll_interval_secs: u64,
    pub(crate) capture_timeout_secs: u64,
}

impl LimitsConfig {
    pub(crate) fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub(crate) fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs.max(1))
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            capture_timeout_secs: 3600,
        }
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string())
}
